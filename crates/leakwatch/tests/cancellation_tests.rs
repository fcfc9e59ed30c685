//! Caller cancellation, deadlines, shutdown and restart recovery.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use common::{scored_rows, slow_rows, ConfigBuilder, ScriptedAdapter, TestHarness};
use leakwatch::engine::{CANCELLED_BY_CALLER, DEADLINE_EXCEEDED};
use leakwatch::store::jobs::INTERRUPTED;
use leakwatch::store::{JobLedger, UploadRegistry};
use leakwatch::{Database, JobStatus, Leakwatch, LeakwatchError, StoreError};

fn wait_for_status(h: &TestHarness, job_id: &str, status: JobStatus) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if h.service.job_status(job_id).unwrap().status == status {
            return;
        }
        thread::sleep(Duration::from_millis(5));
    }
    panic!("job {} never reached {}", job_id, status);
}

#[test]
fn test_cancel_running_job() {
    let h = TestHarness::new(ConfigBuilder::new().batch_size(2).build());
    let rows = slow_rows(50, 20);
    let upload = h.upload(&rows);
    let job = h.service.submit_job(&upload.id, rows).unwrap();
    wait_for_status(&h, &job.id, JobStatus::Running);

    let cancelled = h.service.cancel_job(&job.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert_eq!(cancelled.error_message.as_deref(), Some(CANCELLED_BY_CALLER));

    // The runner notices within a row and stops scoring.
    thread::sleep(Duration::from_millis(150));
    let calls = h.adapter.score_calls.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(150));
    assert_eq!(h.adapter.score_calls.load(Ordering::SeqCst), calls);
    assert!(calls < 50);

    let job = h.service.job_status(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(CANCELLED_BY_CALLER));
    assert!(h.anomalies(&upload.id).len() < 50);
}

#[test]
fn test_cancel_queued_job() {
    let h = TestHarness::new(ConfigBuilder::new().worker_count(1).build());
    let busy_rows = slow_rows(10, 30);
    let busy = h.upload(&busy_rows);
    let busy_job = h.service.submit_job(&busy.id, busy_rows).unwrap();

    let rows = scored_rows(&[0.9, 0.1]);
    let waiting = h.upload(&rows);
    let waiting_job = h.service.submit_job(&waiting.id, rows).unwrap();

    let cancelled = h.service.cancel_job(&waiting_job.id).unwrap();
    assert_eq!(cancelled.status, JobStatus::Failed);
    assert!(cancelled.started_at.is_none());

    assert_eq!(h.wait(&busy_job.id).status, JobStatus::Completed);
    thread::sleep(Duration::from_millis(100));
    let waiting_job = h.service.job_status(&waiting_job.id).unwrap();
    assert_eq!(waiting_job.status, JobStatus::Failed);
    assert!(waiting_job.started_at.is_none());
    assert!(h.anomalies(&waiting.id).is_empty());
}

#[test]
fn test_cancel_finished_job_is_rejected() {
    let h = TestHarness::new(ConfigBuilder::new().build());
    let rows = scored_rows(&[0.1]);
    let upload = h.upload(&rows);
    let job = h.run(&upload.id, rows);
    assert_eq!(job.status, JobStatus::Completed);

    assert!(matches!(
        h.service.cancel_job(&job.id),
        Err(LeakwatchError::Store(StoreError::InvalidTransition { .. }))
    ));
    assert!(matches!(
        h.service.cancel_job("missing"),
        Err(LeakwatchError::Store(StoreError::NotFound { .. }))
    ));
}

#[test]
fn test_deadline_fails_job() {
    let h = TestHarness::new(ConfigBuilder::new().job_deadline_secs(1).build());
    let rows = slow_rows(60, 50);
    let upload = h.upload(&rows);
    let started = Instant::now();
    let job = h.service.submit_job(&upload.id, rows).unwrap();

    let job = h.wait(&job.id);
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(DEADLINE_EXCEEDED));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(h.anomalies(&upload.id).len() < 60);

    // The upload can be processed again afterwards.
    let retry = h.service.submit_job(&upload.id, scored_rows(&[0.1; 60]));
    assert!(retry.is_ok());
}

#[test]
fn test_shutdown_interrupts_running_jobs() {
    let h = TestHarness::new(ConfigBuilder::new().build());
    let rows = slow_rows(40, 25);
    let upload = h.upload(&rows);
    let job = h.service.submit_job(&upload.id, rows).unwrap();
    wait_for_status(&h, &job.id, JobStatus::Running);

    h.service.shutdown();

    let job = h.service.job_status(&job.id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED));

    // Nothing is accepted once stopped; the new job is failed right away.
    let rows = scored_rows(&[0.1]);
    let other = h.upload(&rows);
    assert!(matches!(
        h.service.submit_job(&other.id, rows),
        Err(LeakwatchError::Worker(_))
    ));
    let jobs = h.service.list_jobs(&other.id).unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].status, JobStatus::Failed);
}

#[test]
fn test_restart_recovers_unfinished_jobs() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("leakwatch.db");

    // A previous process accepted a job and went away.
    let (upload_id, job_id) = {
        let db = Database::open(&path).unwrap();
        let upload = UploadRegistry::new(db.clone())
            .register("billing.csv", 2, 4)
            .unwrap();
        let job = JobLedger::new(db).submit(&upload.id).unwrap();
        (upload.id, job.id)
    };

    let mut config = ConfigBuilder::new().build();
    config.database_path = Some(path);
    let service = Leakwatch::open(&config, Arc::new(ScriptedAdapter::new())).unwrap();

    let job = service.job_status(&job_id).unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error_message.as_deref(), Some(INTERRUPTED));

    let job = service
        .submit_job(&upload_id, scored_rows(&[0.2, 0.95]))
        .unwrap();
    let job = service
        .wait_for_job(&job.id, Duration::from_secs(20))
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.anomalies_found, 1);
    service.shutdown();
}
