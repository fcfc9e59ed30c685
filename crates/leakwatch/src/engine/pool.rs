use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;

use super::request::JobRequest;
use super::runner::Runner;

/// Fixed set of threads, each running one job at a time.
pub struct WorkerPool {
    job_sender: Sender<JobRequest>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn new(runner: Runner, worker_count: usize) -> Result<Self, WorkerError> {
        let worker_count = worker_count.max(1);
        // Jobs wait here while every worker is busy; the ledger already
        // shows them as queued.
        let (job_sender, job_receiver) = unbounded::<JobRequest>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let job_rx = job_receiver.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_runner = runner.clone();

            let handle = thread::Builder::new()
                .name(format!("leakwatch-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, job_rx, shutdown_flag, worker_runner))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Ok(Self {
            job_sender,
            workers,
            shutdown,
        })
    }

    /// Queues a job for the next free worker. Never blocks.
    pub fn submit(&self, job: JobRequest) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.job_sender
            .send(job)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        drop(self.job_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    job_receiver: Receiver<JobRequest>,
    shutdown: Arc<AtomicBool>,
    runner: Runner,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match job_receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(job) => {
                debug!("Worker {} processing job {}", worker_id, job.job_id);
                let job_id = job.job_id.clone();
                if let Err(e) = runner.run(job) {
                    error!("Worker {} failed to run job {}: {}", worker_id, job_id, e);
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} job channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::engine::cancel::{CancelRegistry, CancelToken};
    use crate::engine::progress::JobProgressBroadcaster;
    use crate::engine::EngineSettings;
    use crate::inference::{AdapterGate, HeuristicAdapter};
    use crate::model::{FeatureRow, JobStatus};
    use crate::store::{JobLedger, UploadRegistry};
    use serde_json::json;
    use std::time::Instant;

    fn pool(db: &Database, workers: usize) -> WorkerPool {
        let runner = Runner::new(
            db.clone(),
            AdapterGate::new(Arc::new(HeuristicAdapter::new()), Duration::from_secs(5)),
            Arc::new(EngineSettings::default()),
            JobProgressBroadcaster::default(),
            CancelRegistry::new(),
        );
        WorkerPool::new(runner, workers).unwrap()
    }

    fn row(refund: f64) -> FeatureRow {
        let mut row = FeatureRow::new();
        row.insert("invoice_amount".into(), json!(100.0));
        row.insert("refund_amount".into(), json!(refund));
        row
    }

    #[test]
    fn test_pool_runs_submitted_jobs() {
        let db = Database::open_in_memory().unwrap();
        let uploads = UploadRegistry::new(db.clone());
        let jobs = JobLedger::new(db.clone());
        let pool = pool(&db, 2);
        assert_eq!(pool.worker_count(), 2);

        let mut ids = Vec::new();
        for _ in 0..3 {
            let upload = uploads.register("billing.csv", 2, 2).unwrap();
            let job = jobs.submit(&upload.id).unwrap();
            let rows = vec![row(0.0), row(90.0)];
            pool.submit(JobRequest::new(&job.id, &upload.id, rows, CancelToken::new()))
                .unwrap();
            ids.push(job.id);
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline
            && !ids
                .iter()
                .all(|id| jobs.get(id).unwrap().status.is_terminal())
        {
            thread::sleep(Duration::from_millis(10));
        }
        for id in &ids {
            assert_eq!(jobs.get(id).unwrap().status, JobStatus::Completed);
        }

        pool.shutdown();
        assert!(pool.is_shutdown());
        let upload = uploads.register("late.csv", 1, 2).unwrap();
        let job = jobs.submit(&upload.id).unwrap();
        assert!(matches!(
            pool.submit(JobRequest::new(&job.id, &upload.id, vec![row(1.0)], CancelToken::new())),
            Err(WorkerError::ChannelClosed)
        ));
        pool.wait();
    }
}
