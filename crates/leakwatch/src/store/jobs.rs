//! Job ledger: the durable record of processing runs and their state machine.
//!
//! Every state change reads the job, checks the transition table and then
//! issues an update conditional on the observed status, all inside one
//! transaction.

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use crate::db::job_repo::{self, Completion};
use crate::db::{anomaly_repo, now, upload_repo, Database};
use crate::model::job::progress_percent;
use crate::model::{transition, Job, JobEvent, JobStatus};

use super::StoreError;

/// Error message given to jobs found unfinished at startup.
pub const INTERRUPTED: &str = "interrupted before completion";

#[derive(Clone)]
pub struct JobLedger {
    db: Database,
}

/// Checks `event` against the transition table for `job`.
fn check(job: &Job, event: JobEvent) -> Result<JobStatus, StoreError> {
    transition(job.status, event).ok_or_else(|| StoreError::InvalidTransition {
        from: job.status.to_string(),
        to: event.intended().to_string(),
    })
}

fn load(conn: &Connection, job_id: &str) -> Result<Job, StoreError> {
    job_repo::find_by_id(conn, job_id)?.ok_or_else(|| StoreError::not_found("job", job_id))
}

fn elapsed_secs(started_at: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Option<f64> {
    started_at.map(|start| {
        let micros = (end - start).num_microseconds().unwrap_or(0).max(0);
        micros as f64 / 1_000_000.0
    })
}

impl JobLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Creates a queued job for the upload. Rejected with `AlreadyProcessing`
    /// while another job for the same upload is queued or running.
    pub fn submit(&self, upload_id: &str) -> Result<Job, StoreError> {
        let job = self.db.with_tx(|tx| {
            let upload = upload_repo::find_by_id(tx, upload_id)?
                .ok_or_else(|| StoreError::not_found("upload", upload_id))?;
            let ts = now();
            let job = Job {
                id: uuid::Uuid::new_v4().to_string(),
                upload_id: upload.id,
                status: JobStatus::Queued,
                progress: 0,
                total_rows: upload.row_count,
                rows_processed: 0,
                rows_skipped: 0,
                anomalies_found: 0,
                processing_time: None,
                error_message: None,
                created_at: ts,
                updated_at: ts,
                started_at: None,
                completed_at: None,
            };
            match job_repo::insert(tx, &job) {
                Ok(()) => Ok(job),
                Err(e) if e.is_unique_violation() => Err(StoreError::AlreadyProcessing {
                    upload_id: upload_id.to_string(),
                }),
                Err(e) => Err(e.into()),
            }
        })?;
        log::info!("Job {} queued for upload {}", job.id, job.upload_id);
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Job, StoreError> {
        self.db.with_conn(|conn| load(conn, job_id))
    }

    /// Jobs of one upload, newest first.
    pub fn list_by_upload(&self, upload_id: &str) -> Result<Vec<Job>, StoreError> {
        self.db.with_conn(|conn| {
            if !upload_repo::exists(conn, upload_id)? {
                return Err(StoreError::not_found("upload", upload_id));
            }
            Ok(job_repo::list_by_upload(conn, upload_id)?)
        })
    }

    /// queued -> running.
    pub fn claim(&self, job_id: &str) -> Result<Job, StoreError> {
        let job = self.db.with_tx(|tx| {
            let job = load(tx, job_id)?;
            check(&job, JobEvent::Claim)?;
            if job_repo::mark_running(tx, job_id, now())? == 0 {
                return Err(StoreError::InvalidTransition {
                    from: job.status.to_string(),
                    to: JobStatus::Running.to_string(),
                });
            }
            load(tx, job_id)
        })?;
        log::info!("Job {} running", job_id);
        Ok(job)
    }

    /// Records batch progress on a running job, inside the caller's
    /// transaction. Returns the new progress percentage.
    pub(crate) fn advance_in(
        conn: &Connection,
        job: &Job,
        rows_processed: u64,
        rows_skipped: u64,
    ) -> Result<u8, StoreError> {
        let progress = progress_percent(rows_processed + rows_skipped, job.total_rows);
        let n = job_repo::record_progress(conn, &job.id, rows_processed, rows_skipped, progress, now())?;
        if n == 0 {
            // Failed or cancelled underneath us.
            let current = load(conn, &job.id)?;
            return Err(StoreError::InvalidTransition {
                from: current.status.to_string(),
                to: JobEvent::BatchScored.intended().to_string(),
            });
        }
        Ok(progress)
    }

    /// running -> completed. `anomalies_found` is derived from the stored
    /// rows of the upload scoring at or above `flag_threshold`.
    pub fn complete(
        &self,
        job_id: &str,
        rows_processed: u64,
        rows_skipped: u64,
        flag_threshold: f64,
    ) -> Result<Job, StoreError> {
        let job = self.db.with_tx(|tx| {
            let job = load(tx, job_id)?;
            check(&job, JobEvent::Finish)?;
            let ts = now();
            let completion = Completion {
                rows_processed,
                rows_skipped,
                anomalies_found: anomaly_repo::count_at_or_above(
                    tx,
                    &job.upload_id,
                    flag_threshold,
                )?,
                processing_time: elapsed_secs(job.started_at, ts).unwrap_or(0.0),
            };
            if job_repo::mark_completed(tx, job_id, &completion, ts)? == 0 {
                return Err(StoreError::InvalidTransition {
                    from: job.status.to_string(),
                    to: JobStatus::Completed.to_string(),
                });
            }
            load(tx, job_id)
        })?;
        log::info!(
            "Job {} completed: {} rows, {} skipped, {} flagged in {:.2}s",
            job.id,
            job.rows_processed,
            job.rows_skipped,
            job.anomalies_found,
            job.processing_time.unwrap_or_default()
        );
        Ok(job)
    }

    /// running -> failed with the error detail recorded verbatim.
    pub fn fail(&self, job_id: &str, error_message: &str) -> Result<Job, StoreError> {
        self.terminate(job_id, JobEvent::Fail, error_message)
    }

    /// queued | running -> failed. Used for caller cancellation and elapsed
    /// deadlines.
    pub fn cancel(&self, job_id: &str, reason: &str) -> Result<Job, StoreError> {
        self.terminate(job_id, JobEvent::Cancel, reason)
    }

    /// Fails every job left queued or running by a previous process. Their
    /// committed rows stay, so a new submission resumes where they stopped.
    pub fn recover_interrupted(&self) -> Result<Vec<Job>, StoreError> {
        let active = self.db.with_conn(job_repo::list_active)?;
        let mut recovered = Vec::with_capacity(active.len());
        for job in active {
            match self.cancel(&job.id, INTERRUPTED) {
                Ok(job) => recovered.push(job),
                // Finished by someone else since the listing.
                Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        if !recovered.is_empty() {
            log::warn!("Recovered {} interrupted job(s)", recovered.len());
        }
        Ok(recovered)
    }

    fn terminate(&self, job_id: &str, event: JobEvent, message: &str) -> Result<Job, StoreError> {
        let job = self.db.with_tx(|tx| {
            let job = load(tx, job_id)?;
            check(&job, event)?;
            let ts = now();
            let n = job_repo::mark_failed(
                tx,
                job_id,
                job.status,
                message,
                elapsed_secs(job.started_at, ts),
                ts,
            )?;
            if n == 0 {
                return Err(StoreError::InvalidTransition {
                    from: job.status.to_string(),
                    to: JobStatus::Failed.to_string(),
                });
            }
            load(tx, job_id)
        })?;
        log::error!("Job {} failed ({}): {}", job.id, event, message);
        Ok(job)
    }
}
