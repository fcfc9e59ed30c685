use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use crate::db::{anomaly_repo, Database};
use crate::inference::{AdapterGate, Disposition};
use crate::model::row::{extract_timestamp, validate};
use crate::model::{FeatureRow, Job, NewAnomaly};
use crate::store::{AnomalyStore, JobLedger, StoreError};

use super::cancel::CancelRegistry;
use super::progress::{JobPhase, JobProgressBroadcaster, JobProgressTracker};
use super::request::JobRequest;
use super::EngineSettings;

/// Why scoring stopped before the last row.
enum Stop {
    Cancelled(String),
    Fatal(String),
}

/// Why a single row produced no anomaly.
enum RowError {
    Skip(String),
    Fatal(String),
}

/// Drives one job from `queued` to a terminal state.
#[derive(Clone)]
pub struct Runner {
    db: Database,
    jobs: JobLedger,
    gate: AdapterGate,
    settings: Arc<EngineSettings>,
    progress: JobProgressBroadcaster,
    registry: CancelRegistry,
}

impl Runner {
    pub fn new(
        db: Database,
        gate: AdapterGate,
        settings: Arc<EngineSettings>,
        progress: JobProgressBroadcaster,
        registry: CancelRegistry,
    ) -> Self {
        Self {
            jobs: JobLedger::new(db.clone()),
            db,
            gate,
            settings,
            progress,
            registry,
        }
    }

    /// Runs the job and returns it as stored at the end. Errors are store
    /// failures that left the job in whatever state it had reached.
    pub fn run(&self, req: JobRequest) -> Result<Job, StoreError> {
        let result = self.run_inner(&req);
        self.registry.remove(&req.job_id);
        result
    }

    fn run_inner(&self, req: &JobRequest) -> Result<Job, StoreError> {
        let _job_span = info_span!("job", job_id = %req.job_id, upload_id = %req.upload_id).entered();
        let tracker = self.progress.track(&req.job_id, &req.upload_id);
        debug!(
            waited_ms = req.submitted_at.elapsed().as_millis() as u64,
            "Job picked up"
        );

        if let Some(reason) = req.token.reason() {
            return self.finish_cancelled(&req.job_id, reason, &tracker);
        }

        let job = match self.jobs.claim(&req.job_id) {
            Ok(job) => job,
            // Cancelled while still queued.
            Err(StoreError::InvalidTransition { .. }) => return self.jobs.get(&req.job_id),
            Err(e) => return Err(e),
        };
        tracker.publish(&job, JobPhase::Running, "Scoring rows");

        let total = job.total_rows;
        let done = self
            .db
            .with_conn(|conn| anomaly_repo::row_indices(conn, &job.upload_id))?;
        let mut processed = done.iter().filter(|&&i| i < total).count() as u64;
        let mut skipped = 0u64;
        if processed > 0 {
            info!(already_scored = processed, "Resuming upload");
        }

        let batch_size = self.settings.batch_size.max(1);
        let mut stop = None;

        for (index, chunk) in req.rows.chunks(batch_size).enumerate() {
            let _batch_span = info_span!("batch", index).entered();
            let base = (index * batch_size) as u64;
            let mut pending = Vec::with_capacity(chunk.len());
            let mut batch_skipped = 0u64;

            for (offset, row) in chunk.iter().enumerate() {
                let row_index = base + offset as u64;
                if done.contains(&row_index) {
                    continue;
                }
                if let Some(reason) = req.token.reason() {
                    stop = Some(Stop::Cancelled(reason.to_string()));
                    break;
                }
                match self.score_row(&job, row_index, row) {
                    Ok(anomaly) => pending.push(anomaly),
                    Err(RowError::Skip(reason)) => {
                        debug!(row_index, "Skipping row: {}", reason);
                        batch_skipped += 1;
                    }
                    Err(RowError::Fatal(message)) => {
                        stop = Some(Stop::Fatal(message));
                        break;
                    }
                }
            }

            // Rows scored after a cancellation are dropped.
            if matches!(stop, Some(Stop::Cancelled(_))) {
                break;
            }

            let scored = pending.len() as u64;
            match self.flush(&job, &pending, processed + scored, skipped + batch_skipped) {
                Ok(progress) => {
                    processed += scored;
                    skipped += batch_skipped;
                    tracker.progress(progress, processed, skipped);
                }
                Err(StoreError::InvalidTransition { .. }) => {
                    let reason = req.token.reason().unwrap_or("cancelled");
                    stop = Some(Stop::Cancelled(reason.to_string()));
                }
                Err(e) => stop = Some(Stop::Fatal(format!("storage write failed: {}", e))),
            }

            if stop.is_some() {
                break;
            }
        }

        match stop {
            Some(Stop::Cancelled(reason)) => return self.finish_cancelled(&job.id, &reason, &tracker),
            Some(Stop::Fatal(message)) => return self.finish_failed(&job.id, &message, &tracker),
            None => {}
        }

        if skipped > 0 {
            warn!(skipped, total, "Rows skipped during scoring");
        }
        if skipped as f64 > self.settings.max_skip_ratio * total as f64 {
            let message = format!(
                "corrupt rows beyond tolerance: {} of {} rows skipped",
                skipped, total
            );
            return self.finish_failed(&job.id, &message, &tracker);
        }
        if let Some(reason) = req.token.reason() {
            return self.finish_cancelled(&job.id, reason, &tracker);
        }

        match self
            .jobs
            .complete(&job.id, processed, skipped, self.settings.thresholds.medium)
        {
            Ok(job) => {
                tracker.publish(&job, JobPhase::Completed, "Job completed");
                Ok(job)
            }
            Err(StoreError::InvalidTransition { .. }) => {
                let job = self.jobs.get(&job.id)?;
                tracker.publish(&job, JobPhase::Failed, "Job cancelled");
                Ok(job)
            }
            Err(e) => self.finish_failed(&job.id, &format!("storage write failed: {}", e), &tracker),
        }
    }

    fn score_row(&self, job: &Job, row_index: u64, row: &FeatureRow) -> Result<NewAnomaly, RowError> {
        validate(row).map_err(RowError::Skip)?;
        match self.gate.score(row) {
            Ok(score) => Ok(NewAnomaly {
                upload_id: job.upload_id.clone(),
                job_id: job.id.clone(),
                row_index,
                anomaly_score: score.anomaly_score,
                severity: self.settings.thresholds.classify(score.anomaly_score),
                row_timestamp: extract_timestamp(row, &self.settings.timestamp_field),
                feature_values: row.clone(),
                model_label: score.label,
            }),
            Err(e) => match e.disposition(self.settings.timeout_policy) {
                Disposition::SkipRow => Err(RowError::Skip(e.to_string())),
                Disposition::FailJob => Err(RowError::Fatal(e.to_string())),
            },
        }
    }

    /// Writes a batch and its progress in one transaction.
    fn flush(
        &self,
        job: &Job,
        pending: &[NewAnomaly],
        rows_processed: u64,
        rows_skipped: u64,
    ) -> Result<u8, StoreError> {
        self.db.with_tx(|tx| {
            for anomaly in pending {
                AnomalyStore::put_in(tx, anomaly)?;
            }
            JobLedger::advance_in(tx, job, rows_processed, rows_skipped)
        })
    }

    fn finish_cancelled(
        &self,
        job_id: &str,
        reason: &str,
        tracker: &JobProgressTracker,
    ) -> Result<Job, StoreError> {
        let job = match self.jobs.cancel(job_id, reason) {
            Ok(job) => job,
            // Already failed by whoever cancelled it.
            Err(StoreError::InvalidTransition { .. }) => self.jobs.get(job_id)?,
            Err(e) => return Err(e),
        };
        info!("Job cancelled: {}", reason);
        tracker.publish(&job, JobPhase::Failed, reason);
        Ok(job)
    }

    fn finish_failed(
        &self,
        job_id: &str,
        message: &str,
        tracker: &JobProgressTracker,
    ) -> Result<Job, StoreError> {
        let job = match self.jobs.fail(job_id, message) {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { .. }) => self.jobs.get(job_id)?,
            Err(e) => return Err(e),
        };
        tracker.publish(&job, JobPhase::Failed, "Job failed");
        Ok(job)
    }
}
