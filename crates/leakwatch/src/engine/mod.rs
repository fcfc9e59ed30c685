//! Processing engine: turns submitted uploads into scored anomaly rows.
//!
//! A submission creates a queued job and hands the rows to a worker pool.
//! Each worker drives one job at a time through [`Runner`]. A watchdog
//! thread cancels jobs whose deadline has passed.

pub mod cancel;
pub mod pool;
pub mod progress;
pub mod request;
pub mod runner;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, WorkerError};
use crate::inference::{AdapterGate, TimeoutPolicy};
use crate::model::{FeatureRow, Job, SeverityThresholds};
use crate::store::jobs::INTERRUPTED;
use crate::store::{JobLedger, StoreError, UploadRegistry};

pub use cancel::{CancelRegistry, CancelToken};
pub use pool::WorkerPool;
pub use progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent, JobProgressTracker};
pub use request::JobRequest;
pub use runner::Runner;

/// Error message of jobs cancelled through [`Engine::cancel`].
pub const CANCELLED_BY_CALLER: &str = "cancelled by caller";
/// Error message of jobs that ran past their deadline.
pub const DEADLINE_EXCEEDED: &str = "cancelled: job deadline exceeded";

const WATCHDOG_INTERVAL: Duration = Duration::from_millis(20);

/// Knobs the engine reads while processing.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub worker_count: usize,
    pub batch_size: usize,
    pub thresholds: SeverityThresholds,
    pub timeout_policy: TimeoutPolicy,
    pub max_skip_ratio: f64,
    pub timestamp_field: String,
    /// Measured from submission.
    pub job_deadline: Option<Duration>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        let cap = config.adapter.max_concurrency.unwrap_or(usize::MAX);
        Self {
            worker_count: config.worker_count.min(cap).max(1),
            batch_size: config.batch_size,
            thresholds: config.severity,
            timeout_policy: config.adapter.timeout_policy,
            max_skip_ratio: config.max_skip_ratio,
            timestamp_field: config.timestamp_field.clone(),
            job_deadline: config.job_deadline(),
        }
    }
}

pub struct Engine {
    jobs: JobLedger,
    uploads: UploadRegistry,
    registry: CancelRegistry,
    progress: JobProgressBroadcaster,
    settings: Arc<EngineSettings>,
    pool: Mutex<Option<WorkerPool>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
    stop: Arc<AtomicBool>,
}

impl Engine {
    /// Starts the workers. Jobs a previous process left queued or running
    /// are failed first so their uploads can be resubmitted.
    pub fn new(
        db: Database,
        gate: AdapterGate,
        settings: EngineSettings,
        progress: JobProgressBroadcaster,
    ) -> Result<Self> {
        let jobs = JobLedger::new(db.clone());
        jobs.recover_interrupted()?;

        let worker_count = settings
            .worker_count
            .min(gate.max_concurrency().unwrap_or(usize::MAX))
            .max(1);
        let settings = Arc::new(settings);
        let registry = CancelRegistry::new();
        let runner = Runner::new(
            db.clone(),
            gate,
            Arc::clone(&settings),
            progress.clone(),
            registry.clone(),
        );
        let pool = WorkerPool::new(runner, worker_count)?;

        let stop = Arc::new(AtomicBool::new(false));
        let watchdog = match settings.job_deadline {
            Some(_) => Some(spawn_watchdog(
                registry.clone(),
                jobs.clone(),
                Arc::clone(&stop),
            )?),
            None => None,
        };

        Ok(Self {
            jobs,
            uploads: UploadRegistry::new(db),
            registry,
            progress,
            settings,
            pool: Mutex::new(Some(pool)),
            watchdog: Mutex::new(watchdog),
            stop,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn progress(&self) -> &JobProgressBroadcaster {
        &self.progress
    }

    /// Queues a job over `rows`, which must hold exactly the upload's
    /// declared row count in row-index order.
    pub fn submit(&self, upload_id: &str, rows: Vec<FeatureRow>) -> Result<Job> {
        let upload = self.uploads.get(upload_id)?;
        if rows.len() as u64 != upload.row_count {
            return Err(StoreError::Validation(format!(
                "upload {} declares {} rows but {} were submitted",
                upload_id,
                upload.row_count,
                rows.len()
            ))
            .into());
        }

        let job = self.jobs.submit(upload_id)?;
        let deadline = self.settings.job_deadline.map(|d| Instant::now() + d);
        let token = self.registry.register(&job.id, deadline);
        self.progress.send(JobProgressEvent::from_job(
            &job,
            JobPhase::Queued,
            "Job queued for processing",
        ));

        let submitted = {
            let pool = self.pool.lock().unwrap_or_else(PoisonError::into_inner);
            match pool.as_ref() {
                Some(pool) => pool.submit(JobRequest::new(&job.id, upload_id, rows, token)),
                None => Err(WorkerError::ChannelClosed),
            }
        };
        if let Err(e) = submitted {
            self.registry.remove(&job.id);
            if let Err(cancel_err) = self.jobs.cancel(&job.id, "worker pool unavailable") {
                log::error!("Failed to fail unscheduled job {}: {}", job.id, cancel_err);
            }
            return Err(e.into());
        }

        Ok(job)
    }

    /// Fails a queued or running job. Rows already committed stay.
    pub fn cancel(&self, job_id: &str) -> std::result::Result<Job, StoreError> {
        // The stored status decides; the token only stops the worker early.
        let job = self.jobs.cancel(job_id, CANCELLED_BY_CALLER)?;
        self.registry.cancel(job_id, CANCELLED_BY_CALLER);
        Ok(job)
    }

    /// Stops the watchdog and the workers. Jobs still queued or running are
    /// failed as interrupted. Safe to call more than once.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self
            .watchdog
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            if handle.join().is_err() {
                log::error!("Deadline watchdog panicked");
            }
        }

        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(pool) = pool else {
            return;
        };

        let interrupted = self.registry.cancel_all(INTERRUPTED);
        pool.shutdown();
        pool.wait();

        // Whatever is still registered never reached a worker.
        for job_id in interrupted {
            match self.jobs.cancel(&job_id, INTERRUPTED) {
                Ok(_) | Err(StoreError::InvalidTransition { .. }) => {}
                Err(e) => log::error!("Failed to fail interrupted job {}: {}", job_id, e),
            }
            self.registry.remove(&job_id);
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_watchdog(
    registry: CancelRegistry,
    jobs: JobLedger,
    stop: Arc<AtomicBool>,
) -> std::result::Result<JoinHandle<()>, WorkerError> {
    thread::Builder::new()
        .name("leakwatch-deadline".to_string())
        .spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                thread::sleep(WATCHDOG_INTERVAL);
                for job_id in registry.expire(Instant::now(), DEADLINE_EXCEEDED) {
                    match jobs.cancel(&job_id, DEADLINE_EXCEEDED) {
                        Ok(_) => log::warn!("Job {} exceeded its deadline", job_id),
                        // Finished first.
                        Err(StoreError::InvalidTransition { .. }) => {}
                        Err(e) => log::error!("Failed to cancel overdue job {}: {}", job_id, e),
                    }
                }
            }
        })
        .map_err(|e| WorkerError::SpawnFailed(e.to_string()))
}
