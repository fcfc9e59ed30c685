//! Job progress broadcaster for live dashboards.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Job, JobStatus};

/// What happened to the job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Running,
    Progress,
    Completed,
    Failed,
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Running => write!(f, "Running"),
            JobPhase::Progress => write!(f, "Scoring rows"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub upload_id: String,
    pub phase: JobPhase,
    /// Job status at the time of the event.
    pub status: JobStatus,
    pub progress: u8,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates an event describing the job as stored.
    pub fn from_job(job: &Job, phase: JobPhase, message: &str) -> Self {
        Self {
            job_id: job.id.clone(),
            upload_id: job.upload_id.clone(),
            phase,
            status: job.status,
            progress: job.progress,
            rows_processed: job.rows_processed,
            rows_skipped: job.rows_skipped,
            message: message.to_string(),
            timestamp: Utc::now(),
            error: job.error_message.clone(),
        }
    }
}

/// Broadcasts job progress events to any number of subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    /// Creates a tracker for one job.
    pub fn track(&self, job_id: &str, upload_id: &str) -> JobProgressTracker {
        JobProgressTracker {
            job_id: job_id.to_string(),
            upload_id: upload_id.to_string(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Emits the events of a single job.
pub struct JobProgressTracker {
    job_id: String,
    upload_id: String,
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressTracker {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }

    /// Publishes the job's stored state under `phase`.
    pub fn publish(&self, job: &Job, phase: JobPhase, message: &str) {
        let _ = self
            .sender
            .send(JobProgressEvent::from_job(job, phase, message));
    }

    /// Publishes batch progress without a fresh read of the job.
    pub fn progress(&self, progress: u8, rows_processed: u64, rows_skipped: u64) {
        let _ = self.sender.send(JobProgressEvent {
            job_id: self.job_id.clone(),
            upload_id: self.upload_id.clone(),
            phase: JobPhase::Progress,
            status: JobStatus::Running,
            progress,
            rows_processed,
            rows_skipped,
            message: format!("{} rows scored", rows_processed),
            timestamp: Utc::now(),
            error: None,
        });
    }
}
