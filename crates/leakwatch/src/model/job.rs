//! Job lifecycle: status vocabulary, transition table and the job record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a processing job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Queued,
        JobStatus::Running,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Returns true for `completed` and `failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStatus::Queued),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(other.to_string()),
        }
    }
}

/// Events that drive the job state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    /// A worker picked the job up.
    Claim,
    /// A batch of rows was scored and written.
    BatchScored,
    /// Every row was scored without a fatal error.
    Finish,
    /// An unrecoverable error stopped processing.
    Fail,
    /// A caller or an elapsed deadline cancelled the job.
    Cancel,
}

impl JobEvent {
    /// The status this event leads to when it is permitted.
    pub fn intended(&self) -> JobStatus {
        match self {
            JobEvent::Claim | JobEvent::BatchScored => JobStatus::Running,
            JobEvent::Finish => JobStatus::Completed,
            JobEvent::Fail | JobEvent::Cancel => JobStatus::Failed,
        }
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobEvent::Claim => "claim",
            JobEvent::BatchScored => "batch_scored",
            JobEvent::Finish => "finish",
            JobEvent::Fail => "fail",
            JobEvent::Cancel => "cancel",
        };
        f.write_str(name)
    }
}

/// The job transition table. Returns the target status, or `None` when the
/// event is not permitted from `from`.
pub fn transition(from: JobStatus, event: JobEvent) -> Option<JobStatus> {
    use JobEvent::*;
    use JobStatus::*;

    match (from, event) {
        (Queued, Claim) => Some(Running),
        (Running, BatchScored) => Some(Running),
        (Running, Finish) => Some(Completed),
        (Running, Fail) => Some(Failed),
        (Queued | Running, Cancel) => Some(Failed),
        _ => None,
    }
}

/// A processing run over one upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub upload_id: String,
    pub status: JobStatus,
    /// Percentage in 0..=100, never decreasing while running.
    pub progress: u8,
    pub total_rows: u64,
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub anomalies_found: u64,
    /// Wall-clock processing time in seconds, set on terminal transitions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
    /// Present iff `status == Failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Returns true if this job is finished (completed or failed).
    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Integer progress percentage, floored.
pub fn progress_percent(processed: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    let pct = processed.min(total).saturating_mul(100) / total;
    pct as u8
}
