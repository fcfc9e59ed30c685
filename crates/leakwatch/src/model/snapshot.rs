use chrono::{DateTime, Utc};
use serde::Serialize;

/// Anomaly counts per severity tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCounts {
    pub high: u64,
    pub medium: u64,
    pub low: u64,
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStatusCounts {
    pub queued: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Dashboard totals derived from the current jobs and anomalies. Never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Distinct uploads that have at least one job.
    pub total_uploads: u64,
    /// Sum of declared row counts over uploads with a finished job.
    pub total_rows: u64,
    pub total_anomalies: u64,
    /// `None` when no anomaly exists.
    pub average_score: Option<f64>,
    pub severity: SeverityCounts,
    pub unreviewed: u64,
    pub jobs: JobStatusCounts,
    /// Most recent job update.
    pub last_updated: Option<DateTime<Utc>>,
}
