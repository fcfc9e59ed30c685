//! Aggregation view: dashboard totals recomputed on every read.

use std::collections::HashSet;

use crate::db::{stats_repo, Database};
use crate::model::{
    Anomaly, Job, JobStatus, ReviewStatus, Severity, Snapshot, Upload,
};

use super::StoreError;

#[derive(Clone)]
pub struct AggregationView {
    db: Database,
}

impl AggregationView {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn snapshot(&self) -> Result<Snapshot, StoreError> {
        Ok(self.db.with_conn(stats_repo::snapshot)?)
    }
}

/// Computes the snapshot from in-memory rows. [`AggregationView::snapshot`]
/// must always agree with this over the same rows.
pub fn derive(uploads: &[Upload], jobs: &[Job], anomalies: &[Anomaly]) -> Snapshot {
    let mut snap = Snapshot::default();

    let with_jobs: HashSet<&str> = jobs.iter().map(|j| j.upload_id.as_str()).collect();
    snap.total_uploads = with_jobs.len() as u64;

    let finished: HashSet<&str> = jobs
        .iter()
        .filter(|j| j.status.is_terminal())
        .map(|j| j.upload_id.as_str())
        .collect();
    snap.total_rows = uploads
        .iter()
        .filter(|u| finished.contains(u.id.as_str()))
        .map(|u| u.row_count)
        .sum();

    snap.total_anomalies = anomalies.len() as u64;
    if !anomalies.is_empty() {
        let sum: f64 = anomalies.iter().map(|a| a.anomaly_score).sum();
        snap.average_score = Some(sum / anomalies.len() as f64);
    }
    for a in anomalies {
        match a.severity {
            Severity::High => snap.severity.high += 1,
            Severity::Medium => snap.severity.medium += 1,
            Severity::Low => snap.severity.low += 1,
        }
        if a.review_status == ReviewStatus::Unreviewed {
            snap.unreviewed += 1;
        }
    }

    for j in jobs {
        match j.status {
            JobStatus::Queued => snap.jobs.queued += 1,
            JobStatus::Running => snap.jobs.running += 1,
            JobStatus::Completed => snap.jobs.completed += 1,
            JobStatus::Failed => snap.jobs.failed += 1,
        }
    }
    snap.last_updated = jobs.iter().map(|j| j.updated_at).max();

    snap
}
