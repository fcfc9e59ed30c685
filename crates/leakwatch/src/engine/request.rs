use std::time::Instant;

use crate::model::FeatureRow;

use super::cancel::CancelToken;

/// A queued job handed to the worker pool.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub job_id: String,
    pub upload_id: String,
    /// Materialized rows in upload order; the position is the row index.
    pub rows: Vec<FeatureRow>,
    pub token: CancelToken,
    pub submitted_at: Instant,
}

impl JobRequest {
    pub fn new(job_id: &str, upload_id: &str, rows: Vec<FeatureRow>, token: CancelToken) -> Self {
        Self {
            job_id: job_id.to_string(),
            upload_id: upload_id.to_string(),
            rows,
            token,
            submitted_at: Instant::now(),
        }
    }
}
