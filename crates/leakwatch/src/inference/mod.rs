//! Boundary to the anomaly model.
//!
//! The model is consumed as two functions over a single row: `score` and
//! `explain`. Everything behind [`InferenceAdapter`] is opaque to the
//! pipeline; [`AdapterGate`] adds the timeout and serialization the engine
//! relies on.

pub mod gate;
pub mod heuristic;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{Explanation, FeatureRow};

pub use gate::AdapterGate;
pub use heuristic::HeuristicAdapter;

/// Output of a scoring call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    /// In `[0.0, 1.0]`.
    pub anomaly_score: f64,
    pub label: String,
}

/// Errors an adapter call can produce.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    /// The model cannot serve requests. Always stops the job.
    #[error("Inference adapter unavailable: {0}")]
    Unavailable(String),

    /// The row cannot be scored. The row is skipped.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference call timed out after {0:?}")]
    Timeout(Duration),
}

/// What a timed-out adapter call means for the job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Fail the job.
    #[default]
    Fatal,
    /// Skip the row and count it.
    Skip,
}

/// Classification of an adapter error for a job in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    SkipRow,
    FailJob,
}

impl AdapterError {
    pub fn disposition(&self, timeout_policy: TimeoutPolicy) -> Disposition {
        match self {
            AdapterError::InvalidInput(_) => Disposition::SkipRow,
            AdapterError::Unavailable(_) => Disposition::FailJob,
            AdapterError::Timeout(_) => match timeout_policy {
                TimeoutPolicy::Fatal => Disposition::FailJob,
                TimeoutPolicy::Skip => Disposition::SkipRow,
            },
        }
    }
}

/// The anomaly model as seen by the pipeline.
///
/// Implementations must be deterministic enough that a cached explanation
/// stays meaningful for the stored score.
pub trait InferenceAdapter: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    fn score(&self, row: &FeatureRow) -> Result<Score, AdapterError>;

    /// Signed per-feature attribution for the row's score.
    fn explain(&self, row: &FeatureRow) -> Result<Explanation, AdapterError>;

    /// Upper bound on concurrent jobs this adapter can usefully serve.
    fn max_concurrency(&self) -> Option<usize> {
        None
    }

    /// Returns false if calls must never overlap.
    fn is_thread_safe(&self) -> bool {
        true
    }
}

/// Label vocabulary shared by the bundled adapter and test adapters.
pub fn label_for(score: f64) -> &'static str {
    if score > 0.7 {
        "anomaly"
    } else if score >= 0.5 {
        "suspicious"
    } else {
        "normal"
    }
}
