//! Domain types shared by the store, the engine and callers.

pub mod action;
pub mod anomaly;
pub mod explanation;
pub mod job;
pub mod row;
pub mod snapshot;
pub mod upload;

pub use action::{Action, ActionKind};
pub use anomaly::{
    Anomaly, AnomalyFilter, NewAnomaly, Page, Paged, ReviewStatus, Severity, SeverityThresholds,
};
pub use explanation::Explanation;
pub use job::{transition, Job, JobEvent, JobStatus};
pub use row::FeatureRow;
pub use snapshot::{JobStatusCounts, SeverityCounts, Snapshot};
pub use upload::Upload;
