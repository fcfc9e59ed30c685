//! Durable stores over the database: uploads, jobs, anomalies, explanations,
//! actions and the aggregation view.

pub mod actions;
pub mod aggregation;
pub mod anomalies;
pub mod error;
pub mod explanations;
pub mod jobs;
pub mod uploads;

pub use actions::ActionLedger;
pub use aggregation::AggregationView;
pub use anomalies::AnomalyStore;
pub use error::StoreError;
pub use explanations::ExplanationCache;
pub use jobs::JobLedger;
pub use uploads::UploadRegistry;
