pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod inference;
pub mod model;
pub mod service;
pub mod store;
pub mod telemetry;

pub use config::{load_config, load_config_from_str, Config, LogFormat, LoggingConfig};
pub use db::{Database, DatabaseError};
pub use engine::{Engine, EngineSettings, JobPhase, JobProgressBroadcaster, JobProgressEvent};
pub use error::{ConfigError, LeakwatchError, Result, WorkerError};
pub use inference::{
    AdapterError, AdapterGate, HeuristicAdapter, InferenceAdapter, Score, TimeoutPolicy,
};
pub use model::{
    Action, ActionKind, Anomaly, AnomalyFilter, Explanation, FeatureRow, Job, JobStatus, Page,
    Paged, ReviewStatus, Severity, SeverityThresholds, Snapshot, Upload,
};
pub use service::Leakwatch;
pub use store::StoreError;
pub use telemetry::{init_logging, TelemetryError};
