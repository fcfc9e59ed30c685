//! The caller-facing surface: one handle over the stores and the engine.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::{validate_config, Config};
use crate::db::{default_database_path, Database};
use crate::engine::{Engine, EngineSettings, JobProgressBroadcaster, JobProgressEvent};
use crate::error::{ConfigError, Result};
use crate::inference::{AdapterGate, InferenceAdapter};
use crate::model::{
    Action, ActionKind, Anomaly, AnomalyFilter, Explanation, FeatureRow, Job, Page, Paged,
    ReviewStatus, Snapshot, Upload,
};
use crate::store::{
    ActionLedger, AggregationView, AnomalyStore, ExplanationCache, JobLedger, UploadRegistry,
};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct Leakwatch {
    uploads: UploadRegistry,
    jobs: JobLedger,
    anomalies: AnomalyStore,
    explanations: ExplanationCache,
    actions: ActionLedger,
    aggregation: AggregationView,
    engine: Engine,
}

impl Leakwatch {
    /// Opens the configured database (creating it if needed) and starts the
    /// engine.
    pub fn open(config: &Config, adapter: Arc<dyn InferenceAdapter>) -> Result<Self> {
        validate_config(config)?;
        let path = match &config.database_path {
            Some(path) => path.clone(),
            None => default_database_path().ok_or_else(|| ConfigError::Validation {
                message: "cannot resolve a home directory for the default database path"
                    .to_string(),
            })?,
        };
        let db = Database::open(&path)?;
        Self::with_database(db, config, adapter)
    }

    /// Same as [`Leakwatch::open`] over a fresh in-memory database.
    pub fn in_memory(config: &Config, adapter: Arc<dyn InferenceAdapter>) -> Result<Self> {
        validate_config(config)?;
        Self::with_database(Database::open_in_memory()?, config, adapter)
    }

    pub fn with_database(
        db: Database,
        config: &Config,
        adapter: Arc<dyn InferenceAdapter>,
    ) -> Result<Self> {
        let gate = AdapterGate::new(adapter, config.adapter.timeout());
        log::info!(
            "Starting leakwatch with adapter '{}' (timeout {:?})",
            gate.name(),
            gate.timeout()
        );
        let engine = Engine::new(
            db.clone(),
            gate.clone(),
            EngineSettings::from_config(config),
            JobProgressBroadcaster::new(config.progress_channel_capacity),
        )?;

        Ok(Self {
            uploads: UploadRegistry::new(db.clone()),
            jobs: JobLedger::new(db.clone()),
            anomalies: AnomalyStore::new(db.clone()),
            explanations: ExplanationCache::new(db.clone(), gate),
            actions: ActionLedger::new(db.clone()),
            aggregation: AggregationView::new(db),
            engine,
        })
    }

    // Uploads

    pub fn register_upload(
        &self,
        filename: &str,
        row_count: u64,
        column_count: u64,
    ) -> Result<Upload> {
        Ok(self.uploads.register(filename, row_count, column_count)?)
    }

    pub fn get_upload(&self, upload_id: &str) -> Result<Upload> {
        Ok(self.uploads.get(upload_id)?)
    }

    pub fn delete_upload(&self, upload_id: &str) -> Result<()> {
        Ok(self.uploads.delete(upload_id)?)
    }

    // Jobs

    /// Accepts rows for processing and returns the queued job.
    pub fn submit_job(&self, upload_id: &str, rows: Vec<FeatureRow>) -> Result<Job> {
        self.engine.submit(upload_id, rows)
    }

    pub fn job_status(&self, job_id: &str) -> Result<Job> {
        Ok(self.jobs.get(job_id)?)
    }

    pub fn list_jobs(&self, upload_id: &str) -> Result<Vec<Job>> {
        Ok(self.jobs.list_by_upload(upload_id)?)
    }

    /// Polls until the job is terminal or `timeout` elapses, and returns
    /// the job as last read.
    pub fn wait_for_job(&self, job_id: &str, timeout: Duration) -> Result<Job> {
        let deadline = Instant::now() + timeout;
        loop {
            let job = self.jobs.get(job_id)?;
            if job.status.is_terminal() || Instant::now() >= deadline {
                return Ok(job);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    pub fn cancel_job(&self, job_id: &str) -> Result<Job> {
        Ok(self.engine.cancel(job_id)?)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.engine.progress().subscribe()
    }

    // Anomalies

    pub fn list_anomalies(
        &self,
        upload_id: &str,
        filter: &AnomalyFilter,
        page: Page,
    ) -> Result<Paged<Anomaly>> {
        Ok(self.anomalies.list_by_upload(upload_id, filter, page)?)
    }

    pub fn get_anomaly(&self, anomaly_id: &str) -> Result<Anomaly> {
        Ok(self.anomalies.get(anomaly_id)?)
    }

    pub fn mark_review_state(&self, anomaly_id: &str, state: ReviewStatus) -> Result<Anomaly> {
        Ok(self.anomalies.mark_review_state(anomaly_id, state)?)
    }

    /// Returns the anomaly's explanation, computing it on first request.
    pub fn explanation(&self, anomaly_id: &str) -> Result<Explanation> {
        Ok(self.explanations.get_or_compute(anomaly_id)?)
    }

    /// Readable summary of the `top_n` strongest contributors.
    pub fn explanation_summary(&self, anomaly_id: &str, top_n: usize) -> Result<String> {
        let explanation = self.explanations.get_or_compute(anomaly_id)?;
        let anomaly = self.anomalies.get(anomaly_id)?;
        Ok(explanation.summary(&anomaly.feature_values, top_n))
    }

    // Actions

    pub fn record_action(
        &self,
        anomaly_id: &str,
        kind: ActionKind,
        note: Option<&str>,
        actor: Option<&str>,
    ) -> Result<Action> {
        Ok(self.actions.record(anomaly_id, kind, note, actor)?)
    }

    pub fn list_actions(&self, anomaly_id: &str) -> Result<Vec<Action>> {
        Ok(self.actions.list(anomaly_id)?)
    }

    // Aggregates

    pub fn snapshot(&self) -> Result<Snapshot> {
        Ok(self.aggregation.snapshot()?)
    }

    /// Stops the engine. Unfinished jobs are failed as interrupted.
    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}
