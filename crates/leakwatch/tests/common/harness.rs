//! Test harness for isolated service instances.
//!
//! Each `TestHarness` owns a temporary directory holding its SQLite file and
//! a `ScriptedAdapter` whose behavior is driven by the rows themselves.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use leakwatch::inference::label_for;
use leakwatch::store::aggregation::derive;
use leakwatch::{
    AdapterError, AnomalyFilter, Config, Explanation, FeatureRow, InferenceAdapter, Job,
    Leakwatch, Page, Score, Snapshot, Upload,
};

/// Adapter whose answers come from the row: `score` is the anomaly score,
/// `fail` makes the model unavailable, `invalid` rejects the row and
/// `sleep_ms` delays the call.
pub struct ScriptedAdapter {
    thread_safe: bool,
    explain_delay: Duration,
    pub score_calls: AtomicUsize,
    pub explain_calls: AtomicUsize,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new() -> Self {
        Self {
            thread_safe: true,
            explain_delay: Duration::from_millis(20),
            score_calls: AtomicUsize::new(0),
            explain_calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    /// An adapter that must never be called concurrently.
    pub fn single_threaded() -> Self {
        Self {
            thread_safe: false,
            ..Self::new()
        }
    }

    pub fn explains(&self) -> usize {
        self.explain_calls.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ScriptedAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceAdapter for ScriptedAdapter {
    fn name(&self) -> &str {
        "scripted"
    }

    fn score(&self, row: &FeatureRow) -> Result<Score, AdapterError> {
        self.enter();
        self.score_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(ms) = row.get("sleep_ms").and_then(|v| v.as_u64()) {
            thread::sleep(Duration::from_millis(ms));
        }
        let result = if row.get("fail").and_then(|v| v.as_bool()) == Some(true) {
            Err(AdapterError::Unavailable("scripted outage".into()))
        } else if row.get("invalid").and_then(|v| v.as_bool()) == Some(true) {
            Err(AdapterError::InvalidInput("scripted rejection".into()))
        } else {
            let score = row.get("score").and_then(|v| v.as_f64()).unwrap_or(0.1);
            Ok(Score {
                anomaly_score: score,
                label: label_for(score).to_string(),
            })
        };
        self.leave();
        result
    }

    fn explain(&self, row: &FeatureRow) -> Result<Explanation, AdapterError> {
        self.explain_calls.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.explain_delay);
        let score = row.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
        Ok(Explanation::new(
            row.keys()
                .map(|k| {
                    let weight = if k == "refund_amount" { score } else { 0.0 };
                    (k.clone(), weight)
                })
                .collect(),
        ))
    }

    fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

/// Isolated service over a database in a temporary directory.
pub struct TestHarness {
    temp_dir: TempDir,
    pub adapter: Arc<ScriptedAdapter>,
    pub service: Leakwatch,
    pub config: Config,
}

impl TestHarness {
    pub fn new(config: Config) -> Self {
        Self::with_adapter(config, ScriptedAdapter::new())
    }

    pub fn with_adapter(mut config: Config, adapter: ScriptedAdapter) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        config.database_path = Some(temp_dir.path().join("data").join("leakwatch.db"));
        let adapter = Arc::new(adapter);
        let service =
            Leakwatch::open(&config, adapter.clone()).expect("Failed to open leakwatch");
        Self {
            temp_dir,
            adapter,
            service,
            config,
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database_path(&self) -> PathBuf {
        self.temp_dir.path().join("data").join("leakwatch.db")
    }

    /// Registers an upload sized for `rows`.
    pub fn upload(&self, rows: &[FeatureRow]) -> Upload {
        let columns = rows.first().map(|r| r.len()).unwrap_or(0) as u64;
        self.service
            .register_upload("billing.csv", rows.len() as u64, columns)
            .expect("Failed to register upload")
    }

    /// Submits the rows and waits for the job to finish.
    pub fn run(&self, upload_id: &str, rows: Vec<FeatureRow>) -> Job {
        let job = self
            .service
            .submit_job(upload_id, rows)
            .expect("Failed to submit job");
        self.wait(&job.id)
    }

    pub fn wait(&self, job_id: &str) -> Job {
        let job = self
            .service
            .wait_for_job(job_id, Duration::from_secs(20))
            .expect("Failed to read job");
        assert!(job.status.is_terminal(), "job {} did not finish: {:?}", job_id, job);
        job
    }

    /// All anomalies of an upload, highest score first.
    pub fn anomalies(&self, upload_id: &str) -> Vec<leakwatch::Anomaly> {
        self.service
            .list_anomalies(upload_id, &AnomalyFilter::default(), Page::new(0, 10_000))
            .expect("Failed to list anomalies")
            .items
    }
}

/// Checks the stored snapshot against a re-derivation over the uploads'
/// current rows.
pub fn assert_snapshot_consistent(service: &Leakwatch, upload_ids: &[String]) -> Snapshot {
    let snapshot = service.snapshot().expect("Failed to read snapshot");

    let mut uploads = Vec::new();
    let mut jobs = Vec::new();
    let mut anomalies = Vec::new();
    for id in upload_ids {
        uploads.push(service.get_upload(id).unwrap());
        jobs.extend(service.list_jobs(id).unwrap());
        anomalies.extend(
            service
                .list_anomalies(id, &AnomalyFilter::default(), Page::new(0, 10_000))
                .unwrap()
                .items,
        );
    }
    let derived = derive(&uploads, &jobs, &anomalies);

    assert_eq!(snapshot.total_uploads, derived.total_uploads);
    assert_eq!(snapshot.total_rows, derived.total_rows);
    assert_eq!(snapshot.total_anomalies, derived.total_anomalies);
    assert_eq!(snapshot.severity, derived.severity);
    assert_eq!(snapshot.unreviewed, derived.unreviewed);
    assert_eq!(snapshot.jobs, derived.jobs);
    assert_eq!(snapshot.last_updated, derived.last_updated);
    match (snapshot.average_score, derived.average_score) {
        (Some(a), Some(b)) => assert!((a - b).abs() < 1e-9, "average {} vs {}", a, b),
        (a, b) => assert_eq!(a, b),
    }
    snapshot
}
