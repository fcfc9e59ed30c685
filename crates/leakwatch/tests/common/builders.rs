//! Builders for configs and input rows.

#![allow(dead_code)]

use serde_json::{json, Value};

use leakwatch::{Config, FeatureRow, TimeoutPolicy};

/// Builder for `Config` instances with small, test-friendly values.
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        let mut config = Config::default();
        config.worker_count = 2;
        config.batch_size = 4;
        config.adapter.timeout_ms = 2_000;
        Self { config }
    }

    pub fn worker_count(mut self, n: usize) -> Self {
        self.config.worker_count = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn adapter_timeout_ms(mut self, ms: u64) -> Self {
        self.config.adapter.timeout_ms = ms;
        self
    }

    pub fn timeout_policy(mut self, policy: TimeoutPolicy) -> Self {
        self.config.adapter.timeout_policy = policy;
        self
    }

    pub fn job_deadline_secs(mut self, secs: u64) -> Self {
        self.config.job_deadline_secs = Some(secs);
        self
    }

    pub fn max_skip_ratio(mut self, ratio: f64) -> Self {
        self.config.max_skip_ratio = ratio;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one billing row. The scripted adapter reads `score`,
/// `fail`, `invalid` and `sleep_ms`.
pub struct RowBuilder {
    row: FeatureRow,
}

impl RowBuilder {
    pub fn new(score: f64) -> Self {
        let mut row = FeatureRow::new();
        row.insert("invoice_amount".into(), json!(100.0));
        row.insert("refund_amount".into(), json!(score * 100.0));
        row.insert("invoice_date".into(), json!("2024-03-01"));
        row.insert("score".into(), json!(score));
        Self { row }
    }

    pub fn set(mut self, key: &str, value: Value) -> Self {
        self.row.insert(key.to_string(), value);
        self
    }

    /// The adapter reports itself unavailable on this row.
    pub fn failing(self) -> Self {
        self.set("fail", json!(true))
    }

    /// The adapter rejects this row as invalid input.
    pub fn invalid(self) -> Self {
        self.set("invalid", json!(true))
    }

    /// The adapter sleeps this long before scoring.
    pub fn slow(self, ms: u64) -> Self {
        self.set("sleep_ms", json!(ms))
    }

    pub fn build(self) -> FeatureRow {
        self.row
    }
}

/// One plain row per score.
pub fn scored_rows(scores: &[f64]) -> Vec<FeatureRow> {
    scores.iter().map(|s| RowBuilder::new(*s).build()).collect()
}

/// `n` rows that each take `ms` to score.
pub fn slow_rows(n: usize, ms: u64) -> Vec<FeatureRow> {
    (0..n).map(|_| RowBuilder::new(0.2).slow(ms).build()).collect()
}
