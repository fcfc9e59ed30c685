//! Per-row detection results.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::explanation::Explanation;
use super::row::FeatureRow;

/// Severity tier derived from the anomaly score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    High,
    Medium,
    Low,
}

impl Severity {
    pub const ALL: [Severity; 3] = [Severity::High, Severity::Medium, Severity::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            other => Err(other.to_string()),
        }
    }
}

/// Lower bounds (inclusive) of the high and medium tiers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeverityThresholds {
    #[serde(default = "default_high")]
    pub high: f64,
    #[serde(default = "default_medium")]
    pub medium: f64,
}

fn default_high() -> f64 {
    0.85
}

fn default_medium() -> f64 {
    0.5
}

impl Default for SeverityThresholds {
    fn default() -> Self {
        Self {
            high: default_high(),
            medium: default_medium(),
        }
    }
}

impl SeverityThresholds {
    pub fn classify(&self, score: f64) -> Severity {
        if score >= self.high {
            Severity::High
        } else if score >= self.medium {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    /// Returns true if the score reaches at least the medium tier.
    pub fn is_flagged(&self, score: f64) -> bool {
        score >= self.medium
    }
}

/// Review disposition of an anomaly. Only moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Unreviewed,
    Reviewed,
    Actioned,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Unreviewed => "unreviewed",
            ReviewStatus::Reviewed => "reviewed",
            ReviewStatus::Actioned => "actioned",
        }
    }

    /// Position in the forward-only ordering.
    pub fn rank(&self) -> u8 {
        match self {
            ReviewStatus::Unreviewed => 0,
            ReviewStatus::Reviewed => 1,
            ReviewStatus::Actioned => 2,
        }
    }

    /// Statuses strictly below `self`, i.e. the ones that may advance to it.
    pub fn predecessors(&self) -> &'static [ReviewStatus] {
        match self {
            ReviewStatus::Unreviewed => &[],
            ReviewStatus::Reviewed => &[ReviewStatus::Unreviewed],
            ReviewStatus::Actioned => &[ReviewStatus::Unreviewed, ReviewStatus::Reviewed],
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unreviewed" => Ok(ReviewStatus::Unreviewed),
            "reviewed" => Ok(ReviewStatus::Reviewed),
            "actioned" => Ok(ReviewStatus::Actioned),
            other => Err(other.to_string()),
        }
    }
}

/// A scored row as stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub id: String,
    pub upload_id: String,
    pub job_id: String,
    pub row_index: u64,
    pub anomaly_score: f64,
    pub severity: Severity,
    pub review_status: ReviewStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_timestamp: Option<DateTime<Utc>>,
    pub feature_values: FeatureRow,
    /// Absent until first requested.
    pub explanation: Option<Explanation>,
    pub model_label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for the anomaly store.
#[derive(Debug, Clone)]
pub struct NewAnomaly {
    pub upload_id: String,
    pub job_id: String,
    pub row_index: u64,
    pub anomaly_score: f64,
    pub severity: Severity,
    pub row_timestamp: Option<DateTime<Utc>>,
    pub feature_values: FeatureRow,
    pub model_label: String,
}

/// Filters for anomaly listings. `None` matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnomalyFilter {
    pub severity: Option<Severity>,
    pub review_status: Option<ReviewStatus>,
}

/// Offset paging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

impl Page {
    pub fn new(offset: u64, limit: u64) -> Self {
        Self { offset, limit }
    }
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: u64,
}
