//! Per-feature attribution weights for a scored row.

use std::fmt::Write;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use super::row::FeatureRow;

/// Signed attribution weight per feature, in feature order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Explanation(IndexMap<String, f64>);

impl Explanation {
    pub fn new(weights: IndexMap<String, f64>) -> Self {
        Self(weights)
    }

    /// Aligns raw adapter output with the row's feature keys: the result has
    /// exactly the row's keys, in row order. Features the adapter did not
    /// attribute get a weight of zero; attributions for unknown features and
    /// non-finite weights are dropped.
    pub fn aligned_to(features: &FeatureRow, raw: Explanation) -> Self {
        let mut raw = raw.0;
        let dropped: Vec<String> = raw
            .keys()
            .filter(|k| !features.contains_key(*k))
            .cloned()
            .collect();
        if !dropped.is_empty() {
            log::debug!("Dropping attributions for unknown features: {:?}", dropped);
        }

        let weights = features
            .keys()
            .map(|k| {
                let w = raw.swap_remove(k).filter(|w| w.is_finite()).unwrap_or(0.0);
                (k.clone(), w)
            })
            .collect();
        Self(weights)
    }

    /// Returns true if the key set equals the row's feature names.
    pub fn matches_features(&self, features: &FeatureRow) -> bool {
        self.0.len() == features.len() && features.keys().all(|k| self.0.contains_key(k))
    }

    pub fn get(&self, feature: &str) -> Option<f64> {
        self.0.get(feature).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// The `n` strongest contributors, ordered by absolute weight (descending).
    pub fn top_contributors(&self, n: usize) -> Vec<(&str, f64)> {
        let mut items: Vec<(&str, f64)> = self.iter().collect();
        items.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        items.truncate(n);
        items
    }

    /// Human-readable summary of the top contributors.
    pub fn summary(&self, features: &FeatureRow, top_n: usize) -> String {
        let top: Vec<(&str, f64)> = self
            .top_contributors(top_n)
            .into_iter()
            .filter(|(_, w)| *w != 0.0)
            .collect();
        if top.is_empty() {
            return "No feature contributed to this score.".to_string();
        }

        let mut out = String::from("This record was flagged because of:\n");
        for (feature, weight) in top {
            let direction = if weight > 0.0 { "increasing" } else { "decreasing" };
            let actual = features
                .get(feature)
                .map(|v| match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .unwrap_or_else(|| "N/A".to_string());
            // Writing to a String cannot fail.
            let _ = writeln!(
                out,
                "- {}: {} ({} anomaly likelihood by {:.3})",
                humanize(feature),
                actual,
                direction,
                weight.abs()
            );
        }
        out
    }
}

fn humanize(feature: &str) -> String {
    feature
        .split('_')
        .filter(|p| !p.is_empty())
        .map(|p| {
            let mut chars = p.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
