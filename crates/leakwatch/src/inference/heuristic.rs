//! Rule-based billing leakage scorer.
//!
//! Deterministic fallback used when no trained model is wired in. Each rule
//! yields a signal in `[0, 1]` attributed to one billing column; the row
//! score is the noisy-or of all signals.

use indexmap::IndexMap;

use super::{label_for, AdapterError, InferenceAdapter, Score};
use crate::model::row::numeric;
use crate::model::{Explanation, FeatureRow};

/// Billing columns the rules read.
pub const BILLING_COLUMNS: &[&str] = &[
    "invoice_amount",
    "tax_amount",
    "total_amount",
    "discount_applied",
    "refund_amount",
    "retries",
    "rounding_diff",
    "gateway_fee",
    "usage_units",
    "usage_cost",
];

#[derive(Debug, Clone, Default)]
pub struct HeuristicAdapter;

impl HeuristicAdapter {
    pub fn new() -> Self {
        Self
    }

    /// Per-column signals for a row.
    fn signals(&self, row: &FeatureRow) -> Result<Vec<(&'static str, f64)>, AdapterError> {
        if !BILLING_COLUMNS.iter().any(|c| numeric(row, c).is_some()) {
            return Err(AdapterError::InvalidInput(
                "row has no numeric billing columns".to_string(),
            ));
        }
        let get = |c: &str| numeric(row, c).unwrap_or(0.0);
        let invoice = get("invoice_amount");
        let tax = get("tax_amount");
        let discount = get("discount_applied");
        let refund = get("refund_amount");
        let fee = get("gateway_fee");

        let mut out = Vec::new();

        // Billed total disagrees with its components.
        if let Some(total) = numeric(row, "total_amount") {
            let expected = invoice + tax - discount;
            let diff = (expected - total).abs();
            out.push(("total_amount", (diff / expected.abs().max(1.0)).min(1.0)));
        }

        let total = numeric(row, "total_amount").unwrap_or(invoice + tax - discount);

        // Refunds eating into the billed amount.
        if refund > 0.0 {
            let ratio = if total > 0.0 { refund / total } else { 1.0 };
            out.push(("refund_amount", ratio.clamp(0.0, 1.0) * 0.9));
        }

        if discount > 0.0 && discount > invoice {
            out.push(("discount_applied", 0.8));
        }

        // Payment retries beyond the usual one or two.
        let retries = get("retries");
        if retries > 2.0 {
            out.push(("retries", ((retries - 2.0) / 8.0).min(1.0) * 0.6));
        }

        let rounding = get("rounding_diff").abs();
        if rounding > 0.0 {
            out.push(("rounding_diff", (rounding / 0.5).min(1.0) * 0.5));
        }

        // Gateway fees above 5% of the total.
        if fee > 0.0 && total > 0.0 {
            let excess = (fee / total - 0.05) / 0.15;
            if excess > 0.0 {
                out.push(("gateway_fee", excess.min(1.0) * 0.7));
            }
        }

        // Metered usage that was never billed.
        if get("usage_units") > 0.0 && numeric(row, "usage_cost").is_some_and(|c| c <= 0.0) {
            out.push(("usage_cost", 0.8));
        }

        Ok(out)
    }
}

fn combine(signals: &[(&str, f64)]) -> f64 {
    let keep = signals
        .iter()
        .fold(1.0, |acc, (_, s)| acc * (1.0 - s.clamp(0.0, 1.0)));
    (1.0 - keep).clamp(0.0, 1.0)
}

impl InferenceAdapter for HeuristicAdapter {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn score(&self, row: &FeatureRow) -> Result<Score, AdapterError> {
        let score = combine(&self.signals(row)?);
        Ok(Score {
            anomaly_score: score,
            label: label_for(score).to_string(),
        })
    }

    fn explain(&self, row: &FeatureRow) -> Result<Explanation, AdapterError> {
        let signals = self.signals(row)?;
        let mut weights: IndexMap<String, f64> =
            row.keys().map(|k| (k.clone(), 0.0)).collect();
        for (column, signal) in signals {
            if let Some(w) = weights.get_mut(column) {
                *w += signal;
            }
        }
        // A discount that stays within the invoice pulls the score down.
        if let (Some(w), Some(d), Some(i)) = (
            weights.get_mut("discount_applied"),
            numeric(row, "discount_applied"),
            numeric(row, "invoice_amount"),
        ) {
            if d > 0.0 && d <= i && *w == 0.0 {
                *w = -(d / i.max(1.0)).min(1.0) * 0.1;
            }
        }
        Ok(Explanation::new(weights))
    }
}
