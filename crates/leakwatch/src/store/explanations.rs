//! Explanation cache: computed on first read, stored once, reused after.

use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;

use crate::db::Database;
use crate::inference::AdapterGate;
use crate::model::Explanation;

use super::{AnomalyStore, StoreError};

/// Serves explanations for stored anomalies.
///
/// Callers asking for the same anomaly at the same time queue behind a
/// per-anomaly lock, so the adapter runs once per anomaly in this process.
/// The stored value is written with an insert-if-absent update, which keeps
/// the first writer's value even across processes sharing the database.
#[derive(Clone)]
pub struct ExplanationCache {
    anomalies: AnomalyStore,
    gate: AdapterGate,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl ExplanationCache {
    pub fn new(db: Database, gate: AdapterGate) -> Self {
        Self {
            anomalies: AnomalyStore::new(db),
            gate,
            in_flight: Arc::new(DashMap::new()),
        }
    }

    /// Returns the anomaly's explanation, computing and storing it first if
    /// it is absent.
    pub fn get_or_compute(&self, anomaly_id: &str) -> Result<Explanation, StoreError> {
        let anomaly = self.anomalies.get(anomaly_id)?;
        if let Some(explanation) = anomaly.explanation {
            return Ok(explanation);
        }

        let slot = Arc::clone(
            self.in_flight
                .entry(anomaly_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let result = {
            let _guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
            self.compute_once(anomaly_id)
        };
        drop(slot);
        self.in_flight
            .remove_if(anomaly_id, |_, slot| Arc::strong_count(slot) == 1);
        result
    }

    /// Runs with the per-anomaly lock held.
    fn compute_once(&self, anomaly_id: &str) -> Result<Explanation, StoreError> {
        // Someone may have finished while we waited for the lock.
        let anomaly = self.anomalies.get(anomaly_id)?;
        if let Some(explanation) = anomaly.explanation {
            return Ok(explanation);
        }

        let raw = self.gate.explain(&anomaly.feature_values)?;
        let explanation = Explanation::aligned_to(&anomaly.feature_values, raw);

        if self.anomalies.attach_explanation(anomaly_id, &explanation)? {
            log::debug!("Cached explanation for anomaly {}", anomaly_id);
            return Ok(explanation);
        }

        // Lost the conditional write to another process; serve the winner.
        self.anomalies
            .get(anomaly_id)?
            .explanation
            .ok_or_else(|| StoreError::not_found("explanation", anomaly_id))
    }

    /// Number of anomalies with a computation currently in progress.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }
}
