//! Action ledger: append-only dispositions on anomalies.

use crate::db::{action_repo, anomaly_repo, now, Database};
use crate::model::{Action, ActionKind};

use super::{AnomalyStore, StoreError};

#[derive(Clone)]
pub struct ActionLedger {
    db: Database,
}

impl ActionLedger {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Appends an action and applies the review status it implies. An
    /// anomaly already at or past that status keeps its status; the action
    /// is still recorded.
    pub fn record(
        &self,
        anomaly_id: &str,
        kind: ActionKind,
        note: Option<&str>,
        actor: Option<&str>,
    ) -> Result<Action, StoreError> {
        let action = Action {
            id: uuid::Uuid::new_v4().to_string(),
            anomaly_id: anomaly_id.to_string(),
            kind,
            note: note.map(str::to_string),
            actor: actor.map(str::to_string),
            created_at: now(),
        };

        let changed = self.db.with_tx(|tx| -> Result<bool, StoreError> {
            let anomaly = anomaly_repo::find_by_id(tx, anomaly_id)?
                .ok_or_else(|| StoreError::not_found("anomaly", anomaly_id))?;
            action_repo::insert(tx, &action)?;

            match kind.implied_status() {
                Some(target) if target.rank() > anomaly.review_status.rank() => {
                    let (_, changed) = AnomalyStore::advance_review_in(tx, anomaly_id, target)?;
                    Ok(changed)
                }
                _ => Ok(false),
            }
        })?;

        log::info!(
            "Recorded {} on anomaly {}{}",
            kind,
            anomaly_id,
            if changed { " (review status advanced)" } else { "" }
        );
        Ok(action)
    }

    /// Actions recorded against an anomaly, newest first.
    pub fn list(&self, anomaly_id: &str) -> Result<Vec<Action>, StoreError> {
        self.db.with_conn(|conn| {
            if anomaly_repo::find_by_id(conn, anomaly_id)?.is_none() {
                return Err(StoreError::not_found("anomaly", anomaly_id));
            }
            Ok(action_repo::list_by_anomaly(conn, anomaly_id)?)
        })
    }
}
