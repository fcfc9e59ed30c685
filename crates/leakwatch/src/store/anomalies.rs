//! Anomaly store: per-row detection results.

use rusqlite::Connection;

use crate::db::{anomaly_repo, now, upload_repo, Database};
use crate::model::{
    Anomaly, AnomalyFilter, Explanation, NewAnomaly, Page, Paged, ReviewStatus,
};

use super::StoreError;

#[derive(Clone)]
pub struct AnomalyStore {
    db: Database,
}

impl AnomalyStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Inserts a scored row. `DuplicateRow` if the upload already has a row
    /// at the same index; the stored row is left untouched.
    pub fn put(&self, anomaly: &NewAnomaly) -> Result<String, StoreError> {
        self.db.with_conn(|conn| Self::put_in(conn, anomaly))
    }

    /// Same as [`AnomalyStore::put`], inside the caller's transaction.
    pub(crate) fn put_in(conn: &Connection, anomaly: &NewAnomaly) -> Result<String, StoreError> {
        if !(0.0..=1.0).contains(&anomaly.anomaly_score) {
            return Err(StoreError::Validation(format!(
                "anomaly score {} outside [0, 1]",
                anomaly.anomaly_score
            )));
        }
        let id = uuid::Uuid::new_v4().to_string();
        match anomaly_repo::insert(conn, &id, anomaly, now()) {
            Ok(()) => Ok(id),
            Err(e) if e.is_unique_violation() => Err(StoreError::DuplicateRow {
                upload_id: anomaly.upload_id.clone(),
                row_index: anomaly.row_index,
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub fn get(&self, anomaly_id: &str) -> Result<Anomaly, StoreError> {
        self.db
            .with_conn(|conn| anomaly_repo::find_by_id(conn, anomaly_id))?
            .ok_or_else(|| StoreError::not_found("anomaly", anomaly_id))
    }

    /// Stores the explanation only if none is present. Returns true if this
    /// call wrote it; callers that lose should re-read the winner's value.
    ///
    /// The explanation must carry exactly the anomaly's feature keys.
    pub fn attach_explanation(
        &self,
        anomaly_id: &str,
        explanation: &Explanation,
    ) -> Result<bool, StoreError> {
        self.db.with_tx(|tx| {
            let anomaly = anomaly_repo::find_by_id(tx, anomaly_id)?
                .ok_or_else(|| StoreError::not_found("anomaly", anomaly_id))?;
            if !explanation.matches_features(&anomaly.feature_values) {
                return Err(StoreError::Validation(format!(
                    "explanation keys do not match the features of anomaly {}",
                    anomaly_id
                )));
            }
            Ok(anomaly_repo::set_explanation_if_absent(
                tx,
                anomaly_id,
                explanation,
                now(),
            )?)
        })
    }

    /// Lists an upload's rows by score descending, ties by row index
    /// ascending. `NotFound` if the upload is unknown.
    pub fn list_by_upload(
        &self,
        upload_id: &str,
        filter: &AnomalyFilter,
        page: Page,
    ) -> Result<Paged<Anomaly>, StoreError> {
        self.db.with_conn(|conn| {
            if !upload_repo::exists(conn, upload_id)? {
                return Err(StoreError::not_found("upload", upload_id));
            }
            let (items, total) = anomaly_repo::query(conn, upload_id, filter, page)?;
            Ok(Paged { items, total })
        })
    }

    /// Moves the review status forward. Moving backwards is an
    /// `InvalidTransition`; setting the current status again is accepted and
    /// changes nothing.
    pub fn mark_review_state(
        &self,
        anomaly_id: &str,
        new_state: ReviewStatus,
    ) -> Result<Anomaly, StoreError> {
        self.db
            .with_tx(|tx| Self::mark_review_state_in(tx, anomaly_id, new_state))
    }

    /// Returns the anomaly after the update, together with whether the
    /// status actually changed.
    pub(crate) fn advance_review_in(
        conn: &Connection,
        anomaly_id: &str,
        new_state: ReviewStatus,
    ) -> Result<(Anomaly, bool), StoreError> {
        let current = anomaly_repo::find_by_id(conn, anomaly_id)?
            .ok_or_else(|| StoreError::not_found("anomaly", anomaly_id))?;
        if new_state.rank() < current.review_status.rank() {
            return Err(StoreError::InvalidTransition {
                from: current.review_status.to_string(),
                to: new_state.to_string(),
            });
        }
        if new_state == current.review_status {
            return Ok((current, false));
        }
        let n = anomaly_repo::update_review_status(
            conn,
            anomaly_id,
            new_state.predecessors(),
            new_state,
            now(),
        )?;
        let updated = anomaly_repo::find_by_id(conn, anomaly_id)?
            .ok_or_else(|| StoreError::not_found("anomaly", anomaly_id))?;
        Ok((updated, n > 0))
    }

    fn mark_review_state_in(
        conn: &Connection,
        anomaly_id: &str,
        new_state: ReviewStatus,
    ) -> Result<Anomaly, StoreError> {
        Self::advance_review_in(conn, anomaly_id, new_state).map(|(anomaly, _)| anomaly)
    }
}
