//! Store-level error types.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::inference::AdapterError;

/// Errors returned by the stores and ledgers. Lookup and conflict variants
/// are meant to reach callers as-is.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Upload '{upload_id}' already has a result for row {row_index}")]
    DuplicateRow { upload_id: String, row_index: u64 },

    /// A queued or running job already exists for the upload (duplicate job).
    #[error("Upload '{upload_id}' is already being processed")]
    AlreadyProcessing { upload_id: String },

    #[error("Invalid transition from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Computing a lazily derived value failed in the inference adapter.
    #[error(transparent)]
    Inference(#[from] AdapterError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Database(DatabaseError::Sqlite(e))
    }
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: &str) -> Self {
        StoreError::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Returns true for conflicts that must never be overwritten or retried.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateRow { .. } | StoreError::AlreadyProcessing { .. }
        )
    }
}
