//! Upload registry.

use crate::db::{job_repo, now, upload_repo, Database};
use crate::model::Upload;

use super::StoreError;

#[derive(Clone)]
pub struct UploadRegistry {
    db: Database,
}

impl UploadRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Registers a dataset handed over by ingestion and returns it.
    pub fn register(
        &self,
        filename: &str,
        row_count: u64,
        column_count: u64,
    ) -> Result<Upload, StoreError> {
        if filename.trim().is_empty() {
            return Err(StoreError::Validation("filename must not be empty".into()));
        }
        let upload = Upload {
            id: uuid::Uuid::new_v4().to_string(),
            filename: filename.to_string(),
            row_count,
            column_count,
            created_at: now(),
        };
        self.db
            .with_conn(|conn| upload_repo::insert(conn, &upload))?;
        log::info!(
            "Registered upload {} ({}, {} rows)",
            upload.id,
            upload.filename,
            upload.row_count
        );
        Ok(upload)
    }

    pub fn get(&self, upload_id: &str) -> Result<Upload, StoreError> {
        self.db
            .with_conn(|conn| upload_repo::find_by_id(conn, upload_id))?
            .ok_or_else(|| StoreError::not_found("upload", upload_id))
    }

    /// Deletes an upload with its jobs, anomalies and actions. Refused while
    /// a job for it is queued or running.
    pub fn delete(&self, upload_id: &str) -> Result<(), StoreError> {
        self.db.with_tx(|tx| {
            if !upload_repo::exists(tx, upload_id)? {
                return Err(StoreError::not_found("upload", upload_id));
            }
            if job_repo::find_active_for_upload(tx, upload_id)?.is_some() {
                return Err(StoreError::AlreadyProcessing {
                    upload_id: upload_id.to_string(),
                });
            }
            upload_repo::delete(tx, upload_id)?;
            Ok(())
        })?;
        log::info!("Deleted upload {}", upload_id);
        Ok(())
    }
}
