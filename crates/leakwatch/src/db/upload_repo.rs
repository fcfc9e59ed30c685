//! Upload repository: CRUD operations for the `uploads` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, parse_ts, DatabaseError};
use crate::model::Upload;

/// A raw upload row from the database.
#[derive(Debug, Clone)]
struct UploadRow {
    id: String,
    filename: String,
    row_count: i64,
    column_count: i64,
    created_at: String,
}

impl UploadRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            filename: row.get("filename")?,
            row_count: row.get("row_count")?,
            column_count: row.get("column_count")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_model(self) -> Result<Upload, DatabaseError> {
        Ok(Upload {
            created_at: parse_ts("created_at", &self.created_at)?,
            id: self.id,
            filename: self.filename,
            row_count: self.row_count as u64,
            column_count: self.column_count as u64,
        })
    }
}

pub fn insert(conn: &Connection, upload: &Upload) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO uploads (id, filename, row_count, column_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            upload.id,
            upload.filename,
            upload.row_count as i64,
            upload.column_count as i64,
            format_ts(upload.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Upload>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM uploads WHERE id = ?1",
            params![id],
            UploadRow::from_row,
        )
        .optional()?;
    row.map(UploadRow::into_model).transpose()
}

pub fn exists(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM uploads WHERE id = ?1", params![id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(found.is_some())
}

/// Deletes an upload. Jobs, anomalies and actions go with it via cascade.
/// Returns true if a row was deleted.
pub fn delete(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let n = conn.execute("DELETE FROM uploads WHERE id = ?1", params![id])?;
    Ok(n > 0)
}
