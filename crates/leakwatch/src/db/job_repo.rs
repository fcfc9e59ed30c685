//! Job repository: CRUD operations for the `jobs` table.
//!
//! Every status update is conditional on the status the caller observed,
//! so concurrent writers cannot move a job along a transition the ledger
//! did not check. Callers inspect the returned row count.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, parse_enum, parse_opt_ts, parse_ts, DatabaseError};
use crate::model::{Job, JobStatus};

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    upload_id: String,
    status: String,
    progress: i64,
    total_rows: i64,
    rows_processed: i64,
    rows_skipped: i64,
    anomalies_found: i64,
    processing_time: Option<f64>,
    error_message: Option<String>,
    created_at: String,
    updated_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            upload_id: row.get("upload_id")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            total_rows: row.get("total_rows")?,
            rows_processed: row.get("rows_processed")?,
            rows_skipped: row.get("rows_skipped")?,
            anomalies_found: row.get("anomalies_found")?,
            processing_time: row.get("processing_time")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            completed_at: row.get("completed_at")?,
        })
    }

    fn into_model(self) -> Result<Job, DatabaseError> {
        Ok(Job {
            status: parse_enum("status", &self.status)?,
            progress: self.progress.clamp(0, 100) as u8,
            total_rows: self.total_rows as u64,
            rows_processed: self.rows_processed as u64,
            rows_skipped: self.rows_skipped as u64,
            anomalies_found: self.anomalies_found as u64,
            processing_time: self.processing_time,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            started_at: parse_opt_ts("started_at", self.started_at.as_deref())?,
            completed_at: parse_opt_ts("completed_at", self.completed_at.as_deref())?,
            error_message: self.error_message,
            id: self.id,
            upload_id: self.upload_id,
        })
    }
}

/// Final counters written when a job completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Completion {
    pub rows_processed: u64,
    pub rows_skipped: u64,
    pub anomalies_found: u64,
    pub processing_time: f64,
}

fn collect(rows: Vec<JobRow>) -> Result<Vec<Job>, DatabaseError> {
    rows.into_iter().map(JobRow::into_model).collect()
}

/// Inserts a new job row. Fails with a unique violation if the upload
/// already has a queued or running job.
pub fn insert(conn: &Connection, job: &Job) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO jobs (id, upload_id, status, progress, total_rows, rows_processed,
         rows_skipped, anomalies_found, processing_time, error_message, created_at,
         updated_at, started_at, completed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            job.id,
            job.upload_id,
            job.status.as_str(),
            job.progress as i64,
            job.total_rows as i64,
            job.rows_processed as i64,
            job.rows_skipped as i64,
            job.anomalies_found as i64,
            job.processing_time,
            job.error_message,
            format_ts(job.created_at),
            format_ts(job.updated_at),
            job.started_at.map(format_ts),
            job.completed_at.map(format_ts),
        ],
    )?;
    Ok(())
}

/// Finds a job by its ID.
pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE id = ?1",
            params![id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_model).transpose()
}

/// Lists the jobs of one upload, newest first.
pub fn list_by_upload(conn: &Connection, upload_id: &str) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE upload_id = ?1 ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map(params![upload_id], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect(rows)
}

/// Returns the queued or running job of an upload, if any.
pub fn find_active_for_upload(
    conn: &Connection,
    upload_id: &str,
) -> Result<Option<Job>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM jobs WHERE upload_id = ?1 AND status IN ('queued', 'running')",
            params![upload_id],
            JobRow::from_row,
        )
        .optional()?;
    row.map(JobRow::into_model).transpose()
}

/// Lists every queued or running job, oldest first.
pub fn list_active(conn: &Connection) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM jobs WHERE status IN ('queued', 'running') ORDER BY created_at, rowid",
    )?;
    let rows = stmt
        .query_map([], JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    collect(rows)
}

/// queued -> running. Resets progress and records the start time.
pub fn mark_running(
    conn: &Connection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let ts = format_ts(now);
    let n = conn.execute(
        "UPDATE jobs SET status = 'running', progress = 0, started_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status = 'queued'",
        params![id, ts],
    )?;
    Ok(n)
}

/// Records batch progress on a running job. Progress never moves backwards.
pub fn record_progress(
    conn: &Connection,
    id: &str,
    rows_processed: u64,
    rows_skipped: u64,
    progress: u8,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let n = conn.execute(
        "UPDATE jobs SET rows_processed = ?2, rows_skipped = ?3,
         progress = MAX(progress, ?4), updated_at = ?5
         WHERE id = ?1 AND status = 'running'",
        params![
            id,
            rows_processed as i64,
            rows_skipped as i64,
            progress as i64,
            format_ts(now)
        ],
    )?;
    Ok(n)
}

/// running -> completed.
pub fn mark_completed(
    conn: &Connection,
    id: &str,
    completion: &Completion,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let ts = format_ts(now);
    let n = conn.execute(
        "UPDATE jobs SET status = 'completed', progress = 100, rows_processed = ?2,
         rows_skipped = ?3, anomalies_found = ?4, processing_time = ?5,
         completed_at = ?6, updated_at = ?6
         WHERE id = ?1 AND status = 'running'",
        params![
            id,
            completion.rows_processed as i64,
            completion.rows_skipped as i64,
            completion.anomalies_found as i64,
            completion.processing_time,
            ts,
        ],
    )?;
    Ok(n)
}

/// `expected` -> failed. Progress and counters keep their last written values.
pub fn mark_failed(
    conn: &Connection,
    id: &str,
    expected: JobStatus,
    error_message: &str,
    processing_time: Option<f64>,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    let ts = format_ts(now);
    let n = conn.execute(
        "UPDATE jobs SET status = 'failed', error_message = ?3, processing_time = ?4,
         completed_at = ?5, updated_at = ?5
         WHERE id = ?1 AND status = ?2",
        params![id, expected.as_str(), error_message, processing_time, ts],
    )?;
    Ok(n)
}

/// Number of jobs per status. Statuses without jobs are reported as zero.
pub fn count_by_status(conn: &Connection) -> Result<Vec<(JobStatus, u64)>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts: Vec<(JobStatus, u64)> = JobStatus::ALL.iter().map(|s| (*s, 0)).collect();
    for (status, n) in rows {
        let status: JobStatus = parse_enum("status", &status)?;
        if let Some(slot) = counts.iter_mut().find(|(s, _)| *s == status) {
            slot.1 = n as u64;
        }
    }
    Ok(counts)
}
