//! Aggregate queries over jobs and anomalies.

use rusqlite::Connection;

use super::{job_repo, parse_enum, parse_opt_ts, DatabaseError};
use crate::model::{JobStatus, JobStatusCounts, Severity, SeverityCounts, Snapshot};

/// Computes the dashboard snapshot from the current table contents.
///
/// All queries run on the same connection under the caller's lock, so the
/// figures describe a single point in time.
pub fn snapshot(conn: &Connection) -> Result<Snapshot, DatabaseError> {
    let total_uploads: i64 =
        conn.query_row("SELECT COUNT(DISTINCT upload_id) FROM jobs", [], |r| {
            r.get(0)
        })?;

    let total_rows: i64 = conn.query_row(
        "SELECT COALESCE(SUM(u.row_count), 0) FROM uploads u
         WHERE EXISTS (
             SELECT 1 FROM jobs j
             WHERE j.upload_id = u.id AND j.status IN ('completed', 'failed')
         )",
        [],
        |r| r.get(0),
    )?;

    let (total_anomalies, average_score, unreviewed): (i64, Option<f64>, i64) = conn.query_row(
        "SELECT COUNT(*), AVG(anomaly_score),
                COALESCE(SUM(CASE WHEN review_status = 'unreviewed' THEN 1 ELSE 0 END), 0)
         FROM anomalies",
        [],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
    )?;

    let mut severity = SeverityCounts::default();
    {
        let mut stmt = conn.prepare("SELECT severity, COUNT(*) FROM anomalies GROUP BY severity")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        for (tier, n) in rows {
            let n = n as u64;
            match parse_enum::<Severity>("severity", &tier)? {
                Severity::High => severity.high = n,
                Severity::Medium => severity.medium = n,
                Severity::Low => severity.low = n,
            }
        }
    }

    let mut jobs = JobStatusCounts::default();
    for (status, n) in job_repo::count_by_status(conn)? {
        match status {
            JobStatus::Queued => jobs.queued = n,
            JobStatus::Running => jobs.running = n,
            JobStatus::Completed => jobs.completed = n,
            JobStatus::Failed => jobs.failed = n,
        }
    }

    let last_updated: Option<String> =
        conn.query_row("SELECT MAX(updated_at) FROM jobs", [], |r| r.get(0))?;

    Ok(Snapshot {
        total_uploads: total_uploads as u64,
        total_rows: total_rows as u64,
        total_anomalies: total_anomalies as u64,
        average_score,
        severity,
        unreviewed: unreviewed as u64,
        jobs,
        last_updated: parse_opt_ts("updated_at", last_updated.as_deref())?,
    })
}
