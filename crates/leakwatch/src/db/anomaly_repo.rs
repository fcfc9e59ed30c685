//! Anomaly repository: CRUD operations for the `anomalies` table.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, parse_enum, parse_opt_ts, parse_ts, DatabaseError};
use crate::model::{Anomaly, AnomalyFilter, Explanation, NewAnomaly, Page, ReviewStatus};

/// A raw anomaly row from the database.
#[derive(Debug, Clone)]
struct AnomalyRow {
    id: String,
    upload_id: String,
    job_id: String,
    row_index: i64,
    anomaly_score: f64,
    severity: String,
    review_status: String,
    row_timestamp: Option<String>,
    feature_values: String,
    explanation: Option<String>,
    model_label: String,
    created_at: String,
    updated_at: String,
}

impl AnomalyRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            upload_id: row.get("upload_id")?,
            job_id: row.get("job_id")?,
            row_index: row.get("row_index")?,
            anomaly_score: row.get("anomaly_score")?,
            severity: row.get("severity")?,
            review_status: row.get("review_status")?,
            row_timestamp: row.get("row_timestamp")?,
            feature_values: row.get("feature_values")?,
            explanation: row.get("explanation")?,
            model_label: row.get("model_label")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_model(self) -> Result<Anomaly, DatabaseError> {
        let explanation = match self.explanation.as_deref() {
            Some(raw) => Some(serde_json::from_str::<Explanation>(raw)?),
            None => None,
        };
        Ok(Anomaly {
            row_index: self.row_index as u64,
            anomaly_score: self.anomaly_score,
            severity: parse_enum("severity", &self.severity)?,
            review_status: parse_enum("review_status", &self.review_status)?,
            row_timestamp: parse_opt_ts("row_timestamp", self.row_timestamp.as_deref())?,
            feature_values: serde_json::from_str(&self.feature_values)?,
            explanation,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
            id: self.id,
            upload_id: self.upload_id,
            job_id: self.job_id,
            model_label: self.model_label,
        })
    }
}

/// Inserts a scored row. Fails with a unique violation if the upload already
/// has a row at `row_index`.
pub fn insert(
    conn: &Connection,
    id: &str,
    anomaly: &NewAnomaly,
    now: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    let ts = format_ts(now);
    conn.execute(
        "INSERT INTO anomalies (id, upload_id, job_id, row_index, anomaly_score, severity,
         review_status, row_timestamp, feature_values, explanation, model_label,
         created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'unreviewed', ?7, ?8, NULL, ?9, ?10, ?10)",
        params![
            id,
            anomaly.upload_id,
            anomaly.job_id,
            anomaly.row_index as i64,
            anomaly.anomaly_score,
            anomaly.severity.as_str(),
            anomaly.row_timestamp.map(format_ts),
            serde_json::to_string(&anomaly.feature_values)?,
            anomaly.model_label,
            ts,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(conn: &Connection, id: &str) -> Result<Option<Anomaly>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM anomalies WHERE id = ?1",
            params![id],
            AnomalyRow::from_row,
        )
        .optional()?;
    row.map(AnomalyRow::into_model).transpose()
}

/// Writes the explanation only if none is stored yet. Returns true if this
/// call wrote it.
pub fn set_explanation_if_absent(
    conn: &Connection,
    id: &str,
    explanation: &Explanation,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let n = conn.execute(
        "UPDATE anomalies SET explanation = ?2, updated_at = ?3
         WHERE id = ?1 AND explanation IS NULL",
        params![id, serde_json::to_string(explanation)?, format_ts(now)],
    )?;
    Ok(n > 0)
}

/// Lists an upload's anomalies by score descending, ties by row index,
/// returning (page, total matching).
pub fn query(
    conn: &Connection,
    upload_id: &str,
    filter: &AnomalyFilter,
    page: Page,
) -> Result<(Vec<Anomaly>, u64), DatabaseError> {
    let mut conditions = vec!["upload_id = ?1".to_string()];
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(upload_id.to_string())];

    if let Some(severity) = filter.severity {
        conditions.push(format!("severity = ?{}", param_values.len() + 1));
        param_values.push(Box::new(severity.as_str()));
    }
    if let Some(status) = filter.review_status {
        conditions.push(format!("review_status = ?{}", param_values.len() + 1));
        param_values.push(Box::new(status.as_str()));
    }

    let where_clause = format!("WHERE {}", conditions.join(" AND "));

    // Count total matching rows.
    let count_sql = format!("SELECT COUNT(*) FROM anomalies {}", where_clause);
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let total: i64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

    // Fetch the requested page.
    param_values.push(Box::new(page.limit.min(i64::MAX as u64) as i64));
    param_values.push(Box::new(page.offset.min(i64::MAX as u64) as i64));
    let query_sql = format!(
        "SELECT * FROM anomalies {} ORDER BY anomaly_score DESC, row_index ASC
         LIMIT ?{} OFFSET ?{}",
        where_clause,
        param_values.len() - 1,
        param_values.len()
    );

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let mut stmt = conn.prepare(&query_sql)?;
    let rows = stmt
        .query_map(params_ref.as_slice(), AnomalyRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    let items = rows
        .into_iter()
        .map(AnomalyRow::into_model)
        .collect::<Result<Vec<_>, _>>()?;

    Ok((items, total as u64))
}

/// Moves the review status to `to` if the current status is one of `from`.
pub fn update_review_status(
    conn: &Connection,
    id: &str,
    from: &[ReviewStatus],
    to: ReviewStatus,
    now: DateTime<Utc>,
) -> Result<usize, DatabaseError> {
    if from.is_empty() {
        return Ok(0);
    }
    // The vocabulary is closed, so the literals are safe to inline.
    let allowed = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "UPDATE anomalies SET review_status = ?2, updated_at = ?3
         WHERE id = ?1 AND review_status IN ({})",
        allowed
    );
    let n = conn.execute(&sql, params![id, to.as_str(), format_ts(now)])?;
    Ok(n)
}

/// Row indices already stored for an upload.
pub fn row_indices(conn: &Connection, upload_id: &str) -> Result<HashSet<u64>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT row_index FROM anomalies WHERE upload_id = ?1")?;
    let indices = stmt
        .query_map(params![upload_id], |r| r.get::<_, i64>(0))?
        .map(|r| r.map(|i| i as u64))
        .collect::<Result<HashSet<_>, _>>()?;
    Ok(indices)
}

/// Number of an upload's rows scoring at or above `min_score`.
pub fn count_at_or_above(
    conn: &Connection,
    upload_id: &str,
    min_score: f64,
) -> Result<u64, DatabaseError> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM anomalies WHERE upload_id = ?1 AND anomaly_score >= ?2",
        params![upload_id, min_score],
        |r| r.get(0),
    )?;
    Ok(n as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, now, upload_repo, Database};
    use crate::model::{FeatureRow, Job, JobStatus, Severity, Upload};
    use serde_json::json;

    fn setup() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let ts = now();
            upload_repo::insert(
                conn,
                &Upload {
                    id: "u1".into(),
                    filename: "billing.csv".into(),
                    row_count: 3,
                    column_count: 2,
                    created_at: ts,
                },
            )?;
            job_repo::insert(
                conn,
                &Job {
                    id: "j1".into(),
                    upload_id: "u1".into(),
                    status: JobStatus::Running,
                    progress: 0,
                    total_rows: 3,
                    rows_processed: 0,
                    rows_skipped: 0,
                    anomalies_found: 0,
                    processing_time: None,
                    error_message: None,
                    created_at: ts,
                    updated_at: ts,
                    started_at: Some(ts),
                    completed_at: None,
                },
            )
        })
        .unwrap();
        db
    }

    fn new_anomaly(row_index: u64, score: f64, severity: Severity) -> NewAnomaly {
        let features: FeatureRow =
            serde_json::from_value(json!({"invoice_amount": 120.0, "refund_amount": 0.0}))
                .unwrap();
        NewAnomaly {
            upload_id: "u1".into(),
            job_id: "j1".into(),
            row_index,
            anomaly_score: score,
            severity,
            row_timestamp: None,
            feature_values: features,
            model_label: "normal".into(),
        }
    }

    #[test]
    fn test_insert_find_and_duplicate() {
        let db = setup();
        db.with_conn(|conn| {
            insert(conn, "a1", &new_anomaly(0, 0.2, Severity::Low), now())?;
            let stored = find_by_id(conn, "a1")?.unwrap();
            assert_eq!(stored.review_status, ReviewStatus::Unreviewed);
            assert!(stored.explanation.is_none());
            let keys: Vec<&str> = stored.feature_values.keys().map(String::as_str).collect();
            assert_eq!(keys, vec!["invoice_amount", "refund_amount"]);

            let dup = insert(conn, "a2", &new_anomaly(0, 0.9, Severity::High), now());
            assert!(dup.unwrap_err().is_unique_violation());
            Ok::<_, DatabaseError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_explanation_written_once() {
        let db = setup();
        db.with_conn(|conn| {
            insert(conn, "a1", &new_anomaly(0, 0.2, Severity::Low), now())?;
            let first = Explanation::new(
                [("invoice_amount".to_string(), 0.3), ("refund_amount".to_string(), 0.0)]
                    .into_iter()
                    .collect(),
            );
            let second = Explanation::new(
                [("invoice_amount".to_string(), 9.0), ("refund_amount".to_string(), 9.0)]
                    .into_iter()
                    .collect(),
            );
            assert!(set_explanation_if_absent(conn, "a1", &first, now())?);
            assert!(!set_explanation_if_absent(conn, "a1", &second, now())?);
            assert_eq!(find_by_id(conn, "a1")?.unwrap().explanation, Some(first));
            Ok::<_, DatabaseError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_query_orders_filters_and_pages() {
        let db = setup();
        db.with_conn(|conn| {
            insert(conn, "a0", &new_anomaly(0, 0.6, Severity::Medium), now())?;
            insert(conn, "a1", &new_anomaly(1, 0.9, Severity::High), now())?;
            insert(conn, "a2", &new_anomaly(2, 0.6, Severity::Medium), now())?;

            let (all, total) = query(conn, "u1", &AnomalyFilter::default(), Page::default())?;
            assert_eq!(total, 3);
            let order: Vec<u64> = all.iter().map(|a| a.row_index).collect();
            assert_eq!(order, vec![1, 0, 2]);

            let medium = AnomalyFilter {
                severity: Some(Severity::Medium),
                review_status: None,
            };
            let (page, total) = query(conn, "u1", &medium, Page::new(1, 1))?;
            assert_eq!(total, 2);
            assert_eq!(page.len(), 1);
            assert_eq!(page[0].row_index, 2);

            assert_eq!(row_indices(conn, "u1")?, HashSet::from([0, 1, 2]));
            assert_eq!(count_at_or_above(conn, "u1", 0.5)?, 3);
            assert_eq!(count_at_or_above(conn, "u1", 0.85)?, 1);
            Ok::<_, DatabaseError>(())
        })
        .unwrap();
    }

    #[test]
    fn test_update_review_status_is_conditional() {
        let db = setup();
        db.with_conn(|conn| {
            insert(conn, "a1", &new_anomaly(0, 0.9, Severity::High), now())?;
            let to_reviewed = ReviewStatus::Reviewed;
            assert_eq!(
                update_review_status(conn, "a1", to_reviewed.predecessors(), to_reviewed, now())?,
                1
            );
            assert_eq!(
                update_review_status(conn, "a1", to_reviewed.predecessors(), to_reviewed, now())?,
                0
            );
            assert_eq!(
                find_by_id(conn, "a1")?.unwrap().review_status,
                ReviewStatus::Reviewed
            );
            Ok::<_, DatabaseError>(())
        })
        .unwrap();
    }
}
