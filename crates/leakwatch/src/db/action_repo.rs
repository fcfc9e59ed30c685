//! Action repository. The table is append-only; there is no update path.

use rusqlite::{params, Connection, Row};

use super::{format_ts, parse_enum, parse_ts, DatabaseError};
use crate::model::Action;

#[derive(Debug, Clone)]
struct ActionRow {
    id: String,
    anomaly_id: String,
    kind: String,
    note: Option<String>,
    actor: Option<String>,
    created_at: String,
}

impl ActionRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            anomaly_id: row.get("anomaly_id")?,
            kind: row.get("kind")?,
            note: row.get("note")?,
            actor: row.get("actor")?,
            created_at: row.get("created_at")?,
        })
    }

    fn into_model(self) -> Result<Action, DatabaseError> {
        Ok(Action {
            kind: parse_enum("kind", &self.kind)?,
            created_at: parse_ts("created_at", &self.created_at)?,
            id: self.id,
            anomaly_id: self.anomaly_id,
            note: self.note,
            actor: self.actor,
        })
    }
}

pub fn insert(conn: &Connection, action: &Action) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO actions (id, anomaly_id, kind, note, actor, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            action.id,
            action.anomaly_id,
            action.kind.as_str(),
            action.note,
            action.actor,
            format_ts(action.created_at),
        ],
    )?;
    Ok(())
}

/// Lists the actions recorded against an anomaly, newest first.
pub fn list_by_anomaly(conn: &Connection, anomaly_id: &str) -> Result<Vec<Action>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM actions WHERE anomaly_id = ?1 ORDER BY created_at DESC, rowid DESC",
    )?;
    let rows = stmt
        .query_map(params![anomaly_id], ActionRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ActionRow::into_model).collect()
}
