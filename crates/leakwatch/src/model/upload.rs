use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A dataset handed over by ingestion. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: String,
    pub filename: String,
    pub row_count: u64,
    pub column_count: u64,
    pub created_at: DateTime<Utc>,
}
