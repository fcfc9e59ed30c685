//! User dispositions on anomalies.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::anomaly::ReviewStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    MarkReviewed,
    CreateWorkOrder,
    Export,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::MarkReviewed => "mark_reviewed",
            ActionKind::CreateWorkOrder => "create_work_order",
            ActionKind::Export => "export",
        }
    }

    /// The review status this action moves the anomaly to, if any.
    pub fn implied_status(&self) -> Option<ReviewStatus> {
        match self {
            ActionKind::MarkReviewed => Some(ReviewStatus::Reviewed),
            ActionKind::CreateWorkOrder => Some(ReviewStatus::Actioned),
            ActionKind::Export => None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark_reviewed" => Ok(ActionKind::MarkReviewed),
            "create_work_order" => Ok(ActionKind::CreateWorkOrder),
            "export" => Ok(ActionKind::Export),
            other => Err(other.to_string()),
        }
    }
}

/// An immutable entry in the action ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    pub anomaly_id: String,
    pub kind: ActionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_implied_status() {
        assert_eq!(
            ActionKind::MarkReviewed.implied_status(),
            Some(ReviewStatus::Reviewed)
        );
        assert_eq!(
            ActionKind::CreateWorkOrder.implied_status(),
            Some(ReviewStatus::Actioned)
        );
        assert_eq!(ActionKind::Export.implied_status(), None);
    }

    #[test]
    fn test_kind_serde_matches_storage_form() {
        let json = serde_json::to_string(&ActionKind::CreateWorkOrder).unwrap();
        assert_eq!(json, "\"create_work_order\"");
        assert_eq!(
            "create_work_order".parse::<ActionKind>().unwrap(),
            ActionKind::CreateWorkOrder
        );
    }
}
