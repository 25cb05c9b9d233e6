//! Freshness ledger domain models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, ValidationError};

/// The kinds of data tracked per entity, each with its own freshness window.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DataKind {
    /// Daily OHLCV bars.
    Price,
    /// Dividend and share-issue events.
    Dividends,
    /// Fundamental reports.
    Financials,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "PRICE",
            Self::Dividends => "DIVIDENDS",
            Self::Financials => "FINANCIALS",
        }
    }

    /// Selection order among equally-due entries; lower fetches first.
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Price => 1,
            Self::Dividends => 2,
            Self::Financials => 3,
        }
    }

    pub fn all() -> [DataKind; 3] {
        [Self::Price, Self::Dividends, Self::Financials]
    }
}

impl std::fmt::Display for DataKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DataKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PRICE" => Ok(Self::Price),
            "DIVIDENDS" => Ok(Self::Dividends),
            "FINANCIALS" => Ok(Self::Financials),
            other => Err(ValidationError::InvalidInput(format!("unknown data kind: {}", other)).into()),
        }
    }
}

/// Outcome of the most recent update attempt for an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    /// Created but never fetched.
    Pending,
    Success,
    Failed,
    /// Permanently skipped (delisted symbol, malformed upstream data).
    Skipped,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
        }
    }
}

impl std::fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for UpdateStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            "SKIPPED" => Ok(Self::Skipped),
            other => Err(ValidationError::InvalidInput(format!("unknown status: {}", other)).into()),
        }
    }
}

/// Key of a freshness entry: one row per (entity, data kind).
#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessKey {
    pub entity_id: String,
    pub data_kind: DataKind,
}

impl FreshnessKey {
    pub fn new(entity_id: impl Into<String>, data_kind: DataKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            data_kind,
        }
    }
}

impl std::fmt::Display for FreshnessKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.data_kind)
    }
}

/// Durable per-(entity, data-kind) freshness ledger row.
///
/// Soft state: entries are never hard-deleted on failure, only marked.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessEntry {
    pub entity_id: String,
    pub data_kind: DataKind,
    pub last_update: Option<DateTime<Utc>>,
    pub next_update_due: DateTime<Utc>,
    pub update_count: i64,
    /// Consecutive failures since the last success; drives backoff.
    pub error_count: i32,
    pub last_status: UpdateStatus,
    pub error_message: Option<String>,
    /// 1 = highest .. 5 = lowest.
    pub priority: i32,
    pub content_hash: Option<String>,
}

impl FreshnessEntry {
    /// Fresh entry for a newly discovered entity: pending and due now.
    pub fn new(entity_id: impl Into<String>, data_kind: DataKind) -> Self {
        Self {
            entity_id: entity_id.into(),
            data_kind,
            last_update: None,
            next_update_due: Utc::now(),
            update_count: 0,
            error_count: 0,
            last_status: UpdateStatus::Pending,
            error_message: None,
            priority: data_kind.default_priority(),
            content_hash: None,
        }
    }

    pub fn key(&self) -> FreshnessKey {
        FreshnessKey::new(self.entity_id.clone(), self.data_kind)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_update_due <= now || self.last_status == UpdateStatus::Failed
    }
}

/// Per-kind freshness counts for the status surface.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FreshnessSummary {
    pub total: u64,
    pub due: u64,
    pub failed: u64,
    pub skipped: u64,
    pub fresh: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_entry_is_due_immediately() {
        let entry = FreshnessEntry::new("VNM", DataKind::Price);
        assert_eq!(entry.last_status, UpdateStatus::Pending);
        assert!(entry.is_due(Utc::now()));
        assert_eq!(entry.priority, 1);
    }

    #[test]
    fn test_failed_entry_is_due_even_in_future() {
        let mut entry = FreshnessEntry::new("VNM", DataKind::Price);
        entry.next_update_due = Utc::now() + Duration::hours(10);
        entry.last_status = UpdateStatus::Failed;
        assert!(entry.is_due(Utc::now()));
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in DataKind::all() {
            assert_eq!(kind.as_str().parse::<DataKind>().unwrap(), kind);
        }
    }
}
