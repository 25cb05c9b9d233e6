//! Database models for the freshness ledger.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use quotewatch_core::registry::model::{DataKind, FreshnessEntry, UpdateStatus};

/// Database model for freshness ledger rows.
#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    PartialEq,
    Serialize,
    Deserialize,
    Debug,
    Clone,
)]
#[diesel(table_name = crate::schema::freshness_registry)]
#[diesel(primary_key(entity_id, data_kind))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FreshnessEntryDB {
    pub entity_id: String,
    pub data_kind: String,
    pub last_update: Option<String>,
    pub next_update_due: String,
    pub update_count: i64,
    pub error_count: i32,
    pub last_status: String,
    pub error_message: Option<String>,
    pub priority: i32,
    pub content_hash: Option<String>,
}

fn parse_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<FreshnessEntryDB> for FreshnessEntry {
    fn from(db: FreshnessEntryDB) -> Self {
        Self {
            entity_id: db.entity_id,
            data_kind: db.data_kind.parse().unwrap_or(DataKind::Price),
            last_update: db.last_update.as_deref().map(parse_utc),
            next_update_due: parse_utc(&db.next_update_due),
            update_count: db.update_count,
            error_count: db.error_count,
            last_status: db.last_status.parse().unwrap_or(UpdateStatus::Pending),
            error_message: db.error_message,
            priority: db.priority,
            content_hash: db.content_hash,
        }
    }
}

impl From<&FreshnessEntry> for FreshnessEntryDB {
    fn from(domain: &FreshnessEntry) -> Self {
        Self {
            entity_id: domain.entity_id.clone(),
            data_kind: domain.data_kind.as_str().to_string(),
            last_update: domain.last_update.map(|dt| dt.to_rfc3339()),
            next_update_due: domain.next_update_due.to_rfc3339(),
            update_count: domain.update_count,
            error_count: domain.error_count,
            last_status: domain.last_status.as_str().to_string(),
            error_message: domain.error_message.clone(),
            priority: domain.priority,
            content_hash: domain.content_hash.clone(),
        }
    }
}
