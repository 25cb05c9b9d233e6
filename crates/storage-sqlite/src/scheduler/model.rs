//! Database models for scheduler tasks.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use quotewatch_core::scheduler::ScheduledTask;

/// Database model for scheduler task rows.
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
#[diesel(table_name = crate::schema::scheduler_tasks)]
#[diesel(primary_key(name))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ScheduledTaskDB {
    pub name: String,
    pub last_run: Option<String>,
    pub next_run: String,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
    pub is_enabled: bool,
}

fn parse_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<ScheduledTaskDB> for ScheduledTask {
    fn from(db: ScheduledTaskDB) -> Self {
        Self {
            name: db.name,
            last_run: db.last_run.as_deref().map(parse_utc),
            next_run: parse_utc(&db.next_run),
            run_count: db.run_count,
            success_count: db.success_count,
            failure_count: db.failure_count,
            last_status: db.last_status.and_then(|s| s.parse().ok()),
            last_error: db.last_error,
            is_enabled: db.is_enabled,
        }
    }
}

impl From<&ScheduledTask> for ScheduledTaskDB {
    fn from(domain: &ScheduledTask) -> Self {
        Self {
            name: domain.name.clone(),
            last_run: domain.last_run.map(|dt| dt.to_rfc3339()),
            next_run: domain.next_run.to_rfc3339(),
            run_count: domain.run_count,
            success_count: domain.success_count,
            failure_count: domain.failure_count,
            last_status: domain.last_status.map(|s| s.as_str().to_string()),
            last_error: domain.last_error.clone(),
            is_enabled: domain.is_enabled,
        }
    }
}
