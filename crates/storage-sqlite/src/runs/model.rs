//! Database models for run log entries and rate samples.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use quotewatch_core::collector::model::{RateWindowSample, RunStatus, UpdateRun};

/// Database model for run log rows.
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
#[diesel(table_name = crate::schema::update_runs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct UpdateRunDB {
    pub id: String,
    pub kind: String,
    pub status: String,
    pub records_processed: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub duration_seconds: Option<i64>,
}

fn parse_utc(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<UpdateRunDB> for UpdateRun {
    fn from(db: UpdateRunDB) -> Self {
        Self {
            id: db.id,
            kind: db.kind,
            status: db.status.parse().unwrap_or(RunStatus::Failed),
            records_processed: db.records_processed,
            records_failed: db.records_failed,
            error_message: db.error_message,
            started_at: parse_utc(&db.started_at),
            completed_at: db.completed_at.as_deref().map(parse_utc),
            duration_seconds: db.duration_seconds,
        }
    }
}

impl From<&UpdateRun> for UpdateRunDB {
    fn from(domain: &UpdateRun) -> Self {
        Self {
            id: domain.id.clone(),
            kind: domain.kind.clone(),
            status: domain.status.as_str().to_string(),
            records_processed: domain.records_processed,
            records_failed: domain.records_failed,
            error_message: domain.error_message.clone(),
            started_at: domain.started_at.to_rfc3339(),
            completed_at: domain.completed_at.map(|dt| dt.to_rfc3339()),
            duration_seconds: domain.duration_seconds,
        }
    }
}

/// Insertable model for rate samples; the id is database-assigned.
#[derive(Insertable, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::rate_window_samples)]
pub struct NewRateWindowSampleDB {
    pub requests_made: i64,
    pub requests_throttled: i64,
    pub circuit_breaker_trips: i64,
    pub avg_response_time_ms: Option<i64>,
    pub window_started_at: String,
    pub window_ended_at: String,
}

/// Database model for rate sample rows.
#[derive(Queryable, Identifiable, Selectable, PartialEq, Serialize, Deserialize, Debug, Clone)]
#[diesel(table_name = crate::schema::rate_window_samples)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct RateWindowSampleDB {
    pub id: i32,
    pub requests_made: i64,
    pub requests_throttled: i64,
    pub circuit_breaker_trips: i64,
    pub avg_response_time_ms: Option<i64>,
    pub window_started_at: String,
    pub window_ended_at: String,
}

impl From<RateWindowSampleDB> for RateWindowSample {
    fn from(db: RateWindowSampleDB) -> Self {
        Self {
            requests_made: db.requests_made,
            requests_throttled: db.requests_throttled,
            circuit_breaker_trips: db.circuit_breaker_trips,
            avg_response_time_ms: db.avg_response_time_ms,
            window_started_at: parse_utc(&db.window_started_at),
            window_ended_at: parse_utc(&db.window_ended_at),
        }
    }
}

impl From<&RateWindowSample> for NewRateWindowSampleDB {
    fn from(domain: &RateWindowSample) -> Self {
        Self {
            requests_made: domain.requests_made,
            requests_throttled: domain.requests_throttled,
            circuit_breaker_trips: domain.circuit_breaker_trips,
            avg_response_time_ms: domain.avg_response_time_ms,
            window_started_at: domain.window_started_at.to_rfc3339(),
            window_ended_at: domain.window_ended_at.to_rfc3339(),
        }
    }
}
