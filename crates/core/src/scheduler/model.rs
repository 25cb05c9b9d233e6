//! Scheduler domain models.
//!
//! All schedule arithmetic is done in UTC; deployments configure task times
//! in the server clock's terms.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::errors::{Error, ValidationError};

/// When a task fires.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Schedule {
    /// Every day at a fixed time.
    Daily { time: NaiveTime },
    /// Once a week on a fixed weekday and time.
    Weekly { weekday: Weekday, time: NaiveTime },
}

impl Schedule {
    /// The next occurrence strictly after `after`.
    ///
    /// Only ever returns a single future instant, which is what collapses
    /// any number of missed occurrences into one catch-up run.
    pub fn next_occurrence(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            Self::Daily { time } => {
                let candidate = at_time(after, *time);
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(1)
                }
            }
            Self::Weekly { weekday, time } => {
                let days_ahead = (weekday.num_days_from_monday() as i64
                    - after.weekday().num_days_from_monday() as i64)
                    .rem_euclid(7);
                let candidate = at_time(after + Duration::days(days_ahead), *time);
                if candidate > after {
                    candidate
                } else {
                    candidate + Duration::days(7)
                }
            }
        }
    }
}

fn at_time(day: DateTime<Utc>, time: NaiveTime) -> DateTime<Utc> {
    day.date_naive()
        .and_time(time)
        .and_utc()
}

/// Outcome of a task's most recent run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => {
                Err(ValidationError::InvalidInput(format!("unknown task status: {}", other)).into())
            }
        }
    }
}

/// Durable per-task run ledger row.
///
/// Created at config load, mutated only by the scheduler after each
/// attempted run, never deleted while enabled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledTask {
    pub name: String,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
    pub run_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_status: Option<TaskStatus>,
    pub last_error: Option<String>,
    pub is_enabled: bool,
}

impl ScheduledTask {
    /// Fresh row for a task seen for the first time.
    pub fn new(name: impl Into<String>, schedule: &Schedule, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            last_run: None,
            next_run: schedule.next_occurrence(now),
            run_count: 0,
            success_count: 0,
            failure_count: 0,
            last_status: None,
            last_error: None,
            is_enabled: true,
        }
    }

    /// Fold one attempted run into the row and advance `next_run`.
    pub fn complete_run(
        &mut self,
        schedule: &Schedule,
        now: DateTime<Utc>,
        error: Option<String>,
    ) {
        self.run_count += 1;
        self.last_run = Some(now);
        self.next_run = schedule.next_occurrence(now);
        match error {
            None => {
                self.success_count += 1;
                self.last_status = Some(TaskStatus::Success);
                self.last_error = None;
            }
            Some(message) => {
                self.failure_count += 1;
                self.last_status = Some(TaskStatus::Failed);
                self.last_error = Some(message);
            }
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_enabled && self.next_run <= now
    }
}
