//! Collector domain models: run log entries, batch reports and rate
//! observability samples.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run log status lifecycle: Started -> (Running) -> Completed | Failed |
/// Cancelled. Immutable once `completed_at` is set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    Started,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started => "STARTED",
            Self::Running => "RUNNING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RunStatus {
    type Err = crate::errors::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "STARTED" => Ok(Self::Started),
            "RUNNING" => Ok(Self::Running),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(crate::errors::ValidationError::InvalidInput(format!(
                "unknown run status: {}",
                other
            ))
            .into()),
        }
    }
}

/// Append-only record of one scheduler/collector batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRun {
    pub id: String,
    /// What kind of batch this was, e.g. "PRICE" or "LISTING".
    pub kind: String,
    pub status: RunStatus,
    pub records_processed: i64,
    pub records_failed: i64,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
}

impl UpdateRun {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            status: RunStatus::Started,
            records_processed: 0,
            records_failed: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
        }
    }

    /// Mark the run finished with the given terminal status and counts.
    pub fn finish(&mut self, status: RunStatus, processed: i64, failed: i64) {
        debug_assert!(status.is_terminal());
        let now = Utc::now();
        self.status = status;
        self.records_processed = processed;
        self.records_failed = failed;
        self.completed_at = Some(now);
        self.duration_seconds = Some((now - self.started_at).num_seconds());
    }

    pub fn complete(&mut self, processed: i64, failed: i64) {
        self.finish(RunStatus::Completed, processed, failed);
    }

    pub fn fail(&mut self, error: impl Into<String>, processed: i64, failed: i64) {
        self.error_message = Some(error.into());
        self.finish(RunStatus::Failed, processed, failed);
    }

    pub fn cancel(&mut self, processed: i64, failed: i64) {
        self.finish(RunStatus::Cancelled, processed, failed);
    }
}

/// Summary handed back to the scheduler after a batch.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub run_id: String,
    pub kind: String,
    pub processed: u64,
    pub failed: u64,
    pub skipped: u64,
    /// Items whose content hash actually changed.
    pub changed: u64,
    pub cancelled: bool,
}

/// Periodic snapshot of limiter/breaker activity over one batch window.
///
/// Observability only; nothing reads these back for decisions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateWindowSample {
    pub requests_made: i64,
    pub requests_throttled: i64,
    pub circuit_breaker_trips: i64,
    pub avg_response_time_ms: Option<i64>,
    pub window_started_at: DateTime<Utc>,
    pub window_ended_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_lifecycle() {
        let mut run = UpdateRun::new("PRICE");
        assert_eq!(run.status, RunStatus::Started);
        assert!(run.completed_at.is_none());

        run.complete(8, 2);
        assert_eq!(run.status, RunStatus::Completed);
        assert_eq!(run.records_processed, 8);
        assert_eq!(run.records_failed, 2);
        assert!(run.completed_at.is_some());
        assert!(run.duration_seconds.is_some());
    }

    #[test]
    fn test_run_fail_records_message() {
        let mut run = UpdateRun::new("LISTING");
        run.fail("provider unreachable", 0, 0);
        assert_eq!(run.status, RunStatus::Failed);
        assert_eq!(run.error_message.as_deref(), Some("provider unreachable"));
    }

    #[test]
    fn test_run_cancel_is_terminal() {
        let mut run = UpdateRun::new("PRICE");
        run.cancel(3, 0);
        assert_eq!(run.status, RunStatus::Cancelled);
        assert!(run.status.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            RunStatus::Started,
            RunStatus::Running,
            RunStatus::Completed,
            RunStatus::Failed,
            RunStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<RunStatus>().unwrap(), status);
        }
    }
}
