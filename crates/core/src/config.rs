//! Engine configuration.
//!
//! All knobs are externally injected; defaults mirror a small self-hosted
//! deployment polling free Vietnamese data sources.

use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveTime, Timelike, Weekday};
use serde::{Deserialize, Serialize};

use crate::registry::DataKind;
use crate::scheduler::Schedule;
use quotewatch_market_data::CircuitBreakerConfig;

/// Top-level engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Aggregate outbound cap shared by all workers.
    pub requests_per_minute: u32,
    /// Per-upstream-call timeout.
    pub request_timeout_secs: u64,
    /// Due items pulled per batch.
    pub batch_size: usize,
    /// Parallel fetch workers per batch.
    pub worker_count: usize,
    pub breaker: BreakerSettings,
    pub backoff: BackoffSettings,
    pub ttl: TtlSettings,
    pub market_hours: MarketHours,
    pub tasks: Vec<TaskDefinition>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 6,
            request_timeout_secs: 30,
            batch_size: 10,
            worker_count: 2,
            breaker: BreakerSettings::default(),
            backoff: BackoffSettings::default(),
            ttl: TtlSettings::default(),
            market_hours: MarketHours::default(),
            tasks: default_tasks(),
        }
    }
}

impl EngineConfig {
    /// Freshness window for a data kind.
    pub fn ttl_for(&self, kind: DataKind) -> Duration {
        match kind {
            DataKind::Price => Duration::hours(self.ttl.price_hours),
            DataKind::Dividends => Duration::hours(self.ttl.dividends_hours),
            DataKind::Financials => Duration::hours(self.ttl.financials_hours),
        }
    }

    pub fn request_timeout(&self) -> StdDuration {
        StdDuration::from_secs(self.request_timeout_secs)
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.breaker.failure_threshold,
            open_timeout: StdDuration::from_secs(self.breaker.open_timeout_secs),
            half_open_max_calls: self.breaker.half_open_max_calls,
        }
    }
}

/// Circuit breaker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub open_timeout_secs: u64,
    pub half_open_max_calls: u32,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout_secs: 300,
            half_open_max_calls: 1,
        }
    }
}

/// Retry backoff settings for failed registry entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffSettings {
    pub base_secs: f64,
    pub multiplier: f64,
    /// Jitter factor, 0.1 = plus/minus 10%.
    pub jitter: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_secs: 1.0,
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

/// Per-data-kind freshness windows, in hours.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TtlSettings {
    pub price_hours: i64,
    pub dividends_hours: i64,
    pub financials_hours: i64,
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            price_hours: 24,
            dividends_hours: 24 * 7,
            financials_hours: 24 * 90,
        }
    }
}

/// Trading session window; scheduler tasks can opt out of running while the
/// exchange is open.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MarketHours {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl Default for MarketHours {
    fn default() -> Self {
        // HOSE continuous session, local time.
        Self {
            open_hour: 9,
            close_hour: 15,
        }
    }
}

impl MarketHours {
    /// Whether the exchange session is open at the given local time.
    pub fn is_open(&self, weekday: Weekday, time: NaiveTime) -> bool {
        let is_weekday = !matches!(weekday, Weekday::Sat | Weekday::Sun);
        is_weekday && time.hour() >= self.open_hour && time.hour() < self.close_hour
    }
}

/// What a scheduler task does when triggered.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TaskAction {
    /// Run a collector batch for one data kind.
    Collect { kind: DataKind },
    /// Refresh the exchange listing and seed registry entries.
    RefreshListing,
}

/// One named scheduler task.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub name: String,
    pub action: TaskAction,
    pub schedule: Schedule,
    pub enabled: bool,
    /// Skip (without advancing next_run) while the exchange is open.
    pub respect_market_hours: bool,
}

fn at(hour: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
}

fn default_tasks() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition {
            name: "daily_prices".to_string(),
            action: TaskAction::Collect {
                kind: DataKind::Price,
            },
            schedule: Schedule::Daily { time: at(18) },
            enabled: true,
            respect_market_hours: true,
        },
        TaskDefinition {
            name: "weekly_dividends".to_string(),
            action: TaskAction::Collect {
                kind: DataKind::Dividends,
            },
            schedule: Schedule::Weekly {
                weekday: Weekday::Sat,
                time: at(20),
            },
            enabled: true,
            respect_market_hours: false,
        },
        TaskDefinition {
            name: "weekly_financials".to_string(),
            action: TaskAction::Collect {
                kind: DataKind::Financials,
            },
            schedule: Schedule::Weekly {
                weekday: Weekday::Sat,
                time: at(21),
            },
            enabled: true,
            respect_market_hours: false,
        },
        TaskDefinition {
            name: "listing_refresh".to_string(),
            action: TaskAction::RefreshListing,
            schedule: Schedule::Weekly {
                weekday: Weekday::Sun,
                time: at(8),
            },
            enabled: true,
            respect_market_hours: false,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment_profile() {
        let config = EngineConfig::default();
        assert_eq!(config.requests_per_minute, 6);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.ttl_for(DataKind::Price), Duration::hours(24));
        assert_eq!(config.tasks.len(), 4);
    }

    #[test]
    fn test_market_hours_window() {
        let hours = MarketHours::default();
        assert!(hours.is_open(Weekday::Mon, at(10)));
        assert!(!hours.is_open(Weekday::Mon, at(15)));
        assert!(!hours.is_open(Weekday::Mon, at(8)));
        assert!(!hours.is_open(Weekday::Sat, at(10)));
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.batch_size, config.batch_size);
        assert_eq!(parsed.tasks[0].name, "daily_prices");
    }
}
