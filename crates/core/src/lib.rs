//! Quotewatch Core Crate
//!
//! The freshness orchestration engine: decides what market data is stale,
//! fetches it through the provider chain at a polite rate, and keeps a
//! durable ledger of every entity's update state.
//!
//! # Overview
//!
//! - [`registry`] - The per-(entity, data-kind) freshness ledger and its
//!   success/failure/backoff policy.
//! - [`scheduler`] - Durable named tasks driven on a minute tick, with
//!   crash catch-up and market-hours awareness.
//! - [`collector`] - The batch worker pool that fetches due entries and
//!   writes them into storage.
//! - [`engine`] - Composition root wiring all of the above over injected
//!   storage.
//!
//! Storage is abstracted behind per-concern traits ([`FreshnessStore`],
//! [`SchedulerTaskStore`], run log, samples, sink); the sqlite crate
//! implements them all over one single-writer database.

pub mod collector;
pub mod config;
pub mod engine;
pub mod errors;
pub mod registry;
pub mod scheduler;

pub use collector::{BatchReport, Collector, MarketDataSink, RateSampleStore, RunLogStore};
pub use config::{EngineConfig, TaskAction, TaskDefinition};
pub use engine::{Engine, EngineStatus, EngineStores};
pub use errors::{DatabaseError, Error, Result, ValidationError};
pub use registry::{
    DataKind, FreshnessEntry, FreshnessKey, FreshnessStore, FreshnessSummary, UpdateRegistry,
    UpdateStatus,
};
pub use scheduler::{Schedule, ScheduledTask, Scheduler, SchedulerTaskStore, TaskRunner};
