//! Batch data collector.
//!
//! - [`model`] - Run log rows, batch reports and rate samples
//! - [`store`] - Storage traits implemented by the sqlite crate
//! - [`service`] - The worker-pool batch loop

pub mod model;
pub mod service;
pub mod store;

pub use model::{BatchReport, RateWindowSample, RunStatus, UpdateRun};
pub use service::Collector;
pub use store::{MarketDataSink, RateSampleStore, RunLogStore};
