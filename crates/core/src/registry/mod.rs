//! Per-entity freshness ledger.
//!
//! - [`model`] - Ledger rows, data kinds and statuses
//! - [`store`] - Storage trait implemented by the sqlite crate
//! - [`service`] - The [`UpdateRegistry`] policy layer

pub mod model;
pub mod service;
pub mod store;

pub use model::{DataKind, FreshnessEntry, FreshnessKey, FreshnessSummary, UpdateStatus};
pub use service::UpdateRegistry;
pub use store::FreshnessStore;
