//! SQLite persistence for the freshness ledger.

pub mod model;
pub mod repository;

pub use model::FreshnessEntryDB;
pub use repository::SqliteFreshnessStore;
