//! SQLite storage backend for the quotewatch engine.
//!
//! The crate implements the storage traits declared by `quotewatch-core`
//! on top of Diesel: the freshness registry, scheduled tasks, the run log,
//! rate samples and the market data sink. Reads go through an r2d2 pool;
//! every write is funneled through a single-writer actor so the engine's
//! concurrent batch workers never contend on the database.

pub mod db;
pub mod errors;
pub mod market_data;
pub mod registry;
pub mod runs;
pub mod scheduler;
pub mod schema;
pub mod utils;

pub use db::{
    create_pool, get_connection, get_db_path, init, run_migrations, spawn_writer, DbConnection,
    DbPool, WriteHandle,
};
pub use errors::{IntoCore, StorageError};
pub use market_data::SqliteMarketDataSink;
pub use registry::SqliteFreshnessStore;
pub use runs::{SqliteRateSampleStore, SqliteRunLogStore};
pub use scheduler::SqliteSchedulerTaskStore;
