//! SQLite persistence for the run log and rate samples.

pub mod model;
pub mod repository;

pub use model::{RateWindowSampleDB, UpdateRunDB};
pub use repository::{SqliteRateSampleStore, SqliteRunLogStore};
