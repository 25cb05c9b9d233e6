//! SQLite persistence for scheduler tasks.

pub mod model;
pub mod repository;

pub use model::ScheduledTaskDB;
pub use repository::SqliteSchedulerTaskStore;
