//! Durable task scheduler.
//!
//! - [`model`] - Schedules, task rows and statuses
//! - [`store`] - Storage trait implemented by the sqlite crate
//! - [`service`] - The driver loop, catch-up and reentrancy guard

pub mod model;
pub mod service;
pub mod store;

pub use model::{Schedule, ScheduledTask, TaskStatus};
pub use service::{Scheduler, TaskRunner, TickEvent};
pub use store::SchedulerTaskStore;
