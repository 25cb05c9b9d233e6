//! Storage trait for scheduler task rows.

use async_trait::async_trait;

use crate::errors::Result;
use crate::scheduler::model::ScheduledTask;

/// Persistence seam for [`ScheduledTask`] rows.
#[async_trait]
pub trait SchedulerTaskStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<ScheduledTask>>;

    fn get_all(&self) -> Result<Vec<ScheduledTask>>;

    /// Insert or replace one task row, keyed by name.
    async fn upsert(&self, task: &ScheduledTask) -> Result<()>;
}
