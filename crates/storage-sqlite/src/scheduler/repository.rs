//! Repository for scheduler task persistence.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;

use quotewatch_core::errors::Result;
use quotewatch_core::scheduler::store::SchedulerTaskStore;
use quotewatch_core::scheduler::ScheduledTask;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::scheduler_tasks;

use super::model::ScheduledTaskDB;

pub struct SqliteSchedulerTaskStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteSchedulerTaskStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl SchedulerTaskStore for SqliteSchedulerTaskStore {
    fn get(&self, name: &str) -> Result<Option<ScheduledTask>> {
        let mut conn = get_connection(&self.pool)?;

        let result = scheduler_tasks::table
            .find(name)
            .first::<ScheduledTaskDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(result.map(Into::into))
    }

    fn get_all(&self) -> Result<Vec<ScheduledTask>> {
        let mut conn = get_connection(&self.pool)?;

        let results = scheduler_tasks::table
            .order(scheduler_tasks::name.asc())
            .load::<ScheduledTaskDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(results.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, task: &ScheduledTask) -> Result<()> {
        let db_row = ScheduledTaskDB::from(task);

        self.writer
            .exec(move |conn| {
                diesel::replace_into(scheduler_tasks::table)
                    .values(&db_row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup;
    use chrono::{NaiveTime, Utc};
    use quotewatch_core::scheduler::Schedule;

    #[tokio::test]
    async fn test_upsert_and_get_round_trip() {
        let (_dir, pool, writer) = setup();
        let store = SqliteSchedulerTaskStore::new(pool, writer);

        let schedule = Schedule::Daily {
            time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        let mut task = ScheduledTask::new("daily_prices", &schedule, Utc::now());
        store.upsert(&task).await.unwrap();

        let loaded = store.get("daily_prices").unwrap().unwrap();
        assert_eq!(loaded.name, "daily_prices");
        assert_eq!(loaded.run_count, 0);
        assert!(loaded.last_status.is_none());
        assert!(loaded.is_enabled);

        // Fold in a failed run and verify the row reflects it.
        task.complete_run(&schedule, Utc::now(), Some("provider down".into()));
        store.upsert(&task).await.unwrap();

        let loaded = store.get("daily_prices").unwrap().unwrap();
        assert_eq!(loaded.run_count, 1);
        assert_eq!(loaded.failure_count, 1);
        assert_eq!(loaded.last_error.as_deref(), Some("provider down"));
        assert!(loaded.next_run > Utc::now());
    }

    #[tokio::test]
    async fn test_get_all_sorted_by_name() {
        let (_dir, pool, writer) = setup();
        let store = SqliteSchedulerTaskStore::new(pool, writer);

        let schedule = Schedule::Daily {
            time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
        };
        for name in ["zeta", "alpha"] {
            store
                .upsert(&ScheduledTask::new(name, &schedule, Utc::now()))
                .await
                .unwrap();
        }

        let all = store.get_all().unwrap();
        let names: Vec<&str> = all.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);

        assert!(store.get("missing").unwrap().is_none());
    }
}
