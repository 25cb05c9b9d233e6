//! Repositories for run log and rate sample persistence.

use std::sync::Arc;

use async_trait::async_trait;
use diesel::prelude::*;

use quotewatch_core::collector::model::{RateWindowSample, UpdateRun};
use quotewatch_core::collector::store::{RateSampleStore, RunLogStore};
use quotewatch_core::errors::Result;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::{rate_window_samples, update_runs};

use super::model::{NewRateWindowSampleDB, UpdateRunDB};

pub struct SqliteRunLogStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteRunLogStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl RunLogStore for SqliteRunLogStore {
    async fn insert(&self, run: &UpdateRun) -> Result<()> {
        let db_row = UpdateRunDB::from(run);

        self.writer
            .exec(move |conn| {
                diesel::insert_into(update_runs::table)
                    .values(&db_row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn finalize(&self, run: &UpdateRun) -> Result<()> {
        let db_row = UpdateRunDB::from(run);

        self.writer
            .exec(move |conn| {
                diesel::update(update_runs::table.find(&db_row.id))
                    .set(&db_row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn get_recent(&self, limit: usize) -> Result<Vec<UpdateRun>> {
        let mut conn = get_connection(&self.pool)?;

        let results = update_runs::table
            .order(update_runs::started_at.desc())
            .limit(limit as i64)
            .load::<UpdateRunDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(results.into_iter().map(Into::into).collect())
    }
}

pub struct SqliteRateSampleStore {
    writer: WriteHandle,
}

impl SqliteRateSampleStore {
    pub fn new(writer: WriteHandle) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl RateSampleStore for SqliteRateSampleStore {
    async fn append(&self, sample: &RateWindowSample) -> Result<()> {
        let db_row = NewRateWindowSampleDB::from(sample);

        self.writer
            .exec(move |conn| {
                diesel::insert_into(rate_window_samples::table)
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
    use chrono::Utc;
    use quotewatch_core::collector::model::RunStatus;

    #[tokio::test]
    async fn test_run_log_insert_then_finalize() {
        let (_dir, pool, writer) = setup();
        let store = SqliteRunLogStore::new(pool, writer);

        let mut run = UpdateRun::new("PRICE");
        store.insert(&run).await.unwrap();

        let open = store.get_recent(10).unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, RunStatus::Started);
        assert!(open[0].completed_at.is_none());

        run.complete(8, 2);
        store.finalize(&run).await.unwrap();

        let done = store.get_recent(10).unwrap();
        assert_eq!(done[0].status, RunStatus::Completed);
        assert_eq!(done[0].records_processed, 8);
        assert_eq!(done[0].records_failed, 2);
        assert!(done[0].completed_at.is_some());
    }

    #[tokio::test]
    async fn test_get_recent_orders_newest_first() {
        let (_dir, pool, writer) = setup();
        let store = SqliteRunLogStore::new(pool, writer);

        let mut first = UpdateRun::new("PRICE");
        first.started_at = Utc::now() - chrono::Duration::hours(2);
        let second = UpdateRun::new("DIVIDENDS");
        store.insert(&first).await.unwrap();
        store.insert(&second).await.unwrap();

        let recent = store.get_recent(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].kind, "DIVIDENDS");
    }

    #[tokio::test]
    async fn test_rate_sample_append() {
        let (_dir, pool, writer) = setup();
        let store = SqliteRateSampleStore::new(writer);

        let now = Utc::now();
        store
            .append(&RateWindowSample {
                requests_made: 12,
                requests_throttled: 3,
                circuit_breaker_trips: 0,
                avg_response_time_ms: Some(140),
                window_started_at: now - chrono::Duration::minutes(1),
                window_ended_at: now,
            })
            .await
            .unwrap();

        // Appended row is visible through a raw query.
        use crate::schema::rate_window_samples::dsl::*;
        let mut conn = get_connection(&pool).unwrap();
        let rows: Vec<crate::runs::model::RateWindowSampleDB> =
            rate_window_samples.load(&mut conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].requests_made, 12);
        assert_eq!(rows[0].avg_response_time_ms, Some(140));
    }
}
