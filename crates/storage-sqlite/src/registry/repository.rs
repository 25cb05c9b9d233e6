//! Repository for freshness ledger persistence.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::prelude::*;

use quotewatch_core::errors::Result;
use quotewatch_core::registry::model::{DataKind, FreshnessEntry, FreshnessKey, UpdateStatus};
use quotewatch_core::registry::store::FreshnessStore;

use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::freshness_registry;
use crate::utils::SQLITE_MAX_PARAMS_CHUNK;

use super::model::FreshnessEntryDB;

pub struct SqliteFreshnessStore {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl SqliteFreshnessStore {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

#[async_trait]
impl FreshnessStore for SqliteFreshnessStore {
    fn get(&self, key: &FreshnessKey) -> Result<Option<FreshnessEntry>> {
        let mut conn = get_connection(&self.pool)?;

        let result = freshness_registry::table
            .find((&key.entity_id, key.data_kind.as_str()))
            .first::<FreshnessEntryDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(result.map(Into::into))
    }

    /// Due rows in selection order: priority, due time, entity id. FAILED
    /// rows are due regardless of their scheduled time.
    fn get_due(
        &self,
        kind: DataKind,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FreshnessEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let now_str = now.to_rfc3339();

        let results = freshness_registry::table
            .filter(freshness_registry::data_kind.eq(kind.as_str()))
            .filter(
                freshness_registry::next_update_due
                    .le(now_str)
                    .or(freshness_registry::last_status.eq(UpdateStatus::Failed.as_str())),
            )
            .order((
                freshness_registry::priority.asc(),
                freshness_registry::next_update_due.asc(),
                freshness_registry::entity_id.asc(),
            ))
            .limit(limit as i64)
            .load::<FreshnessEntryDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(results.into_iter().map(Into::into).collect())
    }

    fn get_all(&self, kind: Option<DataKind>) -> Result<Vec<FreshnessEntry>> {
        let mut conn = get_connection(&self.pool)?;

        let mut query = freshness_registry::table.into_boxed();
        if let Some(kind) = kind {
            query = query.filter(freshness_registry::data_kind.eq(kind.as_str()));
        }

        let results = query
            .order(freshness_registry::entity_id.asc())
            .load::<FreshnessEntryDB>(&mut conn)
            .map_err(StorageError::from)?;

        Ok(results.into_iter().map(Into::into).collect())
    }

    async fn upsert(&self, entry: &FreshnessEntry) -> Result<()> {
        let db_row = FreshnessEntryDB::from(entry);

        self.writer
            .exec(move |conn| {
                diesel::replace_into(freshness_registry::table)
                    .values(&db_row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn upsert_many(&self, entries: &[FreshnessEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let db_rows: Vec<FreshnessEntryDB> = entries.iter().map(Into::into).collect();

        self.writer
            .exec(move |conn| {
                for chunk in db_rows.chunks(SQLITE_MAX_PARAMS_CHUNK) {
                    diesel::replace_into(freshness_registry::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }

    /// Insert rows that do not exist yet; existing rows are left untouched.
    async fn insert_missing(&self, entries: &[FreshnessEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let db_rows: Vec<FreshnessEntryDB> = entries.iter().map(Into::into).collect();

        self.writer
            .exec(move |conn| {
                let mut inserted = 0;
                for chunk in db_rows.chunks(SQLITE_MAX_PARAMS_CHUNK) {
                    inserted += diesel::insert_or_ignore_into(freshness_registry::table)
                        .values(chunk)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(inserted)
            })
            .await
    }

    async fn set_due_now(&self, entity_id: &str, kind: Option<DataKind>) -> Result<usize> {
        let entity_id = entity_id.to_string();
        let now_str = Utc::now().to_rfc3339();

        self.writer
            .exec(move |conn| {
                let touched = match kind {
                    Some(kind) => diesel::update(
                        freshness_registry::table
                            .filter(freshness_registry::entity_id.eq(&entity_id))
                            .filter(freshness_registry::data_kind.eq(kind.as_str())),
                    )
                    .set(freshness_registry::next_update_due.eq(&now_str))
                    .execute(conn)
                    .map_err(StorageError::from)?,
                    None => diesel::update(
                        freshness_registry::table
                            .filter(freshness_registry::entity_id.eq(&entity_id)),
                    )
                    .set(freshness_registry::next_update_due.eq(&now_str))
                    .execute(conn)
                    .map_err(StorageError::from)?,
                };
                Ok(touched)
            })
            .await
    }
}
