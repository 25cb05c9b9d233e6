//! Storage trait for the freshness ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::errors::Result;
use crate::registry::model::{DataKind, FreshnessEntry, FreshnessKey};

/// Persistence seam for [`FreshnessEntry`] rows.
///
/// Reads are synchronous against a pooled connection; writes go through the
/// storage layer's single-writer path.
#[async_trait]
pub trait FreshnessStore: Send + Sync {
    /// Load a single entry.
    fn get(&self, key: &FreshnessKey) -> Result<Option<FreshnessEntry>>;

    /// Entries eligible for refresh: `next_update_due <= now` or
    /// `last_status = FAILED`, ordered by priority asc, next_update_due asc,
    /// entity_id asc, capped at `limit`.
    fn get_due(
        &self,
        kind: DataKind,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FreshnessEntry>>;

    /// All entries, optionally restricted to one kind.
    fn get_all(&self, kind: Option<DataKind>) -> Result<Vec<FreshnessEntry>>;

    /// Insert or replace one entry.
    async fn upsert(&self, entry: &FreshnessEntry) -> Result<()>;

    /// Insert or replace a batch of entries.
    async fn upsert_many(&self, entries: &[FreshnessEntry]) -> Result<()>;

    /// Insert entries that do not exist yet; existing rows are untouched.
    async fn insert_missing(&self, entries: &[FreshnessEntry]) -> Result<usize>;

    /// Pull an entry's due time to now, for every kind if `kind` is None.
    async fn set_due_now(&self, entity_id: &str, kind: Option<DataKind>) -> Result<usize>;
}
