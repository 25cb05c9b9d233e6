//! Freshness ledger service.
//!
//! Decides what is due, and owns the retry/backoff policy for failed
//! entries. All mutations funnel through the store's single-writer path.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::Rng;

use crate::config::{BackoffSettings, EngineConfig};
use crate::errors::Result;
use crate::registry::model::{
    DataKind, FreshnessEntry, FreshnessKey, FreshnessSummary, UpdateStatus,
};
use crate::registry::store::FreshnessStore;

/// Service over the durable freshness ledger.
pub struct UpdateRegistry<S: FreshnessStore> {
    store: Arc<S>,
    config: EngineConfig,
}

impl<S: FreshnessStore> UpdateRegistry<S> {
    pub fn new(store: Arc<S>, config: EngineConfig) -> Self {
        Self { store, config }
    }

    /// Due entries for a kind, in selection order (priority asc, due asc,
    /// entity asc), capped at `limit`.
    pub fn due_items(&self, kind: DataKind, limit: usize) -> Result<Vec<FreshnessEntry>> {
        self.store.get_due(kind, Utc::now(), limit)
    }

    /// Seed ledger rows for newly discovered entities. Existing rows are
    /// never touched, so one entry per (entity, kind) always holds.
    pub async fn ensure_entries(&self, entity_ids: &[String], kind: DataKind) -> Result<usize> {
        let entries: Vec<FreshnessEntry> = entity_ids
            .iter()
            .map(|id| FreshnessEntry::new(id.clone(), kind))
            .collect();
        let inserted = self.store.insert_missing(&entries).await?;
        if inserted > 0 {
            info!("registry: discovered {} new {} entries", inserted, kind);
        }
        Ok(inserted)
    }

    /// Record a successful fetch.
    ///
    /// A changed content hash counts as a real update; an unchanged hash
    /// only confirms freshness. Either way the entry is rescheduled a full
    /// TTL (with jitter) out, and its failure streak is cleared.
    pub async fn record_success(&self, key: &FreshnessKey, content_hash: &str) -> Result<bool> {
        let now = Utc::now();
        let mut entry = self.load_or_new(key)?;

        let changed = entry.content_hash.as_deref() != Some(content_hash);
        if changed {
            entry.update_count += 1;
            entry.content_hash = Some(content_hash.to_string());
        }

        entry.last_update = Some(now);
        entry.next_update_due = now + self.jittered(self.config.ttl_for(key.data_kind));
        entry.last_status = UpdateStatus::Success;
        entry.error_message = None;
        entry.error_count = 0;

        debug!("registry: {} success (changed={})", key, changed);
        self.store.upsert(&entry).await?;
        Ok(changed)
    }

    /// Record a failed fetch and schedule a bounded-backoff retry.
    ///
    /// The retry window grows exponentially with the failure streak but is
    /// capped at the kind's TTL, so a failing entry never retries less
    /// often than its normal schedule.
    pub async fn record_failure(&self, key: &FreshnessKey, error: &str) -> Result<()> {
        let now = Utc::now();
        let mut entry = self.load_or_new(key)?;

        entry.error_count += 1;
        entry.last_status = UpdateStatus::Failed;
        entry.error_message = Some(error.to_string());
        entry.next_update_due = now + self.backoff_delay(entry.error_count, key.data_kind);

        warn!(
            "registry: {} failed (streak {}): {}",
            key, entry.error_count, error
        );
        self.store.upsert(&entry).await
    }

    /// Mark an entry permanently skipped (delisted symbol, malformed data).
    ///
    /// Advances the due time by the full TTL so dead entities do not churn
    /// every batch.
    pub async fn mark_skipped(&self, key: &FreshnessKey, reason: &str) -> Result<()> {
        let now = Utc::now();
        let mut entry = self.load_or_new(key)?;

        entry.last_status = UpdateStatus::Skipped;
        entry.error_message = Some(reason.to_string());
        entry.next_update_due = now + self.config.ttl_for(key.data_kind);

        info!("registry: {} skipped: {}", key, reason);
        self.store.upsert(&entry).await
    }

    /// Force one entry due now (manual trigger).
    pub async fn force_due(&self, key: &FreshnessKey) -> Result<()> {
        self.store
            .set_due_now(&key.entity_id, Some(key.data_kind))
            .await?;
        Ok(())
    }

    /// Force every kind for an entity due now.
    pub async fn force_due_entity(&self, entity_id: &str) -> Result<usize> {
        self.store.set_due_now(entity_id, None).await
    }

    /// Reset failed entries of a kind to pending and due now.
    pub async fn clear_failures(&self, kind: DataKind) -> Result<usize> {
        let now = Utc::now();
        let mut failed: Vec<FreshnessEntry> = self
            .store
            .get_all(Some(kind))?
            .into_iter()
            .filter(|e| e.last_status == UpdateStatus::Failed)
            .collect();

        for entry in &mut failed {
            entry.last_status = UpdateStatus::Pending;
            entry.error_message = None;
            entry.error_count = 0;
            entry.next_update_due = now;
        }

        if !failed.is_empty() {
            info!("registry: cleared {} failed {} entries", failed.len(), kind);
            self.store.upsert_many(&failed).await?;
        }
        Ok(failed.len())
    }

    /// Per-kind counts for the status surface.
    pub fn summary(&self, kind: DataKind) -> Result<FreshnessSummary> {
        let now = Utc::now();
        let mut summary = FreshnessSummary::default();
        for entry in self.store.get_all(Some(kind))? {
            summary.total += 1;
            match entry.last_status {
                UpdateStatus::Failed => summary.failed += 1,
                UpdateStatus::Skipped => summary.skipped += 1,
                _ => {}
            }
            if entry.is_due(now) {
                summary.due += 1;
            } else {
                summary.fresh += 1;
            }
        }
        Ok(summary)
    }

    fn load_or_new(&self, key: &FreshnessKey) -> Result<FreshnessEntry> {
        Ok(self
            .store
            .get(key)?
            .unwrap_or_else(|| FreshnessEntry::new(key.entity_id.clone(), key.data_kind)))
    }

    /// TTL with uniform jitter applied, never negative.
    fn jittered(&self, ttl: Duration) -> Duration {
        apply_jitter(ttl, self.config.backoff.jitter)
    }

    /// Bounded exponential backoff: base * multiplier^(streak-1), jittered,
    /// capped at the kind's TTL.
    fn backoff_delay(&self, error_count: i32, kind: DataKind) -> Duration {
        let BackoffSettings {
            base_secs,
            multiplier,
            jitter,
        } = self.config.backoff;

        let exponent = (error_count - 1).clamp(0, 20);
        let raw_secs = base_secs * multiplier.powi(exponent);
        let ttl = self.config.ttl_for(kind);
        let capped = Duration::milliseconds((raw_secs * 1000.0) as i64).min(ttl);
        apply_jitter(capped, jitter).min(ttl)
    }
}

fn apply_jitter(base: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return base;
    }
    let factor: f64 = rand::thread_rng().gen_range(-jitter..=jitter);
    let adjusted = base.num_milliseconds() as f64 * (1.0 + factor);
    Duration::milliseconds(adjusted.max(0.0) as i64)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory ledger for service tests.
    #[derive(Default)]
    pub(crate) struct MemoryFreshnessStore {
        entries: Mutex<HashMap<FreshnessKey, FreshnessEntry>>,
    }

    #[async_trait::async_trait]
    impl FreshnessStore for MemoryFreshnessStore {
        fn get(&self, key: &FreshnessKey) -> Result<Option<FreshnessEntry>> {
            Ok(self.entries.lock().unwrap().get(key).cloned())
        }

        fn get_due(
            &self,
            kind: DataKind,
            now: DateTime<Utc>,
            limit: usize,
        ) -> Result<Vec<FreshnessEntry>> {
            let mut due: Vec<FreshnessEntry> = self
                .entries
                .lock()
                .unwrap()
                .values()
                .filter(|e| e.data_kind == kind && e.is_due(now))
                .cloned()
                .collect();
            due.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then(a.next_update_due.cmp(&b.next_update_due))
                    .then(a.entity_id.cmp(&b.entity_id))
            });
            due.truncate(limit);
            Ok(due)
        }

        fn get_all(&self, kind: Option<DataKind>) -> Result<Vec<FreshnessEntry>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .values()
                .filter(|e| kind.map_or(true, |k| e.data_kind == k))
                .cloned()
                .collect())
        }

        async fn upsert(&self, entry: &FreshnessEntry) -> Result<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(entry.key(), entry.clone());
            Ok(())
        }

        async fn upsert_many(&self, entries: &[FreshnessEntry]) -> Result<()> {
            let mut map = self.entries.lock().unwrap();
            for entry in entries {
                map.insert(entry.key(), entry.clone());
            }
            Ok(())
        }

        async fn insert_missing(&self, entries: &[FreshnessEntry]) -> Result<usize> {
            let mut map = self.entries.lock().unwrap();
            let mut inserted = 0;
            for entry in entries {
                if !map.contains_key(&entry.key()) {
                    map.insert(entry.key(), entry.clone());
                    inserted += 1;
                }
            }
            Ok(inserted)
        }

        async fn set_due_now(&self, entity_id: &str, kind: Option<DataKind>) -> Result<usize> {
            let now = Utc::now();
            let mut map = self.entries.lock().unwrap();
            let mut touched = 0;
            for entry in map.values_mut() {
                if entry.entity_id == entity_id && kind.map_or(true, |k| entry.data_kind == k) {
                    entry.next_update_due = now;
                    touched += 1;
                }
            }
            Ok(touched)
        }
    }

    fn registry() -> UpdateRegistry<MemoryFreshnessStore> {
        UpdateRegistry::new(Arc::new(MemoryFreshnessStore::default()), EngineConfig::default())
    }

    fn key(id: &str) -> FreshnessKey {
        FreshnessKey::new(id, DataKind::Price)
    }

    #[tokio::test]
    async fn test_success_advances_due_past_now() {
        let registry = registry();
        let changed = registry.record_success(&key("VNM"), "abc").await.unwrap();
        assert!(changed);

        let entry = registry.store.get(&key("VNM")).unwrap().unwrap();
        assert_eq!(entry.last_status, UpdateStatus::Success);
        assert_eq!(entry.update_count, 1);
        // Always advanced after a successful write.
        assert!(entry.next_update_due > Utc::now());
    }

    #[tokio::test]
    async fn test_unchanged_hash_keeps_update_count() {
        let registry = registry();
        registry.record_success(&key("VNM"), "abc").await.unwrap();
        let first = registry.store.get(&key("VNM")).unwrap().unwrap();

        let changed = registry.record_success(&key("VNM"), "abc").await.unwrap();
        assert!(!changed);

        let second = registry.store.get(&key("VNM")).unwrap().unwrap();
        assert_eq!(second.update_count, first.update_count);
        assert!(second.last_update >= first.last_update);
        assert_eq!(second.last_status, UpdateStatus::Success);

        // A changed hash bumps the count.
        assert!(registry.record_success(&key("VNM"), "def").await.unwrap());
        let third = registry.store.get(&key("VNM")).unwrap().unwrap();
        assert_eq!(third.update_count, first.update_count + 1);
    }

    #[tokio::test]
    async fn test_failure_schedules_short_retry() {
        let registry = registry();
        registry.record_failure(&key("FPT"), "timeout").await.unwrap();

        let entry = registry.store.get(&key("FPT")).unwrap().unwrap();
        assert_eq!(entry.last_status, UpdateStatus::Failed);
        assert_eq!(entry.error_count, 1);
        assert_eq!(entry.error_message.as_deref(), Some("timeout"));

        // First retry lands seconds out, far below the 24h TTL.
        let delay = entry.next_update_due - Utc::now();
        assert!(delay <= Duration::seconds(5));
    }

    #[tokio::test]
    async fn test_backoff_is_capped_at_ttl() {
        let registry = registry();
        for _ in 0..40 {
            registry.record_failure(&key("HPG"), "boom").await.unwrap();
        }
        let entry = registry.store.get(&key("HPG")).unwrap().unwrap();
        let delay = entry.next_update_due - Utc::now();
        assert!(delay <= registry.config.ttl_for(DataKind::Price));
    }

    #[tokio::test]
    async fn test_due_items_excludes_future_entries() {
        let registry = registry();
        registry
            .ensure_entries(&["A".into(), "B".into()], DataKind::Price)
            .await
            .unwrap();
        registry.record_success(&key("A"), "h1").await.unwrap();

        let due = registry.due_items(DataKind::Price, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].entity_id, "B");
    }

    #[tokio::test]
    async fn test_failed_entries_stay_due() {
        let registry = registry();
        registry.record_failure(&key("C"), "err").await.unwrap();

        // Even if the backoff pushed next_update_due out, FAILED keeps it due.
        let due = registry.due_items(DataKind::Price, 10).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].last_status, UpdateStatus::Failed);
    }

    #[tokio::test]
    async fn test_due_order_is_deterministic() {
        let registry = registry();
        let due_at = Utc::now() - Duration::hours(1);

        // Same priority and the same due instant: entity id breaks the tie.
        for id in ["ZZZ", "AAA", "MMM"] {
            let mut entry = FreshnessEntry::new(id, DataKind::Price);
            entry.next_update_due = due_at;
            registry.store.upsert(&entry).await.unwrap();
        }

        let due = registry.due_items(DataKind::Price, 10).unwrap();
        let ids: Vec<&str> = due.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["AAA", "MMM", "ZZZ"]);
    }

    #[tokio::test]
    async fn test_ensure_entries_is_idempotent() {
        let registry = registry();
        let ids = vec!["VNM".to_string(), "FPT".to_string()];
        assert_eq!(registry.ensure_entries(&ids, DataKind::Price).await.unwrap(), 2);
        assert_eq!(registry.ensure_entries(&ids, DataKind::Price).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_force_due() {
        let registry = registry();
        registry.record_success(&key("VCB"), "h").await.unwrap();
        assert!(registry.due_items(DataKind::Price, 10).unwrap().is_empty());

        registry.force_due(&key("VCB")).await.unwrap();
        assert_eq!(registry.due_items(DataKind::Price, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clear_failures() {
        let registry = registry();
        registry.record_failure(&key("SSI"), "err").await.unwrap();
        assert_eq!(registry.clear_failures(DataKind::Price).await.unwrap(), 1);

        let entry = registry.store.get(&key("SSI")).unwrap().unwrap();
        assert_eq!(entry.last_status, UpdateStatus::Pending);
        assert_eq!(entry.error_count, 0);
        assert!(entry.error_message.is_none());
    }

    #[tokio::test]
    async fn test_skipped_entry_waits_full_ttl() {
        let registry = registry();
        registry.mark_skipped(&key("DELISTED"), "symbol not found").await.unwrap();

        let entry = registry.store.get(&key("DELISTED")).unwrap().unwrap();
        assert_eq!(entry.last_status, UpdateStatus::Skipped);
        let delay = entry.next_update_due - Utc::now();
        assert!(delay > Duration::hours(23));
    }

    #[tokio::test]
    async fn test_summary_counts() {
        let registry = registry();
        registry.record_success(&key("A"), "h").await.unwrap();
        registry.record_failure(&key("B"), "e").await.unwrap();
        registry
            .ensure_entries(&["C".into()], DataKind::Price)
            .await
            .unwrap();

        let summary = registry.summary(DataKind::Price).unwrap();
        assert_eq!(summary.total, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.due, 2); // failed B + pending C
        assert_eq!(summary.fresh, 1);
    }
}
