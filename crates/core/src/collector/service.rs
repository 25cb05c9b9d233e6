//! Batch collector.
//!
//! Pulls due entries from the freshness ledger, fetches each through the
//! provider chain with a bounded worker pool, writes the results into the
//! storage sink and folds every outcome back into the ledger. Each batch is
//! recorded in the append-only run log and leaves one rate/breaker sample
//! behind for observability.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::collector::model::{BatchReport, RateWindowSample, UpdateRun};
use crate::collector::store::{MarketDataSink, RateSampleStore, RunLogStore};
use crate::config::{EngineConfig, TaskAction};
use crate::errors::{Error, Result};
use crate::registry::model::{DataKind, FreshnessEntry, FreshnessKey};
use crate::registry::store::FreshnessStore;
use crate::registry::UpdateRegistry;
use crate::scheduler::TaskRunner;
use quotewatch_market_data::{content_digest, ProviderRegistry, RetryClass};

/// Price history window for an entity that has never been fetched.
const INITIAL_PRICE_LOOKBACK_DAYS: i64 = 365;
/// Price history window once an entity has data.
const INCREMENTAL_PRICE_LOOKBACK_DAYS: i64 = 7;

/// Run log kind used for listing refreshes.
const LISTING_RUN_KIND: &str = "LISTING";

/// How one batch item ended.
enum ItemOutcome {
    Updated { changed: bool },
    /// Transient failure; the ledger entry got a backoff retry.
    Failed,
    /// Permanent data error; the ledger entry was marked skipped.
    Skipped,
    /// Every provider circuit was open; the entry stays due untouched.
    StillDue,
    Cancelled,
}

#[derive(Default)]
struct BatchCounters {
    processed: u64,
    failed: u64,
    skipped: u64,
    changed: u64,
    cancelled: bool,
}

/// Limiter/breaker counter values at batch start, for windowed deltas.
struct WindowBaseline {
    requests: u64,
    throttled: u64,
    trips: u64,
    response_count: u64,
    response_sum_ms: u64,
}

/// Fetches due data through the provider chain and maintains the ledger.
pub struct Collector<S: FreshnessStore> {
    registry: Arc<UpdateRegistry<S>>,
    providers: Arc<ProviderRegistry>,
    run_log: Arc<dyn RunLogStore>,
    samples: Arc<dyn RateSampleStore>,
    sink: Arc<dyn MarketDataSink>,
    config: EngineConfig,
    shutdown: watch::Receiver<bool>,
}

impl<S: FreshnessStore> Collector<S> {
    pub fn new(
        registry: Arc<UpdateRegistry<S>>,
        providers: Arc<ProviderRegistry>,
        run_log: Arc<dyn RunLogStore>,
        samples: Arc<dyn RateSampleStore>,
        sink: Arc<dyn MarketDataSink>,
        config: EngineConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            providers,
            run_log,
            samples,
            sink,
            config,
            shutdown,
        }
    }

    /// Run one batch for a data kind: select due entries, fetch them with a
    /// bounded worker pool, fold every outcome back into the ledger.
    pub async fn collect_batch(&self, kind: DataKind) -> Result<BatchReport> {
        let mut run = UpdateRun::new(kind.as_str());
        self.run_log.insert(&run).await?;
        let window_started_at = Utc::now();
        let baseline = self.window_baseline();

        let due = match self.registry.due_items(kind, self.config.batch_size) {
            Ok(due) => due,
            Err(err) => {
                run.fail(err.to_string(), 0, 0);
                self.finalize_run(&run).await;
                self.append_window_sample(window_started_at, &baseline).await;
                return Err(err);
            }
        };

        info!("collector: {} batch starting ({} due items)", kind, due.len());
        let counters = Mutex::new(BatchCounters::default());

        futures::stream::iter(due)
            .for_each_concurrent(self.config.worker_count.max(1), |entry| {
                let counters = &counters;
                async move {
                    // Stop dispatching once shutdown is signalled; items not
                    // yet fetched stay due for the next batch.
                    let outcome = if self.is_shutting_down() {
                        ItemOutcome::Cancelled
                    } else {
                        tokio::select! {
                            outcome = self.process_item(&entry) => outcome,
                            _ = shutdown_signalled(self.shutdown.clone()) => ItemOutcome::Cancelled,
                        }
                    };

                    let mut c = counters.lock().unwrap_or_else(|p| p.into_inner());
                    match outcome {
                        ItemOutcome::Updated { changed } => {
                            c.processed += 1;
                            if changed {
                                c.changed += 1;
                            }
                        }
                        ItemOutcome::Failed | ItemOutcome::StillDue => c.failed += 1,
                        ItemOutcome::Skipped => c.skipped += 1,
                        ItemOutcome::Cancelled => c.cancelled = true,
                    }
                }
            })
            .await;

        let c = counters.into_inner().unwrap_or_else(|p| p.into_inner());
        let processed = c.processed as i64;
        // Permanently skipped entries count as failed records in the run log.
        let failed = (c.failed + c.skipped) as i64;

        if c.cancelled {
            run.cancel(processed, failed);
        } else if c.processed == 0 && c.failed > 0 {
            run.fail(format!("all {} fetched items failed", c.failed), processed, failed);
        } else {
            run.complete(processed, failed);
        }
        self.finalize_run(&run).await;
        self.append_window_sample(window_started_at, &baseline).await;

        info!(
            "collector: {} batch {} ({} processed, {} failed, {} skipped)",
            kind, run.status, c.processed, c.failed, c.skipped
        );
        Ok(BatchReport {
            run_id: run.id,
            kind: kind.as_str().to_string(),
            processed: c.processed,
            failed: c.failed,
            skipped: c.skipped,
            changed: c.changed,
            cancelled: c.cancelled,
        })
    }

    /// Fetch the exchange listing, upsert the symbol table and seed ledger
    /// entries for every active symbol across all data kinds.
    pub async fn refresh_listing(&self) -> Result<BatchReport> {
        let mut run = UpdateRun::new(LISTING_RUN_KIND);
        self.run_log.insert(&run).await?;
        let window_started_at = Utc::now();
        let baseline = self.window_baseline();

        let outcome = self.do_refresh_listing().await;
        let report = match &outcome {
            Ok(count) => {
                run.complete(*count as i64, 0);
                BatchReport {
                    run_id: run.id.clone(),
                    kind: LISTING_RUN_KIND.to_string(),
                    processed: *count,
                    ..BatchReport::default()
                }
            }
            Err(err) => {
                run.fail(err.to_string(), 0, 0);
                BatchReport {
                    run_id: run.id.clone(),
                    kind: LISTING_RUN_KIND.to_string(),
                    failed: 1,
                    ..BatchReport::default()
                }
            }
        };
        self.finalize_run(&run).await;
        self.append_window_sample(window_started_at, &baseline).await;

        outcome.map(|_| report)
    }

    async fn do_refresh_listing(&self) -> Result<u64> {
        let listings = self.providers.fetch_listing().await?;
        self.sink.upsert_symbols(&listings).await?;

        let active: Vec<String> = listings
            .iter()
            .filter(|l| l.is_active)
            .map(|l| l.symbol.clone())
            .collect();
        for kind in DataKind::all() {
            self.registry.ensure_entries(&active, kind).await?;
        }

        info!(
            "collector: listing refreshed ({} symbols, {} active)",
            listings.len(),
            active.len()
        );
        Ok(listings.len() as u64)
    }

    /// Fetch one entry and dispatch the outcome into the ledger.
    async fn process_item(&self, entry: &FreshnessEntry) -> ItemOutcome {
        let key = entry.key();
        match self.fetch_and_store(entry).await {
            Ok(changed) => {
                debug!("collector: {} updated (changed={})", key, changed);
                ItemOutcome::Updated { changed }
            }
            Err(Error::MarketData(err)) => match err.retry_class() {
                RetryClass::Never => {
                    if let Err(store_err) =
                        self.registry.mark_skipped(&key, &err.to_string()).await
                    {
                        error!("collector: {} skip not persisted: {}", key, store_err);
                    }
                    ItemOutcome::Skipped
                }
                RetryClass::CircuitOpen => {
                    // Not this entry's fault: leave it due for the next batch.
                    debug!("collector: {} held, all provider circuits open", key);
                    ItemOutcome::StillDue
                }
                RetryClass::WithBackoff | RetryClass::NextProvider => {
                    self.record_failure(&key, &err.to_string()).await;
                    ItemOutcome::Failed
                }
            },
            Err(err) => {
                self.record_failure(&key, &err.to_string()).await;
                ItemOutcome::Failed
            }
        }
    }

    /// Fetch through the provider chain, upsert into the sink, record the
    /// success in the ledger. Returns whether the content hash changed.
    async fn fetch_and_store(&self, entry: &FreshnessEntry) -> Result<bool> {
        let key = entry.key();
        let digest = match entry.data_kind {
            DataKind::Price => {
                let end = Utc::now().date_naive();
                let lookback = if entry.update_count == 0 {
                    INITIAL_PRICE_LOOKBACK_DAYS
                } else {
                    INCREMENTAL_PRICE_LOOKBACK_DAYS
                };
                let start = end - Duration::days(lookback);
                let points = self.providers.fetch_price(&entry.entity_id, start, end).await?;
                let digest = content_digest(&points)?;
                self.sink.upsert_prices(&points).await?;
                digest
            }
            DataKind::Dividends => {
                let events = self.providers.fetch_dividends(&entry.entity_id).await?;
                let digest = content_digest(&events)?;
                self.sink.upsert_dividends(&events).await?;
                digest
            }
            DataKind::Financials => {
                let reports = self.providers.fetch_financials(&entry.entity_id).await?;
                let digest = content_digest(&reports)?;
                self.sink.upsert_financials(&reports).await?;
                digest
            }
        };
        self.registry.record_success(&key, &digest).await
    }

    async fn record_failure(&self, key: &FreshnessKey, error: &str) {
        if let Err(store_err) = self.registry.record_failure(key, error).await {
            error!("collector: {} failure not persisted: {}", key, store_err);
        }
    }

    /// Finalize the run log row; a store error here must not mask the batch
    /// outcome.
    async fn finalize_run(&self, run: &UpdateRun) {
        if let Err(err) = self.run_log.finalize(run).await {
            error!("collector: run {} not finalized: {}", run.id, err);
        }
    }

    fn window_baseline(&self) -> WindowBaseline {
        let stats = self.providers.rate_limiter().stats();
        let (response_count, response_sum_ms) = self.providers.response_time_totals();
        WindowBaseline {
            requests: stats.total_requests,
            throttled: stats.throttled_requests,
            trips: self.providers.circuit_breaker().total_trips(),
            response_count,
            response_sum_ms,
        }
    }

    /// Append one limiter/breaker sample covering this batch's window.
    async fn append_window_sample(&self, window_started_at: DateTime<Utc>, base: &WindowBaseline) {
        let stats = self.providers.rate_limiter().stats();
        let (count, sum_ms) = self.providers.response_time_totals();
        let calls = count.saturating_sub(base.response_count);

        let sample = RateWindowSample {
            requests_made: stats.total_requests.saturating_sub(base.requests) as i64,
            requests_throttled: stats.throttled_requests.saturating_sub(base.throttled) as i64,
            circuit_breaker_trips: self
                .providers
                .circuit_breaker()
                .total_trips()
                .saturating_sub(base.trips) as i64,
            avg_response_time_ms: if calls > 0 {
                Some((sum_ms.saturating_sub(base.response_sum_ms) / calls) as i64)
            } else {
                None
            },
            window_started_at,
            window_ended_at: Utc::now(),
        };
        if let Err(err) = self.samples.append(&sample).await {
            warn!("collector: rate sample not persisted: {}", err);
        }
    }

    fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Resolves once shutdown is signalled. Pends forever if the sender is gone,
/// so an in-flight item is never cancelled just because nobody can signal.
async fn shutdown_signalled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[async_trait]
impl<S: FreshnessStore> TaskRunner for Collector<S> {
    async fn run_action(&self, task_name: &str, action: &TaskAction) -> Result<()> {
        let report = match action {
            TaskAction::Collect { kind } => self.collect_batch(*kind).await?,
            TaskAction::RefreshListing => self.refresh_listing().await?,
        };
        if report.cancelled {
            return Err(Error::Cancelled);
        }
        info!(
            "collector: task '{}' done ({} processed, {} failed, {} skipped)",
            task_name, report.processed, report.failed, report.skipped
        );
        Ok(())
    }
}
