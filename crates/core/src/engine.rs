//! Engine composition root.
//!
//! Wires the provider chain, freshness ledger, collector and scheduler
//! together over injected storage, and owns the shutdown signal.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::{error, info};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collector::{Collector, MarketDataSink, RateSampleStore, RunLogStore, UpdateRun};
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::registry::store::FreshnessStore;
use crate::registry::{DataKind, FreshnessSummary, UpdateRegistry};
use crate::scheduler::store::SchedulerTaskStore;
use crate::scheduler::{ScheduledTask, Scheduler, TaskRunner, TickEvent};
use quotewatch_market_data::{
    CircuitBreaker, CircuitSnapshot, MarketDataProvider, ProviderRegistry, RateLimiter,
    RateLimiterStats,
};

/// Run log rows surfaced in the status snapshot.
const STATUS_RECENT_RUNS: usize = 10;

/// Storage handles the engine runs over; the sqlite crate provides them all.
pub struct EngineStores<F, T> {
    pub freshness: Arc<F>,
    pub tasks: Arc<T>,
    pub run_log: Arc<dyn RunLogStore>,
    pub samples: Arc<dyn RateSampleStore>,
    pub sink: Arc<dyn MarketDataSink>,
}

/// Point-in-time view of the whole engine for the status surface.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub tasks: Vec<ScheduledTask>,
    pub freshness: BTreeMap<String, FreshnessSummary>,
    pub rate_limiter: RateLimiterStats,
    pub circuits: Vec<CircuitSnapshot>,
    pub recent_runs: Vec<UpdateRun>,
}

/// The freshness orchestration engine.
///
/// Owns the scheduler loop; everything else runs on demand. One engine per
/// process is the expected deployment.
pub struct Engine<F: FreshnessStore + 'static, T: SchedulerTaskStore + 'static> {
    registry: Arc<UpdateRegistry<F>>,
    collector: Arc<Collector<F>>,
    scheduler: Arc<Scheduler<T>>,
    providers: Arc<ProviderRegistry>,
    run_log: Arc<dyn RunLogStore>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<F: FreshnessStore + 'static, T: SchedulerTaskStore + 'static> Engine<F, T> {
    pub fn new(
        stores: EngineStores<F, T>,
        providers: Vec<Arc<dyn MarketDataProvider>>,
        config: EngineConfig,
    ) -> Self {
        let rate_limiter = Arc::new(RateLimiter::with_requests_per_minute(
            config.requests_per_minute,
        ));
        let circuit_breaker = Arc::new(CircuitBreaker::with_config(config.breaker_config()));
        let provider_registry = Arc::new(
            ProviderRegistry::new(providers, rate_limiter, circuit_breaker)
                .with_call_timeout(config.request_timeout()),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let registry = Arc::new(UpdateRegistry::new(stores.freshness, config.clone()));
        let collector = Arc::new(Collector::new(
            registry.clone(),
            provider_registry.clone(),
            stores.run_log.clone(),
            stores.samples,
            stores.sink,
            config.clone(),
            shutdown_rx.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(
            stores.tasks,
            config,
            collector.clone() as Arc<dyn TaskRunner>,
            shutdown_rx,
        ));

        Self {
            registry,
            collector,
            scheduler,
            providers: provider_registry,
            run_log: stores.run_log,
            shutdown_tx,
            loop_handle: Mutex::new(None),
        }
    }

    /// Seed scheduler rows and start the minute-tick loop.
    pub async fn start(&self) -> Result<()> {
        self.scheduler.initialize().await?;

        let scheduler = self.scheduler.clone();
        let handle = tokio::spawn(async move { scheduler.run().await });
        *self.lock_handle() = Some(handle);

        info!("engine: started");
        Ok(())
    }

    /// Signal shutdown and wait for the scheduler loop to drain.
    ///
    /// In-flight collector items are cancelled at their next await point;
    /// their batch is finalized as cancelled and the unfetched entries stay
    /// due.
    pub async fn shutdown(&self) {
        info!("engine: shutting down");
        let _ = self.shutdown_tx.send(true);

        let handle = self.lock_handle().take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                error!("engine: scheduler loop ended abnormally: {}", err);
            }
        }
        info!("engine: stopped");
    }

    /// Run a named scheduler task immediately, ignoring its schedule.
    pub async fn run_task_now(&self, name: &str) -> Result<TickEvent> {
        self.scheduler.run_task_now(name).await
    }

    /// Run one collector batch for a kind, outside any scheduled task.
    pub async fn collect_now(&self, kind: DataKind) -> Result<crate::collector::BatchReport> {
        self.collector.collect_batch(kind).await
    }

    /// Force entries due now: one kind, or every kind when `kind` is None.
    /// Returns how many entries were touched.
    pub async fn force_update(&self, entity_id: &str, kind: Option<DataKind>) -> Result<usize> {
        match kind {
            Some(kind) => {
                self.registry
                    .force_due(&crate::registry::FreshnessKey::new(entity_id, kind))
                    .await?;
                Ok(1)
            }
            None => self.registry.force_due_entity(entity_id).await,
        }
    }

    /// Reset failed entries of a kind to pending and due now.
    pub async fn clear_failures(&self, kind: DataKind) -> Result<usize> {
        self.registry.clear_failures(kind).await
    }

    /// Snapshot every surface: tasks, ledger summaries, limiter, circuits,
    /// recent runs.
    pub fn status(&self) -> Result<EngineStatus> {
        let mut freshness = BTreeMap::new();
        for kind in DataKind::all() {
            freshness.insert(kind.as_str().to_string(), self.registry.summary(kind)?);
        }

        Ok(EngineStatus {
            tasks: self.scheduler.status()?,
            freshness,
            rate_limiter: self.providers.rate_limiter().stats(),
            circuits: self.providers.circuit_breaker().snapshot(),
            recent_runs: self.run_log.get_recent(STATUS_RECENT_RUNS)?,
        })
    }

    pub fn registry(&self) -> &Arc<UpdateRegistry<F>> {
        &self.registry
    }

    fn lock_handle(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.loop_handle.lock().unwrap_or_else(|p| p.into_inner())
    }
}
