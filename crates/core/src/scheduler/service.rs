//! Scheduler service.
//!
//! Drives named tasks from their persisted rows on a minute tick. Tasks are
//! isolated: one task's failure updates only its own counters and never
//! stops the loop or other tasks.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use tokio::sync::watch;

use crate::config::{EngineConfig, TaskAction, TaskDefinition};
use crate::errors::{Error, Result};
use crate::scheduler::model::ScheduledTask;
use crate::scheduler::store::SchedulerTaskStore;

/// Tick cadence of the driver loop.
const TICK_INTERVAL: StdDuration = StdDuration::from_secs(60);

lazy_static! {
    /// Process-wide reentrancy guard: task names currently running.
    static ref TASK_LOCKS: Mutex<HashSet<String>> = Mutex::new(HashSet::new());
}

/// RAII guard marking a task as running.
struct TaskLockGuard {
    name: String,
}

impl TaskLockGuard {
    /// Try to take the lock for a task; None if it is already running.
    fn try_acquire(name: &str) -> Option<Self> {
        let mut locks = TASK_LOCKS.lock().unwrap_or_else(|p| p.into_inner());
        if locks.contains(name) {
            return None;
        }
        locks.insert(name.to_string());
        Some(Self {
            name: name.to_string(),
        })
    }
}

impl Drop for TaskLockGuard {
    fn drop(&mut self) {
        let mut locks = TASK_LOCKS.lock().unwrap_or_else(|p| p.into_inner());
        locks.remove(&self.name);
    }
}

/// Executes a task's action; implemented by the collector.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run_action(&self, task_name: &str, action: &TaskAction) -> Result<()>;
}

/// What happened to one task during a tick.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TickEvent {
    Completed { task: String },
    Failed { task: String, error: String },
    /// Exchange session open and the task opted out; next_run untouched.
    SkippedMarketOpen { task: String },
    /// Reentrancy guard held; the previous run is still in flight.
    SkippedAlreadyRunning { task: String },
}

/// Durable task scheduler.
pub struct Scheduler<S: SchedulerTaskStore> {
    store: Arc<S>,
    config: EngineConfig,
    runner: Arc<dyn TaskRunner>,
    shutdown: watch::Receiver<bool>,
}

impl<S: SchedulerTaskStore> Scheduler<S> {
    pub fn new(
        store: Arc<S>,
        config: EngineConfig,
        runner: Arc<dyn TaskRunner>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            config,
            runner,
            shutdown,
        }
    }

    /// Reload persisted task rows and seed rows for tasks new in config.
    ///
    /// Rows whose `next_run` is already in the past are left as-is; the
    /// first tick runs each of them exactly once as a catch-up.
    pub async fn initialize(&self) -> Result<()> {
        let now = Utc::now();
        for def in &self.config.tasks {
            match self.store.get(&def.name)? {
                Some(mut task) => {
                    if task.is_enabled != def.enabled {
                        task.is_enabled = def.enabled;
                        self.store.upsert(&task).await?;
                    }
                    if task.next_run <= now {
                        info!(
                            "scheduler: task '{}' missed {} -> catch-up on first tick",
                            def.name, task.next_run
                        );
                    }
                }
                None => {
                    let mut task = ScheduledTask::new(&def.name, &def.schedule, now);
                    task.is_enabled = def.enabled;
                    self.store.upsert(&task).await?;
                    info!(
                        "scheduler: registered task '{}' (next run {})",
                        def.name, task.next_run
                    );
                }
            }
        }
        Ok(())
    }

    /// Run the minute-tick loop until shutdown.
    pub async fn run(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!("scheduler: loop started ({} tasks)", self.config.tasks.len());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(Utc::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("scheduler: loop stopping");
                        return;
                    }
                }
            }
        }
    }

    /// One pass over all tasks; never fails as a whole.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<TickEvent> {
        let mut events = Vec::new();

        for def in &self.config.tasks {
            if !def.enabled {
                continue;
            }
            if *self.shutdown.borrow() {
                break;
            }
            match self.tick_task(def, now).await {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(err) => {
                    // Store-level trouble for one task must not stall the rest.
                    error!("scheduler: task '{}' tick error: {}", def.name, err);
                    events.push(TickEvent::Failed {
                        task: def.name.clone(),
                        error: err.to_string(),
                    });
                }
            }
        }
        events
    }

    async fn tick_task(
        &self,
        def: &TaskDefinition,
        now: DateTime<Utc>,
    ) -> Result<Option<TickEvent>> {
        let task = match self.store.get(&def.name)? {
            Some(task) => task,
            None => ScheduledTask::new(&def.name, &def.schedule, now),
        };

        if !task.is_due(now) {
            return Ok(None);
        }

        if def.respect_market_hours
            && self.config.market_hours.is_open(now.weekday(), now.time())
        {
            debug!(
                "scheduler: task '{}' due but market open, holding next_run",
                def.name
            );
            return Ok(Some(TickEvent::SkippedMarketOpen {
                task: def.name.clone(),
            }));
        }

        let _guard = match TaskLockGuard::try_acquire(&def.name) {
            Some(guard) => guard,
            None => {
                warn!("scheduler: task '{}' still running, skipping", def.name);
                return Ok(Some(TickEvent::SkippedAlreadyRunning {
                    task: def.name.clone(),
                }));
            }
        };

        Ok(Some(self.execute(def, task, now).await))
    }

    /// Run the task and fold the outcome into its row, success or not.
    async fn execute(
        &self,
        def: &TaskDefinition,
        mut task: ScheduledTask,
        now: DateTime<Utc>,
    ) -> TickEvent {
        info!("scheduler: running task '{}'", def.name);
        let outcome = self.runner.run_action(&def.name, &def.action).await;

        let error_message = outcome.as_ref().err().map(|e| e.to_string());
        task.complete_run(&def.schedule, now, error_message.clone());

        if let Err(err) = self.store.upsert(&task).await {
            error!(
                "scheduler: failed to persist task '{}' after run: {}",
                def.name, err
            );
        }

        match error_message {
            None => {
                info!(
                    "scheduler: task '{}' completed (next run {})",
                    def.name, task.next_run
                );
                TickEvent::Completed {
                    task: def.name.clone(),
                }
            }
            Some(error) => {
                warn!("scheduler: task '{}' failed: {}", def.name, error);
                TickEvent::Failed {
                    task: def.name.clone(),
                    error,
                }
            }
        }
    }

    /// Manual trigger: run a task immediately, ignoring its schedule and the
    /// market-hours window. Still honors the reentrancy guard.
    pub async fn run_task_now(&self, name: &str) -> Result<TickEvent> {
        let def = self
            .config
            .tasks
            .iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::Scheduler(format!("unknown task: {}", name)))?;

        let now = Utc::now();
        let task = match self.store.get(&def.name)? {
            Some(task) => task,
            None => ScheduledTask::new(&def.name, &def.schedule, now),
        };

        let _guard = TaskLockGuard::try_acquire(&def.name)
            .ok_or_else(|| Error::Scheduler(format!("task already running: {}", name)))?;

        Ok(self.execute(def, task, now).await)
    }

    /// All task rows, for the status surface.
    pub fn status(&self) -> Result<Vec<ScheduledTask>> {
        self.store.get_all()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scheduler::model::TaskStatus;
    use crate::scheduler::Schedule;
    use chrono::{NaiveTime, TimeZone, Weekday};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    pub(crate) struct MemoryTaskStore {
        tasks: Mutex<HashMap<String, ScheduledTask>>,
    }

    #[async_trait]
    impl SchedulerTaskStore for MemoryTaskStore {
        fn get(&self, name: &str) -> Result<Option<ScheduledTask>> {
            Ok(self.tasks.lock().unwrap().get(name).cloned())
        }

        fn get_all(&self) -> Result<Vec<ScheduledTask>> {
            Ok(self.tasks.lock().unwrap().values().cloned().collect())
        }

        async fn upsert(&self, task: &ScheduledTask) -> Result<()> {
            self.tasks
                .lock()
                .unwrap()
                .insert(task.name.clone(), task.clone());
            Ok(())
        }
    }

    struct CountingRunner {
        runs: AtomicUsize,
        fail: bool,
    }

    impl CountingRunner {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                runs: AtomicUsize::new(0),
                fail,
            })
        }

        fn run_count(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TaskRunner for CountingRunner {
        async fn run_action(&self, _task_name: &str, _action: &TaskAction) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(Error::Unexpected("batch exploded".into()))
            } else {
                Ok(())
            }
        }
    }

    fn config_with_task(name: &str, respect_market_hours: bool) -> EngineConfig {
        EngineConfig {
            tasks: vec![TaskDefinition {
                name: name.to_string(),
                action: TaskAction::RefreshListing,
                schedule: Schedule::Daily {
                    time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
                },
                enabled: true,
                respect_market_hours,
            }],
            ..EngineConfig::default()
        }
    }

    fn scheduler(
        config: EngineConfig,
        runner: Arc<dyn TaskRunner>,
    ) -> Scheduler<MemoryTaskStore> {
        let (tx, rx) = watch::channel(false);
        // A dropped sender reads as "not shut down"; tests don't signal it.
        drop(tx);
        Scheduler::new(Arc::new(MemoryTaskStore::default()), config, runner, rx)
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[tokio::test]
    async fn test_catch_up_runs_exactly_once() {
        let runner = CountingRunner::new(false);
        let sched = scheduler(config_with_task("t_catch_up", false), runner.clone());
        sched.initialize().await.unwrap();

        // Simulate a crash: next_run three weeks in the past.
        let mut task = sched.store.get("t_catch_up").unwrap().unwrap();
        task.next_run = utc(2025, 8, 1, 18, 0);
        sched.store.upsert(&task).await.unwrap();

        // One tick after restart: exactly one run, not one per missed day.
        let events = sched.tick(utc(2025, 8, 25, 10, 0)).await;
        assert_eq!(events.len(), 1);
        assert_eq!(runner.run_count(), 1);

        // Cadence resumed from now; an immediate second tick does nothing.
        let events = sched.tick(utc(2025, 8, 25, 10, 1)).await;
        assert!(events.is_empty());
        assert_eq!(runner.run_count(), 1);

        let task = sched.store.get("t_catch_up").unwrap().unwrap();
        assert_eq!(task.next_run, utc(2025, 8, 25, 18, 0));
        assert_eq!(task.run_count, 1);
    }

    #[tokio::test]
    async fn test_task_failure_updates_only_counters() {
        let runner = CountingRunner::new(true);
        let sched = scheduler(config_with_task("t_failing", false), runner.clone());
        sched.initialize().await.unwrap();

        let mut task = sched.store.get("t_failing").unwrap().unwrap();
        task.next_run = utc(2025, 8, 24, 18, 0);
        sched.store.upsert(&task).await.unwrap();

        let events = sched.tick(utc(2025, 8, 25, 10, 0)).await;
        assert!(matches!(events[0], TickEvent::Failed { .. }));

        let task = sched.store.get("t_failing").unwrap().unwrap();
        assert_eq!(task.failure_count, 1);
        assert_eq!(task.last_status, Some(TaskStatus::Failed));
        assert!(task.last_error.as_deref().unwrap().contains("batch exploded"));
        // next_run still advanced; a broken task keeps its cadence.
        assert!(task.next_run > utc(2025, 8, 25, 10, 0));
    }

    #[tokio::test]
    async fn test_market_hours_skip_does_not_advance_next_run() {
        let runner = CountingRunner::new(false);
        let sched = scheduler(config_with_task("t_market", true), runner.clone());
        sched.initialize().await.unwrap();

        let mut task = sched.store.get("t_market").unwrap().unwrap();
        task.next_run = utc(2025, 8, 25, 9, 0);
        sched.store.upsert(&task).await.unwrap();

        // Monday 10:00, session open: held back.
        let events = sched.tick(utc(2025, 8, 25, 10, 0)).await;
        assert!(matches!(events[0], TickEvent::SkippedMarketOpen { .. }));
        assert_eq!(runner.run_count(), 0);
        let task = sched.store.get("t_market").unwrap().unwrap();
        assert_eq!(task.next_run, utc(2025, 8, 25, 9, 0));

        // Same Monday 16:00, session closed: runs.
        let events = sched.tick(utc(2025, 8, 25, 16, 0)).await;
        assert!(matches!(events[0], TickEvent::Completed { .. }));
        assert_eq!(runner.run_count(), 1);
    }

    #[tokio::test]
    async fn test_disabled_task_never_runs() {
        let runner = CountingRunner::new(false);
        let mut config = config_with_task("t_disabled", false);
        config.tasks[0].enabled = false;
        let sched = scheduler(config, runner.clone());
        sched.initialize().await.unwrap();

        let events = sched.tick(utc(2025, 9, 1, 0, 0)).await;
        assert!(events.is_empty());
        assert_eq!(runner.run_count(), 0);
    }

    #[tokio::test]
    async fn test_run_task_now_ignores_schedule() {
        let runner = CountingRunner::new(false);
        let sched = scheduler(config_with_task("t_manual", false), runner.clone());
        sched.initialize().await.unwrap();

        let event = sched.run_task_now("t_manual").await.unwrap();
        assert!(matches!(event, TickEvent::Completed { .. }));
        assert_eq!(runner.run_count(), 1);

        assert!(sched.run_task_now("no_such_task").await.is_err());
    }

    #[tokio::test]
    async fn test_reentrancy_guard_skips_running_task() {
        let runner = CountingRunner::new(false);
        let sched = scheduler(config_with_task("t_guarded", false), runner.clone());
        sched.initialize().await.unwrap();

        let mut task = sched.store.get("t_guarded").unwrap().unwrap();
        task.next_run = utc(2025, 8, 24, 18, 0);
        sched.store.upsert(&task).await.unwrap();

        // Hold the lock as if a previous dispatch were still in flight.
        let guard = TaskLockGuard::try_acquire("t_guarded").unwrap();
        let events = sched.tick(utc(2025, 8, 25, 10, 0)).await;
        assert!(matches!(events[0], TickEvent::SkippedAlreadyRunning { .. }));
        assert_eq!(runner.run_count(), 0);
        drop(guard);

        let events = sched.tick(utc(2025, 8, 25, 10, 1)).await;
        assert!(matches!(events[0], TickEvent::Completed { .. }));
    }
}
