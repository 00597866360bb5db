// crates/scheduler/src/scheduler.rs
//! Cron-driven task scheduler: the tick loop, per-task circuit breaker
//! and rate limit, memory-aware admission, the bounded worker pool, the
//! monitoring loop, and graceful shutdown.

use crate::executor::ExecuteTask;
use crate::resources::{process_memory_mb, ResourceScope};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use snoovault_core::config::SchedulerConfig;
use snoovault_core::cron::CronSchedule;
use snoovault_core::task::{ScheduledTask, TaskResult, TaskStatus};
use snoovault_core::validate::ValidationError;
use snoovault_db::{StateStore, StoreError};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Failures before a task's circuit opens.
const BREAKER_THRESHOLD: u32 = 3;
/// How long an open circuit stays open after the last failure.
const BREAKER_COOLDOWN_MINUTES: i64 = 15;
/// Minimum spacing between admissions of the same task.
const TASK_RATE_LIMIT_SECS: i64 = 60;
/// A `running` result older than this is reported as stuck.
const STUCK_THRESHOLD_HOURS: i64 = 2;
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error(transparent)]
    InvalidTask(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid cron expression for task '{name}': {source}")]
    InvalidCron {
        name: String,
        #[source]
        source: snoovault_core::cron::CronError,
    },

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<String, ScheduledTask>,
    running: HashMap<String, JoinHandle<()>>,
    breaker_failures: HashMap<String, u32>,
    breaker_last_failure: HashMap<String, DateTime<Utc>>,
    last_admitted: HashMap<String, DateTime<Utc>>,
}

/// Point-in-time scheduler status.
#[derive(Debug, Clone)]
pub struct SchedulerStatus {
    pub running: bool,
    pub total_tasks: usize,
    pub enabled_tasks: usize,
    pub running_tasks: usize,
    pub memory_mb: u64,
}

/// Owns the task set and decides, each tick, what runs.
pub struct TaskScheduler {
    config: SchedulerConfig,
    store: Arc<StateStore>,
    executor: Arc<dyn ExecuteTask>,
    state: Arc<Mutex<SchedulerState>>,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
    started: Mutex<bool>,
    // Handle to ourselves for spawning workers and loops.
    weak: std::sync::Weak<TaskScheduler>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<StateStore>,
        executor: Arc<dyn ExecuteTask>,
    ) -> Arc<Self> {
        let config = config.normalized();
        info!(
            check_interval = config.check_interval_seconds,
            max_concurrent = config.max_concurrent_tasks,
            max_memory_mb = config.max_memory_mb,
            "task scheduler initialized"
        );
        Arc::new_cyclic(|weak| Self {
            workers: Arc::new(Semaphore::new(config.max_concurrent_tasks)),
            config,
            store,
            executor,
            state: Arc::new(Mutex::new(SchedulerState::default())),
            shutdown: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
            started: Mutex::new(false),
            weak: weak.clone(),
        })
    }

    fn strong(&self) -> Option<Arc<Self>> {
        self.weak.upgrade()
    }

    /// Load every persisted task into the in-memory set.
    pub async fn load_tasks(&self) -> Result<usize, ScheduleError> {
        let tasks = self.store.load_all_tasks().await?;
        let count = tasks.len();
        let mut state = self.state.lock().unwrap();
        for task in tasks {
            state.tasks.insert(task.id.clone(), task);
        }
        info!(count, "loaded tasks from state store");
        Ok(count)
    }

    /// Validate, compute the first next-run, persist, and adopt a task.
    /// Replacing an existing id logs a warning.
    pub async fn add_task(&self, mut task: ScheduledTask) -> Result<(), ScheduleError> {
        task.validate()?;
        let schedule =
            CronSchedule::parse(&task.cron_expression).map_err(|source| {
                ScheduleError::InvalidCron {
                    name: task.name.clone(),
                    source,
                }
            })?;
        task.next_run = Some(schedule.next_execution(Utc::now()).map_err(|source| {
            ScheduleError::InvalidCron {
                name: task.name.clone(),
                source,
            }
        })?);

        self.store.save_task(&task).await?;

        let mut state = self.state.lock().unwrap();
        if state.tasks.contains_key(&task.id) {
            warn!(id = %task.id, "task already exists, replacing");
        }
        info!(name = %task.name, id = %task.id, next_run = ?task.next_run, "added scheduled task");
        state.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Drop a task from the set and the store. A currently running
    /// execution is left to finish; it just won't be rescheduled.
    pub async fn remove_task(&self, task_id: &str) -> Result<bool, ScheduleError> {
        let removed = {
            let mut state = self.state.lock().unwrap();
            let removed = state.tasks.remove(task_id).is_some();
            if removed && state.running.contains_key(task_id) {
                info!(task_id, "task is still running but won't be rescheduled");
            }
            removed
        };
        if removed {
            self.store.delete_task(task_id).await?;
            info!(task_id, "removed scheduled task");
        }
        Ok(removed)
    }

    pub async fn set_task_enabled(
        &self,
        task_id: &str,
        enabled: bool,
    ) -> Result<bool, ScheduleError> {
        let task = {
            let mut state = self.state.lock().unwrap();
            match state.tasks.get_mut(task_id) {
                Some(task) => {
                    task.enabled = enabled;
                    Some(task.clone())
                }
                None => None,
            }
        };
        match task {
            Some(task) => {
                self.store.save_task(&task).await?;
                info!(task_id, enabled, "task enabled flag changed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn get_task(&self, task_id: &str) -> Option<ScheduledTask> {
        self.state.lock().unwrap().tasks.get(task_id).cloned()
    }

    pub fn all_tasks(&self) -> Vec<ScheduledTask> {
        self.state.lock().unwrap().tasks.values().cloned().collect()
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.state.lock().unwrap();
        SchedulerStatus {
            running: *self.started.lock().unwrap(),
            total_tasks: state.tasks.len(),
            enabled_tasks: state.tasks.values().filter(|t| t.enabled).count(),
            running_tasks: state.running.len(),
            memory_mb: process_memory_mb(),
        }
    }

    /// Start the tick loop (and the monitor when enabled).
    pub fn start(&self) -> Result<(), ScheduleError> {
        let mut started = self.started.lock().unwrap();
        if *started {
            warn!("scheduler is already running");
            return Err(ScheduleError::AlreadyRunning);
        }
        *started = true;
        drop(started);

        let Some(this) = self.strong() else {
            return Err(ScheduleError::ShuttingDown);
        };

        let tick_loop = {
            let scheduler = Arc::clone(&this);
            tokio::spawn(async move {
                info!("scheduler loop started");
                let interval = Duration::from_secs(scheduler.config.check_interval_seconds);
                loop {
                    scheduler.tick().await;
                    tokio::select! {
                        _ = scheduler.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
                info!("scheduler loop ended");
            })
        };
        self.loops.lock().unwrap().push(tick_loop);

        if self.config.enable_monitoring {
            let monitor_loop = {
                let scheduler = Arc::clone(&this);
                tokio::spawn(async move {
                    info!("resource monitoring started");
                    loop {
                        tokio::select! {
                            _ = scheduler.shutdown.cancelled() => break,
                            _ = tokio::time::sleep(MONITOR_INTERVAL) => scheduler.monitor_pass(),
                        }
                    }
                    info!("resource monitoring stopped");
                })
            };
            self.loops.lock().unwrap().push(monitor_loop);
        }

        info!("task scheduler started");
        Ok(())
    }

    /// One scheduling pass: snapshot due tasks, run admission checks, and
    /// dispatch admitted tasks to the worker pool.
    pub async fn tick(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }

        let now = Utc::now();
        let due: Vec<ScheduledTask> = {
            let state = self.state.lock().unwrap();
            state
                .tasks
                .values()
                .filter(|task| {
                    task.enabled
                        && task.next_run.map(|next| next <= now).unwrap_or(false)
                        && !state.running.contains_key(&task.id)
                })
                .cloned()
                .collect()
        };

        for task in due {
            self.admit_and_spawn(task);
        }

        self.reap_finished();
    }

    fn admit_and_spawn(&self, task: ScheduledTask) {
        let now = Utc::now();

        {
            let mut state = self.state.lock().unwrap();

            if is_breaker_open(&mut state, &task.id, now) {
                warn!(task = %task.name, "circuit breaker open, skipping execution");
                return;
            }

            if let Some(last) = state.last_admitted.get(&task.id) {
                if now - *last < ChronoDuration::seconds(TASK_RATE_LIMIT_SECS) {
                    debug!(task = %task.name, "task is rate limited, skipping execution");
                    return;
                }
            }
        }

        let memory_mb = process_memory_mb();
        if memory_mb as f64 > self.config.max_memory_mb as f64 * 0.9 {
            warn!(
                memory_mb,
                task = %task.name,
                "memory usage high, deferring task"
            );
            return;
        }

        let Some(scheduler) = self.strong() else {
            return;
        };
        let task_id = task.id.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_one(task).await;
        });

        let mut state = self.state.lock().unwrap();
        state.last_admitted.insert(task_id.clone(), now);
        state.running.insert(task_id, handle);
    }

    /// Worker body: stamp `last_run`, execute inside a resource-tracking
    /// scope, record the outcome against the circuit breaker, and compute
    /// the next run.
    async fn run_one(self: Arc<Self>, mut task: ScheduledTask) {
        // Respect pool bounds; the permit is held for the whole execution.
        let _permit = match Arc::clone(&self.workers).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let started = Utc::now();
        info!(task = %task.name, id = %task.id, "starting execution of task");

        task.last_run = Some(started);
        task.last_result = Some(TaskResult::running(&task.id, started));
        self.update_task(&task).await;

        let scope = ResourceScope::enter();
        let inner = {
            let executor = Arc::clone(&self.executor);
            let task_snapshot = task.clone();
            tokio::spawn(async move { executor.execute(&task_snapshot).await })
        };
        let result = match inner.await {
            Ok(result) => result,
            Err(join_error) => {
                error!(task = %task.name, "task worker panicked: {join_error}");
                TaskResult::failed(&task.id, started, format!("task panicked: {join_error}"))
            }
        };
        scope.finish();

        let succeeded = result.status == TaskStatus::Completed;
        task.last_result = Some(result);

        let breaker_open = {
            let mut state = self.state.lock().unwrap();
            if succeeded {
                state.breaker_failures.insert(task.id.clone(), 0);
            } else {
                *state.breaker_failures.entry(task.id.clone()).or_insert(0) += 1;
                state.breaker_last_failure.insert(task.id.clone(), Utc::now());
            }
            is_breaker_open(&mut state, &task.id, Utc::now())
        };

        if task.enabled && !breaker_open {
            match CronSchedule::parse(&task.cron_expression)
                .and_then(|s| s.next_execution(Utc::now()))
            {
                Ok(next) => {
                    task.next_run = Some(next);
                    info!(task = %task.name, next_run = %next, "task finished, next run scheduled");
                }
                Err(e) => {
                    error!(task = %task.name, "failed to schedule next run: {e}");
                    task.enabled = false;
                    task.next_run = None;
                }
            }
        } else {
            task.next_run = None;
            if breaker_open {
                info!(task = %task.name, "next run deferred due to circuit breaker");
            }
        }

        self.update_task(&task).await;
        self.state.lock().unwrap().running.remove(&task.id);
    }

    /// Write the task back to the in-memory set (if still present) and
    /// the store. Persistence failures are logged, not fatal.
    async fn update_task(&self, task: &ScheduledTask) {
        {
            let mut state = self.state.lock().unwrap();
            if let Some(slot) = state.tasks.get_mut(&task.id) {
                *slot = task.clone();
            }
        }
        if let Err(e) = self.store.save_task(task).await {
            error!(task = %task.name, "failed to persist task state: {e}");
        }
    }

    fn reap_finished(&self) {
        let mut state = self.state.lock().unwrap();
        state.running.retain(|_, handle| !handle.is_finished());
    }

    /// Monitoring pass: memory ceiling warning and stuck-task scan.
    fn monitor_pass(&self) {
        let memory_mb = process_memory_mb();
        if memory_mb > self.config.max_memory_mb {
            warn!(
                memory_mb,
                limit_mb = self.config.max_memory_mb,
                "memory usage exceeds limit"
            );
        }

        let now = Utc::now();
        let state = self.state.lock().unwrap();
        for task in state.tasks.values() {
            let stuck = task.last_run.is_some_and(|last_run| {
                task.last_result
                    .as_ref()
                    .is_some_and(|r| r.status == TaskStatus::Running)
                    && now - last_run > ChronoDuration::hours(STUCK_THRESHOLD_HOURS)
            });
            if stuck {
                warn!(
                    task = %task.name,
                    last_run = ?task.last_run,
                    "task appears to be stuck"
                );
            }
        }
    }

    /// Graceful shutdown: stop the loops, then wait up to the configured
    /// timeout for in-flight workers; stragglers are logged.
    pub async fn shutdown(&self) {
        info!("stopping task scheduler");
        self.shutdown.cancel();
        *self.started.lock().unwrap() = false;

        let loops: Vec<JoinHandle<()>> = self.loops.lock().unwrap().drain(..).collect();
        for handle in loops {
            let _ = handle.await;
        }

        let deadline =
            tokio::time::Instant::now() + Duration::from_secs(self.config.shutdown_timeout_seconds);
        let running: Vec<(String, JoinHandle<()>)> = {
            let mut state = self.state.lock().unwrap();
            state.running.drain().collect()
        };
        if !running.is_empty() {
            info!(count = running.len(), "waiting for running tasks to complete");
        }

        let mut stragglers = 0usize;
        for (task_id, handle) in running {
            match tokio::time::timeout_at(deadline, handle).await {
                Ok(_) => {}
                Err(_) => {
                    warn!(task_id, "task still running at shutdown timeout");
                    stragglers += 1;
                }
            }
        }
        if stragglers > 0 {
            warn!(stragglers, "tasks still running after shutdown timeout");
        }

        info!("task scheduler stopped");
    }

    #[cfg(test)]
    pub(crate) fn test_set_next_run(&self, task_id: &str, when: DateTime<Utc>) {
        let mut state = self.state.lock().unwrap();
        if let Some(task) = state.tasks.get_mut(task_id) {
            task.next_run = Some(when);
        }
    }

    #[cfg(test)]
    pub(crate) fn test_clear_rate_limit(&self, task_id: &str) {
        self.state.lock().unwrap().last_admitted.remove(task_id);
    }

    #[cfg(test)]
    pub(crate) fn test_breaker_state(&self, task_id: &str) -> (u32, Option<DateTime<Utc>>) {
        let state = self.state.lock().unwrap();
        (
            state.breaker_failures.get(task_id).copied().unwrap_or(0),
            state.breaker_last_failure.get(task_id).copied(),
        )
    }

    #[cfg(test)]
    pub(crate) fn test_set_breaker(
        &self,
        task_id: &str,
        failures: u32,
        last_failure: DateTime<Utc>,
    ) {
        let mut state = self.state.lock().unwrap();
        state.breaker_failures.insert(task_id.to_string(), failures);
        state
            .breaker_last_failure
            .insert(task_id.to_string(), last_failure);
    }

    #[cfg(test)]
    pub(crate) async fn test_wait_idle(&self) {
        for _ in 0..200 {
            let busy = {
                let mut state = self.state.lock().unwrap();
                state.running.retain(|_, handle| !handle.is_finished());
                !state.running.is_empty()
            };
            if !busy {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("scheduler did not go idle");
    }
}

/// Open after 3 failures within the cooldown; the counter resets once the
/// cooldown has passed.
fn is_breaker_open(state: &mut SchedulerState, task_id: &str, now: DateTime<Utc>) -> bool {
    let failures = state.breaker_failures.get(task_id).copied().unwrap_or(0);
    if failures < BREAKER_THRESHOLD {
        return false;
    }

    match state.breaker_last_failure.get(task_id) {
        Some(last) if now - *last < ChronoDuration::minutes(BREAKER_COOLDOWN_MINUTES) => true,
        _ => {
            state.breaker_failures.insert(task_id.to_string(), 0);
            false
        }
    }
}

/// Block until SIGINT or SIGTERM.
pub async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        let mut terminate = match tokio::signal::unix::signal(
            tokio::signal::unix::SignalKind::terminate(),
        ) {
            Ok(signal) => signal,
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received interrupt, initiating graceful shutdown"),
            _ = terminate.recv() => info!("received terminate, initiating graceful shutdown"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received interrupt, initiating graceful shutdown");
    }
}
