//! Orchestration scheduler.
//!
//! The [`Runtime`] owns the history log, both registries, a tick channel and
//! the set of in-flight activity calls. Each tick replays one instance under
//! its instance lock, persists newly discovered calls, dispatches them, and
//! records a terminal result when the orchestration finishes.
use crate::providers::{InstanceStatus, Provider, ProviderError};
use crate::{ActivityContext, ActivityInvocation, ConfigErrorKind, ErrorDetails, Event, OrchestrationContext};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

pub mod correlation;
mod dispatch;
pub mod registry;
pub mod replay_engine;

use correlation::CorrelationTable;
use replay_engine::TurnResult;
pub use registry::{ActivityRegistry, OrchestrationRegistry};

/// Configuration options for the Runtime.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Upper bound on activity handlers running at the same time.
    pub max_concurrent_activities: usize,
    /// Attempts for a tick or result append that hits a retryable provider error.
    pub tick_retry_max_attempts: u32,
    /// First retry delay; doubles on every further attempt.
    pub tick_retry_base_backoff_ms: u64,
    /// Status polling interval used by `Client::wait_for_orchestration`.
    pub wait_poll_interval_ms: u64,
    /// Default time `shutdown(None)` waits for in-flight activities.
    pub shutdown_grace_ms: u64,
    /// Delay before an instance is ticked again after the provider stayed
    /// unavailable through every retry attempt.
    pub redrive_delay_ms: u64,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            max_concurrent_activities: 64,
            tick_retry_max_attempts: 5,
            tick_retry_base_backoff_ms: 10,
            wait_poll_interval_ms: 10,
            shutdown_grace_ms: 1000,
            redrive_delay_ms: 500,
        }
    }
}

/// Externally visible state of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestrationStatus {
    NotFound,
    /// Created but not yet started by the scheduler.
    Pending,
    Running,
    Completed { output: String },
    Failed { details: ErrorDetails },
    Terminated { reason: String },
}

impl OrchestrationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrchestrationStatus::Completed { .. }
                | OrchestrationStatus::Failed { .. }
                | OrchestrationStatus::Terminated { .. }
        )
    }
}

/// Error type returned by orchestration wait helpers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError {
    Timeout,
    Other(String),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::Timeout => f.write_str("timed out waiting for orchestration"),
            WaitError::Other(m) => f.write_str(m),
        }
    }
}

impl std::error::Error for WaitError {}

/// Trait implemented by orchestration handlers that can be invoked by the runtime.
#[async_trait]
pub trait OrchestrationHandler: Send + Sync {
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `OrchestrationHandler`.
pub struct FnOrchestration<F, Fut>(pub F)
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> OrchestrationHandler for FnOrchestration<F, Fut>
where
    F: Fn(OrchestrationContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: OrchestrationContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

/// Trait implemented by activity handlers.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn invoke(&self, ctx: ActivityContext, input: String) -> Result<String, String>;
}

/// Function wrapper that implements `ActivityHandler`.
pub struct FnActivity<F, Fut>(pub F)
where
    F: Fn(ActivityContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static;

#[async_trait]
impl<F, Fut> ActivityHandler for FnActivity<F, Fut>
where
    F: Fn(ActivityContext, String) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<String, String>> + Send + 'static,
{
    async fn invoke(&self, ctx: ActivityContext, input: String) -> Result<String, String> {
        (self.0)(ctx, input).await
    }
}

fn lock_unpoisoned<T>(m: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Status and stored output implied by a terminal history event.
fn terminal_status(event: &Event) -> Option<(InstanceStatus, String)> {
    match event {
        Event::OrchestrationCompleted { output } => Some((InstanceStatus::Completed, output.clone())),
        Event::OrchestrationFailed { error } => Some((InstanceStatus::Failed, error.display_message())),
        Event::OrchestrationTerminated { reason } => Some((InstanceStatus::Terminated, reason.clone())),
        _ => None,
    }
}

/// In-process scheduler that drives orchestrations by replaying their history.
pub struct Runtime {
    pub(crate) store: Arc<dyn Provider>,
    pub(crate) orchestrations: OrchestrationRegistry,
    activities: ActivityRegistry,
    pub(crate) options: RuntimeOptions,
    tick_tx: mpsc::UnboundedSender<String>,
    instance_locks: std::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    in_flight: std::sync::Mutex<HashSet<(String, u64)>>,
    activity_permits: Arc<Semaphore>,
    tasks: std::sync::Mutex<JoinSet<()>>,
    joins: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    shutting_down: AtomicBool,
}

impl Runtime {
    /// Start a runtime with default options.
    pub async fn start_with_store(
        store: Arc<dyn Provider>,
        activities: ActivityRegistry,
        orchestrations: OrchestrationRegistry,
    ) -> Arc<Self> {
        Self::start_with_options(store, activities, orchestrations, RuntimeOptions::default()).await
    }

    /// Start a runtime, then recover every non-terminal instance found in the store.
    pub async fn start_with_options(
        store: Arc<dyn Provider>,
        activities: ActivityRegistry,
        orchestrations: OrchestrationRegistry,
        options: RuntimeOptions,
    ) -> Arc<Self> {
        // Install a default subscriber if none set (ok to call many times)
        crate::logging::init_tracing();

        let (tick_tx, tick_rx) = mpsc::unbounded_channel();
        let runtime = Arc::new(Self {
            store,
            orchestrations,
            activities,
            activity_permits: Arc::new(Semaphore::new(options.max_concurrent_activities.max(1))),
            options,
            tick_tx,
            instance_locks: std::sync::Mutex::new(HashMap::new()),
            in_flight: std::sync::Mutex::new(HashSet::new()),
            tasks: std::sync::Mutex::new(JoinSet::new()),
            joins: tokio::sync::Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
        });

        let handle = runtime.clone().start_tick_loop(tick_rx);
        runtime.joins.lock().await.push(handle);

        runtime.recover().await;
        info!(
            target: "durable_fanout::runtime",
            provider = runtime.store.name(),
            orchestrations = runtime.orchestrations.count(),
            activities = runtime.activities.count(),
            "runtime started"
        );
        runtime
    }

    /// Handle for starting and observing instances on this runtime.
    pub fn client(self: &Arc<Self>) -> crate::Client {
        crate::Client::new(self.clone())
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    fn start_tick_loop(self: Arc<Self>, mut tick_rx: mpsc::UnboundedReceiver<String>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(instance) = tick_rx.recv().await {
                if self.shutting_down.load(Ordering::SeqCst) {
                    debug!(target: "durable_fanout::runtime", instance_id = %instance, "dropping tick during shutdown");
                    continue;
                }
                let rt = self.clone();
                self.spawn_task(async move { rt.process_tick(instance).await });
            }
        })
    }

    /// Queue a tick for `instance`. Ticks are coalesced only by the instance lock.
    pub(crate) fn enqueue_tick(&self, instance: &str) {
        if self.tick_tx.send(instance.to_string()).is_err() {
            warn!(target: "durable_fanout::runtime", instance_id = %instance, "tick loop stopped; instance will resume on recovery");
        }
    }

    /// Re-enqueue every non-terminal instance. Scheduled calls without a
    /// recorded outcome are dispatched again by the resulting ticks.
    async fn recover(&self) {
        let ids = match self.store.list_instances().await {
            Ok(ids) => ids,
            Err(e) => {
                error!(target: "durable_fanout::runtime", error = %e, "recovery failed to list instances");
                return;
            }
        };
        let mut recovered = 0usize;
        for id in ids {
            match self.store.get_instance(&id).await {
                Ok(Some(info)) if !info.status.is_terminal() => {
                    self.enqueue_tick(&id);
                    recovered += 1;
                }
                Ok(_) => {}
                Err(e) => warn!(target: "durable_fanout::runtime", instance_id = %id, error = %e, "recovery skipped instance"),
            }
        }
        if recovered > 0 {
            info!(target: "durable_fanout::runtime", recovered, "recovered non-terminal instances");
        }
    }

    /// Spawn onto the runtime's task set after joining tasks that already finished.
    pub(crate) fn spawn_task<F>(&self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let mut tasks = lock_unpoisoned(&self.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Join finished tasks; returns how many are still running.
    fn reap_finished_tasks(&self) -> usize {
        let mut tasks = lock_unpoisoned(&self.tasks);
        while tasks.try_join_next().is_some() {}
        tasks.len()
    }

    fn instance_lock(&self, instance: &str) -> Arc<tokio::sync::Mutex<()>> {
        lock_unpoisoned(&self.instance_locks)
            .entry(instance.to_string())
            .or_default()
            .clone()
    }

    /// Drop the lock entry for `instance` once nobody holds or waits on it.
    /// Callers must have dropped their own clone first.
    fn release_instance_lock(&self, instance: &str) {
        let mut locks = lock_unpoisoned(&self.instance_locks);
        if locks.get(instance).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(instance);
        }
    }

    /// Tick `instance` again after `redrive_delay_ms`. Unresolved calls that
    /// are no longer in flight get dispatched again by that tick.
    fn schedule_redrive(self: &Arc<Self>, instance: &str) {
        if self.is_shutting_down() {
            return;
        }
        let delay = Duration::from_millis(self.options.redrive_delay_ms);
        warn!(
            target: "durable_fanout::runtime",
            instance_id = %instance,
            delay_ms = self.options.redrive_delay_ms,
            "provider still failing after retries; instance will be ticked again"
        );
        let rt = self.clone();
        let instance = instance.to_string();
        self.spawn_task(async move {
            tokio::time::sleep(delay).await;
            rt.enqueue_tick(&instance);
        });
    }

    async fn process_tick(self: Arc<Self>, instance: String) {
        let lock = self.instance_lock(&instance);
        let result = {
            let _guard = lock.lock().await;
            self.execute_with_retry("tick", &instance, || self.run_tick(&instance))
                .await
        };
        drop(lock);
        self.release_instance_lock(&instance);

        match result {
            Ok(()) => {}
            Err(e) if e.is_retryable() => self.schedule_redrive(&instance),
            Err(e) => {
                error!(target: "durable_fanout::runtime", instance_id = %instance, error = %e, "tick dropped");
            }
        }
    }

    /// Retry `operation` on retryable provider errors with exponential backoff.
    async fn execute_with_retry<F, Fut, T>(&self, operation_tag: &str, instance: &str, operation: F) -> Result<T, ProviderError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T, ProviderError>>,
    {
        let mut attempts: u32 = 0;
        loop {
            match operation().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_retryable() && attempts + 1 < self.options.tick_retry_max_attempts => {
                    let backoff_ms = self
                        .options
                        .tick_retry_base_backoff_ms
                        .saturating_mul(1u64 << attempts.min(20));
                    warn!(
                        target: "durable_fanout::runtime",
                        instance_id = %instance,
                        attempts,
                        backoff_ms,
                        error = %e,
                        "{} failed; retrying",
                        operation_tag
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    attempts += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One scheduling cycle. Caller holds the instance lock.
    async fn run_tick(self: &Arc<Self>, instance: &str) -> Result<(), ProviderError> {
        let Some(info) = self.store.get_instance(instance).await? else {
            warn!(target: "durable_fanout::runtime", instance_id = %instance, "tick for unknown instance");
            return Ok(());
        };
        let mut history = self.store.read(instance).await?;

        if let Some((status, output)) = history.iter().rev().find_map(terminal_status) {
            if info.status != status {
                self.store.update_instance_status(instance, status, Some(output)).await?;
            }
            return Ok(());
        }

        if !history.iter().any(|e| matches!(e, Event::OrchestrationStarted { .. })) {
            let started = Event::OrchestrationStarted {
                name: info.orchestration.clone(),
                input: info.input.clone(),
            };
            self.store.append(instance, vec![started.clone()]).await?;
            self.store
                .update_instance_status(instance, InstanceStatus::Running, None)
                .await?;
            debug!(
                target: "durable_fanout::runtime",
                instance_id = %instance,
                orchestration_name = %info.orchestration,
                "orchestration started"
            );
            history.push(started);
        } else if info.status == InstanceStatus::Pending {
            self.store
                .update_instance_status(instance, InstanceStatus::Running, None)
                .await?;
        }

        let Some(handler) = self.orchestrations.get(&info.orchestration) else {
            let details = ErrorDetails::Configuration {
                kind: ConfigErrorKind::UnregisteredOrchestration,
                resource: info.orchestration.clone(),
                message: None,
            };
            return self.finish(instance, TurnResult::Failed(details)).await;
        };

        let outcome = replay_engine::replay(instance, handler.as_ref(), &history);

        if !outcome.new_calls.is_empty() {
            let scheduled: Vec<Event> = outcome
                .new_calls
                .iter()
                .map(|c| Event::CallScheduled {
                    seq: c.seq,
                    name: c.name.clone(),
                    input: c.input.clone(),
                })
                .collect();
            self.store.append(instance, scheduled).await?;
        }

        if outcome.result.is_terminal() {
            return self.finish(instance, outcome.result).await;
        }

        // Everything scheduled but unresolved that nobody is working on
        let mut to_dispatch: Vec<ActivityInvocation> = match CorrelationTable::from_history(&history) {
            Ok(table) => table
                .iter()
                .filter(|(_, e)| !e.outcome.is_terminal())
                .map(|(seq, e)| ActivityInvocation {
                    instance: instance.to_string(),
                    seq,
                    name: e.name.clone(),
                    input: e.input.clone(),
                })
                .collect(),
            Err(_) => Vec::new(),
        };
        to_dispatch.extend(outcome.new_calls);
        for call in to_dispatch {
            dispatch::spawn_activity(self, call);
        }

        debug!(
            target: "durable_fanout::runtime",
            instance_id = %instance,
            awaiting = ?outcome.awaiting,
            "orchestration suspended"
        );
        Ok(())
    }

    async fn finish(&self, instance: &str, result: TurnResult) -> Result<(), ProviderError> {
        let (event, status, output) = match result {
            TurnResult::Completed(output) => (
                Event::OrchestrationCompleted { output: output.clone() },
                InstanceStatus::Completed,
                output,
            ),
            TurnResult::Failed(details) => {
                let msg = details.display_message();
                (Event::OrchestrationFailed { error: details }, InstanceStatus::Failed, msg)
            }
            TurnResult::Continue => return Ok(()),
        };
        self.store.append(instance, vec![event]).await?;
        self.store
            .update_instance_status(instance, status, Some(output.clone()))
            .await?;
        match status {
            InstanceStatus::Completed => {
                info!(target: "durable_fanout::runtime", instance_id = %instance, output = %output, "orchestration completed")
            }
            _ => warn!(target: "durable_fanout::runtime", instance_id = %instance, error = %output, "orchestration failed"),
        }
        Ok(())
    }

    /// Record an activity outcome and schedule the next tick.
    ///
    /// Outcomes for terminal instances are still appended for audit but do not
    /// tick the instance.
    pub(crate) async fn record_result(self: &Arc<Self>, instance: &str, seq: u64, outcome: Result<String, ErrorDetails>) {
        let event = match outcome {
            Ok(output) => Event::CallCompleted { seq, output },
            Err(error) => Event::CallFailed { seq, error },
        };
        let lock = self.instance_lock(instance);
        let recorded = {
            let _guard = lock.lock().await;
            self.execute_with_retry("record_result", instance, || {
                let event = event.clone();
                async move {
                    self.store.append(instance, vec![event]).await?;
                    self.store.get_instance(instance).await
                }
            })
            .await
        };
        drop(lock);
        self.release_instance_lock(instance);

        match recorded {
            Ok(Some(info)) if !info.status.is_terminal() => self.enqueue_tick(instance),
            Ok(_) => {
                debug!(target: "durable_fanout::runtime", instance_id = %instance, seq, "result recorded for finished instance");
            }
            // The call stays unresolved in history, so the redriven tick runs it again
            Err(e) if e.is_retryable() => {
                warn!(target: "durable_fanout::runtime", instance_id = %instance, seq, error = %e, "failed to record activity result");
                self.schedule_redrive(instance);
            }
            Err(e) => {
                error!(target: "durable_fanout::runtime", instance_id = %instance, seq, error = %e, "failed to record activity result");
            }
        }
    }

    /// Append `OrchestrationTerminated` and mark the instance Terminated.
    ///
    /// Returns `Ok(false)` when the instance had already finished. In-flight
    /// activities keep running; their results are recorded but ignored.
    pub(crate) async fn terminate(&self, instance: &str, reason: &str) -> Result<bool, ProviderError> {
        let lock = self.instance_lock(instance);
        let result = {
            let _guard = lock.lock().await;
            self.terminate_locked(instance, reason).await
        };
        drop(lock);
        self.release_instance_lock(instance);
        result
    }

    async fn terminate_locked(&self, instance: &str, reason: &str) -> Result<bool, ProviderError> {
        self.execute_with_retry("terminate", instance, || async move {
            if self.store.get_instance(instance).await?.is_none() {
                return Err(ProviderError::not_found("terminate", instance));
            }
            let history = self.store.read(instance).await?;
            if history.iter().any(Event::is_terminal) {
                return Ok(false);
            }
            self.store
                .append(
                    instance,
                    vec![Event::OrchestrationTerminated {
                        reason: reason.to_string(),
                    }],
                )
                .await?;
            self.store
                .update_instance_status(instance, InstanceStatus::Terminated, Some(reason.to_string()))
                .await?;
            info!(target: "durable_fanout::runtime", instance_id = %instance, reason = %reason, "orchestration terminated");
            Ok(true)
        })
        .await
    }

    /// Stop accepting ticks and dispatches, wait up to `timeout` (default
    /// `shutdown_grace_ms`) for in-flight work, then abort whatever remains.
    pub async fn shutdown(self: Arc<Self>, timeout: Option<Duration>) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let grace = timeout.unwrap_or(Duration::from_millis(self.options.shutdown_grace_ms));
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let remaining = self.reap_finished_tasks();
            if remaining == 0 {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!(target: "durable_fanout::runtime", remaining, "shutdown grace expired; aborting tasks");
                lock_unpoisoned(&self.tasks).abort_all();
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.activity_permits.close();

        let mut joins = self.joins.lock().await;
        for j in joins.drain(..) {
            j.abort();
        }
        info!(target: "durable_fanout::runtime", "runtime stopped");
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::InstanceInfo;
    use crate::providers::in_memory::InMemoryProvider;

    #[test]
    fn default_options() {
        let o = RuntimeOptions::default();
        assert_eq!(o.max_concurrent_activities, 64);
        assert_eq!(o.tick_retry_max_attempts, 5);
        assert_eq!(o.tick_retry_base_backoff_ms, 10);
        assert_eq!(o.redrive_delay_ms, 500);
    }

    #[test]
    fn terminal_events_map_to_status() {
        let (s, out) = terminal_status(&Event::OrchestrationTerminated { reason: "stop".into() }).unwrap();
        assert_eq!(s, InstanceStatus::Terminated);
        assert_eq!(out, "stop");
        assert!(terminal_status(&Event::CallCompleted { seq: 0, output: String::new() }).is_none());
    }

    #[tokio::test]
    async fn retry_gives_up_on_permanent_errors() {
        let rt = Runtime::start_with_store(
            Arc::new(InMemoryProvider::default()),
            ActivityRegistry::builder().build(),
            OrchestrationRegistry::builder().build(),
        )
        .await;
        let calls = std::sync::atomic::AtomicU32::new(0);
        let r: Result<(), ProviderError> = rt
            .execute_with_retry("op", "i", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::permanent("op", "broken"))
            })
            .await;
        assert!(r.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let calls = std::sync::atomic::AtomicU32::new(0);
        let r: Result<(), ProviderError> = rt
            .execute_with_retry("op", "i", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::retryable("op", "busy"))
            })
            .await;
        assert!(r.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        rt.shutdown(None).await;
    }

    #[tokio::test]
    async fn unregistered_orchestration_fails_instance() {
        let store = Arc::new(InMemoryProvider::default());
        store.create_instance(InstanceInfo::new("i1", "Ghost", "")).await.unwrap();
        let rt = Runtime::start_with_store(
            store.clone(),
            ActivityRegistry::builder().build(),
            OrchestrationRegistry::builder().build(),
        )
        .await;
        let status = rt
            .client()
            .wait_for_orchestration("i1", Duration::from_secs(5))
            .await
            .unwrap();
        match status {
            OrchestrationStatus::Failed { details } => assert_eq!(details.display_message(), "unregistered:Ghost"),
            other => panic!("unexpected {other:?}"),
        }
        rt.shutdown(None).await;
    }

    #[tokio::test]
    async fn finished_instances_release_locks_and_tasks() {
        let activities = ActivityRegistry::builder()
            .register("Echo", |_ctx: ActivityContext, input: String| async move { Ok(input) })
            .build();
        let orchestrations = OrchestrationRegistry::builder()
            .register("Pair", |ctx: OrchestrationContext, input: String| async move {
                let calls = vec![
                    ctx.schedule_activity("Echo", input.clone()),
                    ctx.schedule_activity("Echo", input),
                ];
                Ok(ctx.try_join(calls).await?.join("+"))
            })
            .build();
        let rt = Runtime::start_with_store(Arc::new(InMemoryProvider::default()), activities, orchestrations).await;
        let client = rt.client();

        for i in 0..25 {
            client
                .start_orchestration_with_id(&format!("pair-{i}"), "Pair", i.to_string())
                .await
                .unwrap();
        }
        for i in 0..25 {
            let status = client
                .wait_for_orchestration(&format!("pair-{i}"), Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(status, OrchestrationStatus::Completed { output: format!("{i}+{i}") });
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while rt.reap_finished_tasks() > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(rt.reap_finished_tasks(), 0);
        assert!(lock_unpoisoned(&rt.instance_locks).is_empty());
        assert!(lock_unpoisoned(&rt.in_flight).is_empty());
        rt.shutdown(None).await;
    }
}
