//! Instances keep making progress when the provider rejects writes for a while.

mod common;

use async_trait::async_trait;
use durable_fanout::providers::in_memory::InMemoryProvider;
use durable_fanout::providers::{InstanceInfo, InstanceStatus, Provider, ProviderError};
use durable_fanout::runtime::{OrchestrationStatus, Runtime, RuntimeOptions};
use durable_fanout::{ActivityContext, ActivityRegistry, Event, OrchestrationContext, OrchestrationRegistry};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

const ITEMS: [&str; 4] = ["A", "B", "C", "D"];

/// In-memory store whose appends fail with a retryable error while
/// `failures_left` is non-zero and the batch matches `rejects`.
struct BusyStore {
    inner: InMemoryProvider,
    rejects: fn(&Event) -> bool,
    failures_left: AtomicUsize,
}

impl BusyStore {
    fn new(rejects: fn(&Event) -> bool, failures: usize) -> Self {
        Self {
            inner: InMemoryProvider::default(),
            rejects,
            failures_left: AtomicUsize::new(failures),
        }
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Provider for BusyStore {
    fn name(&self) -> &str {
        "busy-memory"
    }

    async fn create_instance(&self, info: InstanceInfo) -> Result<(), ProviderError> {
        self.inner.create_instance(info).await
    }

    async fn get_instance(&self, instance: &str) -> Result<Option<InstanceInfo>, ProviderError> {
        self.inner.get_instance(instance).await
    }

    async fn update_instance_status(
        &self,
        instance: &str,
        status: InstanceStatus,
        output: Option<String>,
    ) -> Result<(), ProviderError> {
        self.inner.update_instance_status(instance, status, output).await
    }

    async fn list_instances(&self) -> Result<Vec<String>, ProviderError> {
        self.inner.list_instances().await
    }

    async fn read(&self, instance: &str) -> Result<Vec<Event>, ProviderError> {
        self.inner.read(instance).await
    }

    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), ProviderError> {
        if new_events.iter().any(self.rejects) && self.take_failure() {
            return Err(ProviderError::retryable("append", "database is locked"));
        }
        self.inner.append(instance, new_events).await
    }
}

fn is_completion(e: &Event) -> bool {
    matches!(e, Event::CallCompleted { .. })
}

fn is_schedule(e: &Event) -> bool {
    matches!(e, Event::CallScheduled { .. })
}

fn quick_retry_options() -> RuntimeOptions {
    RuntimeOptions {
        tick_retry_max_attempts: 2,
        tick_retry_base_backoff_ms: 1,
        redrive_delay_ms: 20,
        ..Default::default()
    }
}

type Invocations = Arc<Mutex<HashMap<String, usize>>>;

fn echo_activities(invocations: Invocations) -> ActivityRegistry {
    ActivityRegistry::builder()
        .register("Echo", move |_ctx: ActivityContext, input: String| {
            let invocations = invocations.clone();
            async move {
                *invocations.lock().unwrap().entry(input.clone()).or_default() += 1;
                Ok(format!("echo-{input}"))
            }
        })
        .build()
}

fn fan_out() -> OrchestrationRegistry {
    OrchestrationRegistry::builder()
        .register("FanOut", |ctx: OrchestrationContext, _input: String| async move {
            let calls = ITEMS.iter().map(|i| ctx.schedule_activity("Echo", *i)).collect();
            Ok(ctx.try_join(calls).await?.join(","))
        })
        .build()
}

fn completions_per_seq(history: &[Event]) -> HashMap<u64, usize> {
    let mut counts = HashMap::new();
    for e in history {
        if let Event::CallCompleted { seq, .. } = e {
            *counts.entry(*seq).or_default() += 1;
        }
    }
    counts
}

#[tokio::test]
async fn results_rejected_past_retry_budget_are_rerun() {
    // Result appends are serialized per instance, so the first three results
    // each exhaust both attempts before the store recovers
    let store = Arc::new(BusyStore::new(is_completion, 6));
    let invocations = Invocations::default();
    let rt = Runtime::start_with_options(
        store.clone(),
        echo_activities(invocations.clone()),
        fan_out(),
        quick_retry_options(),
    )
    .await;
    let client = rt.client();
    client.start_orchestration_with_id("busy-results", "FanOut", "").await.unwrap();

    let status = client
        .wait_for_orchestration("busy-results", common::WAIT)
        .await
        .unwrap();
    assert_eq!(
        status,
        OrchestrationStatus::Completed {
            output: "echo-A,echo-B,echo-C,echo-D".to_string()
        }
    );

    let history = store.read("busy-results").await.unwrap();
    let counts = completions_per_seq(&history);
    assert_eq!(counts.len(), ITEMS.len());
    assert!(counts.values().all(|&n| n == 1), "duplicate completions: {counts:?}");
    assert_eq!(common::count_scheduled(&history), ITEMS.len());

    let runs: usize = invocations.lock().unwrap().values().sum();
    assert!(runs > ITEMS.len(), "expected lost results to be rerun, got {runs} runs");
    assert_eq!(store.failures_left.load(Ordering::SeqCst), 0);
    rt.shutdown(None).await;
}

#[tokio::test]
async fn tick_rejected_past_retry_budget_is_redriven() {
    let store = Arc::new(BusyStore::new(is_schedule, 3));
    let invocations = Invocations::default();
    let rt = Runtime::start_with_options(
        store.clone(),
        echo_activities(invocations.clone()),
        fan_out(),
        quick_retry_options(),
    )
    .await;
    let client = rt.client();
    client.start_orchestration_with_id("busy-ticks", "FanOut", "").await.unwrap();

    let status = client
        .wait_for_orchestration("busy-ticks", common::WAIT)
        .await
        .unwrap();
    assert_eq!(
        status,
        OrchestrationStatus::Completed {
            output: "echo-A,echo-B,echo-C,echo-D".to_string()
        }
    );

    let history = store.read("busy-ticks").await.unwrap();
    assert_eq!(common::count_scheduled(&history), ITEMS.len());
    // Nothing is dispatched until its schedule is durable
    let invocations = invocations.lock().unwrap();
    assert!(ITEMS.iter().all(|i| invocations.get(*i) == Some(&1)), "{invocations:?}");
    drop(invocations);
    rt.shutdown(None).await;
}
