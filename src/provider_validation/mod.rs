//! Provider Validation Tests
//!
//! Test suite for validating provider implementations. These tests work with
//! any provider through the `ProviderFactory` trait.

pub mod concurrency;
pub mod history_log;
pub mod idempotence;
pub mod instance_records;
pub mod management;

use crate::providers::{InstanceInfo, Provider};
use crate::{ErrorDetails, Event};

pub(crate) const TEST_ORCHESTRATION: &str = "TestOrch";

/// Create `instance` with an `OrchestrationStarted` event already appended.
pub(crate) async fn create_started_instance(provider: &dyn Provider, instance: &str) {
    provider
        .create_instance(InstanceInfo::new(instance, TEST_ORCHESTRATION, "{}"))
        .await
        .unwrap_or_else(|e| panic!("create_instance({instance}) failed: {e}"));
    provider
        .append(instance, vec![started()])
        .await
        .unwrap_or_else(|e| panic!("append(started) for {instance} failed: {e}"));
}

pub(crate) fn started() -> Event {
    Event::OrchestrationStarted {
        name: TEST_ORCHESTRATION.to_string(),
        input: "{}".to_string(),
    }
}

pub(crate) fn scheduled(seq: u64) -> Event {
    Event::CallScheduled {
        seq,
        name: "Activity".to_string(),
        input: format!("input-{seq}"),
    }
}

pub(crate) fn completed(seq: u64) -> Event {
    Event::CallCompleted {
        seq,
        output: format!("output-{seq}"),
    }
}

pub(crate) fn failed(seq: u64) -> Event {
    Event::CallFailed {
        seq,
        error: ErrorDetails::activity(format!("error-{seq}")),
    }
}
