//! History log backends.
//!
//! A provider is a dumb datastore: it stores instance records and an
//! append-only, ordered event list per instance. It knows nothing about
//! replay; the runtime owns scheduling and dispatch.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::Event;

pub mod error;
/// Filesystem-backed provider (JSON lines per instance).
pub mod fs;
/// In-memory provider for tests.
pub mod in_memory;
/// SQLite-backed provider.
pub mod sqlite;

pub use error::{ProviderError, ProviderErrorKind};

/// Lifecycle state of an orchestration instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstanceStatus {
    /// Created, first tick not yet run.
    Pending,
    Running,
    Completed,
    Failed,
    Terminated,
}

impl InstanceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            InstanceStatus::Completed | InstanceStatus::Failed | InstanceStatus::Terminated
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Pending => "Pending",
            InstanceStatus::Running => "Running",
            InstanceStatus::Completed => "Completed",
            InstanceStatus::Failed => "Failed",
            InstanceStatus::Terminated => "Terminated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(InstanceStatus::Pending),
            "Running" => Some(InstanceStatus::Running),
            "Completed" => Some(InstanceStatus::Completed),
            "Failed" => Some(InstanceStatus::Failed),
            "Terminated" => Some(InstanceStatus::Terminated),
            _ => None,
        }
    }
}

/// Stored record of an orchestration instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub orchestration: String,
    pub status: InstanceStatus,
    pub input: String,
    /// Final output for Completed, error text for Failed, reason for Terminated.
    pub output: Option<String>,
    pub created_at_ms: u64,
}

impl InstanceInfo {
    pub fn new(instance_id: impl Into<String>, orchestration: impl Into<String>, input: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            orchestration: orchestration.into(),
            status: InstanceStatus::Pending,
            input: input.into(),
            output: None,
            created_at_ms: now_millis(),
        }
    }
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Storage abstraction for instances and their append-only history.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Create a new instance record with no history.
    ///
    /// Must fail with [`ProviderErrorKind::AlreadyExists`] when the id is taken.
    async fn create_instance(&self, info: InstanceInfo) -> Result<(), ProviderError>;

    async fn get_instance(&self, instance: &str) -> Result<Option<InstanceInfo>, ProviderError>;

    /// Update status and output of an existing instance.
    ///
    /// Must fail with [`ProviderErrorKind::NotFound`] for unknown instances.
    async fn update_instance_status(
        &self,
        instance: &str,
        status: InstanceStatus,
        output: Option<String>,
    ) -> Result<(), ProviderError>;

    /// All known instance ids, ordered by creation time.
    async fn list_instances(&self) -> Result<Vec<String>, ProviderError>;

    /// Full history for an instance in append order. Unknown instances read as empty.
    async fn read(&self, instance: &str) -> Result<Vec<Event>, ProviderError>;

    /// Atomically append `new_events` to an existing instance.
    ///
    /// Appends are idempotent for completions and terminal events: see
    /// [`filter_duplicates`].
    async fn append(&self, instance: &str, new_events: Vec<Event>) -> Result<(), ProviderError>;
}

/// Drop events from `new_events` that would duplicate what is already
/// recorded: a second schedule or outcome for the same sequence number, or a
/// second terminal event for the instance.
pub fn filter_duplicates(existing: &[Event], new_events: Vec<Event>) -> Vec<Event> {
    let mut scheduled: HashSet<u64> = HashSet::new();
    let mut resolved: HashSet<u64> = HashSet::new();
    let mut started = false;
    let mut terminal = false;

    let note = |e: &Event,
                    scheduled: &mut HashSet<u64>,
                    resolved: &mut HashSet<u64>,
                    started: &mut bool,
                    terminal: &mut bool| match e {
        Event::OrchestrationStarted { .. } => *started = true,
        Event::CallScheduled { seq, .. } => {
            scheduled.insert(*seq);
        }
        Event::CallCompleted { seq, .. } | Event::CallFailed { seq, .. } => {
            resolved.insert(*seq);
        }
        Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. } | Event::OrchestrationTerminated { .. } => {
            *terminal = true
        }
    };

    for e in existing {
        note(e, &mut scheduled, &mut resolved, &mut started, &mut terminal);
    }

    let mut out = Vec::with_capacity(new_events.len());
    for e in new_events {
        let dup = match &e {
            Event::OrchestrationStarted { .. } => started,
            Event::CallScheduled { seq, .. } => scheduled.contains(seq),
            Event::CallCompleted { seq, .. } | Event::CallFailed { seq, .. } => resolved.contains(seq),
            Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. } | Event::OrchestrationTerminated { .. } => {
                terminal
            }
        };
        if dup {
            tracing::debug!(target: "durable_fanout::providers", event = e.kind_name(), seq = ?e.seq(), "dropping duplicate event");
            continue;
        }
        note(&e, &mut scheduled, &mut resolved, &mut started, &mut terminal);
        out.push(e);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorDetails;

    #[test]
    fn duplicates_are_dropped() {
        let existing = vec![
            Event::OrchestrationStarted {
                name: "O".to_string(),
                input: String::new(),
            },
            Event::CallScheduled {
                seq: 0,
                name: "A".to_string(),
                input: String::new(),
            },
            Event::CallCompleted {
                seq: 0,
                output: "x".to_string(),
            },
        ];
        let new = vec![
            Event::CallFailed {
                seq: 0,
                error: ErrorDetails::activity("late"),
            },
            Event::CallScheduled {
                seq: 1,
                name: "A".to_string(),
                input: String::new(),
            },
            Event::CallScheduled {
                seq: 1,
                name: "A".to_string(),
                input: String::new(),
            },
            Event::OrchestrationCompleted { output: "a".to_string() },
            Event::OrchestrationFailed {
                error: ErrorDetails::orchestration("b"),
            },
        ];
        let kept = filter_duplicates(&existing, new);
        assert_eq!(kept.len(), 2);
        assert!(matches!(kept[0], Event::CallScheduled { seq: 1, .. }));
        assert!(matches!(kept[1], Event::OrchestrationCompleted { .. }));
    }

    #[test]
    fn status_strings_roundtrip() {
        for s in [
            InstanceStatus::Pending,
            InstanceStatus::Running,
            InstanceStatus::Completed,
            InstanceStatus::Failed,
            InstanceStatus::Terminated,
        ] {
            assert_eq!(InstanceStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(InstanceStatus::parse("Bogus"), None);
        assert!(InstanceStatus::Terminated.is_terminal());
        assert!(!InstanceStatus::Running.is_terminal());
    }
}
