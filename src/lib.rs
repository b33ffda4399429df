//! Durable, replay-driven orchestration with deterministic fan-out/fan-in.
//!
//! An orchestration is ordinary async Rust code that schedules activities
//! through an [`OrchestrationContext`]. Every call is recorded in an
//! append-only history log ([`Event`]). On each scheduling cycle ("tick") the
//! runtime replays the orchestration from the start against that log:
//! calls that already have a recorded outcome resolve immediately, calls that
//! are still outstanding keep the orchestration suspended, and calls that were
//! never seen before are handed to the activity executors.
//!
//! - Data model: [`Event`], [`ErrorDetails`], [`ActivityInvocation`]
//! - Orchestration API: [`OrchestrationContext`], [`DurableFuture`], [`JoinFuture`]
//! - Replay: [`runtime::replay_engine::replay`]
//! - Scheduler: [`runtime::Runtime`]
//! - Instance management: [`Client`]
//! - History log backends: [`providers`]
//!
//! ```rust,no_run
//! use durable_fanout::providers::in_memory::InMemoryProvider;
//! use durable_fanout::runtime::{self, registry::ActivityRegistry};
//! use durable_fanout::{ActivityContext, OrchestrationContext, OrchestrationRegistry};
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let activities = ActivityRegistry::builder()
//!     .register("Title", |_ctx: ActivityContext, input: String| async move { Ok(format!("title-of-{input}")) })
//!     .build();
//! let orchestrations = OrchestrationRegistry::builder()
//!     .register("FanOut", |ctx: OrchestrationContext, _input: String| async move {
//!         let calls = ["A", "B"].iter().map(|i| ctx.schedule_activity("Title", *i)).collect();
//!         Ok(ctx.try_join(calls).await?.join(", "))
//!     })
//!     .build();
//! let rt = runtime::Runtime::start_with_store(Arc::new(InMemoryProvider::default()), activities, orchestrations).await;
//! let client = rt.client();
//! let id = client.start_orchestration("FanOut", "").await?;
//! let status = client.wait_for_orchestration(&id, std::time::Duration::from_secs(5)).await?;
//! println!("{status:?}");
//! rt.shutdown(None).await;
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

pub mod client;
pub mod futures;
pub mod logging;
#[doc(hidden)]
pub mod provider_validation;
pub mod provider_validations;
pub mod providers;
pub mod runtime;

pub use client::{Client, ClientError};
pub use futures::{DurableFuture, JoinFuture, TryJoinFuture};
pub use runtime::correlation::{CallOutcome, CorrelationTable};
pub use runtime::registry::{ActivityRegistry, OrchestrationRegistry};
pub use runtime::{OrchestrationHandler, OrchestrationStatus, Runtime, RuntimeOptions, WaitError};

// Internal codec utilities for typed I/O
pub(crate) mod _typed_codec {
    use serde::{Serialize, de::DeserializeOwned};
    use serde_json::Value;

    pub trait Codec {
        fn encode<T: Serialize>(v: &T) -> Result<String, String>;
        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String>;
    }

    pub struct Json;

    impl Codec for Json {
        fn encode<T: Serialize>(v: &T) -> Result<String, String> {
            // Plain strings travel unquoted so untyped and typed callers interoperate
            match serde_json::to_value(v) {
                Ok(Value::String(s)) => Ok(s),
                Ok(val) => serde_json::to_string(&val).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            }
        }

        fn decode<T: DeserializeOwned>(s: &str) -> Result<T, String> {
            match serde_json::from_str::<T>(s) {
                Ok(v) => Ok(v),
                Err(_) => serde_json::from_value(Value::String(s.to_string())).map_err(|e| e.to_string()),
            }
        }
    }

}

/// Classification of application-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppErrorKind {
    /// An activity returned an error.
    ActivityFailed,
    /// The orchestration function returned an error.
    OrchestrationFailed,
    /// Orchestration or activity code panicked.
    Panicked,
}

/// Classification of configuration failures. These are never visible to
/// orchestration code; they fail the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigErrorKind {
    /// Replayed call sequence diverged from recorded history.
    Nondeterminism,
    /// An activity name had no registered handler.
    UnregisteredActivity,
    /// An orchestration name had no registered handler.
    UnregisteredOrchestration,
}

/// Structured error carried in history and surfaced through status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorDetails {
    /// Business failure; orchestration code sees these as ordinary `Err` values.
    Application { kind: AppErrorKind, message: String },
    /// Fatal misconfiguration of the instance.
    Configuration {
        kind: ConfigErrorKind,
        resource: String,
        message: Option<String>,
    },
    /// Storage or transport failure.
    Infrastructure {
        operation: String,
        message: String,
        retryable: bool,
    },
}

impl ErrorDetails {
    pub fn activity(message: impl Into<String>) -> Self {
        ErrorDetails::Application {
            kind: AppErrorKind::ActivityFailed,
            message: message.into(),
        }
    }

    pub fn orchestration(message: impl Into<String>) -> Self {
        ErrorDetails::Application {
            kind: AppErrorKind::OrchestrationFailed,
            message: message.into(),
        }
    }

    pub fn nondeterminism(message: impl Into<String>) -> Self {
        ErrorDetails::Configuration {
            kind: ConfigErrorKind::Nondeterminism,
            resource: String::new(),
            message: Some(message.into()),
        }
    }

    pub fn is_application(&self) -> bool {
        matches!(self, ErrorDetails::Application { .. })
    }

    /// Stable, human-readable rendering used in status output.
    pub fn display_message(&self) -> String {
        match self {
            ErrorDetails::Application { kind, message } => match kind {
                AppErrorKind::Panicked => format!("panicked: {message}"),
                AppErrorKind::ActivityFailed | AppErrorKind::OrchestrationFailed => message.clone(),
            },
            ErrorDetails::Configuration {
                kind,
                resource,
                message,
            } => {
                let prefix = match kind {
                    ConfigErrorKind::Nondeterminism => "nondeterministic",
                    ConfigErrorKind::UnregisteredActivity | ConfigErrorKind::UnregisteredOrchestration => {
                        "unregistered"
                    }
                };
                match (resource.is_empty(), message) {
                    (true, Some(m)) => format!("{prefix}: {m}"),
                    (false, Some(m)) => format!("{prefix}:{resource}: {m}"),
                    (false, None) => format!("{prefix}:{resource}"),
                    (true, None) => prefix.to_string(),
                }
            }
            ErrorDetails::Infrastructure { operation, message, .. } => {
                format!("infrastructure:{operation}: {message}")
            }
        }
    }
}

impl std::fmt::Display for ErrorDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.display_message())
    }
}

/// Append-only history entries for one orchestration instance.
///
/// The serialized `type` tag and the `seq` numbers are the persisted
/// contract; providers store events in append order and replay depends on
/// nothing else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    /// First event of every instance, written by its first tick.
    OrchestrationStarted { name: String, input: String },
    /// An activity call was issued with sequence number `seq`.
    CallScheduled { seq: u64, name: String, input: String },
    /// The call `seq` produced `output`.
    CallCompleted { seq: u64, output: String },
    /// The call `seq` failed.
    CallFailed { seq: u64, error: ErrorDetails },
    /// Orchestration returned a final value.
    OrchestrationCompleted { output: String },
    /// Orchestration failed with an unhandled or fatal error.
    OrchestrationFailed { error: ErrorDetails },
    /// Orchestration was terminated from outside.
    OrchestrationTerminated { reason: String },
}

impl Event {
    /// Sequence number for call-related events.
    pub fn seq(&self) -> Option<u64> {
        match self {
            Event::CallScheduled { seq, .. } | Event::CallCompleted { seq, .. } | Event::CallFailed { seq, .. } => {
                Some(*seq)
            }
            _ => None,
        }
    }

    /// True for the events that end an instance.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Event::OrchestrationCompleted { .. } | Event::OrchestrationFailed { .. } | Event::OrchestrationTerminated { .. }
        )
    }

    /// Stable type tag, identical to the serialized `type` field.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Event::OrchestrationStarted { .. } => "OrchestrationStarted",
            Event::CallScheduled { .. } => "CallScheduled",
            Event::CallCompleted { .. } => "CallCompleted",
            Event::CallFailed { .. } => "CallFailed",
            Event::OrchestrationCompleted { .. } => "OrchestrationCompleted",
            Event::OrchestrationFailed { .. } => "OrchestrationFailed",
            Event::OrchestrationTerminated { .. } => "OrchestrationTerminated",
        }
    }
}

/// A call discovered during replay that still needs to be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInvocation {
    pub instance: String,
    pub seq: u64,
    pub name: String,
    pub input: String,
}

#[derive(Debug)]
pub(crate) struct CtxInner {
    pub(crate) instance: String,
    pub(crate) orchestration_name: String,
    pub(crate) table: CorrelationTable,
    pub(crate) next_seq: u64,
    pub(crate) new_calls: Vec<ActivityInvocation>,
    pub(crate) awaiting: std::collections::BTreeSet<u64>,
    pub(crate) nondeterminism_error: Option<String>,
    // Cleared once the code does something no earlier tick could have done
    pub(crate) replaying: bool,
}

impl CtxInner {
    fn issue_call(&mut self, name: String, input: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        match self.table.get(seq) {
            Some(entry) => {
                if (entry.name != name || entry.input != input) && self.nondeterminism_error.is_none() {
                    self.nondeterminism_error = Some(format!(
                        "call {seq} was recorded as '{}'('{}') but replay issued '{name}'('{input}')",
                        entry.name, entry.input
                    ));
                }
            }
            None => {
                self.replaying = false;
                self.new_calls.push(ActivityInvocation {
                    instance: self.instance.clone(),
                    seq,
                    name,
                    input,
                })
            }
        }
        seq
    }

    /// Called when a future hands `seq`'s outcome to orchestration code.
    pub(crate) fn observe_outcome(&mut self, seq: u64) {
        if self.table.last_resolved() == Some(seq) {
            self.replaying = false;
        }
    }
}

/// Handle given to orchestration code for issuing durable calls.
///
/// Cloning is cheap; all clones share the same replay state.
#[derive(Clone)]
pub struct OrchestrationContext {
    pub(crate) inner: Arc<Mutex<CtxInner>>,
}

impl OrchestrationContext {
    pub(crate) fn new(
        instance: impl Into<String>,
        orchestration_name: impl Into<String>,
        table: CorrelationTable,
    ) -> Self {
        let replaying = table.scheduled_count() > 0;
        Self {
            inner: Arc::new(Mutex::new(CtxInner {
                instance: instance.into(),
                orchestration_name: orchestration_name.into(),
                table,
                next_seq: 0,
                new_calls: Vec::new(),
                awaiting: Default::default(),
                nondeterminism_error: None,
                replaying,
            })),
        }
    }

    pub(crate) fn lock(&self) -> std::sync::MutexGuard<'_, CtxInner> {
        // Orchestration code runs on one thread per replay; a poisoned lock only follows a caught panic
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn instance_id(&self) -> String {
        self.lock().instance.clone()
    }

    pub fn orchestration_name(&self) -> String {
        self.lock().orchestration_name.clone()
    }

    /// True while the code is re-executing steps an earlier tick already ran.
    ///
    /// Replay ends when the code issues a call history has never seen, or
    /// receives the outcome that was recorded last.
    /// Use the `durable_*!` logging macros instead of checking this by hand.
    pub fn is_replaying(&self) -> bool {
        self.lock().replaying
    }

    /// Issue an activity call. The sequence number is assigned now, in issue
    /// order; awaiting the returned future yields the recorded outcome.
    pub fn schedule_activity(&self, name: impl Into<String>, input: impl Into<String>) -> DurableFuture {
        let seq = self.lock().issue_call(name.into(), input.into());
        DurableFuture::new(self.clone(), seq)
    }

    /// Issue an activity call with a JSON-encoded input.
    pub fn schedule_activity_typed<In: Serialize>(&self, name: impl Into<String>, input: &In) -> DurableFuture {
        use _typed_codec::Codec;
        // Encoding failures surface as a call whose input is the error text; the activity decides
        let payload = _typed_codec::Json::encode(input).unwrap_or_else(|e| format!("<encode error: {e}>"));
        self.schedule_activity(name, payload)
    }

    /// Wait for every call, returning each outcome in the order given.
    pub fn join(&self, calls: Vec<DurableFuture>) -> JoinFuture {
        JoinFuture::new(calls)
    }

    /// Wait for every call to reach a terminal state, then return all outputs
    /// or the failure with the lowest sequence number.
    pub fn try_join(&self, calls: Vec<DurableFuture>) -> TryJoinFuture {
        TryJoinFuture::new(calls)
    }
}

/// Context handed to activity handlers.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    instance: String,
    seq: u64,
    activity_name: String,
}

impl ActivityContext {
    pub(crate) fn new(instance: String, seq: u64, activity_name: String) -> Self {
        Self {
            instance,
            seq,
            activity_name,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn activity_name(&self) -> &str {
        &self.activity_name
    }

    pub fn trace_info(&self, message: impl Into<String>) {
        tracing::info!(
            target: "durable_fanout::activity",
            instance_id = %self.instance,
            seq = self.seq,
            activity_name = %self.activity_name,
            "{}",
            message.into()
        );
    }

    pub fn trace_warn(&self, message: impl Into<String>) {
        tracing::warn!(
            target: "durable_fanout::activity",
            instance_id = %self.instance,
            seq = self.seq,
            activity_name = %self.activity_name,
            "{}",
            message.into()
        );
    }

    pub fn trace_error(&self, message: impl Into<String>) {
        tracing::error!(
            target: "durable_fanout::activity",
            instance_id = %self.instance,
            seq = self.seq,
            activity_name = %self.activity_name,
            "{}",
            message.into()
        );
    }
}
