use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::task::{Context, Poll};

use ::futures::task::noop_waker_ref;
use tracing::{debug, warn};

use crate::runtime::OrchestrationHandler;
use crate::runtime::correlation::CorrelationTable;
use crate::{ActivityInvocation, AppErrorKind, ErrorDetails, Event, OrchestrationContext};

/// Result of executing an orchestration turn
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnResult {
    /// Orchestration is waiting on unresolved calls
    Continue,
    /// Orchestration completed with output
    Completed(String),
    /// Orchestration failed with error details
    Failed(ErrorDetails),
}

impl TurnResult {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TurnResult::Continue)
    }
}

/// Everything one replay learned about an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Calls issued by the code that history has never seen, in seq order.
    pub new_calls: Vec<ActivityInvocation>,
    /// Sequence numbers the code is suspended on.
    pub awaiting: Vec<u64>,
    pub result: TurnResult,
}

impl ReplayOutcome {
    fn terminal(result: TurnResult) -> Self {
        Self {
            new_calls: Vec::new(),
            awaiting: Vec::new(),
            result,
        }
    }
}

/// Run `handler` from its start against `history`.
///
/// This is a pure function of the history: the same handler and the same
/// events always produce the same outcome. Recorded outcomes resolve calls
/// immediately; calls without a `CallScheduled` event are returned in
/// `new_calls`; calls that are scheduled but unresolved keep the code
/// suspended. A single poll drives the code as far as history allows.
pub fn replay(instance: &str, handler: &dyn OrchestrationHandler, history: &[Event]) -> ReplayOutcome {
    if let Some(terminal) = history.iter().rev().find(|e| e.is_terminal()) {
        let result = match terminal {
            Event::OrchestrationCompleted { output } => TurnResult::Completed(output.clone()),
            Event::OrchestrationFailed { error } => TurnResult::Failed(error.clone()),
            Event::OrchestrationTerminated { reason } => TurnResult::Failed(ErrorDetails::orchestration(format!(
                "terminated: {reason}"
            ))),
            _ => TurnResult::Continue,
        };
        return ReplayOutcome::terminal(result);
    }

    let Some((name, input)) = history.iter().find_map(|e| match e {
        Event::OrchestrationStarted { name, input } => Some((name.clone(), input.clone())),
        _ => None,
    }) else {
        return ReplayOutcome::terminal(TurnResult::Failed(ErrorDetails::Infrastructure {
            operation: "replay".to_string(),
            message: "history has no OrchestrationStarted event".to_string(),
            retryable: false,
        }));
    };

    let table = match CorrelationTable::from_history(history) {
        Ok(t) => t,
        Err(msg) => return ReplayOutcome::terminal(TurnResult::Failed(ErrorDetails::nondeterminism(msg))),
    };

    if let Some((seq, details)) = table.first_configuration_failure() {
        debug!(target: "durable_fanout::replay", instance_id = %instance, seq, "configuration failure in history");
        return ReplayOutcome::terminal(TurnResult::Failed(details.clone()));
    }

    let ctx = OrchestrationContext::new(instance, name, table);
    let polled = {
        let mut fut = handler.invoke(ctx.clone(), input);
        let mut cx = Context::from_waker(noop_waker_ref());
        catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx)))
    };

    let mut inner = ctx.lock();
    let new_calls = std::mem::take(&mut inner.new_calls);
    let awaiting: Vec<u64> = inner.awaiting.iter().copied().collect();
    let recorded = inner.table.scheduled_count();
    let issued = inner.next_seq;

    let result = match polled {
        Err(panic) => TurnResult::Failed(ErrorDetails::Application {
            kind: AppErrorKind::Panicked,
            message: panic_message(panic.as_ref()),
        }),
        Ok(_) if inner.nondeterminism_error.is_some() => {
            TurnResult::Failed(ErrorDetails::nondeterminism(inner.nondeterminism_error.take().unwrap_or_default()))
        }
        Ok(_) if issued < recorded => TurnResult::Failed(ErrorDetails::nondeterminism(format!(
            "history records {recorded} calls but replay issued only {issued}"
        ))),
        Ok(Poll::Ready(Ok(output))) => TurnResult::Completed(output),
        Ok(Poll::Ready(Err(error))) => TurnResult::Failed(ErrorDetails::orchestration(error)),
        Ok(Poll::Pending) => TurnResult::Continue,
    };

    debug!(
        target: "durable_fanout::replay",
        instance_id = %instance,
        issued,
        recorded,
        new_calls = new_calls.len(),
        awaiting = ?awaiting,
        result = ?result,
        "replay finished"
    );

    // Nothing recorded can ever wake a turn that awaits no durable call
    if result == TurnResult::Continue && new_calls.is_empty() && awaiting.is_empty() {
        warn!(
            target: "durable_fanout::replay",
            instance_id = %instance,
            "orchestration suspended on a non-durable future; it will not make progress"
        );
    }

    if result.is_terminal() {
        if !new_calls.is_empty() {
            debug!(
                target: "durable_fanout::replay",
                instance_id = %instance,
                dropped = new_calls.len(),
                "dropping calls issued by an orchestration that already finished"
            );
        }
        return ReplayOutcome::terminal(result);
    }

    ReplayOutcome {
        new_calls,
        awaiting,
        result,
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "orchestration panicked".to_string()
    }
}
