//! Futures returned to orchestration code.
//!
//! Every future here resolves purely from the correlation table the replay
//! was started with. Nothing is ever woken: a future that is not ready on the
//! poll that observes it stays pending until the next tick replays the
//! orchestration against a longer history.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use crate::_typed_codec::{Codec, Json};
use crate::OrchestrationContext;
use crate::runtime::correlation::CallOutcome;

/// Future for a single activity call, identified by its sequence number.
pub struct DurableFuture {
    ctx: OrchestrationContext,
    seq: u64,
}

impl DurableFuture {
    pub(crate) fn new(ctx: OrchestrationContext, seq: u64) -> Self {
        Self { ctx, seq }
    }

    /// Sequence number assigned when the call was issued.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Await the output decoded from JSON.
    pub async fn into_typed<Out: serde::de::DeserializeOwned>(self) -> Result<Out, String> {
        let raw = self.await?;
        Json::decode::<Out>(&raw)
    }

    fn poll_outcome(&self) -> Poll<Result<String, String>> {
        let mut inner = self.ctx.lock();
        if inner.nondeterminism_error.is_some() {
            return Poll::Pending;
        }
        let resolved = match inner.table.outcome(self.seq) {
            Some(CallOutcome::Completed(output)) => Some(Ok(output.clone())),
            Some(CallOutcome::Failed(details)) if details.is_application() => Some(Err(details.display_message())),
            // Configuration failures end the instance before user code runs
            Some(CallOutcome::Failed(_)) => return Poll::Pending,
            Some(CallOutcome::Pending) | None => None,
        };
        match resolved {
            Some(out) => {
                inner.observe_outcome(self.seq);
                Poll::Ready(out)
            }
            None => {
                inner.awaiting.insert(self.seq);
                Poll::Pending
            }
        }
    }
}

impl Future for DurableFuture {
    type Output = Result<String, String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        self.get_mut().poll_outcome()
    }
}

/// Fan-in over a set of calls. Resolves once every call is terminal, with
/// outcomes in the order the futures were supplied.
pub struct JoinFuture {
    children: Vec<DurableFuture>,
    results: Vec<Option<Result<String, String>>>,
}

impl JoinFuture {
    pub(crate) fn new(children: Vec<DurableFuture>) -> Self {
        let results = vec![None; children.len()];
        Self { children, results }
    }

    fn poll_all(&mut self) -> bool {
        // Poll every child so each unresolved seq is reported as awaited
        for (child, slot) in self.children.iter().zip(self.results.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            if let Poll::Ready(out) = child.poll_outcome() {
                *slot = Some(out);
            }
        }
        self.results.iter().all(Option::is_some)
    }

    fn take_results(&mut self) -> Vec<Result<String, String>> {
        self.results.iter_mut().filter_map(Option::take).collect()
    }
}

impl Future for JoinFuture {
    type Output = Vec<Result<String, String>>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.poll_all() {
            Poll::Ready(this.take_results())
        } else {
            Poll::Pending
        }
    }
}

/// Fan-in that waits for all calls and then fails with the error of the
/// lowest sequence number, if any call failed.
pub struct TryJoinFuture {
    join: JoinFuture,
}

impl TryJoinFuture {
    pub(crate) fn new(children: Vec<DurableFuture>) -> Self {
        Self {
            join: JoinFuture::new(children),
        }
    }
}

impl Future for TryJoinFuture {
    type Output = Result<Vec<String>, String>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if !this.join.poll_all() {
            return Poll::Pending;
        }
        let seqs: Vec<u64> = this.join.children.iter().map(DurableFuture::seq).collect();
        let results = this.join.take_results();
        let first_failure = seqs
            .iter()
            .zip(results.iter())
            .filter_map(|(seq, r)| r.as_ref().err().map(|e| (*seq, e.clone())))
            .min_by_key(|(seq, _)| *seq);
        match first_failure {
            Some((_, err)) => Poll::Ready(Err(err)),
            None => Poll::Ready(Ok(results.into_iter().map(|r| r.unwrap_or_default()).collect())),
        }
    }
}

// poll() projects &mut Self freely; these must stay Unpin
const fn assert_unpin<T: Unpin>() {}
const _: () = {
    assert_unpin::<DurableFuture>();
    assert_unpin::<JoinFuture>();
    assert_unpin::<TryJoinFuture>();
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CorrelationTable, ErrorDetails, Event};
    use ::futures::task::noop_waker_ref;

    fn started() -> Event {
        Event::OrchestrationStarted {
            name: "O".to_string(),
            input: String::new(),
        }
    }

    fn scheduled(seq: u64) -> Event {
        Event::CallScheduled {
            seq,
            name: "A".to_string(),
            input: seq.to_string(),
        }
    }

    fn ctx_for(history: Vec<Event>) -> OrchestrationContext {
        OrchestrationContext::new("inst", "O", CorrelationTable::from_history(&history).unwrap())
    }

    fn poll_now<F: Future + Unpin>(f: &mut F) -> Poll<F::Output> {
        let mut cx = Context::from_waker(noop_waker_ref());
        Pin::new(f).poll(&mut cx)
    }

    #[test]
    fn resolved_call_is_ready_immediately() {
        let ctx = ctx_for(vec![
            started(),
            scheduled(0),
            Event::CallCompleted {
                seq: 0,
                output: "done".to_string(),
            },
        ]);
        let mut f = ctx.schedule_activity("A", "0");
        assert!(ctx.is_replaying());
        assert_eq!(poll_now(&mut f), Poll::Ready(Ok("done".to_string())));
        assert!(ctx.lock().new_calls.is_empty());
        // the newest outcome has been observed
        assert!(!ctx.is_replaying());
    }

    #[test]
    fn unknown_call_is_pending_and_recorded() {
        let ctx = ctx_for(vec![started()]);
        let mut f = ctx.schedule_activity("A", "0");
        assert_eq!(poll_now(&mut f), Poll::Pending);
        let inner = ctx.lock();
        assert_eq!(inner.new_calls.len(), 1);
        assert!(inner.awaiting.contains(&0));
    }

    #[test]
    fn join_waits_for_every_child() {
        let ctx = ctx_for(vec![
            started(),
            scheduled(0),
            scheduled(1),
            Event::CallCompleted {
                seq: 1,
                output: "b".to_string(),
            },
        ]);
        let calls = vec![ctx.schedule_activity("A", "0"), ctx.schedule_activity("A", "1")];
        let mut j = ctx.join(calls);
        assert!(poll_now(&mut j).is_pending());
        assert_eq!(ctx.lock().awaiting.iter().copied().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn try_join_reports_lowest_failed_seq() {
        let ctx = ctx_for(vec![
            started(),
            scheduled(0),
            scheduled(1),
            scheduled(2),
            Event::CallFailed {
                seq: 2,
                error: ErrorDetails::activity("late"),
            },
            Event::CallCompleted {
                seq: 0,
                output: "a".to_string(),
            },
            Event::CallFailed {
                seq: 1,
                error: ErrorDetails::activity("early"),
            },
        ]);
        let calls = vec![
            ctx.schedule_activity("A", "0"),
            ctx.schedule_activity("A", "1"),
            ctx.schedule_activity("A", "2"),
        ];
        let mut j = ctx.try_join(calls);
        assert_eq!(poll_now(&mut j), Poll::Ready(Err("early".to_string())));
    }
}
