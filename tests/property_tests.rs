//! Property-based tests for replay: idempotence, fan-out completeness and
//! re-driving from any truncated history.

use durable_fanout::runtime::FnOrchestration;
use durable_fanout::runtime::replay_engine::{TurnResult, replay};
use durable_fanout::{ActivityInvocation, Event, OrchestrationContext, OrchestrationHandler};
use proptest::prelude::*;

fn fan_out(width: usize) -> impl OrchestrationHandler {
    FnOrchestration(move |ctx: OrchestrationContext, _input: String| async move {
        let calls = (0..width)
            .map(|i| ctx.schedule_activity("Work", format!("item-{i}")))
            .collect();
        let outs = ctx.try_join(calls).await?;
        // A second, sequential stage that depends on the join
        let summary = ctx.schedule_activity("Summarize", outs.join(",")).await?;
        Ok(summary)
    })
}

fn started() -> Event {
    Event::OrchestrationStarted {
        name: "FanOut".to_string(),
        input: String::new(),
    }
}

fn execute(call: &ActivityInvocation) -> Event {
    Event::CallCompleted {
        seq: call.seq,
        output: format!("done({})", call.input),
    }
}

fn expected_output(width: usize) -> String {
    let joined: Vec<String> = (0..width).map(|i| format!("done(item-{i})")).collect();
    format!("done({})", joined.join(","))
}

/// Drive the orchestration to completion, delivering outstanding results in
/// the order chosen by `pick`. Returns the full history.
fn drive(handler: &dyn OrchestrationHandler, mut history: Vec<Event>, mut pick: impl FnMut(usize) -> usize) -> Vec<Event> {
    let mut outstanding: Vec<ActivityInvocation> = Vec::new();
    for _ in 0..1_000 {
        let out = replay("prop", handler, &history);
        for c in &out.new_calls {
            history.push(Event::CallScheduled {
                seq: c.seq,
                name: c.name.clone(),
                input: c.input.clone(),
            });
        }
        outstanding.extend(out.new_calls);
        match out.result {
            TurnResult::Continue => {}
            TurnResult::Completed(output) => {
                history.push(Event::OrchestrationCompleted { output });
                return history;
            }
            TurnResult::Failed(e) => panic!("unexpected failure: {e}"),
        }
        assert!(!outstanding.is_empty(), "suspended with nothing outstanding");
        let call = outstanding.remove(pick(outstanding.len()));
        history.push(execute(&call));
    }
    panic!("orchestration did not finish");
}

/// Rebuild the outstanding set from a (possibly truncated) history and drive
/// it to completion the way a recovering runtime would.
fn resume(handler: &dyn OrchestrationHandler, mut history: Vec<Event>) -> Vec<Event> {
    let resolved: Vec<u64> = history
        .iter()
        .filter(|e| matches!(e, Event::CallCompleted { .. } | Event::CallFailed { .. }))
        .filter_map(Event::seq)
        .collect();
    let pending: Vec<Event> = history
        .iter()
        .filter_map(|e| match e {
            Event::CallScheduled { seq, input, .. } if !resolved.contains(seq) => Some(Event::CallCompleted {
                seq: *seq,
                output: format!("done({input})"),
            }),
            _ => None,
        })
        .collect();
    history.extend(pending);
    drive(handler, history, |_| 0)
}

fn final_output(history: &[Event]) -> Option<&str> {
    history.iter().rev().find_map(|e| match e {
        Event::OrchestrationCompleted { output } => Some(output.as_str()),
        _ => None,
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// Replaying the same history twice yields the same calls and result.
    #[test]
    fn prop_replay_is_idempotent(width in 1usize..8, delivered in proptest::collection::vec(any::<bool>(), 8)) {
        let handler = fan_out(width);
        let mut history = vec![started()];
        let first = replay("prop", &handler, &history);
        for c in &first.new_calls {
            history.push(Event::CallScheduled { seq: c.seq, name: c.name.clone(), input: c.input.clone() });
        }
        for c in first.new_calls.iter().filter(|c| delivered[c.seq as usize]) {
            history.push(execute(c));
        }

        let a = replay("prop", &handler, &history);
        let b = replay("prop", &handler, &history);
        prop_assert_eq!(a, b);
    }

    /// The join never resolves before every fanned-out call has an outcome,
    /// whatever the completion order.
    #[test]
    fn prop_fan_out_completeness(width in 1usize..8, order in proptest::collection::vec(0usize..100, 16)) {
        let handler = fan_out(width);
        let mut picks = order.into_iter().cycle();
        let history = drive(&handler, vec![started()], |n| picks.next().unwrap_or(0) % n);

        let summarize_at = history.iter().position(|e| matches!(
            e,
            Event::CallScheduled { name, .. } if name == "Summarize"
        ));
        let summarize_at = summarize_at.expect("second stage must be scheduled");
        let completed_before = history[..summarize_at]
            .iter()
            .filter(|e| matches!(e, Event::CallCompleted { .. }))
            .count();
        prop_assert_eq!(completed_before, width);
        let expected = expected_output(width);
        prop_assert_eq!(final_output(&history), Some(expected.as_str()));

        let scheduled = history.iter().filter(|e| matches!(e, Event::CallScheduled { .. })).count();
        prop_assert_eq!(scheduled, width + 1, "no seq is scheduled twice");
    }

    /// Cutting the history after any append and resuming reaches the same output.
    #[test]
    fn prop_truncated_history_redrives_to_same_output(width in 1usize..6, cut in 1usize..64) {
        let handler = fan_out(width);
        let full = drive(&handler, vec![started()], |n| n - 1);
        let cut = cut.min(full.len() - 1).max(1);
        let resumed = resume(&handler, full[..cut].to_vec());
        prop_assert_eq!(final_output(&resumed), final_output(&full));
    }
}
