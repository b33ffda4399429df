use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use ::futures::FutureExt;
use tracing::{debug, error, warn};

use super::registry::ActivityRegistry;
use super::replay_engine::panic_message;
use super::{Runtime, lock_unpoisoned};
use crate::{ActivityContext, ActivityInvocation, AppErrorKind, ConfigErrorKind, ErrorDetails};

/// Hand a scheduled call to an activity task unless one is already running
/// for the same `(instance, seq)` in this runtime.
pub(super) fn spawn_activity(rt: &Arc<Runtime>, call: ActivityInvocation) {
    if rt.is_shutting_down() {
        debug!(target: "durable_fanout::runtime", instance_id = %call.instance, seq = call.seq, "skip dispatch: shutting down");
        return;
    }
    let key = (call.instance.clone(), call.seq);
    if !lock_unpoisoned(&rt.in_flight).insert(key.clone()) {
        debug!(
            target: "durable_fanout::runtime",
            instance_id = %call.instance,
            seq = call.seq,
            activity_name = %call.name,
            "skip dispatch: already in flight"
        );
        return;
    }
    debug!(
        target: "durable_fanout::runtime",
        instance_id = %call.instance,
        seq = call.seq,
        activity_name = %call.name,
        "dispatch activity"
    );

    let rt2 = rt.clone();
    rt.spawn_task(async move {
        let permit = match rt2.activity_permits.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                // Semaphore closed by shutdown
                lock_unpoisoned(&rt2.in_flight).remove(&key);
                return;
            }
        };
        let instance = call.instance.clone();
        let seq = call.seq;
        let outcome = execute_activity(&rt2.activities, call).await;
        drop(permit);
        rt2.record_result(&instance, seq, outcome).await;
        lock_unpoisoned(&rt2.in_flight).remove(&key);
    });
}

/// Run one activity to completion, converting errors and panics into
/// `ErrorDetails`.
pub(super) async fn execute_activity(activities: &ActivityRegistry, call: ActivityInvocation) -> Result<String, ErrorDetails> {
    let ActivityInvocation {
        instance,
        seq,
        name,
        input,
    } = call;

    let Some(handler) = activities.get(&name) else {
        error!(
            target: "durable_fanout::runtime",
            instance_id = %instance,
            seq,
            activity_name = %name,
            "Activity not registered"
        );
        return Err(ErrorDetails::Configuration {
            kind: ConfigErrorKind::UnregisteredActivity,
            resource: name,
            message: None,
        });
    };

    let ctx = ActivityContext::new(instance.clone(), seq, name.clone());
    let start = Instant::now();
    let result = AssertUnwindSafe(handler.invoke(ctx, input)).catch_unwind().await;
    let duration_ms = start.elapsed().as_millis() as u64;

    match result {
        Ok(Ok(output)) => {
            debug!(
                target: "durable_fanout::runtime",
                instance_id = %instance,
                seq,
                activity_name = %name,
                outcome = "success",
                duration_ms,
                "Activity completed"
            );
            Ok(output)
        }
        Ok(Err(error)) => {
            warn!(
                target: "durable_fanout::runtime",
                instance_id = %instance,
                seq,
                activity_name = %name,
                outcome = "app_error",
                duration_ms,
                error = %error,
                "Activity failed"
            );
            Err(ErrorDetails::activity(error))
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(
                target: "durable_fanout::runtime",
                instance_id = %instance,
                seq,
                activity_name = %name,
                outcome = "panicked",
                duration_ms,
                error = %message,
                "Activity panicked"
            );
            Err(ErrorDetails::Application {
                kind: AppErrorKind::Panicked,
                message,
            })
        }
    }
}
