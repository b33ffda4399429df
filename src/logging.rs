//! Logging setup and replay-safe logging macros for orchestration code.
//!
//! Orchestration code runs again from the start on every tick. The
//! `durable_*!` macros only emit while the code is past recorded history, so
//! each message appears once per instance instead of once per tick.
//!
//! ```rust,no_run
//! use durable_fanout::{OrchestrationContext, durable_info};
//!
//! async fn fan_out(ctx: OrchestrationContext, input: String) -> Result<String, String> {
//!     durable_info!(ctx, items = %input, "starting fan-out");
//!     let out = ctx.schedule_activity("Work", input).await?;
//!     durable_info!(ctx, "fan-out finished");
//!     Ok(out)
//! }
//! ```

/// Install a `tracing_subscriber` fmt layer honoring `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set, so it is safe to call
/// repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .try_init();
}

#[macro_export]
macro_rules! durable_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::info!(
                target: "durable_fanout::orchestration",
                instance_id = %$ctx.instance_id(),
                orchestration_name = %$ctx.orchestration_name(),
                $($arg)+
            );
        }
    }};
}

#[macro_export]
macro_rules! durable_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::warn!(
                target: "durable_fanout::orchestration",
                instance_id = %$ctx.instance_id(),
                orchestration_name = %$ctx.orchestration_name(),
                $($arg)+
            );
        }
    }};
}

#[macro_export]
macro_rules! durable_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::error!(
                target: "durable_fanout::orchestration",
                instance_id = %$ctx.instance_id(),
                orchestration_name = %$ctx.orchestration_name(),
                $($arg)+
            );
        }
    }};
}

#[macro_export]
macro_rules! durable_debug {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::debug!(
                target: "durable_fanout::orchestration",
                instance_id = %$ctx.instance_id(),
                orchestration_name = %$ctx.orchestration_name(),
                $($arg)+
            );
        }
    }};
}
