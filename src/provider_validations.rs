//! Provider Validation Infrastructure
//!
//! Reusable checks for [`Provider`] implementations. Every check creates a
//! fresh provider through a [`ProviderFactory`] and panics on the first
//! violated expectation, so they can be called directly from `#[tokio::test]`
//! functions.
//!
//! # Example
//!
//! ```rust,ignore
//! use durable_fanout::providers::Provider;
//! use durable_fanout::provider_validations::ProviderFactory;
//! use std::sync::Arc;
//!
//! struct MyProviderFactory;
//!
//! #[async_trait::async_trait]
//! impl ProviderFactory for MyProviderFactory {
//!     async fn create_provider(&self) -> Arc<dyn Provider> {
//!         Arc::new(MyProvider::new().await.unwrap())
//!     }
//! }
//!
//! #[tokio::test]
//! async fn test_my_provider() {
//!     durable_fanout::provider_validations::run_all_tests(&MyProviderFactory).await;
//! }
//! ```

use crate::providers::Provider;
use std::sync::Arc;

/// Trait for creating providers in tests.
#[async_trait::async_trait]
pub trait ProviderFactory: Send + Sync {
    /// Create a new provider instance for testing.
    ///
    /// Each call should return a fresh, isolated provider: a new in-memory
    /// store or a file-backed one under a unique temporary path.
    async fn create_provider(&self) -> Arc<dyn Provider>;
}

/// Available test functions:
///
/// **Instance Records:**
/// - `test_create_and_get_instance` - Created instances read back with Pending status and no history
/// - `test_duplicate_instance_rejected` - A second create with the same id fails with AlreadyExists
/// - `test_unknown_instance_reads` - Unknown ids read as None and an empty history
///
/// **History Log:**
/// - `test_append_preserves_order` - Events come back in append order across batches
/// - `test_append_to_unknown_instance` - Appending to a missing instance fails with NotFound
/// - `test_histories_are_isolated` - Appends to one instance never show up in another
///
/// **Idempotent Append:**
/// - `test_duplicate_completion_dropped` - A second outcome for the same seq is not stored
/// - `test_duplicate_terminal_dropped` - Only the first terminal event is stored
/// - `test_duplicate_schedule_dropped` - Re-appending a schedule for a known seq is a no-op
/// - `test_late_completion_after_terminal_kept` - Outcomes arriving after the end are kept for audit
///
/// **Management:**
/// - `test_list_instances_in_creation_order` - `list_instances` returns ids oldest first
/// - `test_update_instance_status` - Status and output updates are persisted
/// - `test_update_unknown_instance` - Updating a missing instance fails with NotFound
///
/// **Concurrency:**
/// - `test_concurrent_appends_across_instances` - Parallel writers to different instances lose nothing
/// - `test_concurrent_appends_same_instance` - Parallel single-event appends to one instance lose nothing
pub use crate::provider_validation::instance_records::{
    test_create_and_get_instance, test_duplicate_instance_rejected, test_unknown_instance_reads,
};

pub use crate::provider_validation::history_log::{
    test_append_preserves_order, test_append_to_unknown_instance, test_histories_are_isolated,
};

pub use crate::provider_validation::idempotence::{
    test_duplicate_completion_dropped, test_duplicate_schedule_dropped, test_duplicate_terminal_dropped,
    test_late_completion_after_terminal_kept,
};

pub use crate::provider_validation::management::{
    test_list_instances_in_creation_order, test_update_instance_status, test_update_unknown_instance,
};

pub use crate::provider_validation::concurrency::{
    test_concurrent_appends_across_instances, test_concurrent_appends_same_instance,
};

/// Run every validation against providers produced by `factory`.
pub async fn run_all_tests<F: ProviderFactory>(factory: &F) {
    crate::provider_validation::instance_records::run_tests(factory).await;
    crate::provider_validation::history_log::run_tests(factory).await;
    crate::provider_validation::idempotence::run_tests(factory).await;
    crate::provider_validation::management::run_tests(factory).await;
    crate::provider_validation::concurrency::run_tests(factory).await;
}
