use crate::provider_validation::{completed, create_started_instance, failed, scheduled};
use crate::provider_validations::ProviderFactory;
use crate::{ErrorDetails, Event};

/// Run all idempotent-append tests
pub async fn run_tests<F: ProviderFactory>(factory: &F) {
    test_duplicate_completion_dropped(factory).await;
    test_duplicate_terminal_dropped(factory).await;
    test_duplicate_schedule_dropped(factory).await;
    test_late_completion_after_terminal_kept(factory).await;
}

/// A redelivered activity result must not add a second outcome for the seq.
pub async fn test_duplicate_completion_dropped<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing idempotence: duplicate completion");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-dc").await;
    provider.append("inst-dc", vec![scheduled(0), scheduled(1)]).await.unwrap();

    provider.append("inst-dc", vec![completed(0)]).await.unwrap();
    provider.append("inst-dc", vec![completed(0)]).await.unwrap();
    provider.append("inst-dc", vec![failed(0)]).await.unwrap();
    // duplicate inside a single batch
    provider.append("inst-dc", vec![failed(1), completed(1)]).await.unwrap();

    let hist = provider.read("inst-dc").await.unwrap();
    let outcomes: Vec<&Event> = hist
        .iter()
        .filter(|e| matches!(e, Event::CallCompleted { .. } | Event::CallFailed { .. }))
        .collect();
    assert_eq!(outcomes, vec![&completed(0), &failed(1)]);
    tracing::info!("✓ Test passed: duplicate completion dropped");
}

pub async fn test_duplicate_terminal_dropped<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing idempotence: duplicate terminal event");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-dt").await;

    provider
        .append("inst-dt", vec![Event::OrchestrationCompleted { output: "first".into() }])
        .await
        .unwrap();
    provider
        .append(
            "inst-dt",
            vec![
                Event::OrchestrationFailed {
                    error: ErrorDetails::orchestration("second"),
                },
                Event::OrchestrationTerminated { reason: "third".into() },
            ],
        )
        .await
        .unwrap();

    let terminals: Vec<Event> = provider
        .read("inst-dt")
        .await
        .unwrap()
        .into_iter()
        .filter(Event::is_terminal)
        .collect();
    assert_eq!(terminals, vec![Event::OrchestrationCompleted { output: "first".into() }]);
    tracing::info!("✓ Test passed: duplicate terminal dropped");
}

/// A retried tick may re-append the same CallScheduled batch.
pub async fn test_duplicate_schedule_dropped<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing idempotence: duplicate schedule");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-ds").await;

    provider.append("inst-ds", vec![scheduled(0), scheduled(1)]).await.unwrap();
    provider
        .append("inst-ds", vec![scheduled(0), scheduled(1), scheduled(2)])
        .await
        .unwrap();

    let seqs: Vec<u64> = provider
        .read("inst-ds")
        .await
        .unwrap()
        .iter()
        .filter(|e| matches!(e, Event::CallScheduled { .. }))
        .filter_map(Event::seq)
        .collect();
    assert_eq!(seqs, vec![0, 1, 2]);
    tracing::info!("✓ Test passed: duplicate schedule dropped");
}

/// Results for activities still running at termination are kept for audit.
pub async fn test_late_completion_after_terminal_kept<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing idempotence: late completion after terminal");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-late").await;
    provider.append("inst-late", vec![scheduled(0)]).await.unwrap();
    provider
        .append("inst-late", vec![Event::OrchestrationTerminated { reason: "stop".into() }])
        .await
        .unwrap();
    provider.append("inst-late", vec![completed(0)]).await.unwrap();

    let hist = provider.read("inst-late").await.unwrap();
    assert_eq!(hist.last(), Some(&completed(0)));
    tracing::info!("✓ Test passed: late completion kept");
}
