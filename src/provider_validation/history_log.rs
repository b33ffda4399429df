use crate::provider_validation::{completed, create_started_instance, scheduled, started};
use crate::provider_validations::ProviderFactory;
use crate::providers::ProviderErrorKind;
use crate::Event;

/// Run all history log tests
pub async fn run_tests<F: ProviderFactory>(factory: &F) {
    test_append_preserves_order(factory).await;
    test_append_to_unknown_instance(factory).await;
    test_histories_are_isolated(factory).await;
}

/// Batches are stored whole and in order; reads return exactly what was appended.
pub async fn test_append_preserves_order<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history log: append order");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-order").await;

    provider
        .append("inst-order", vec![scheduled(0), scheduled(1), scheduled(2)])
        .await
        .unwrap();
    provider.append("inst-order", vec![completed(2)]).await.unwrap();
    provider.append("inst-order", vec![completed(0), completed(1)]).await.unwrap();
    provider
        .append("inst-order", vec![Event::OrchestrationCompleted { output: "done".into() }])
        .await
        .unwrap();

    let expected = vec![
        started(),
        scheduled(0),
        scheduled(1),
        scheduled(2),
        completed(2),
        completed(0),
        completed(1),
        Event::OrchestrationCompleted { output: "done".into() },
    ];
    assert_eq!(provider.read("inst-order").await.unwrap(), expected);
    tracing::info!("✓ Test passed: append order preserved");
}

pub async fn test_append_to_unknown_instance<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history log: append to unknown instance");
    let provider = factory.create_provider().await;
    let err = provider
        .append("ghost", vec![started()])
        .await
        .expect_err("append to a missing instance must fail");
    assert_eq!(err.kind, ProviderErrorKind::NotFound, "{err}");
    assert!(provider.read("ghost").await.unwrap().is_empty());
    tracing::info!("✓ Test passed: append to unknown instance rejected");
}

pub async fn test_histories_are_isolated<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing history log: isolation");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-a").await;
    create_started_instance(provider.as_ref(), "inst-b").await;

    provider.append("inst-a", vec![scheduled(0), completed(0)]).await.unwrap();

    assert_eq!(provider.read("inst-a").await.unwrap().len(), 3);
    assert_eq!(provider.read("inst-b").await.unwrap(), vec![started()]);
    tracing::info!("✓ Test passed: histories isolated");
}
