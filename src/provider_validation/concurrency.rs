use std::sync::Arc;

use crate::provider_validation::{completed, create_started_instance, scheduled};
use crate::provider_validations::ProviderFactory;
use crate::Event;

/// Run all concurrency tests
pub async fn run_tests<F: ProviderFactory>(factory: &F) {
    test_concurrent_appends_across_instances(factory).await;
    test_concurrent_appends_same_instance(factory).await;
}

pub async fn test_concurrent_appends_across_instances<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing concurrency: appends across instances");
    let provider = factory.create_provider().await;
    let ids: Vec<String> = (0..8).map(|i| format!("inst-par-{i}")).collect();
    for id in &ids {
        create_started_instance(provider.as_ref(), id).await;
    }

    let mut handles = Vec::new();
    for id in ids.clone() {
        let p = Arc::clone(&provider);
        handles.push(tokio::spawn(async move {
            for seq in 0..5 {
                p.append(&id, vec![scheduled(seq)]).await.unwrap();
                p.append(&id, vec![completed(seq)]).await.unwrap();
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    for id in &ids {
        let hist = provider.read(id).await.unwrap();
        assert_eq!(hist.len(), 11, "{id}: {hist:?}");
    }
    tracing::info!("✓ Test passed: parallel appends across instances");
}

/// Fan-out results arrive concurrently for one instance; none may be lost.
pub async fn test_concurrent_appends_same_instance<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing concurrency: appends to one instance");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-fan").await;
    provider
        .append("inst-fan", (0..16).map(scheduled).collect())
        .await
        .unwrap();

    let mut handles = Vec::new();
    for seq in 0..16u64 {
        let p = Arc::clone(&provider);
        handles.push(tokio::spawn(async move {
            p.append("inst-fan", vec![completed(seq)]).await.unwrap();
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let hist = provider.read("inst-fan").await.unwrap();
    let mut done: Vec<u64> = hist
        .iter()
        .filter(|e| matches!(e, Event::CallCompleted { .. }))
        .filter_map(Event::seq)
        .collect();
    done.sort_unstable();
    assert_eq!(done, (0..16).collect::<Vec<_>>());
    assert_eq!(hist.len(), 33);
    tracing::info!("✓ Test passed: parallel appends to one instance");
}
