use crate::provider_validation::{TEST_ORCHESTRATION, create_started_instance};
use crate::provider_validations::ProviderFactory;
use crate::providers::{InstanceInfo, InstanceStatus, ProviderErrorKind};

/// Run all management tests
pub async fn run_tests<F: ProviderFactory>(factory: &F) {
    test_list_instances_in_creation_order(factory).await;
    test_update_instance_status(factory).await;
    test_update_unknown_instance(factory).await;
}

pub async fn test_list_instances_in_creation_order<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing management: list_instances");
    let provider = factory.create_provider().await;
    assert!(provider.list_instances().await.unwrap().is_empty());

    // Explicit timestamps so ordering doesn't depend on clock resolution
    for (i, id) in ["inst-c", "inst-a", "inst-b"].iter().enumerate() {
        let mut info = InstanceInfo::new(*id, TEST_ORCHESTRATION, "");
        info.created_at_ms = 1_000 + i as u64;
        provider.create_instance(info).await.unwrap();
    }

    assert_eq!(
        provider.list_instances().await.unwrap(),
        vec!["inst-c".to_string(), "inst-a".to_string(), "inst-b".to_string()]
    );
    tracing::info!("✓ Test passed: list_instances ordered by creation");
}

pub async fn test_update_instance_status<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing management: update_instance_status");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-upd").await;

    provider
        .update_instance_status("inst-upd", InstanceStatus::Running, None)
        .await
        .unwrap();
    assert_eq!(
        provider.get_instance("inst-upd").await.unwrap().unwrap().status,
        InstanceStatus::Running
    );

    provider
        .update_instance_status("inst-upd", InstanceStatus::Completed, Some("result".into()))
        .await
        .unwrap();
    let info = provider.get_instance("inst-upd").await.unwrap().unwrap();
    assert_eq!(info.status, InstanceStatus::Completed);
    assert_eq!(info.output.as_deref(), Some("result"));
    assert_eq!(info.input, "{}");
    tracing::info!("✓ Test passed: status updates persisted");
}

pub async fn test_update_unknown_instance<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing management: update unknown instance");
    let provider = factory.create_provider().await;
    let err = provider
        .update_instance_status("ghost", InstanceStatus::Failed, Some("x".into()))
        .await
        .expect_err("updating a missing instance must fail");
    assert_eq!(err.kind, ProviderErrorKind::NotFound, "{err}");
    tracing::info!("✓ Test passed: update of unknown instance rejected");
}
