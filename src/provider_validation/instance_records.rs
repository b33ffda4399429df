use crate::provider_validation::{TEST_ORCHESTRATION, create_started_instance};
use crate::provider_validations::ProviderFactory;
use crate::providers::{InstanceInfo, InstanceStatus, ProviderErrorKind};

/// Run all instance record tests
pub async fn run_tests<F: ProviderFactory>(factory: &F) {
    test_create_and_get_instance(factory).await;
    test_duplicate_instance_rejected(factory).await;
    test_unknown_instance_reads(factory).await;
}

/// Created instances read back as Pending with their input and an empty history.
pub async fn test_create_and_get_instance<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing instance records: create and get");
    let provider = factory.create_provider().await;

    let info = InstanceInfo::new("inst-create", TEST_ORCHESTRATION, "payload");
    provider.create_instance(info.clone()).await.unwrap();

    let got = provider.get_instance("inst-create").await.unwrap().expect("instance should exist");
    assert_eq!(got.instance_id, "inst-create");
    assert_eq!(got.orchestration, TEST_ORCHESTRATION);
    assert_eq!(got.input, "payload");
    assert_eq!(got.status, InstanceStatus::Pending);
    assert_eq!(got.output, None);
    assert_eq!(got.created_at_ms, info.created_at_ms);
    assert!(provider.read("inst-create").await.unwrap().is_empty());
    tracing::info!("✓ Test passed: create and get");
}

/// Ids are unique; a second create must not clobber the first record.
pub async fn test_duplicate_instance_rejected<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing instance records: duplicate create");
    let provider = factory.create_provider().await;
    create_started_instance(provider.as_ref(), "inst-dup").await;

    let err = provider
        .create_instance(InstanceInfo::new("inst-dup", "Other", "other-input"))
        .await
        .expect_err("duplicate create must fail");
    assert_eq!(err.kind, ProviderErrorKind::AlreadyExists, "{err}");

    let got = provider.get_instance("inst-dup").await.unwrap().unwrap();
    assert_eq!(got.orchestration, TEST_ORCHESTRATION);
    assert_eq!(provider.read("inst-dup").await.unwrap().len(), 1);
    tracing::info!("✓ Test passed: duplicate create rejected");
}

pub async fn test_unknown_instance_reads<F: ProviderFactory>(factory: &F) {
    tracing::info!("→ Testing instance records: unknown instance");
    let provider = factory.create_provider().await;
    assert!(provider.get_instance("nobody").await.unwrap().is_none());
    assert!(provider.read("nobody").await.unwrap().is_empty());
    tracing::info!("✓ Test passed: unknown instance reads empty");
}
