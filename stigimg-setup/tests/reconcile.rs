//! End-to-end reconciliation runs against the in-memory provider.

use stigimg_setup::plan::{IMAGE_KEY, KEYRING, NETWORK, REPOSITORY, STORAGE_KEY};
use stigimg_setup::provider::memory::Call;
use stigimg_setup::report::Subject;
use stigimg_setup::resource::{BindingTarget, Member, ResourceParams, ResourceRef};
use stigimg_setup::{
    BindingSpec, CloudProvider, ConfigInputs, Configuration, MemoryProvider, Plan, ProviderError,
    ReconcileError, ReconcileResult, Reconciler, ResourceKind, ResourceSpec,
};

const PROJECT_NUMBER: &str = "123456789";

async fn demo_config(provider: &MemoryProvider) -> Configuration {
    let inputs = ConfigInputs {
        project_id: Some("demo".into()),
        zone: Some("us-central1-c".into()),
        ..Default::default()
    };
    let number = provider.project_number("demo").await.unwrap();
    inputs.resolve(&number).unwrap()
}

#[tokio::test]
async fn test_fresh_project() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let config = demo_config(reconciler.provider()).await;

    assert_eq!(config.region, "us-central1");
    assert_eq!(config.bucket_name, "demo-stig-artifacts");
    assert_eq!(config.cloudbuild_bucket, "demo_cloudbuild");

    let report = reconciler.run(&config).await;

    assert!(report.is_success(), "{}", report.render());
    assert_eq!(report.resources_created(), 9);
    assert_eq!(report.resources_existing(), 0);
    assert_eq!(report.bindings_applied(), 12);
    assert_eq!(report.steps.len(), 21);
    assert!(report.finished_at.is_some());

    assert_eq!(reconciler.provider().resource_count(), 9);
    assert_eq!(reconciler.provider().binding_count(), 12);
}

#[tokio::test]
async fn test_second_run_creates_nothing() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let config = demo_config(reconciler.provider()).await;

    let first = reconciler.run(&config).await;
    assert!(first.is_success());

    let second = reconciler.run(&config).await;
    assert!(second.is_success(), "{}", second.render());
    assert_eq!(second.resources_created(), 0);
    assert_eq!(second.resources_existing(), 9);
    assert_eq!(second.bindings_applied(), 12);

    // Nothing was created on the second pass
    let creates = reconciler
        .provider()
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::Create(_)))
        .count();
    assert_eq!(creates, 9);
}

#[tokio::test]
async fn test_partial_project_is_completed() {
    let network = ResourceSpec::new(NETWORK, ResourceParams::Network { auto_subnets: true });
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER).with_existing(&network));
    let config = demo_config(reconciler.provider()).await;

    let report = reconciler.run(&config).await;

    assert!(report.is_success());
    assert_eq!(report.resources_existing(), 1);
    assert_eq!(report.resources_created(), 8);
    assert!(matches!(report.steps[0].result, ReconcileResult::AlreadyExists));
}

#[tokio::test]
async fn test_keys_created_before_buckets() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let config = demo_config(reconciler.provider()).await;
    assert!(reconciler.run(&config).await.is_success());

    let provider = reconciler.provider();
    let at = |kind, name: &str| provider.created_at(&ResourceRef::new(kind, name)).unwrap();

    let keyring = at(ResourceKind::KmsKeyring, KEYRING);
    let key = at(ResourceKind::KmsKey, STORAGE_KEY);
    let image_key = at(ResourceKind::KmsKey, IMAGE_KEY);
    let bucket = at(ResourceKind::Bucket, &config.bucket_name);
    let cloudbuild = at(ResourceKind::Bucket, &config.cloudbuild_bucket);

    assert!(keyring < key);
    assert!(keyring < image_key);
    assert!(key < bucket);
    assert!(key < cloudbuild);
}

#[tokio::test]
async fn test_fail_fast() {
    let provider = MemoryProvider::new(PROJECT_NUMBER).fail_on(
        "stig-allow-iap-ssh",
        ProviderError::PermissionDenied("compute.firewalls.create denied".into()),
    );
    let reconciler = Reconciler::new(provider);
    let config = demo_config(reconciler.provider()).await;

    let report = reconciler.run(&config).await;

    assert!(!report.is_success());
    assert_eq!(report.steps.len(), 2);
    assert!(matches!(
        report.failure(),
        Some(ReconcileError::PermissionDenied { kind, name, .. })
            if kind == "firewall-rule" && name == "stig-allow-iap-ssh"
    ));

    let provider = reconciler.provider();
    assert_eq!(provider.calls_for("stig-packer"), 0);
    assert_eq!(provider.calls_for(KEYRING), 0);
    assert_eq!(provider.calls_for(&config.bucket_name), 0);
    assert!(
        !provider
            .calls()
            .iter()
            .any(|c| matches!(c, Call::Grant(_)))
    );
}

#[tokio::test]
async fn test_concurrent_create_counts_as_existing() {
    let provider = MemoryProvider::new(PROJECT_NUMBER).fail_create_on(
        REPOSITORY,
        ProviderError::AlreadyExists("repository stig-images already exists".into()),
    );
    let reconciler = Reconciler::new(provider);
    let config = demo_config(reconciler.provider()).await;

    let report = reconciler.run(&config).await;

    assert!(report.is_success(), "{}", report.render());
    assert_eq!(report.resources_created(), 8);
    assert_eq!(report.resources_existing(), 1);
    assert_eq!(report.bindings_applied(), 12);

    let step = report
        .steps
        .iter()
        .find(|s| matches!(&s.subject, Subject::Resource(r) if r.name == REPOSITORY))
        .unwrap();
    assert!(matches!(step.result, ReconcileResult::AlreadyExists));

    // The existence check said absent, so create was attempted once
    let provider = reconciler.provider();
    assert!(provider.calls().contains(&Call::Create(ResourceRef::new(
        ResourceKind::ArtifactRepository,
        REPOSITORY
    ))));
    assert_eq!(provider.calls_for(REPOSITORY), 2);
}

#[tokio::test]
async fn test_create_only_failure_is_reported() {
    let provider = MemoryProvider::new(PROJECT_NUMBER).fail_create_on(
        NETWORK,
        ProviderError::QuotaExceeded("Quota 'NETWORKS' exceeded".into()),
    );
    let reconciler = Reconciler::new(provider);
    let network = ResourceSpec::new(NETWORK, ResourceParams::Network { auto_subnets: true });

    assert!(matches!(
        reconciler.ensure_resource(&network).await,
        ReconcileResult::Failed(ReconcileError::Provider { .. })
    ));
    assert_eq!(reconciler.provider().resource_count(), 0);
}

#[tokio::test]
async fn test_rerun_after_failure_completes() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let config = demo_config(reconciler.provider()).await;

    // Only the first part of the plan is applied, as if the process was killed
    let plan = Plan::for_config(&config);
    let partial = Plan::new(plan.steps()[..5].to_vec());
    assert!(reconciler.run_plan(&partial).await.is_success());

    let report = reconciler.run(&config).await;
    assert!(report.is_success());
    assert_eq!(report.resources_existing(), 3);
    assert_eq!(report.resources_created(), 6);
}

#[tokio::test]
async fn test_missing_dependency_is_reported() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let key = ResourceSpec::new(
        STORAGE_KEY,
        ResourceParams::KmsKey {
            keyring: KEYRING.into(),
            location: "us-central1".into(),
            purpose: "encryption".into(),
        },
    );

    let result = reconciler.ensure_resource(&key).await;

    match result {
        ReconcileResult::Failed(ReconcileError::DependencyNotFound { kind, name, message }) => {
            assert_eq!(kind, "kms-key");
            assert_eq!(name, STORAGE_KEY);
            assert!(message.contains(KEYRING));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_binding_reapplied() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let binding = BindingSpec::new(
        BindingTarget::Project,
        Member::service_account("123456789@cloudbuild.gserviceaccount.com"),
        "roles/compute.instanceAdmin.v1",
    );

    assert!(matches!(
        reconciler.apply_binding(&binding).await,
        ReconcileResult::Created
    ));
    assert!(matches!(
        reconciler.apply_binding(&binding).await,
        ReconcileResult::Created
    ));
    assert!(reconciler.provider().is_granted(&binding));
    assert_eq!(reconciler.provider().binding_count(), 1);
}

#[tokio::test]
async fn test_binding_on_missing_bucket_fails() {
    let reconciler = Reconciler::new(MemoryProvider::new(PROJECT_NUMBER));
    let binding = BindingSpec::new(
        BindingTarget::Bucket {
            name: "demo-stig-artifacts".into(),
        },
        Member::service_account("123456789-compute@developer.gserviceaccount.com"),
        "roles/storage.objectAdmin",
    );

    assert!(matches!(
        reconciler.apply_binding(&binding).await,
        ReconcileResult::Failed(ReconcileError::DependencyNotFound { .. })
    ));
}

#[tokio::test]
async fn test_reversed_plan_fails_validation() {
    let provider = MemoryProvider::new(PROJECT_NUMBER);
    let config = demo_config(&provider).await;
    let plan = Plan::for_config(&config);

    let mut steps = plan.steps().to_vec();
    steps.reverse();
    assert!(Plan::new(steps).validate(&config.project_id).is_err());

    let reconciler = Reconciler::new(provider);
    let report = reconciler.run(&config).await;
    assert!(report.aborted.is_none());
    assert!(matches!(report.steps[0].subject, Subject::Resource(_)));
}
