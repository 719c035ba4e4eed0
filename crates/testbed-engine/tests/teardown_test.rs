mod common;

use common::{Fakes, FakeImages, FakeRuntime, context};
use std::collections::BTreeMap;
use testbed_core::{
    ProvisioningResult, ResourceHandle, ResourceKind, ServiceLocation,
};
use testbed_engine::{LifecycleManager, StepOutcome, TeardownError};

fn handle(kind: ResourceKind, name: &str) -> ResourceHandle {
    ResourceHandle::new(kind, name, "checkout")
}

fn result_with_every_kind() -> ProvisioningResult {
    ProvisioningResult::partial(
        "t3st",
        vec![
            handle(ResourceKind::Image, "acme/checkout-api:api-t3st-0ab"),
            handle(ResourceKind::Cluster, "ci-t3st-1cd"),
            handle(ResourceKind::Network, "checkout-t3st-2ef"),
            handle(ResourceKind::Container, "checkout-cache-t3st-3gh"),
            handle(ResourceKind::Container, "checkout-worker-t3st-4ij"),
        ],
    )
}

#[tokio::test]
async fn test_already_removed_resources_are_not_errors() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let ctx = context(dir.path());
    let manager = LifecycleManager::new(&fakes.collaborators(), &ctx);

    let mut result = result_with_every_kind();
    result.kubeconfig = Some(dir.path().join("gone.kubeconfig"));

    let report = manager.teardown(result, false).await;

    assert_eq!(report.steps.len(), 5);
    assert!(
        report
            .steps
            .iter()
            .all(|s| s.outcome == StepOutcome::AlreadyAbsent)
    );
    assert_eq!(
        report.kubeconfig.as_ref().map(|(_, o)| o),
        Some(&StepOutcome::AlreadyAbsent)
    );
    assert!(report.is_clean());
    assert!(report.into_result().is_ok());
}

#[tokio::test]
async fn test_removal_order_and_scope() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let manager = LifecycleManager::new(&fakes.collaborators(), &context(dir.path()));

    let result = result_with_every_kind();
    for container in result.handles_of(ResourceKind::Container) {
        fakes
            .runtime
            .containers
            .lock()
            .unwrap()
            .insert(container.name.clone(), Default::default());
    }
    // Present on the host but never created by this run
    fakes
        .runtime
        .images
        .lock()
        .unwrap()
        .insert("redis:7".to_string());

    let report = manager.teardown(result, false).await;
    assert!(report.is_clean());

    assert_eq!(
        fakes.journal.entries(),
        vec![
            "remove container checkout-worker-t3st-4ij",
            "remove container checkout-cache-t3st-3gh",
            "delete cluster ci-t3st-1cd",
            "remove network checkout-t3st-2ef",
            "remove image acme/checkout-api:api-t3st-0ab",
        ]
    );
    assert_eq!(report.steps[0].outcome, StepOutcome::Removed);
    assert!(fakes.runtime.images.lock().unwrap().contains("redis:7"));
}

#[tokio::test]
async fn test_failure_does_not_stop_remaining_steps() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::with(
        FakeImages::default(),
        FakeRuntime {
            stuck: ["checkout-worker-t3st-4ij".to_string()].into(),
            ..Default::default()
        },
    );
    let manager = LifecycleManager::new(&fakes.collaborators(), &context(dir.path()));

    let kubeconfig = dir.path().join("ci.kubeconfig");
    std::fs::write(&kubeconfig, "apiVersion: v1\n").unwrap();
    let mut result = result_with_every_kind();
    result.kubeconfig = Some(kubeconfig.clone());

    let report = manager.teardown(result, false).await;

    assert_eq!(report.steps.len(), 5);
    assert_eq!(report.failures().count(), 1);
    assert!(!kubeconfig.exists());
    match report.into_result() {
        Err(TeardownError::Removal { kind, name, reason }) => {
            assert_eq!(kind, ResourceKind::Container);
            assert_eq!(name, "checkout-worker-t3st-4ij");
            assert!(reason.contains("409"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn test_diagnostics_are_captured_before_removal() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let ctx = context(dir.path());
    let manager = LifecycleManager::new(&fakes.collaborators(), &ctx);

    let kubeconfig = dir.path().join("ci.kubeconfig");
    std::fs::write(&kubeconfig, "apiVersion: v1\n").unwrap();
    let mut result = result_with_every_kind();
    result.kubeconfig = Some(kubeconfig);
    result.locations = BTreeMap::from([(
        "api".to_string(),
        ServiceLocation::Pods {
            namespace: "checkout".to_string(),
            selector: Some("app=api".to_string()),
            coverage_path: None,
        },
    )]);

    let report = manager.teardown(result, true).await;

    let diagnostics = report.diagnostics.clone().unwrap();
    assert_eq!(diagnostics, ctx.work_dir.join("diagnostics").join("t3st"));
    assert!(diagnostics.join("checkout-cache-t3st-3gh.log").exists());
    assert!(diagnostics.join("api.describe.txt").exists());
    assert_eq!(
        std::fs::read_to_string(diagnostics.join("api.log")).unwrap(),
        "[app=api] listening\n"
    );
    assert!(diagnostics.join("cluster-ci-t3st-1cd").is_dir());

    let journal = fakes.journal.entries();
    let exported = journal.iter().position(|e| e == "export logs ci-t3st-1cd").unwrap();
    let deleted = journal.iter().position(|e| e == "delete cluster ci-t3st-1cd").unwrap();
    assert!(exported < deleted);
}

#[tokio::test]
async fn test_coverage_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let fakes = Fakes::new();
    let result = ProvisioningResult {
        run_id: "t3st".to_string(),
        kubeconfig: Some(dir.path().join("ci.kubeconfig")),
        locations: BTreeMap::from([
            (
                "api".to_string(),
                ServiceLocation::Pods {
                    namespace: "checkout".to_string(),
                    selector: Some("app=api".to_string()),
                    coverage_path: Some("/coverage".to_string()),
                },
            ),
            (
                "worker".to_string(),
                ServiceLocation::Container {
                    name: "checkout-worker-t3st-4ij".to_string(),
                    coverage_path: Some("/tmp/cover".to_string()),
                },
            ),
            (
                "cache".to_string(),
                ServiceLocation::Container {
                    name: "checkout-cache-t3st-3gh".to_string(),
                    coverage_path: None,
                },
            ),
        ]),
        ..Default::default()
    };

    let disabled = LifecycleManager::new(&fakes.collaborators(), &context(dir.path()));
    assert!(disabled.extract_coverage(&result).await.unwrap().is_empty());
    assert!(fakes.journal.entries().is_empty());

    let ctx = context(dir.path()).with_coverage(true);
    let manager = LifecycleManager::new(&fakes.collaborators(), &ctx);
    let extracted = manager.extract_coverage(&result).await.unwrap();

    assert_eq!(
        extracted,
        vec![
            ctx.work_dir.join("coverage").join("api"),
            ctx.work_dir.join("coverage").join("worker"),
        ]
    );
    assert!(extracted.iter().all(|d| d.join("covmeta.1").exists()));
    assert_eq!(
        fakes.journal.entries(),
        vec!["copy app=api:/coverage", "copy checkout-worker-t3st-4ij:/tmp/cover"]
    );
}
