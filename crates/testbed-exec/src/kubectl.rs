//! Control-plane calls through the `kubectl` CLI

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::synth::FieldPatch;
use testbed_core::{
    ControlPlane, DEFAULT_NAMESPACE, Operation, OperationRunner, ResourceStatus, TaskError,
};

const KUBECTL: &str = "kubectl";

/// Lines of pod logs captured for diagnostics
const LOG_TAIL: usize = 200;

pub struct Kubectl {
    runner: Arc<dyn OperationRunner>,
}

#[derive(Debug, Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<Pod>,
}

#[derive(Debug, Deserialize)]
struct Pod {
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Debug, Deserialize)]
struct PodMetadata {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
    phase: Option<String>,
    #[serde(default)]
    conditions: Vec<PodCondition>,
}

#[derive(Debug, Deserialize)]
struct PodCondition {
    #[serde(rename = "type")]
    kind: String,
    status: String,
}

impl Pod {
    fn into_status(self) -> ResourceStatus {
        let ready = self
            .status
            .conditions
            .iter()
            .any(|c| c.kind == "Ready" && c.status == "True");
        ResourceStatus {
            name: self.metadata.name,
            ready,
            phase: self.status.phase,
        }
    }
}

impl Kubectl {
    pub fn new(runner: Arc<dyn OperationRunner>) -> Self {
        Self { runner }
    }

    fn command(kubeconfig: &Path) -> Operation {
        Operation::new(KUBECTL)
            .arg("--kubeconfig")
            .arg(kubeconfig.to_string_lossy())
    }

    fn namespaced(op: Operation, namespace: Option<&str>) -> Operation {
        match namespace {
            Some(ns) => op.args(["-n", ns]),
            None => op,
        }
    }

    async fn ensure_namespace(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        budget: Duration,
    ) -> Result<(), TaskError> {
        let op = Self::command(kubeconfig)
            .args(["create", "namespace", namespace])
            .idempotent_create();
        self.runner.run(&op, budget).await?;
        Ok(())
    }

    /// Fetch a resource as JSON
    async fn get_json(
        &self,
        kubeconfig: &Path,
        patch: &FieldPatch,
        budget: Duration,
    ) -> Result<serde_json::Value, TaskError> {
        let op = Self::namespaced(
            Self::command(kubeconfig).args(["get", patch.kind.as_str(), patch.name.as_str()]),
            patch.namespace.as_deref(),
        )
        .args(["-o", "json"]);
        let out = self.runner.run(&op, budget).await?;
        serde_json::from_str(&out.stdout).map_err(|e| {
            TaskError::external(
                op.display(),
                out.exit_code,
                format!("unparseable resource JSON: {}\n{}", e, out.output),
            )
        })
    }
}

#[async_trait]
impl ControlPlane for Kubectl {
    async fn apply(
        &self,
        kubeconfig: &Path,
        manifest: &str,
        namespace: Option<&str>,
        budget: Duration,
    ) -> Result<(), TaskError> {
        if let Some(ns) = namespace
            && ns != DEFAULT_NAMESPACE
        {
            self.ensure_namespace(kubeconfig, ns, budget).await?;
        }

        let op = Self::namespaced(Self::command(kubeconfig).arg("apply"), namespace)
            .args(["-f", "-"])
            .stdin(manifest);
        self.runner.run(&op, budget).await?;
        Ok(())
    }

    async fn patch(
        &self,
        kubeconfig: &Path,
        patch: &FieldPatch,
        budget: Duration,
    ) -> Result<(), TaskError> {
        let mut current = self.get_json(kubeconfig, patch, budget).await?;
        patch.apply(&mut current)?;

        tracing::info!(resource = %patch.target(), path = %patch.pointer, "patching field");
        let op = Self::namespaced(
            Self::command(kubeconfig).args(["patch", patch.kind.as_str(), patch.name.as_str()]),
            patch.namespace.as_deref(),
        )
        .args(["--type", "json", "-p"])
        .arg(patch.to_json_patch().to_string());
        self.runner.run(&op, budget).await?;
        Ok(())
    }

    async fn list_resources(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: &str,
        budget: Duration,
    ) -> Result<Vec<ResourceStatus>, TaskError> {
        let op = Self::command(kubeconfig)
            .args(["get", "pods", "-n", namespace, "-l", selector])
            .args(["-o", "json"]);
        let out = self.runner.run(&op, budget).await?;
        let list: PodList = serde_json::from_str(&out.stdout).map_err(|e| {
            TaskError::external(
                op.display(),
                out.exit_code,
                format!("unparseable pod list: {}\n{}", e, out.output),
            )
        })?;
        Ok(list.items.into_iter().map(Pod::into_status).collect())
    }

    async fn describe(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: Option<&str>,
        budget: Duration,
    ) -> Result<String, TaskError> {
        let mut op = Self::command(kubeconfig).args(["describe", "pods", "-n", namespace]);
        if let Some(selector) = selector {
            op = op.args(["-l", selector]);
        }
        Ok(self.runner.run(&op, budget).await?.output)
    }

    async fn logs(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: &str,
        budget: Duration,
    ) -> Result<String, TaskError> {
        let op = Self::command(kubeconfig)
            .args(["logs", "-n", namespace, "-l", selector, "--all-containers", "--prefix"])
            .arg(format!("--tail={}", LOG_TAIL));
        Ok(self.runner.run(&op, budget).await?.output)
    }

    async fn copy_from(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: &str,
        path: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError> {
        let pods = self
            .list_resources(kubeconfig, namespace, selector, budget)
            .await?;
        let pod = pods.first().ok_or_else(|| {
            TaskError::external(
                format!("kubectl cp ({})", selector),
                None,
                format!("no pod matches '{}' in namespace '{}'", selector, namespace),
            )
        })?;

        let op = Self::command(kubeconfig)
            .arg("cp")
            .arg(format!("{}/{}:{}", namespace, pod.name, path))
            .arg(destination.to_string_lossy());
        self.runner.run(&op, budget).await?;
        Ok(())
    }
}
