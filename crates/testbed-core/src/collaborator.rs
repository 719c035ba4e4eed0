//! External collaborator traits
//!
//! The engine drives existing tools (image builder, cluster tool, control
//! plane, container runtime) only through these traits. Every call carries
//! its own time budget and reports failures as [`TaskError`] with the
//! captured output attached.

use crate::error::TaskError;
use crate::model::{BuildSpec, PortMapping};
use crate::synth::FieldPatch;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One external tool invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Operation {
    pub program: String,
    pub args: Vec<String>,
    /// Written to the child's stdin, which is then closed
    pub stdin: Option<String>,
    pub env: BTreeMap<String, String>,
    pub current_dir: Option<PathBuf>,
    /// Treat an "already exists" failure as success
    pub idempotent_create: bool,
}

impl Operation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn idempotent_create(mut self) -> Self {
        self.idempotent_create = true;
        self
    }

    /// Program and arguments as one line, for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a successful operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationOutput {
    /// Combined stdout and stderr, for diagnostics
    pub output: String,
    /// Standard output alone, for machine-readable results
    pub stdout: String,
    pub exit_code: Option<i32>,
    /// Non-zero exit accepted because the resource already existed
    pub already_existed: bool,
}

/// Process execution collaborator
#[async_trait]
pub trait OperationRunner: Send + Sync {
    async fn run(&self, operation: &Operation, budget: Duration)
    -> Result<OperationOutput, TaskError>;
}

/// Outcome of a removal call. "Not found" is not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Removal {
    Removed,
    AlreadyAbsent,
}

/// Outcome of an idempotent create call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Creation {
    Created,
    /// The resource was there before this run; it must not be removed by it
    AlreadyExisted,
}

/// Build/load collaborator
#[async_trait]
pub trait ImageTool: Send + Sync {
    /// Build `spec` and tag it as `reference`. Returns the resolved reference.
    async fn build(
        &self,
        spec: &BuildSpec,
        reference: &str,
        budget: Duration,
    ) -> Result<String, TaskError>;

    /// Pull `reference` from a registry. Returns the resolved reference.
    async fn pull(&self, reference: &str, budget: Duration) -> Result<String, TaskError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRequest {
    pub name: String,
    /// Rendered cluster config file
    pub config: PathBuf,
    pub kubeconfig: PathBuf,
    /// How long the tool waits for the control plane to become ready
    pub wait: Duration,
}

/// Cluster collaborator
#[async_trait]
pub trait ClusterTool: Send + Sync {
    async fn create(
        &self,
        request: &ClusterRequest,
        budget: Duration,
    ) -> Result<Creation, TaskError>;

    /// Write connection credentials for `name` to `destination`
    async fn export_kubeconfig(
        &self,
        name: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError>;

    async fn load_image(&self, name: &str, image: &str, budget: Duration)
    -> Result<(), TaskError>;

    async fn delete(&self, name: &str, budget: Duration) -> Result<Removal, TaskError>;

    /// Dump node logs into `destination` (diagnostics)
    async fn export_logs(
        &self,
        name: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError>;
}

/// Readiness summary of one control-plane resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub name: String,
    pub ready: bool,
    /// Lifecycle phase as reported (`Running`, `Pending`, ...)
    pub phase: Option<String>,
}

/// Control-plane collaborator. Every call is scoped by a kubeconfig path.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn apply(
        &self,
        kubeconfig: &Path,
        manifest: &str,
        namespace: Option<&str>,
        budget: Duration,
    ) -> Result<(), TaskError>;

    async fn patch(
        &self,
        kubeconfig: &Path,
        patch: &FieldPatch,
        budget: Duration,
    ) -> Result<(), TaskError>;

    async fn list_resources(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: &str,
        budget: Duration,
    ) -> Result<Vec<ResourceStatus>, TaskError>;

    /// Human-readable description of the selected resources (diagnostics)
    async fn describe(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: Option<&str>,
        budget: Duration,
    ) -> Result<String, TaskError>;

    async fn logs(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: &str,
        budget: Duration,
    ) -> Result<String, TaskError>;

    /// Copy `path` out of the first pod matching `selector` into `destination`
    async fn copy_from(
        &self,
        kubeconfig: &Path,
        namespace: &str,
        selector: &str,
        path: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError>;
}

/// Container to start on the host runtime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub network: Option<String>,
    /// Alias on the network, usually the logical service name
    pub alias: Option<String>,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    /// `healthy`, `unhealthy`, `starting`; None without a health check
    pub health: Option<String>,
    pub status: String,
}

impl ContainerState {
    /// Running, and healthy when the image defines a health check
    pub fn is_ready(&self) -> bool {
        self.running && self.health.as_deref().is_none_or(|h| h == "healthy")
    }
}

impl std::fmt::Display for ContainerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.health {
            Some(health) => write!(f, "{} ({})", self.status, health),
            None => write!(f, "{}", self.status),
        }
    }
}

/// Host container runtime collaborator
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_network(&self, name: &str) -> Result<(), TaskError>;

    async fn run_container(&self, spec: &ContainerSpec) -> Result<(), TaskError>;

    async fn container_state(&self, name: &str) -> Result<ContainerState, TaskError>;

    async fn remove_container(&self, name: &str) -> Result<Removal, TaskError>;

    async fn remove_network(&self, name: &str) -> Result<Removal, TaskError>;

    async fn remove_image(&self, reference: &str) -> Result<Removal, TaskError>;

    async fn logs(&self, name: &str, tail: usize) -> Result<String, TaskError>;

    async fn copy_from(
        &self,
        name: &str,
        path: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_display_joins_args() {
        let op = Operation::new("kind")
            .args(["create", "cluster"])
            .arg("--name=ci")
            .idempotent_create();
        assert_eq!(op.display(), "kind create cluster --name=ci");
        assert!(op.idempotent_create);
    }

    #[test]
    fn test_container_readiness_respects_health() {
        let state = |running, health: Option<&str>| ContainerState {
            running,
            health: health.map(str::to_string),
            status: "running".to_string(),
        };
        assert!(state(true, None).is_ready());
        assert!(state(true, Some("healthy")).is_ready());
        assert!(!state(true, Some("starting")).is_ready());
        assert!(!state(false, None).is_ready());
        assert_eq!(state(true, Some("starting")).to_string(), "running (starting)");
    }
}
