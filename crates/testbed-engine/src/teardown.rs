//! Lifecycle/teardown manager
//!
//! Removes exactly the resources recorded in a [`ProvisioningResult`], in
//! dependency-safe order: containers, then the cluster, then networks, then
//! generated images. Within one kind the most recently created goes first.
//! Every step runs even when an earlier one failed.

use crate::error::{EngineError, TeardownError};
use crate::planner::Collaborators;
use crate::task::within;
use std::cmp::Reverse;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testbed_core::{
    Budgets, ClusterTool, ContainerRuntime, ControlPlane, ProvisioningContext,
    ProvisioningResult, Removal, ResourceHandle, ResourceKind, ServiceLocation, TaskError,
};

/// Lines of container logs kept in diagnostics
const LOG_TAIL: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Removed,
    /// Already gone before this teardown reached it
    AlreadyAbsent,
    Failed(String),
}

impl StepOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, StepOutcome::Failed(_))
    }
}

impl From<Result<Removal, TaskError>> for StepOutcome {
    fn from(result: Result<Removal, TaskError>) -> Self {
        match result {
            Ok(Removal::Removed) => StepOutcome::Removed,
            Ok(Removal::AlreadyAbsent) => StepOutcome::AlreadyAbsent,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }
}

impl std::fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepOutcome::Removed => write!(f, "removed"),
            StepOutcome::AlreadyAbsent => write!(f, "already absent"),
            StepOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeardownStep {
    pub handle: ResourceHandle,
    pub outcome: StepOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    /// One entry per handle, in the order they were removed
    pub steps: Vec<TeardownStep>,
    /// Removal of the credential file, when the run had one
    pub kubeconfig: Option<(PathBuf, StepOutcome)>,
    /// Directory with captured logs, when diagnostics were requested
    pub diagnostics: Option<PathBuf>,
}

impl TeardownReport {
    pub fn failures(&self) -> impl Iterator<Item = &TeardownStep> {
        self.steps.iter().filter(|s| s.outcome.is_failure())
    }

    pub fn is_clean(&self) -> bool {
        self.first_error().is_none()
    }

    /// The first hard failure, in removal order
    pub fn first_error(&self) -> Option<TeardownError> {
        if let Some(step) = self.failures().next()
            && let StepOutcome::Failed(reason) = &step.outcome
        {
            return Some(TeardownError::Removal {
                kind: step.handle.kind,
                name: step.handle.name.clone(),
                reason: reason.clone(),
            });
        }
        match &self.kubeconfig {
            Some((path, StepOutcome::Failed(reason))) => Some(TeardownError::Kubeconfig {
                path: path.clone(),
                reason: reason.clone(),
            }),
            _ => None,
        }
    }

    pub fn into_result(self) -> Result<Self, TeardownError> {
        match self.first_error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Removal order: by kind rank, newest first within a kind
pub fn teardown_order(handles: &[ResourceHandle]) -> Vec<ResourceHandle> {
    let mut ordered: Vec<(usize, &ResourceHandle)> = handles.iter().enumerate().collect();
    ordered.sort_by_key(|(index, handle)| (handle.kind.teardown_rank(), Reverse(*index)));
    ordered.into_iter().map(|(_, h)| h.clone()).collect()
}

pub struct LifecycleManager {
    cluster: Arc<dyn ClusterTool>,
    control: Arc<dyn ControlPlane>,
    runtime: Arc<dyn ContainerRuntime>,
    budgets: Budgets,
    work_dir: PathBuf,
    coverage: bool,
}

impl LifecycleManager {
    pub fn new(tools: &Collaborators, ctx: &ProvisioningContext) -> Self {
        Self {
            cluster: Arc::clone(&tools.cluster),
            control: Arc::clone(&tools.control),
            runtime: Arc::clone(&tools.runtime),
            budgets: ctx.budgets.clone(),
            work_dir: ctx.work_dir.clone(),
            coverage: ctx.coverage,
        }
    }

    /// Best-effort teardown. Never stops early; inspect the report (or call
    /// [`TeardownReport::into_result`]) for hard failures.
    pub async fn teardown(
        &self,
        result: ProvisioningResult,
        capture_diagnostics: bool,
    ) -> TeardownReport {
        let mut report = TeardownReport::default();

        if capture_diagnostics {
            match self.capture_diagnostics(&result).await {
                Ok(dir) => report.diagnostics = Some(dir),
                Err(e) => tracing::warn!(error = %e, "diagnostic capture failed"),
            }
        }

        tracing::info!(run_id = %result.run_id, handles = result.handles.len(), "tearing down");
        for handle in teardown_order(&result.handles) {
            let outcome = StepOutcome::from(self.remove(&handle).await);
            match &outcome {
                StepOutcome::Failed(reason) => {
                    tracing::error!(
                        kind = %handle.kind,
                        name = %handle.name,
                        reason = %reason,
                        "removal failed"
                    );
                }
                outcome => {
                    tracing::info!(
                        kind = %handle.kind,
                        name = %handle.name,
                        outcome = %outcome,
                        "removal done"
                    );
                }
            }
            report.steps.push(TeardownStep { handle, outcome });
        }

        if let Some(path) = result.kubeconfig {
            let outcome = match tokio::fs::remove_file(&path).await {
                Ok(()) => StepOutcome::Removed,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => StepOutcome::AlreadyAbsent,
                Err(e) => StepOutcome::Failed(e.to_string()),
            };
            report.kubeconfig = Some((path, outcome));
        }

        report
    }

    async fn remove(&self, handle: &ResourceHandle) -> Result<Removal, TaskError> {
        let budget = self.budgets.teardown;
        let label = format!("remove {} {}", handle.kind, handle.name);
        match handle.kind {
            ResourceKind::Container => {
                within(budget, &label, self.runtime.remove_container(&handle.name)).await
            }
            ResourceKind::Cluster => self.cluster.delete(&handle.name, budget).await,
            ResourceKind::Network => {
                within(budget, &label, self.runtime.remove_network(&handle.name)).await
            }
            ResourceKind::Image => {
                within(budget, &label, self.runtime.remove_image(&handle.name)).await
            }
        }
    }

    /// Collect logs and resource descriptions into
    /// `<work dir>/diagnostics/<run id>/`. Individual failures are logged
    /// and skipped.
    pub async fn capture_diagnostics(
        &self,
        result: &ProvisioningResult,
    ) -> crate::Result<PathBuf> {
        let dir = self.work_dir.join("diagnostics").join(&result.run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| EngineError::io(&dir, e))?;

        for handle in result.handles_of(ResourceKind::Container) {
            match self.runtime.logs(&handle.name, LOG_TAIL).await {
                Ok(logs) => write_artifact(&dir.join(format!("{}.log", handle.name)), &logs).await,
                Err(e) => tracing::warn!(container = %handle.name, error = %e, "cannot read logs"),
            }
        }

        if let Some(kubeconfig) = &result.kubeconfig {
            for (service, location) in &result.locations {
                if let ServiceLocation::Pods {
                    namespace,
                    selector,
                    ..
                } = location
                {
                    self.capture_pods(&dir, kubeconfig, service, namespace, selector.as_deref())
                        .await;
                }
            }
        }

        for handle in result.handles_of(ResourceKind::Cluster) {
            let destination = dir.join(format!("cluster-{}", handle.name));
            if let Err(e) = self
                .cluster
                .export_logs(&handle.name, &destination, self.budgets.exec)
                .await
            {
                tracing::warn!(cluster = %handle.name, error = %e, "cannot export cluster logs");
            }
        }

        tracing::info!(dir = %dir.display(), "diagnostics captured");
        Ok(dir)
    }

    async fn capture_pods(
        &self,
        dir: &Path,
        kubeconfig: &Path,
        service: &str,
        namespace: &str,
        selector: Option<&str>,
    ) {
        let budget = self.budgets.exec;
        match self
            .control
            .describe(kubeconfig, namespace, selector, budget)
            .await
        {
            Ok(text) => write_artifact(&dir.join(format!("{}.describe.txt", service)), &text).await,
            Err(e) => tracing::warn!(service, error = %e, "cannot describe pods"),
        }

        let Some(selector) = selector else {
            return;
        };
        match self
            .control
            .logs(kubeconfig, namespace, selector, budget)
            .await
        {
            Ok(text) => write_artifact(&dir.join(format!("{}.log", service)), &text).await,
            Err(e) => tracing::warn!(service, error = %e, "cannot read pod logs"),
        }
    }

    /// Copy each service's coverage directory into
    /// `<work dir>/coverage/<service>/`. No-op unless coverage is enabled.
    /// Returns the directories that received data.
    pub async fn extract_coverage(
        &self,
        result: &ProvisioningResult,
    ) -> crate::Result<Vec<PathBuf>> {
        if !self.coverage {
            return Ok(Vec::new());
        }

        let mut extracted = Vec::new();
        for (service, location) in &result.locations {
            let Some(path) = location.coverage_path() else {
                continue;
            };
            let destination = self.work_dir.join("coverage").join(service);
            tokio::fs::create_dir_all(&destination)
                .await
                .map_err(|e| EngineError::io(&destination, e))?;

            let copied = match location {
                ServiceLocation::Container { name, .. } => {
                    self.runtime
                        .copy_from(name, path, &destination, self.budgets.exec)
                        .await
                }
                ServiceLocation::Pods {
                    namespace,
                    selector: Some(selector),
                    ..
                } => match &result.kubeconfig {
                    Some(kubeconfig) => {
                        self.control
                            .copy_from(
                                kubeconfig,
                                namespace,
                                selector,
                                path,
                                &destination,
                                self.budgets.exec,
                            )
                            .await
                    }
                    None => Err(TaskError::MissingInput("cluster".to_string())),
                },
                ServiceLocation::Pods { selector: None, .. } => {
                    tracing::warn!(
                        service = %service,
                        "no selector, cannot locate pod for coverage"
                    );
                    continue;
                }
            };

            match copied {
                Ok(()) => {
                    tracing::info!(
                        service = %service,
                        dir = %destination.display(),
                        "coverage extracted"
                    );
                    extracted.push(destination);
                }
                Err(e) => {
                    tracing::warn!(service = %service, error = %e, "coverage extraction failed")
                }
            }
        }
        Ok(extracted)
    }
}

async fn write_artifact(path: &Path, contents: &str) {
    if let Err(e) = tokio::fs::write(path, contents).await {
        tracing::warn!(path = %path.display(), error = %e, "cannot write diagnostic artifact");
    }
}
