//! Image builds and pulls through the `docker` CLI

use crate::resolver::BuildResolver;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::{BuildSpec, ImageTool, Operation, OperationRunner, TaskError};

const DOCKER: &str = "docker";

pub struct DockerCli {
    runner: Arc<dyn OperationRunner>,
    resolver: BuildResolver,
    /// Build argument switched on for instrumented builds
    coverage_arg: Option<String>,
}

impl DockerCli {
    pub fn new(runner: Arc<dyn OperationRunner>, project_root: impl Into<PathBuf>) -> Self {
        Self {
            runner,
            resolver: BuildResolver::new(project_root),
            coverage_arg: None,
        }
    }

    pub fn with_coverage_arg(mut self, key: impl Into<String>) -> Self {
        self.coverage_arg = Some(key.into());
        self
    }

    /// `docker build` invocation for `spec`, tagged `reference`
    pub fn build_operation(
        &self,
        spec: &BuildSpec,
        reference: &str,
    ) -> Result<Operation, TaskError> {
        let dockerfile = self.resolver.resolve_dockerfile(spec)?;
        let context = self.resolver.resolve_context(spec)?;
        let args = self
            .resolver
            .resolve_build_args(spec, self.coverage_arg.as_deref());

        let mut op = Operation::new(DOCKER)
            .args(["build", "-t", reference, "-f"])
            .arg(dockerfile.to_string_lossy());
        for (key, value) in &args {
            op = op.arg("--build-arg").arg(format!("{}={}", key, value));
        }
        Ok(op.arg(context.to_string_lossy()))
    }
}

#[async_trait]
impl ImageTool for DockerCli {
    async fn build(
        &self,
        spec: &BuildSpec,
        reference: &str,
        budget: Duration,
    ) -> Result<String, TaskError> {
        let op = self.build_operation(spec, reference)?;
        tracing::info!(service = %spec.service, image = %reference, "building image");
        self.runner.run(&op, budget).await?;
        Ok(reference.to_string())
    }

    async fn pull(&self, reference: &str, budget: Duration) -> Result<String, TaskError> {
        tracing::info!(image = %reference, "pulling image");
        let op = Operation::new(DOCKER).args(["pull", reference]);
        self.runner.run(&op, budget).await?;
        Ok(reference.to_string())
    }
}
