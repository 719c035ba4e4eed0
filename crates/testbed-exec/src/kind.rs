//! Local cluster lifecycle through the `kind` CLI

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::{
    ClusterRequest, ClusterTool, Creation, Operation, OperationRunner, Removal, TaskError,
};

const KIND: &str = "kind";

pub struct KindCli {
    runner: Arc<dyn OperationRunner>,
}

impl KindCli {
    pub fn new(runner: Arc<dyn OperationRunner>) -> Self {
        Self { runner }
    }

    async fn exists(&self, name: &str, budget: Duration) -> Result<bool, TaskError> {
        let out = self
            .runner
            .run(&Operation::new(KIND).args(["get", "clusters"]), budget)
            .await?;
        Ok(out.stdout.lines().any(|line| line.trim() == name))
    }
}

#[async_trait]
impl ClusterTool for KindCli {
    async fn create(
        &self,
        request: &ClusterRequest,
        budget: Duration,
    ) -> Result<Creation, TaskError> {
        let op = Operation::new(KIND)
            .args(["create", "cluster", "--name", request.name.as_str(), "--config"])
            .arg(request.config.to_string_lossy())
            .arg("--kubeconfig")
            .arg(request.kubeconfig.to_string_lossy())
            .arg("--wait")
            .arg(format!("{}s", request.wait.as_secs()))
            .idempotent_create();

        tracing::info!(cluster = %request.name, "creating cluster");
        let out = self.runner.run(&op, budget).await?;
        if out.already_existed {
            tracing::warn!(cluster = %request.name, "cluster already exists, reusing it");
            return Ok(Creation::AlreadyExisted);
        }
        Ok(Creation::Created)
    }

    async fn export_kubeconfig(
        &self,
        name: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError> {
        let op = Operation::new(KIND)
            .args(["export", "kubeconfig", "--name", name, "--kubeconfig"])
            .arg(destination.to_string_lossy());
        self.runner.run(&op, budget).await?;
        Ok(())
    }

    async fn load_image(
        &self,
        name: &str,
        image: &str,
        budget: Duration,
    ) -> Result<(), TaskError> {
        tracing::info!(cluster = %name, image = %image, "loading image into cluster");
        let op = Operation::new(KIND).args(["load", "docker-image", image, "--name", name]);
        self.runner.run(&op, budget).await?;
        Ok(())
    }

    async fn delete(&self, name: &str, budget: Duration) -> Result<Removal, TaskError> {
        if !self.exists(name, budget).await? {
            tracing::debug!(cluster = %name, "cluster already gone");
            return Ok(Removal::AlreadyAbsent);
        }
        tracing::info!(cluster = %name, "deleting cluster");
        let op = Operation::new(KIND).args(["delete", "cluster", "--name", name]);
        self.runner.run(&op, budget).await?;
        Ok(Removal::Removed)
    }

    async fn export_logs(
        &self,
        name: &str,
        destination: &Path,
        budget: Duration,
    ) -> Result<(), TaskError> {
        let op = Operation::new(KIND)
            .args(["export", "logs"])
            .arg(destination.to_string_lossy())
            .args(["--name", name]);
        self.runner.run(&op, budget).await?;
        Ok(())
    }
}
