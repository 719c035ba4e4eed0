//! Host containers and networks through the Docker API

// Bollard 0.19 still routes these option types through deprecated aliases
#![allow(deprecated)]

use crate::error::ExecError;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, LogOutput, LogsOptions,
    NetworkingConfig,
};
use bollard::models::{EndpointSettings, HostConfig, PortBinding};
use futures_util::stream::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use testbed_core::{
    ContainerRuntime, ContainerSpec, ContainerState, Operation, OperationRunner, Removal,
    TaskError,
};

pub struct DockerRuntime {
    /// Connected on first use, so commands that never touch containers work
    /// without a daemon
    docker: OnceCell<Docker>,
    /// `docker cp` has no single API call; it goes through the CLI
    runner: Arc<dyn OperationRunner>,
}

impl DockerRuntime {
    /// Runtime for the local daemon (`DOCKER_HOST` or the default socket)
    pub fn new(runner: Arc<dyn OperationRunner>) -> Self {
        Self {
            docker: OnceCell::new(),
            runner,
        }
    }

    pub fn with_docker(docker: Docker, runner: Arc<dyn OperationRunner>) -> Self {
        Self {
            docker: OnceCell::from(docker),
            runner,
        }
    }

    async fn docker(&self) -> std::result::Result<&Docker, TaskError> {
        let docker = self
            .docker
            .get_or_try_init(|| async {
                tracing::debug!("connecting to docker");
                Docker::connect_with_local_defaults()
                    .map_err(|e| ExecError::DockerConnectionFailed(e.to_string()))
            })
            .await?;
        Ok(docker)
    }
}

/// Translate a container spec into Docker API parameters
pub fn container_config(spec: &ContainerSpec) -> (Config<String>, CreateContainerOptions<String>) {
    let env: Vec<String> = spec
        .env
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();
    for port in &spec.ports {
        let container_port = format!("{}/tcp", port.container);
        exposed_ports.insert(container_port.clone(), HashMap::new());
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: Some("127.0.0.1".to_string()),
                host_port: Some(port.host.to_string()),
            }]),
        );
    }

    let host_config = Some(HostConfig {
        port_bindings: Some(port_bindings),
        network_mode: spec.network.clone(),
        ..Default::default()
    });

    let networking_config = spec.network.as_ref().map(|network| {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            network.clone(),
            EndpointSettings {
                aliases: spec.alias.clone().map(|alias| vec![alias]),
                ..Default::default()
            },
        );
        NetworkingConfig {
            endpoints_config: endpoints,
        }
    });

    let labels: HashMap<String, String> = spec
        .labels
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let config = Config {
        image: Some(spec.image.clone()),
        env: Some(env),
        exposed_ports: Some(exposed_ports),
        host_config,
        labels: Some(labels),
        networking_config,
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    (config, options)
}

fn api_error(operation: String, err: bollard::errors::Error) -> TaskError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code,
            message,
        } => TaskError::external(operation, Some(i32::from(status_code)), message),
        other => TaskError::external(operation, None, other.to_string()),
    }
}

/// 404 means someone (or an earlier teardown) already removed it
fn removal(
    operation: String,
    result: std::result::Result<(), bollard::errors::Error>,
) -> std::result::Result<Removal, TaskError> {
    match result {
        Ok(()) => Ok(Removal::Removed),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(Removal::AlreadyAbsent),
        Err(e) => Err(api_error(operation, e)),
    }
}

fn state_from_inspect(state: Option<bollard::models::ContainerState>) -> ContainerState {
    let Some(state) = state else {
        return ContainerState {
            running: false,
            health: None,
            status: "unknown".to_string(),
        };
    };
    ContainerState {
        running: state.running.unwrap_or(false),
        health: state
            .health
            .and_then(|h| h.status)
            .map(|s| s.to_string())
            .filter(|s| !s.is_empty() && s != "none"),
        status: state
            .status
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create_network(&self, name: &str) -> std::result::Result<(), TaskError> {
        let network_config = bollard::models::NetworkCreateRequest {
            name: name.to_string(),
            driver: Some("bridge".to_string()),
            ..Default::default()
        };

        match self.docker().await?.create_network(network_config).await {
            Ok(_) => {
                tracing::info!(network = %name, "network created");
                Ok(())
            }
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                tracing::debug!(network = %name, "network already exists");
                Ok(())
            }
            Err(e) => Err(api_error(format!("create network {}", name), e)),
        }
    }

    async fn run_container(&self, spec: &ContainerSpec) -> std::result::Result<(), TaskError> {
        let (config, options) = container_config(spec);
        let created = self
            .docker()
            .await?
            .create_container(Some(options), config)
            .await;
        let id = match created {
            Ok(response) => response.id,
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                tracing::debug!(container = %spec.name, "container already exists");
                spec.name.clone()
            }
            Err(e) => return Err(api_error(format!("create container {}", spec.name), e)),
        };

        self.docker()
            .await?
            .start_container(&id, None::<bollard::query_parameters::StartContainerOptions>)
            .await
            .map_err(|e| api_error(format!("start container {}", spec.name), e))?;
        tracing::info!(container = %spec.name, image = %spec.image, "container started");
        Ok(())
    }

    async fn container_state(&self, name: &str) -> std::result::Result<ContainerState, TaskError> {
        let inspect = self
            .docker()
            .await?
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
            .map_err(|e| api_error(format!("inspect container {}", name), e))?;
        Ok(state_from_inspect(inspect.state))
    }

    async fn remove_container(&self, name: &str) -> std::result::Result<Removal, TaskError> {
        let options = bollard::query_parameters::RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        removal(
            format!("remove container {}", name),
            self.docker().await?.remove_container(name, Some(options)).await,
        )
    }

    async fn remove_network(&self, name: &str) -> std::result::Result<Removal, TaskError> {
        removal(
            format!("remove network {}", name),
            self.docker().await?.remove_network(name).await,
        )
    }

    async fn remove_image(&self, reference: &str) -> std::result::Result<Removal, TaskError> {
        let options = bollard::query_parameters::RemoveImageOptions {
            force: true,
            ..Default::default()
        };
        let result = self
            .docker()
            .await?
            .remove_image(reference, Some(options), None)
            .await
            .map(|_| ());
        removal(format!("remove image {}", reference), result)
    }

    async fn logs(&self, name: &str, tail: usize) -> std::result::Result<String, TaskError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker().await?.logs(name, Some(options));
        let mut collected = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(LogOutput::StdOut { message })
                | Ok(LogOutput::StdErr { message })
                | Ok(LogOutput::Console { message }) => {
                    collected.push_str(&String::from_utf8_lossy(&message));
                }
                Ok(LogOutput::StdIn { .. }) => {}
                Err(e) => return Err(api_error(format!("logs {}", name), e)),
            }
        }
        Ok(collected)
    }

    async fn copy_from(
        &self,
        name: &str,
        path: &str,
        destination: &Path,
        budget: Duration,
    ) -> std::result::Result<(), TaskError> {
        let op = Operation::new("docker")
            .arg("cp")
            .arg(format!("{}:{}", name, path))
            .arg(destination.to_string_lossy());
        self.runner.run(&op, budget).await?;
        Ok(())
    }
}
