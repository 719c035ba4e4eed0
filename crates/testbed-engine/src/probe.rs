//! Readiness prober
//!
//! Polls a predicate every `interval` until it holds or `deadline` passes.
//! The first poll happens immediately, so a predicate that becomes true on
//! poll T returns after `(T - 1) * interval`. A probe that never succeeds
//! fails at the deadline, never before it, and reports the last state it saw.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testbed_core::{
    CheckKind, ContainerRuntime, ControlPlane, HealthCheckSpec, ResourceStatus, TaskError,
};
use tokio::time::Instant;

/// Lower bound on the poll interval
const MIN_INTERVAL: Duration = Duration::from_millis(10);

/// One evaluation of a readiness predicate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub ready: bool,
    /// Human-readable state, kept for the deadline error
    pub state: String,
}

impl Observation {
    pub fn ready(state: impl Into<String>) -> Self {
        Self {
            ready: true,
            state: state.into(),
        }
    }

    pub fn not_ready(state: impl Into<String>) -> Self {
        Self {
            ready: false,
            state: state.into(),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    /// What is being waited on, for logs and errors
    fn target(&self) -> String;

    async fn observe(&self) -> Observation;
}

/// Poll `probe` until it reports ready. Returns the number of polls made.
pub async fn wait_until_ready(
    probe: &dyn Probe,
    interval: Duration,
    deadline: Duration,
) -> Result<u32, TaskError> {
    let interval = interval.max(MIN_INTERVAL);
    let start = Instant::now();
    let end = start + deadline;
    let target = probe.target();
    let mut polls: u32 = 0;

    tracing::debug!(
        probe = %target,
        interval_ms = interval.as_millis() as u64,
        deadline_ms = deadline.as_millis() as u64,
        "waiting for readiness"
    );

    loop {
        polls += 1;
        let observation = match tokio::time::timeout_at(end, probe.observe()).await {
            Ok(observation) => observation,
            Err(_) => Observation::not_ready("no answer before the deadline"),
        };

        if observation.ready {
            tracing::info!(
                probe = %target,
                polls,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "ready"
            );
            return Ok(polls);
        }

        let now = Instant::now();
        if now >= end {
            tracing::warn!(probe = %target, polls, last = %observation.state, "deadline exceeded");
            return Err(TaskError::DeadlineExceeded {
                target,
                deadline,
                last_observed: observation.state,
            });
        }

        tracing::trace!(probe = %target, polls, state = %observation.state, "not ready yet");
        let next = start + interval.saturating_mul(polls);
        tokio::time::sleep_until(next.min(end)).await;
    }
}

/// HTTP GET expecting status 200
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// `request_timeout` bounds each single request
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn target(&self) -> String {
        format!("GET {}", self.url)
    }

    async fn observe(&self) -> Observation {
        match self.client.get(&self.url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => {
                Observation::ready("HTTP 200")
            }
            Ok(response) => Observation::not_ready(format!("HTTP {}", response.status().as_u16())),
            Err(e) => Observation::not_ready(format!("request failed: {}", e)),
        }
    }
}

/// At least `replicas` pods under a selector report Ready
pub struct ReplicasProbe {
    control: Arc<dyn ControlPlane>,
    kubeconfig: PathBuf,
    namespace: String,
    selector: String,
    replicas: u32,
    call_budget: Duration,
}

impl ReplicasProbe {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        kubeconfig: impl Into<PathBuf>,
        namespace: impl Into<String>,
        selector: impl Into<String>,
        replicas: u32,
        call_budget: Duration,
    ) -> Self {
        Self {
            control,
            kubeconfig: kubeconfig.into(),
            namespace: namespace.into(),
            selector: selector.into(),
            replicas,
            call_budget,
        }
    }
}

fn summarize(resources: &[ResourceStatus], expected: u32) -> (bool, String) {
    let ready = resources.iter().filter(|r| r.ready).count();
    let detail: Vec<String> = resources
        .iter()
        .map(|r| {
            format!(
                "{}={}",
                r.name,
                r.phase.as_deref().unwrap_or(if r.ready { "Ready" } else { "NotReady" })
            )
        })
        .collect();
    let state = if detail.is_empty() {
        format!("0/{} ready (no matching pods)", expected)
    } else {
        format!("{}/{} ready ({})", ready, expected, detail.join(", "))
    };
    (ready >= expected as usize, state)
}

#[async_trait]
impl Probe for ReplicasProbe {
    fn target(&self) -> String {
        format!(
            "{} replica(s) of '{}' in {}",
            self.replicas, self.selector, self.namespace
        )
    }

    async fn observe(&self) -> Observation {
        match self
            .control
            .list_resources(&self.kubeconfig, &self.namespace, &self.selector, self.call_budget)
            .await
        {
            Ok(resources) => {
                let (ready, state) = summarize(&resources, self.replicas);
                Observation { ready, state }
            }
            Err(e) => Observation::not_ready(format!("listing pods failed: {}", e)),
        }
    }
}

/// Container running (and healthy, when it has a health check)
pub struct ContainerProbe {
    runtime: Arc<dyn ContainerRuntime>,
    name: String,
}

impl ContainerProbe {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, name: impl Into<String>) -> Self {
        Self {
            runtime,
            name: name.into(),
        }
    }
}

#[async_trait]
impl Probe for ContainerProbe {
    fn target(&self) -> String {
        format!("container {}", self.name)
    }

    async fn observe(&self) -> Observation {
        match self.runtime.container_state(&self.name).await {
            Ok(state) => Observation {
                ready: state.is_ready(),
                state: state.to_string(),
            },
            Err(e) => Observation::not_ready(format!("inspect failed: {}", e)),
        }
    }
}

/// Builds the right probe for a [`HealthCheckSpec`] and waits on it
#[derive(Clone)]
pub struct ReadinessProber {
    control: Arc<dyn ControlPlane>,
    runtime: Arc<dyn ContainerRuntime>,
    call_budget: Duration,
}

impl ReadinessProber {
    pub fn new(
        control: Arc<dyn ControlPlane>,
        runtime: Arc<dyn ContainerRuntime>,
        call_budget: Duration,
    ) -> Self {
        Self {
            control,
            runtime,
            call_budget,
        }
    }

    /// `kubeconfig` is required for replica checks only
    pub fn probe_for(
        &self,
        spec: &HealthCheckSpec,
        kubeconfig: Option<PathBuf>,
    ) -> Result<Box<dyn Probe>, TaskError> {
        let probe: Box<dyn Probe> = match &spec.check {
            CheckKind::Http { url } => Box::new(HttpProbe::new(url, self.call_budget)),
            CheckKind::Replicas {
                namespace,
                selector,
                replicas,
            } => {
                let kubeconfig =
                    kubeconfig.ok_or_else(|| TaskError::MissingInput("cluster".to_string()))?;
                Box::new(ReplicasProbe::new(
                    Arc::clone(&self.control),
                    kubeconfig,
                    namespace,
                    selector,
                    *replicas,
                    self.call_budget,
                ))
            }
            CheckKind::Container { name } => {
                Box::new(ContainerProbe::new(Arc::clone(&self.runtime), name))
            }
        };
        Ok(probe)
    }

    pub async fn wait_until_ready(
        &self,
        spec: &HealthCheckSpec,
        kubeconfig: Option<PathBuf>,
    ) -> Result<(), TaskError> {
        let probe = self.probe_for(spec, kubeconfig)?;
        wait_until_ready(probe.as_ref(), spec.interval, spec.deadline).await?;
        Ok(())
    }
}
