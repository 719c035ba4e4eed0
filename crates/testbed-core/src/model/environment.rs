//! Environment definition
//!
//! The declarative description of one test environment, as read from
//! `testbed.kdl`. The plan builder turns it into phases and tasks.

use super::build::{BuildSpec, RegistryCoordinates};
use super::context::Budgets;
use super::health::{DEFAULT_DEADLINE, DEFAULT_POLL_INTERVAL};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::Duration;

/// Namespace used when a manifest service does not name one
pub const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct EnvironmentDef {
    pub project: String,
    pub registry: Option<RegistryCoordinates>,
    pub budgets: Budgets,
    pub cluster: Option<ClusterDef>,
    pub images: Vec<BuildSpec>,
    pub services: Vec<ServiceDef>,
    pub patches: Vec<PatchDef>,
}

impl EnvironmentDef {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            ..Default::default()
        }
    }

    pub fn image(&self, service: &str) -> Option<&BuildSpec> {
        self.images.iter().find(|i| i.service == service)
    }

    pub fn service(&self, name: &str) -> Option<&ServiceDef> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Every tier that has a service or a patch, ascending
    pub fn tiers(&self) -> BTreeSet<u32> {
        self.services
            .iter()
            .map(|s| s.tier)
            .chain(self.patches.iter().map(|p| p.tier))
            .collect()
    }

    pub fn services_in_tier(&self, tier: u32) -> impl Iterator<Item = &ServiceDef> {
        self.services.iter().filter(move |s| s.tier == tier)
    }

    pub fn patches_in_tier(&self, tier: u32) -> impl Iterator<Item = &PatchDef> {
        self.patches.iter().filter(move |p| p.tier == tier)
    }

    /// Container services share one network created for the run
    pub fn needs_network(&self) -> bool {
        self.services
            .iter()
            .any(|s| s.kind == ServiceKind::Container)
    }
}

/// Ephemeral cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterDef {
    /// Logical name, used as the owner of the generated cluster name
    pub name: String,
    /// Base cluster config document; a minimal single-node config when absent
    pub config: Option<PathBuf>,
    /// How long the cluster tool waits for the control plane
    pub wait: Duration,
    pub mounts: Vec<MountDef>,
}

impl ClusterDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: None,
            wait: Duration::from_secs(60),
            mounts: Vec::new(),
        }
    }
}

/// Host directory exposed to the cluster nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountDef {
    pub host_path: PathBuf,
    pub container_path: String,
    #[serde(default)]
    pub read_only: bool,
}

impl MountDef {
    pub fn new(host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        Self {
            host_path: host_path.into(),
            container_path: container_path.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    /// Rendered from a template and applied to the cluster
    Manifest,
    /// Run directly on the host container runtime
    Container,
}

impl ServiceKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manifest" => Some(ServiceKind::Manifest),
            "container" => Some(ServiceKind::Container),
            _ => None,
        }
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceKind::Manifest => write!(f, "manifest"),
            ServiceKind::Container => write!(f, "container"),
        }
    }
}

/// Host to container port binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDef {
    pub name: String,
    pub kind: ServiceKind,
    /// Deploy order; lower tiers are deployed and ready before higher ones
    pub tier: u32,
    /// Manifest template (manifest services)
    pub manifest: Option<PathBuf>,
    pub namespace: Option<String>,
    /// Extra template values (manifest services)
    pub values: BTreeMap<String, String>,
    /// Image reference, or the name of an `image` entry (container services)
    pub image: Option<String>,
    pub ports: Vec<PortMapping>,
    pub env: BTreeMap<String, String>,
    pub endpoint: Option<String>,
    pub ready: Vec<ReadyDef>,
    /// Where the instrumented binary writes coverage data
    pub coverage_path: Option<String>,
}

impl ServiceDef {
    pub fn new(name: impl Into<String>, kind: ServiceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            tier: 0,
            manifest: None,
            namespace: None,
            values: BTreeMap::new(),
            image: None,
            ports: Vec::new(),
            env: BTreeMap::new(),
            endpoint: None,
            ready: Vec::new(),
            coverage_path: None,
        }
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    /// Explicit endpoint, or `http://localhost:<first host port>` for containers
    pub fn endpoint_url(&self) -> Option<String> {
        if let Some(endpoint) = &self.endpoint {
            return Some(endpoint.clone());
        }
        match self.kind {
            ServiceKind::Container => self
                .ports
                .first()
                .map(|p| format!("http://localhost:{}", p.host)),
            ServiceKind::Manifest => None,
        }
    }

    /// Label selector of the first replica check, used to find the pods
    pub fn selector(&self) -> Option<&str> {
        self.ready.iter().find_map(|r| match &r.target {
            ReadyTarget::Selector { selector, .. } => Some(selector.as_str()),
            _ => None,
        })
    }
}

/// Readiness declaration as written; resolved to a `HealthCheckSpec` once
/// generated names are known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyDef {
    pub target: ReadyTarget,
    pub interval: Duration,
    pub deadline: Duration,
}

impl ReadyDef {
    pub fn new(target: ReadyTarget) -> Self {
        Self {
            target,
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadyTarget {
    Http { url: String },
    Selector { selector: String, replicas: u32 },
    /// The service's own container
    Container,
}

/// Targeted single-field patch of an already applied resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchDef {
    pub name: String,
    pub tier: u32,
    /// Resource kind as understood by the control plane (`validatingwebhookconfiguration`)
    pub kind: String,
    pub resource: String,
    pub namespace: Option<String>,
    /// JSON pointer to the field to replace
    pub path: String,
    pub value: PatchValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchValue {
    Literal(String),
    File {
        path: PathBuf,
        encoding: ValueEncoding,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValueEncoding {
    #[default]
    Raw,
    Base64,
}

impl ValueEncoding {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "raw" => Some(ValueEncoding::Raw),
            "base64" => Some(ValueEncoding::Base64),
            _ => None,
        }
    }
}
