//! Created resources and the provisioning result

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Kind of an externally created resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Cluster,
    Container,
    Image,
    Network,
}

impl ResourceKind {
    /// Maximum identifier length accepted by every downstream tool for this kind.
    ///
    /// Cluster names are short because kind derives node container names and
    /// kubeconfig contexts from them.
    pub fn max_name_len(self) -> usize {
        match self {
            ResourceKind::Cluster => 32,
            ResourceKind::Container | ResourceKind::Network => 63,
            ResourceKind::Image => 128,
        }
    }

    /// Position in teardown order: dependents first, images last.
    pub fn teardown_rank(self) -> u8 {
        match self {
            ResourceKind::Container => 0,
            ResourceKind::Cluster => 1,
            ResourceKind::Network => 2,
            ResourceKind::Image => 3,
        }
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Cluster => write!(f, "cluster"),
            ResourceKind::Container => write!(f, "container"),
            ResourceKind::Image => write!(f, "image"),
            ResourceKind::Network => write!(f, "network"),
        }
    }
}

/// Record of a resource this run created. Needed, and consumed, by teardown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub kind: ResourceKind,
    /// Generated unique name (full reference for images)
    pub name: String,
    /// Logical owner the name was generated for
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

impl ResourceHandle {
    pub fn new(kind: ResourceKind, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            owner: owner.into(),
            created_at: Utc::now(),
        }
    }
}

impl std::fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind, self.name)
    }
}

/// Externally reachable address of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub url: String,
    pub port: Option<u16>,
}

impl Endpoint {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let port = parse_port(&url);
        Self { url, port }
    }
}

fn parse_port(url: &str) -> Option<u16> {
    let after_scheme = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = after_scheme.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse().ok()
}

/// Success value of a plan execution.
///
/// Created once at the end of a successful run and immutable afterwards;
/// teardown takes it by value so its handles cannot be reused.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub run_id: String,
    /// Logical service name to reachable address
    pub endpoints: BTreeMap<String, Endpoint>,
    /// Every resource created during the run, in creation order
    pub handles: Vec<ResourceHandle>,
    /// Credential file written for cluster access, removed at teardown
    pub kubeconfig: Option<PathBuf>,
    /// Where each service runs, for coverage extraction and diagnostics
    #[serde(default)]
    pub locations: BTreeMap<String, ServiceLocation>,
}

impl ProvisioningResult {
    /// A result describing only what a failed run managed to create.
    pub fn partial(run_id: impl Into<String>, handles: Vec<ResourceHandle>) -> Self {
        Self {
            run_id: run_id.into(),
            handles,
            ..Default::default()
        }
    }

    pub fn endpoint(&self, service: &str) -> Option<&Endpoint> {
        self.endpoints.get(service)
    }

    pub fn handles_of(&self, kind: ResourceKind) -> impl Iterator<Item = &ResourceHandle> {
        self.handles.iter().filter(move |h| h.kind == kind)
    }
}

/// Where a deployed service can be reached from the host for copy/exec calls
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServiceLocation {
    Container {
        name: String,
        coverage_path: Option<String>,
    },
    Pods {
        namespace: String,
        selector: Option<String>,
        coverage_path: Option<String>,
    },
}

impl ServiceLocation {
    pub fn coverage_path(&self) -> Option<&str> {
        match self {
            ServiceLocation::Container { coverage_path, .. }
            | ServiceLocation::Pods { coverage_path, .. } => coverage_path.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_port_parsing() {
        assert_eq!(Endpoint::new("http://localhost:18080/healthz").port, Some(18080));
        assert_eq!(Endpoint::new("localhost:5432").port, Some(5432));
        assert_eq!(Endpoint::new("https://example.test/api").port, None);
    }

    #[test]
    fn test_teardown_rank_orders_images_last() {
        let mut kinds = vec![
            ResourceKind::Image,
            ResourceKind::Network,
            ResourceKind::Container,
            ResourceKind::Cluster,
        ];
        kinds.sort_by_key(|k| k.teardown_rank());
        assert_eq!(
            kinds,
            vec![
                ResourceKind::Container,
                ResourceKind::Cluster,
                ResourceKind::Network,
                ResourceKind::Image
            ]
        );
    }

    #[test]
    fn test_result_serializes_round_trip() {
        let mut result = ProvisioningResult::partial(
            "run1",
            vec![ResourceHandle::new(ResourceKind::Cluster, "checkout-abc", "checkout")],
        );
        result
            .endpoints
            .insert("api".to_string(), Endpoint::new("http://localhost:8080"));

        let json = serde_json::to_string(&result).unwrap();
        let back: ProvisioningResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back, result);
        assert_eq!(back.handles_of(ResourceKind::Cluster).count(), 1);
    }
}
