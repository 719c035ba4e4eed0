//! Image build definitions

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// What to build (or pull) for one logical service.
///
/// Immutable once handed to a build task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildSpec {
    /// Logical service name (`api`, `worker`, ...)
    pub service: String,
    /// Target image repository without tag (`acme/api`)
    pub target: String,
    /// Build definition reference, usually a Dockerfile path
    pub definition: Option<PathBuf>,
    /// Build context directory
    pub context: Option<PathBuf>,
    /// Build the instrumented (coverage) variant
    #[serde(default)]
    pub coverage: bool,
    /// Extra build arguments
    #[serde(default)]
    pub args: BTreeMap<String, String>,
}

impl BuildSpec {
    pub fn new(service: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            target: target.into(),
            definition: None,
            context: None,
            coverage: false,
            args: BTreeMap::new(),
        }
    }

    pub fn with_definition(mut self, definition: impl Into<PathBuf>) -> Self {
        self.definition = Some(definition.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<PathBuf>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Registry coordinates for the pull fast path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryCoordinates {
    /// Registry host and organisation (`ghcr.io/acme`)
    pub registry: String,
    /// Tag to pull
    pub tag: String,
}

impl RegistryCoordinates {
    pub fn new(registry: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            tag: tag.into(),
        }
    }

    /// Remote reference for a build spec: `{registry}/{last path segment of target}:{tag}`
    pub fn reference_for(&self, spec: &BuildSpec) -> String {
        let repo = spec.target.rsplit('/').next().unwrap_or(&spec.target);
        format!("{}/{}:{}", self.registry.trim_end_matches('/'), repo, self.tag)
    }
}
