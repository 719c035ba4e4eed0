//! Provisioning context
//!
//! Everything a task needs besides its own inputs. Built once by the caller
//! and shared read-only; task bodies never consult process environment.

use super::build::RegistryCoordinates;
use crate::namer::ResourceNamer;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default build argument toggled for instrumented builds
pub const DEFAULT_COVERAGE_BUILD_ARG: &str = "COVERAGE";

/// Time budgets for external operations, in one place.
///
/// The defaults are starting points, not load-bearing values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Budgets {
    pub build: Duration,
    pub pull: Duration,
    pub cluster: Duration,
    pub load: Duration,
    pub apply: Duration,
    pub patch: Duration,
    pub exec: Duration,
    pub teardown: Duration,
}

impl Default for Budgets {
    fn default() -> Self {
        Self {
            build: Duration::from_secs(20 * 60),
            pull: Duration::from_secs(10 * 60),
            cluster: Duration::from_secs(5 * 60),
            load: Duration::from_secs(5 * 60),
            apply: Duration::from_secs(2 * 60),
            patch: Duration::from_secs(60),
            exec: Duration::from_secs(2 * 60),
            teardown: Duration::from_secs(2 * 60),
        }
    }
}

impl Budgets {
    /// Overwrite a budget by its config key. Returns false for unknown keys.
    pub fn set(&mut self, key: &str, value: Duration) -> bool {
        let slot = match key {
            "build" => &mut self.build,
            "pull" => &mut self.pull,
            "cluster" => &mut self.cluster,
            "load" => &mut self.load,
            "apply" => &mut self.apply,
            "patch" => &mut self.patch,
            "exec" => &mut self.exec,
            "teardown" => &mut self.teardown,
            _ => return false,
        };
        *slot = value;
        true
    }
}

#[derive(Debug)]
pub struct ProvisioningContext {
    /// Logical owner embedded in generated names
    pub project: String,
    /// Resolves relative paths in the environment definition
    pub project_root: PathBuf,
    /// Kubeconfig, rendered cluster config, diagnostics and coverage land here
    pub work_dir: PathBuf,
    pub registry: Option<RegistryCoordinates>,
    pub coverage: bool,
    pub coverage_build_arg: String,
    pub budgets: Budgets,
    pub namer: ResourceNamer,
}

impl ProvisioningContext {
    pub fn new(project: impl Into<String>, project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            project: project.into(),
            work_dir: project_root.join(".testbed"),
            project_root,
            registry: None,
            coverage: false,
            coverage_build_arg: DEFAULT_COVERAGE_BUILD_ARG.to_string(),
            budgets: Budgets::default(),
            namer: ResourceNamer::from_entropy(),
        }
    }

    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self
    }

    pub fn with_registry(mut self, registry: Option<RegistryCoordinates>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_coverage(mut self, coverage: bool) -> Self {
        self.coverage = coverage;
        self
    }

    pub fn with_budgets(mut self, budgets: Budgets) -> Self {
        self.budgets = budgets;
        self
    }

    pub fn with_namer(mut self, namer: ResourceNamer) -> Self {
        self.namer = namer;
        self
    }

    /// Identifier of this run, shared by every generated name
    pub fn run_id(&self) -> &str {
        self.namer.seed()
    }

    /// Resolve a path from the environment definition against the project root
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_root.join(path)
        }
    }

    pub fn kubeconfig_path(&self, cluster_name: &str) -> PathBuf {
        self.work_dir.join(format!("{}.kubeconfig", cluster_name))
    }

    pub fn cluster_config_path(&self, cluster_name: &str) -> PathBuf {
        self.work_dir.join(format!("{}.kind.yaml", cluster_name))
    }

    pub fn record_path(&self) -> PathBuf {
        self.work_dir.join(format!("{}.json", self.run_id()))
    }
}
