//! In-memory collaborators for engine tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use testbed_core::synth::FieldPatch;
use testbed_core::{
    BuildSpec, ClusterRequest, ClusterTool, ContainerRuntime, ContainerSpec, ContainerState,
    ControlPlane, Creation, ProvisioningContext, Removal, ResourceNamer, ResourceStatus, TaskError,
};
use testbed_engine::Collaborators;

/// Ordered log of every collaborator call, shared by all fakes
#[derive(Default, Clone)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn starting_with(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }
}

fn removal(present: bool) -> Removal {
    if present {
        Removal::Removed
    } else {
        Removal::AlreadyAbsent
    }
}

#[derive(Default)]
pub struct FakeImages {
    pub journal: Journal,
    /// Services whose build fails
    pub failing: BTreeSet<String>,
    /// Whether registry pulls succeed
    pub pullable: bool,
}

#[async_trait]
impl testbed_core::ImageTool for FakeImages {
    async fn build(
        &self,
        spec: &BuildSpec,
        reference: &str,
        _budget: Duration,
    ) -> Result<String, TaskError> {
        self.journal.push(format!(
            "build {} {} coverage={}",
            spec.service, reference, spec.coverage
        ));
        if self.failing.contains(&spec.service) {
            return Err(TaskError::external(
                format!("docker build -t {}", reference),
                Some(1),
                "error: could not compile `api`",
            ));
        }
        Ok(reference.to_string())
    }

    async fn pull(&self, reference: &str, _budget: Duration) -> Result<String, TaskError> {
        self.journal.push(format!("pull {}", reference));
        if self.pullable {
            Ok(reference.to_string())
        } else {
            Err(TaskError::external(
                format!("docker pull {}", reference),
                Some(1),
                "manifest unknown",
            ))
        }
    }
}

#[derive(Default)]
pub struct FakeCluster {
    pub journal: Journal,
    pub clusters: Mutex<BTreeSet<String>>,
    /// Every create finds a cluster of that name already running
    pub preexisting: AtomicBool,
}

#[async_trait]
impl ClusterTool for FakeCluster {
    async fn create(
        &self,
        request: &ClusterRequest,
        _budget: Duration,
    ) -> Result<Creation, TaskError> {
        self.journal.push(format!("create cluster {}", request.name));
        let inserted = self.clusters.lock().unwrap().insert(request.name.clone());
        if inserted && !self.preexisting.load(Ordering::SeqCst) {
            Ok(Creation::Created)
        } else {
            Ok(Creation::AlreadyExisted)
        }
    }

    async fn export_kubeconfig(
        &self,
        name: &str,
        destination: &Path,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("export kubeconfig {}", name));
        std::fs::write(destination, format!("current-context: kind-{}\n", name))
            .map_err(|e| TaskError::external("kind export kubeconfig", None, e.to_string()))
    }

    async fn load_image(
        &self,
        name: &str,
        image: &str,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("load {} into {}", image, name));
        Ok(())
    }

    async fn delete(&self, name: &str, _budget: Duration) -> Result<Removal, TaskError> {
        self.journal.push(format!("delete cluster {}", name));
        Ok(removal(self.clusters.lock().unwrap().remove(name)))
    }

    async fn export_logs(
        &self,
        name: &str,
        destination: &Path,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("export logs {}", name));
        std::fs::create_dir_all(destination)
            .map_err(|e| TaskError::external("kind export logs", None, e.to_string()))
    }
}

#[derive(Default)]
pub struct FakeControl {
    pub journal: Journal,
    /// (namespace, manifest) per apply call
    pub applied: Mutex<Vec<(Option<String>, String)>>,
    pub patches: Mutex<Vec<FieldPatch>>,
}

#[async_trait]
impl ControlPlane for FakeControl {
    async fn apply(
        &self,
        _kubeconfig: &Path,
        manifest: &str,
        namespace: Option<&str>,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("apply {}", namespace.unwrap_or("-")));
        self.applied
            .lock()
            .unwrap()
            .push((namespace.map(str::to_string), manifest.to_string()));
        Ok(())
    }

    async fn patch(
        &self,
        _kubeconfig: &Path,
        patch: &FieldPatch,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("patch {}", patch.target()));
        self.patches.lock().unwrap().push(patch.clone());
        Ok(())
    }

    async fn list_resources(
        &self,
        _kubeconfig: &Path,
        _namespace: &str,
        selector: &str,
        _budget: Duration,
    ) -> Result<Vec<ResourceStatus>, TaskError> {
        Ok(vec![ResourceStatus {
            name: format!("{}-0", selector.replace('=', "-")),
            ready: true,
            phase: Some("Running".to_string()),
        }])
    }

    async fn describe(
        &self,
        _kubeconfig: &Path,
        namespace: &str,
        _selector: Option<&str>,
        _budget: Duration,
    ) -> Result<String, TaskError> {
        Ok(format!("Namespace: {}\n", namespace))
    }

    async fn logs(
        &self,
        _kubeconfig: &Path,
        _namespace: &str,
        selector: &str,
        _budget: Duration,
    ) -> Result<String, TaskError> {
        Ok(format!("[{}] listening\n", selector))
    }

    async fn copy_from(
        &self,
        _kubeconfig: &Path,
        _namespace: &str,
        selector: &str,
        path: &str,
        destination: &Path,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("copy {}:{}", selector, path));
        std::fs::write(destination.join("covmeta.1"), "meta")
            .map_err(|e| TaskError::external("kubectl cp", None, e.to_string()))
    }
}

#[derive(Default)]
pub struct FakeRuntime {
    pub journal: Journal,
    pub containers: Mutex<BTreeMap<String, ContainerSpec>>,
    pub networks: Mutex<BTreeSet<String>>,
    pub images: Mutex<BTreeSet<String>>,
    /// Fail removal of these names
    pub stuck: BTreeSet<String>,
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_network(&self, name: &str) -> Result<(), TaskError> {
        self.journal.push(format!("create network {}", name));
        self.networks.lock().unwrap().insert(name.to_string());
        Ok(())
    }

    async fn run_container(&self, spec: &ContainerSpec) -> Result<(), TaskError> {
        self.journal.push(format!("run container {}", spec.name));
        self.containers
            .lock()
            .unwrap()
            .insert(spec.name.clone(), spec.clone());
        Ok(())
    }

    async fn container_state(&self, name: &str) -> Result<ContainerState, TaskError> {
        let running = self.containers.lock().unwrap().contains_key(name);
        Ok(ContainerState {
            running,
            health: None,
            status: if running { "running" } else { "missing" }.to_string(),
        })
    }

    async fn remove_container(&self, name: &str) -> Result<Removal, TaskError> {
        self.journal.push(format!("remove container {}", name));
        if self.stuck.contains(name) {
            return Err(TaskError::external(
                format!("remove container {}", name),
                Some(409),
                "removal already in progress",
            ));
        }
        Ok(removal(self.containers.lock().unwrap().remove(name).is_some()))
    }

    async fn remove_network(&self, name: &str) -> Result<Removal, TaskError> {
        self.journal.push(format!("remove network {}", name));
        Ok(removal(self.networks.lock().unwrap().remove(name)))
    }

    async fn remove_image(&self, reference: &str) -> Result<Removal, TaskError> {
        self.journal.push(format!("remove image {}", reference));
        Ok(removal(self.images.lock().unwrap().remove(reference)))
    }

    async fn logs(&self, name: &str, _tail: usize) -> Result<String, TaskError> {
        Ok(format!("{} started\n", name))
    }

    async fn copy_from(
        &self,
        name: &str,
        path: &str,
        destination: &Path,
        _budget: Duration,
    ) -> Result<(), TaskError> {
        self.journal.push(format!("copy {}:{}", name, path));
        std::fs::write(destination.join("covmeta.1"), "meta")
            .map_err(|e| TaskError::external("docker cp", None, e.to_string()))
    }
}

/// A full set of fakes sharing one journal
pub struct Fakes {
    pub journal: Journal,
    pub images: Arc<FakeImages>,
    pub cluster: Arc<FakeCluster>,
    pub control: Arc<FakeControl>,
    pub runtime: Arc<FakeRuntime>,
}

impl Fakes {
    pub fn new() -> Self {
        Self::with(FakeImages::default(), FakeRuntime::default())
    }

    pub fn with(images: FakeImages, runtime: FakeRuntime) -> Self {
        let journal = Journal::default();
        Self {
            images: Arc::new(FakeImages {
                journal: journal.clone(),
                ..images
            }),
            cluster: Arc::new(FakeCluster {
                journal: journal.clone(),
                ..Default::default()
            }),
            control: Arc::new(FakeControl {
                journal: journal.clone(),
                ..Default::default()
            }),
            runtime: Arc::new(FakeRuntime {
                journal: journal.clone(),
                ..runtime
            }),
            journal,
        }
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            images: self.images.clone(),
            cluster: self.cluster.clone(),
            control: self.control.clone(),
            runtime: self.runtime.clone(),
        }
    }
}

/// Context rooted in `root` with a fixed run id and short budgets
pub fn context(root: &Path) -> ProvisioningContext {
    ProvisioningContext::new("checkout", root)
        .with_work_dir(root.join("work"))
        .with_namer(ResourceNamer::with_seed("t3st"))
}
