//! Plan builder
//!
//! Turns an environment definition into the standard phase layout:
//!
//! ```text
//! prepare    image:<svc>...  cluster  network     (all independent)
//! load       load:<svc>...                        (needs images + cluster)
//! deploy-N   deploy:<svc>...                      (per tier, ascending)
//! patch-N    patch:<name>...
//! ready-N    ready:<svc>...
//! ```
//!
//! Names are generated and templates are checked here, before anything runs.

use crate::phase::{Phase, ProvisioningPlan};
use crate::probe::ReadinessProber;
use crate::task::{Task, TaskOutput, TaskScope, within};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use testbed_core::synth::{
    DEFAULT_CLUSTER_CONFIG, FieldPatch, ManifestTemplate, inject_mounts, service_values,
};
use testbed_core::{
    BuildSpec, ClusterDef, ClusterRequest, ClusterTool, ContainerRuntime, ContainerSpec,
    ControlPlane, Creation, Endpoint, EnvironmentDef, HealthCheckSpec, ImageTool, MountDef,
    ProvisioningContext, ReadyDef, ReadyTarget, ResourceHandle, ResourceKind, ServiceDef,
    ServiceKind, ServiceLocation, SynthError, TaskError,
};

pub const PHASE_PREPARE: &str = "prepare";
pub const PHASE_LOAD: &str = "load";

pub const CLUSTER_TASK: &str = "cluster";
pub const NETWORK_TASK: &str = "network";
const IMAGE_TASK_PREFIX: &str = "image:";

pub const LABEL_PROJECT: &str = "testbed.project";
pub const LABEL_RUN: &str = "testbed.run";
pub const LABEL_SERVICE: &str = "testbed.service";

/// Name of the task that resolves the image of `service`
pub fn image_task(service: &str) -> String {
    format!("{}{}", IMAGE_TASK_PREFIX, service)
}

/// The external tools a plan drives
#[derive(Clone)]
pub struct Collaborators {
    pub images: Arc<dyn ImageTool>,
    pub cluster: Arc<dyn ClusterTool>,
    pub control: Arc<dyn ControlPlane>,
    pub runtime: Arc<dyn ContainerRuntime>,
}

pub struct PlanBuilder {
    env: Arc<EnvironmentDef>,
    ctx: Arc<ProvisioningContext>,
    tools: Collaborators,
}

/// Names and inputs fixed at build time
struct Resolved {
    cluster: Option<String>,
    containers: BTreeMap<String, String>,
    images: BTreeMap<String, String>,
    templates: BTreeMap<String, ManifestTemplate>,
}

impl PlanBuilder {
    pub fn new(env: EnvironmentDef, ctx: Arc<ProvisioningContext>, tools: Collaborators) -> Self {
        Self {
            env: Arc::new(env),
            ctx,
            tools,
        }
    }

    pub fn build(&self) -> Result<ProvisioningPlan, SynthError> {
        let resolved = self.resolve()?;
        let mut plan = ProvisioningPlan::new(self.ctx.run_id());

        plan.push(self.prepare_phase(&resolved));
        plan.push(self.load_phase(&resolved));

        for tier in self.env.tiers() {
            plan.push(self.deploy_phase(tier, &resolved));
            plan.push(self.patch_phase(tier)?);
            plan.push(self.ready_phase(tier, &resolved));
        }

        tracing::info!(
            run_id = %plan.run_id(),
            phases = plan.phases().len(),
            tasks = plan.task_count(),
            "plan built"
        );
        Ok(plan)
    }

    fn resolve(&self) -> Result<Resolved, SynthError> {
        let ctx = &self.ctx;
        let cluster = self
            .env
            .cluster
            .as_ref()
            .map(|def| ctx.namer.generate(ResourceKind::Cluster, &def.name));

        let images: BTreeMap<String, String> = self
            .env
            .images
            .iter()
            .map(|spec| {
                let tag = ctx.namer.generate(ResourceKind::Image, &spec.service);
                (spec.service.clone(), format!("{}:{}", spec.target, tag))
            })
            .collect();

        let mut containers = BTreeMap::new();
        let mut templates = BTreeMap::new();
        for service in &self.env.services {
            match service.kind {
                ServiceKind::Container => {
                    let owner = format!("{}-{}", ctx.project, service.name);
                    containers.insert(
                        service.name.clone(),
                        ctx.namer.generate(ResourceKind::Container, &owner),
                    );
                }
                ServiceKind::Manifest => {
                    let manifest = service.manifest.as_ref().ok_or_else(|| SynthError::Io {
                        path: PathBuf::from(&service.name),
                        message: "manifest service has no manifest path".to_string(),
                    })?;
                    let template = ManifestTemplate::from_file(&ctx.resolve(manifest))?;
                    let values = service_values(&self.env, service, ctx.run_id(), &images);
                    let missing = template.missing(&values)?;
                    if !missing.is_empty() {
                        return Err(SynthError::UnresolvedPlaceholder {
                            template: template.name().to_string(),
                            names: missing,
                        });
                    }
                    templates.insert(service.name.clone(), template);
                }
            }
        }

        Ok(Resolved {
            cluster,
            containers,
            images,
            templates,
        })
    }

    fn prepare_phase(&self, resolved: &Resolved) -> Phase {
        let mut phase = Phase::new(PHASE_PREPARE);

        for spec in &self.env.images {
            let Some(reference) = resolved.images.get(&spec.service).cloned() else {
                continue;
            };
            let images = Arc::clone(&self.tools.images);
            let ctx = Arc::clone(&self.ctx);
            let spec = spec.clone();
            phase.push(Task::new(image_task(&spec.service), move |scope| {
                provide_image(scope, images, ctx, spec, reference)
            }));
        }

        if let (Some(def), Some(name)) = (&self.env.cluster, &resolved.cluster) {
            let tool = Arc::clone(&self.tools.cluster);
            let ctx = Arc::clone(&self.ctx);
            let def = def.clone();
            let name = name.clone();
            phase.push(Task::new(CLUSTER_TASK, move |scope| {
                create_cluster(scope, tool, ctx, def, name)
            }));
        }

        if self.env.needs_network() {
            let runtime = Arc::clone(&self.tools.runtime);
            let ctx = Arc::clone(&self.ctx);
            let name = ctx.namer.generate(ResourceKind::Network, &ctx.project);
            phase.push(Task::new(NETWORK_TASK, move |scope| {
                create_network(scope, runtime, ctx, name)
            }));
        }

        phase
    }

    fn load_phase(&self, resolved: &Resolved) -> Phase {
        let mut phase = Phase::new(PHASE_LOAD);
        let Some(cluster) = &resolved.cluster else {
            return phase;
        };

        for spec in &self.env.images {
            let tool = Arc::clone(&self.tools.cluster);
            let budget = self.ctx.budgets.load;
            let cluster = cluster.clone();
            let source = image_task(&spec.service);
            phase.push(Task::new(
                format!("load:{}", spec.service),
                move |scope| async move {
                    let image = scope.inputs().require(&source)?.to_string();
                    tool.load_image(&cluster, &image, budget).await?;
                    Ok::<_, TaskError>(TaskOutput::empty())
                },
            ));
        }

        phase
    }

    fn deploy_phase(&self, tier: u32, resolved: &Resolved) -> Phase {
        let mut phase = Phase::new(format!("deploy-{}", tier));

        for service in self.env.services_in_tier(tier) {
            let task_name = format!("deploy:{}", service.name);
            let ctx = Arc::clone(&self.ctx);
            let env = Arc::clone(&self.env);
            let svc = service.clone();

            match service.kind {
                ServiceKind::Manifest => {
                    let Some(template) = resolved.templates.get(&service.name).cloned() else {
                        continue;
                    };
                    let control = Arc::clone(&self.tools.control);
                    phase.push(Task::new(task_name, move |scope| {
                        deploy_manifest(scope, control, ctx, env, svc, template)
                    }));
                }
                ServiceKind::Container => {
                    let Some(name) = resolved.containers.get(&service.name).cloned() else {
                        continue;
                    };
                    let runtime = Arc::clone(&self.tools.runtime);
                    phase.push(Task::new(task_name, move |scope| {
                        start_container(scope, runtime, ctx, env, svc, name)
                    }));
                }
            }
        }

        phase
    }

    fn patch_phase(&self, tier: u32) -> Result<Phase, SynthError> {
        let mut phase = Phase::new(format!("patch-{}", tier));

        for def in self.env.patches_in_tier(tier) {
            let patch = FieldPatch::from_def(def, &self.ctx.project_root)?;
            let control = Arc::clone(&self.tools.control);
            let budget = self.ctx.budgets.patch;
            phase.push(Task::new(
                format!("patch:{}", def.name),
                move |scope| async move {
                    let kubeconfig = PathBuf::from(scope.inputs().require(CLUSTER_TASK)?);
                    control.patch(&kubeconfig, &patch, budget).await?;
                    Ok::<_, TaskError>(TaskOutput::empty())
                },
            ));
        }

        Ok(phase)
    }

    fn ready_phase(&self, tier: u32, resolved: &Resolved) -> Phase {
        let mut phase = Phase::new(format!("ready-{}", tier));
        let prober = ReadinessProber::new(
            Arc::clone(&self.tools.control),
            Arc::clone(&self.tools.runtime),
            self.ctx.budgets.exec,
        );

        for service in self.env.services_in_tier(tier) {
            let many = service.ready.len() > 1;
            for (i, ready) in service.ready.iter().enumerate() {
                let Some(spec) = health_check(service, ready, resolved) else {
                    continue;
                };
                let task_name = if many {
                    format!("ready:{}:{}", service.name, i + 1)
                } else {
                    format!("ready:{}", service.name)
                };
                let prober = prober.clone();
                phase.push(Task::new(task_name, move |scope| async move {
                    let kubeconfig = scope.inputs().get(CLUSTER_TASK).map(PathBuf::from);
                    prober.wait_until_ready(&spec, kubeconfig).await?;
                    Ok::<_, TaskError>(TaskOutput::empty())
                }));
            }
        }

        phase
    }
}

/// Resolve a readiness declaration against generated names
fn health_check(
    service: &ServiceDef,
    ready: &ReadyDef,
    resolved: &Resolved,
) -> Option<HealthCheckSpec> {
    let spec = match &ready.target {
        ReadyTarget::Http { url } => HealthCheckSpec::http(url),
        ReadyTarget::Selector { selector, replicas } => {
            HealthCheckSpec::replicas(service.namespace(), selector, *replicas)
        }
        ReadyTarget::Container => {
            HealthCheckSpec::container(resolved.containers.get(&service.name)?)
        }
    };
    Some(
        spec.with_interval(ready.interval)
            .with_deadline(ready.deadline),
    )
}

fn io_error(path: &Path, err: std::io::Error) -> TaskError {
    TaskError::ConfigSynthesis(SynthError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

/// Pull from the registry when coordinates are known, else (or on a failed
/// pull) build locally under the generated reference.
async fn provide_image(
    scope: TaskScope,
    images: Arc<dyn ImageTool>,
    ctx: Arc<ProvisioningContext>,
    spec: BuildSpec,
    reference: String,
) -> Result<TaskOutput, TaskError> {
    let instrumented = ctx.coverage && spec.coverage;
    let spec = spec.with_coverage(instrumented);

    if let Some(registry) = &ctx.registry
        && !instrumented
    {
        let remote = registry.reference_for(&spec);
        match images.pull(&remote, ctx.budgets.pull).await {
            Ok(resolved) => {
                tracing::info!(service = %spec.service, image = %resolved, "using registry image");
                return Ok(TaskOutput::value(resolved));
            }
            Err(e) => {
                tracing::warn!(
                    service = %spec.service,
                    image = %remote,
                    error = %e,
                    "pull failed, building locally"
                );
            }
        }
    }

    scope.record(ResourceHandle::new(
        ResourceKind::Image,
        &reference,
        &spec.service,
    ));
    let resolved = images.build(&spec, &reference, ctx.budgets.build).await?;
    Ok(TaskOutput::value(resolved))
}

async fn create_cluster(
    scope: TaskScope,
    tool: Arc<dyn ClusterTool>,
    ctx: Arc<ProvisioningContext>,
    def: ClusterDef,
    name: String,
) -> Result<TaskOutput, TaskError> {
    let base = match &def.config {
        Some(path) => {
            let path = ctx.resolve(path);
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| io_error(&path, e))?
        }
        None => DEFAULT_CLUSTER_CONFIG.to_string(),
    };

    let mounts: Vec<MountDef> = def
        .mounts
        .iter()
        .map(|m| MountDef {
            host_path: ctx.resolve(&m.host_path),
            ..m.clone()
        })
        .collect();
    let document = inject_mounts(&base, &mounts)?;

    tokio::fs::create_dir_all(&ctx.work_dir)
        .await
        .map_err(|e| io_error(&ctx.work_dir, e))?;
    let config = ctx.cluster_config_path(&name);
    tokio::fs::write(&config, document)
        .await
        .map_err(|e| io_error(&config, e))?;

    let kubeconfig = ctx.kubeconfig_path(&name);
    let request = ClusterRequest {
        name: name.clone(),
        config,
        kubeconfig: kubeconfig.clone(),
        wait: def.wait,
    };

    scope.record(ResourceHandle::new(ResourceKind::Cluster, &name, &def.name));
    if tool.create(&request, ctx.budgets.cluster).await? == Creation::AlreadyExisted {
        scope.forget(ResourceKind::Cluster, &name);
    }
    // Credentials written by create are not reliable; export them again
    tool.export_kubeconfig(&name, &kubeconfig, ctx.budgets.cluster)
        .await?;

    Ok(TaskOutput::value(kubeconfig.to_string_lossy()).with_kubeconfig(kubeconfig))
}

async fn create_network(
    scope: TaskScope,
    runtime: Arc<dyn ContainerRuntime>,
    ctx: Arc<ProvisioningContext>,
    name: String,
) -> Result<TaskOutput, TaskError> {
    scope.record(ResourceHandle::new(ResourceKind::Network, &name, &ctx.project));
    within(
        ctx.budgets.apply,
        &format!("create network {}", name),
        runtime.create_network(&name),
    )
    .await?;
    Ok(TaskOutput::value(name))
}

async fn deploy_manifest(
    scope: TaskScope,
    control: Arc<dyn ControlPlane>,
    ctx: Arc<ProvisioningContext>,
    env: Arc<EnvironmentDef>,
    service: ServiceDef,
    template: ManifestTemplate,
) -> Result<TaskOutput, TaskError> {
    let kubeconfig = PathBuf::from(scope.inputs().require(CLUSTER_TASK)?);
    let images = scope.inputs().with_prefix(IMAGE_TASK_PREFIX);
    let values = service_values(&env, &service, ctx.run_id(), &images);
    let manifest = template.render(&values)?;

    tracing::info!(service = %service.name, namespace = %service.namespace(), "applying manifest");
    control
        .apply(&kubeconfig, &manifest, Some(service.namespace()), ctx.budgets.apply)
        .await?;

    let mut output = TaskOutput::empty().with_location(
        service.name.clone(),
        ServiceLocation::Pods {
            namespace: service.namespace().to_string(),
            selector: service.selector().map(str::to_string),
            coverage_path: service.coverage_path.clone(),
        },
    );
    if let Some(url) = service.endpoint_url() {
        output = output.with_endpoint(service.name.clone(), Endpoint::new(url));
    }
    Ok(output)
}

async fn start_container(
    scope: TaskScope,
    runtime: Arc<dyn ContainerRuntime>,
    ctx: Arc<ProvisioningContext>,
    env: Arc<EnvironmentDef>,
    service: ServiceDef,
    name: String,
) -> Result<TaskOutput, TaskError> {
    let declared = service
        .image
        .clone()
        .ok_or_else(|| TaskError::MissingInput(format!("image of service '{}'", service.name)))?;
    // An image declared in the environment means the one built or pulled in prepare
    let image = if env.image(&declared).is_some() {
        scope.inputs().require(&image_task(&declared))?.to_string()
    } else {
        declared
    };

    let labels = BTreeMap::from([
        (LABEL_PROJECT.to_string(), ctx.project.clone()),
        (LABEL_RUN.to_string(), ctx.run_id().to_string()),
        (LABEL_SERVICE.to_string(), service.name.clone()),
    ]);
    let spec = ContainerSpec {
        name: name.clone(),
        image,
        network: scope.inputs().get(NETWORK_TASK).map(str::to_string),
        alias: Some(service.name.clone()),
        ports: service.ports.clone(),
        env: service.env.clone(),
        labels,
    };

    scope.record(ResourceHandle::new(
        ResourceKind::Container,
        &name,
        &service.name,
    ));
    within(
        ctx.budgets.apply,
        &format!("run container {}", name),
        runtime.run_container(&spec),
    )
    .await?;

    let mut output = TaskOutput::empty().with_location(
        service.name.clone(),
        ServiceLocation::Container {
            name,
            coverage_path: service.coverage_path.clone(),
        },
    );
    if let Some(url) = service.endpoint_url() {
        output = output.with_endpoint(service.name.clone(), Endpoint::new(url));
    }
    Ok(output)
}
