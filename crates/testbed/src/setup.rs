//! Everything a command needs before it can build a plan: the environment
//! definition, the run context and the concrete collaborators.

use crate::RunOptions;
use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use testbed_config::LoadedEnvironment;
use testbed_core::{OperationRunner, ProvisioningContext, RegistryCoordinates, ResourceNamer};
use testbed_engine::{Collaborators, LifecycleManager, PlanBuilder, ProvisioningPlan};
use testbed_exec::{DockerCli, DockerRuntime, KindCli, Kubectl, ProcessGateway};

pub fn load_environment(file: Option<&Path>) -> anyhow::Result<LoadedEnvironment> {
    let cwd = std::env::current_dir().context("cannot determine the current directory")?;
    let path = testbed_config::find_environment_file(&cwd, file)?;
    Ok(testbed_config::load(&path)?)
}

/// Registry coordinates: flags and environment variables win over the file
fn registry(loaded: &LoadedEnvironment, options: &RunOptions) -> Option<RegistryCoordinates> {
    let file = loaded.env.registry.as_ref();
    let registry = options
        .registry
        .clone()
        .or_else(|| file.map(|c| c.registry.clone()))?;
    let tag = options
        .tag
        .clone()
        .or_else(|| file.map(|c| c.tag.clone()))?;
    Some(RegistryCoordinates::new(registry, tag))
}

pub fn context(loaded: &LoadedEnvironment, options: &RunOptions) -> ProvisioningContext {
    let namer = match &options.run_id {
        Some(id) => ResourceNamer::with_seed(id),
        None => ResourceNamer::from_entropy(),
    };

    let mut ctx = ProvisioningContext::new(&loaded.env.project, &loaded.root)
        .with_registry(registry(loaded, options))
        .with_coverage(options.coverage)
        .with_budgets(loaded.env.budgets.clone())
        .with_namer(namer);
    if let Some(work_dir) = &options.work_dir {
        let work_dir = ctx.resolve(work_dir);
        ctx = ctx.with_work_dir(work_dir);
    }
    ctx
}

/// Concrete tools. Nothing connects or spawns until a task calls them.
pub fn collaborators(ctx: &ProvisioningContext) -> Collaborators {
    let runner: Arc<dyn OperationRunner> = Arc::new(ProcessGateway::new());
    let images = DockerCli::new(Arc::clone(&runner), &ctx.project_root)
        .with_coverage_arg(&ctx.coverage_build_arg);
    let runtime = DockerRuntime::new(Arc::clone(&runner));

    Collaborators {
        images: Arc::new(images),
        cluster: Arc::new(KindCli::new(Arc::clone(&runner))),
        control: Arc::new(Kubectl::new(Arc::clone(&runner))),
        runtime: Arc::new(runtime),
    }
}

pub struct Session {
    pub loaded: LoadedEnvironment,
    pub ctx: Arc<ProvisioningContext>,
    pub tools: Collaborators,
}

impl Session {
    pub fn open(file: Option<&Path>, options: &RunOptions) -> anyhow::Result<Self> {
        let loaded = load_environment(file)?;
        testbed_config::validate(&loaded)?;
        let ctx = Arc::new(context(&loaded, options));
        let tools = collaborators(&ctx);
        Ok(Self { loaded, ctx, tools })
    }

    pub fn plan(&self) -> anyhow::Result<ProvisioningPlan> {
        let plan = PlanBuilder::new(
            self.loaded.env.clone(),
            Arc::clone(&self.ctx),
            self.tools.clone(),
        )
        .build()?;
        Ok(plan)
    }

    pub fn lifecycle(&self) -> LifecycleManager {
        LifecycleManager::new(&self.tools, &self.ctx)
    }
}
