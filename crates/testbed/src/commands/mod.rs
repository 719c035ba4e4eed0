pub mod down;
pub mod plan;
pub mod run;
pub mod up;
pub mod validate;

use crate::progress;
use crate::setup::Session;
use colored::Colorize;
use testbed_core::{ProvisioningResult, ResourceKind};
use testbed_engine::PhaseScheduler;
use tokio::sync::mpsc;

/// Build and execute the plan. On failure the aggregate report is printed
/// and, unless `keep_on_failure`, whatever was created is torn down.
pub async fn provision(
    session: &Session,
    keep_on_failure: bool,
) -> anyhow::Result<ProvisioningResult> {
    let plan = session.plan()?;
    println!(
        "{} {} (run {}, {} phases, {} tasks)",
        "Provisioning".blue().bold(),
        session.ctx.project.cyan(),
        plan.run_id().cyan(),
        plan.phases().len(),
        plan.task_count()
    );

    let (events, receiver) = mpsc::unbounded_channel();
    let renderer = progress::spawn(receiver);
    let scheduler = PhaseScheduler::new(plan).with_events(events);
    let outcome = scheduler.execute().await;
    drop(scheduler);
    let _ = renderer.await;

    let error = match outcome {
        Ok(result) => return Ok(result),
        Err(e) => e,
    };

    eprintln!();
    eprintln!("{}", "✗ Provisioning failed".red().bold());
    eprintln!("{}", error.report());

    let mut partial = ProvisioningResult::partial(session.ctx.run_id(), error.created().to_vec());
    let kubeconfig = partial
        .handles_of(ResourceKind::Cluster)
        .next()
        .map(|cluster| session.ctx.kubeconfig_path(&cluster.name));
    partial.kubeconfig = kubeconfig;

    if keep_on_failure {
        let path = session.ctx.record_path();
        crate::record::write(&path, &partial)?;
        eprintln!(
            "Partial environment kept; remove it with `testbed down --record {}`",
            path.display()
        );
    } else {
        let report = session.lifecycle().teardown(partial, true).await;
        progress::print_teardown(&report);
    }

    Err(error.into())
}
