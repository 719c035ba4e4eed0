use crate::RunOptions;
use crate::setup::Session;
use colored::Colorize;
use std::path::Path;

pub fn handle(file: Option<&Path>, options: &RunOptions) -> anyhow::Result<()> {
    let session = Session::open(file, options)?;
    let plan = session.plan()?;

    println!(
        "{} {} (run {})",
        "Plan for".bold(),
        session.ctx.project.cyan(),
        plan.run_id().cyan()
    );
    for (index, phase) in plan.phases().iter().enumerate() {
        println!();
        println!("{} {}", format!("[{}]", index + 1).dimmed(), phase.name().bold());
        for task in phase.task_names() {
            println!("    - {}", task);
        }
    }
    println!();
    println!("{} phases, {} tasks", plan.phases().len(), plan.task_count());
    Ok(())
}
