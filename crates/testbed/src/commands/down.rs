use crate::RunOptions;
use crate::progress;
use crate::setup::Session;
use colored::Colorize;
use std::path::{Path, PathBuf};

pub async fn handle(
    file: Option<&Path>,
    options: &RunOptions,
    record: Option<PathBuf>,
    diagnostics: bool,
) -> anyhow::Result<()> {
    let session = Session::open(file, options)?;
    let path = match record {
        Some(path) => path,
        None => crate::record::latest(&session.ctx.work_dir)?,
    };
    let result = crate::record::read(&path)?;

    println!(
        "{} run {} ({} resources)",
        "Tearing down".blue().bold(),
        result.run_id.cyan(),
        result.handles.len()
    );
    let report = session.lifecycle().teardown(result, diagnostics).await;
    progress::print_teardown(&report);

    let report = report.into_result()?;
    std::fs::remove_file(&path).ok();
    println!();
    println!(
        "{} ({} removed, {} already gone)",
        "✓ Teardown complete".green().bold(),
        report
            .steps
            .iter()
            .filter(|s| s.outcome == testbed_engine::StepOutcome::Removed)
            .count(),
        report
            .steps
            .iter()
            .filter(|s| s.outcome == testbed_engine::StepOutcome::AlreadyAbsent)
            .count()
    );
    Ok(())
}
