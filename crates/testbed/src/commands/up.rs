use crate::RunOptions;
use crate::setup::Session;
use colored::Colorize;
use std::path::{Path, PathBuf};

pub async fn handle(
    file: Option<&Path>,
    options: &RunOptions,
    keep_on_failure: bool,
    record: Option<PathBuf>,
) -> anyhow::Result<()> {
    let session = Session::open(file, options)?;
    let result = super::provision(&session, keep_on_failure).await?;

    let path = record.unwrap_or_else(|| session.ctx.record_path());
    crate::record::write(&path, &result)?;

    println!();
    println!("{}", "✓ Environment is ready".green().bold());
    for (service, endpoint) in &result.endpoints {
        println!("  {} {}", service.cyan(), endpoint.url);
    }
    if let Some(kubeconfig) = &result.kubeconfig {
        println!("  KUBECONFIG={}", kubeconfig.display());
    }
    println!();
    println!("Record: {}", path.display());
    println!("Tear down with `testbed down --record {}`", path.display());
    Ok(())
}
