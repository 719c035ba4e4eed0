use crate::RunOptions;
use crate::progress;
use crate::setup::Session;
use anyhow::Context;
use colored::Colorize;
use std::path::Path;
use testbed_core::ProvisioningResult;

/// `TESTBED_ENDPOINT_<SERVICE>` for every endpoint, plus `KUBECONFIG`
fn endpoint_variables(result: &ProvisioningResult) -> Vec<(String, String)> {
    let mut vars: Vec<(String, String)> = result
        .endpoints
        .iter()
        .map(|(service, endpoint)| {
            let key: String = service
                .chars()
                .map(|c| match c {
                    '-' | '.' => '_',
                    c => c.to_ascii_uppercase(),
                })
                .collect();
            (format!("TESTBED_ENDPOINT_{}", key), endpoint.url.clone())
        })
        .collect();
    if let Some(kubeconfig) = &result.kubeconfig {
        vars.push(("KUBECONFIG".to_string(), kubeconfig.display().to_string()));
    }
    vars
}

pub async fn handle(
    file: Option<&Path>,
    options: &RunOptions,
    diagnostics_on_failure: bool,
    command: &[String],
) -> anyhow::Result<()> {
    let (program, args) = command
        .split_first()
        .context("no test command given")?;

    let session = Session::open(file, options)?;
    let result = super::provision(&session, false).await?;
    crate::record::write(&session.ctx.record_path(), &result)?;

    println!();
    println!("{} {}", "Running".blue().bold(), command.join(" "));
    let status = tokio::process::Command::new(program)
        .args(args)
        .envs(endpoint_variables(&result))
        .current_dir(&session.loaded.root)
        .status()
        .await;

    let code = match &status {
        Ok(status) => status.code().unwrap_or(1),
        Err(e) => {
            eprintln!("{} cannot start {}: {}", "✗".red().bold(), program, e);
            127
        }
    };
    let passed = code == 0;
    if passed {
        println!("{}", "✓ Test command passed".green().bold());
    } else {
        eprintln!("{} Test command exited with {}", "✗".red().bold(), code);
    }

    let lifecycle = session.lifecycle();
    match lifecycle.extract_coverage(&result).await {
        Ok(dirs) => {
            for dir in dirs {
                println!("  coverage: {}", dir.display().to_string().cyan());
            }
        }
        Err(e) => tracing::warn!(error = %e, "coverage extraction failed"),
    }

    let record = session.ctx.record_path();
    let report = lifecycle
        .teardown(result, !passed && diagnostics_on_failure)
        .await;
    progress::print_teardown(&report);
    if report.is_clean() {
        std::fs::remove_file(&record).ok();
    } else {
        eprintln!(
            "Some resources remain; retry with `testbed down --record {}`",
            record.display()
        );
    }

    if !passed {
        std::process::exit(code);
    }
    report.into_result()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use testbed_core::Endpoint;

    #[test]
    fn test_endpoint_variables() {
        let mut result = ProvisioningResult::partial("k3x9q2", Vec::new());
        result
            .endpoints
            .insert("api".to_string(), Endpoint::new("http://localhost:18080"));
        result.endpoints.insert(
            "payment-gateway".to_string(),
            Endpoint::new("http://localhost:18081"),
        );
        result.kubeconfig = Some(PathBuf::from("/work/ci.kubeconfig"));

        assert_eq!(
            endpoint_variables(&result),
            vec![
                (
                    "TESTBED_ENDPOINT_API".to_string(),
                    "http://localhost:18080".to_string()
                ),
                (
                    "TESTBED_ENDPOINT_PAYMENT_GATEWAY".to_string(),
                    "http://localhost:18081".to_string()
                ),
                ("KUBECONFIG".to_string(), "/work/ci.kubeconfig".to_string()),
            ]
        );
    }

    #[test]
    fn test_no_kubeconfig_without_cluster() {
        let result = ProvisioningResult::partial("k3x9q2", Vec::new());
        assert!(endpoint_variables(&result).is_empty());
    }
}
