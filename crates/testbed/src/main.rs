mod commands;
mod progress;
mod record;
mod setup;

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "testbed")]
#[command(about = "Ephemeral test environments: build, provision, wait, tear down", long_about = None)]
struct Cli {
    /// Environment definition (default: testbed.local.kdl, testbed.kdl, .testbed/testbed.kdl)
    #[arg(short, long, global = true, env = "TESTBED_FILE")]
    file: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that shape one provisioning run
#[derive(Args, Debug, Clone, Default)]
pub struct RunOptions {
    /// Registry to pull prebuilt images from (host/org)
    #[arg(long, env = "TESTBED_REGISTRY")]
    pub registry: Option<String>,

    /// Tag to pull from the registry
    #[arg(long, env = "TESTBED_TAG")]
    pub tag: Option<String>,

    /// Build instrumented images and extract coverage data
    #[arg(long, env = "TESTBED_COVERAGE", value_parser = clap::builder::FalseyValueParser::new())]
    pub coverage: bool,

    /// Fixed run id instead of a random one
    #[arg(long, env = "TESTBED_RUN_ID")]
    pub run_id: Option<String>,

    /// Where kubeconfig, records, diagnostics and coverage are written
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Provision the environment and leave it running
    Up {
        #[command(flatten)]
        options: RunOptions,
        /// Leave a partially provisioned environment in place on failure
        #[arg(long)]
        keep_on_failure: bool,
        /// Where to write the result record (default: <work dir>/<run id>.json)
        #[arg(long)]
        record: Option<PathBuf>,
    },
    /// Tear down an environment recorded by `up`
    Down {
        /// Result record (default: the newest record in the work dir)
        #[arg(long)]
        record: Option<PathBuf>,
        /// Capture logs and resource descriptions before removal
        #[arg(long)]
        diagnostics: bool,
        /// Work dir the record was written to
        #[arg(long)]
        work_dir: Option<PathBuf>,
    },
    /// Provision, run a test command against the environment, tear down
    Run {
        #[command(flatten)]
        options: RunOptions,
        /// Capture diagnostics when the command fails
        #[arg(long)]
        diagnostics_on_failure: bool,
        /// Test command (after --)
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Print the phases and tasks without running anything
    Plan {
        #[command(flatten)]
        options: RunOptions,
    },
    /// Check the environment definition
    Validate,
    /// Show version
    Version,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("testbed {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    init_tracing(cli.verbose);
    let file = cli.file.as_deref();

    match cli.command {
        Commands::Up {
            options,
            keep_on_failure,
            record,
        } => commands::up::handle(file, &options, keep_on_failure, record).await,
        Commands::Down {
            record,
            diagnostics,
            work_dir,
        } => {
            let options = RunOptions {
                work_dir,
                ..Default::default()
            };
            commands::down::handle(file, &options, record, diagnostics).await
        }
        Commands::Run {
            options,
            diagnostics_on_failure,
            command,
        } => commands::run::handle(file, &options, diagnostics_on_failure, &command).await,
        Commands::Plan { options } => commands::plan::handle(file, &options),
        Commands::Validate => commands::validate::handle(file),
        Commands::Version => Ok(()),
    }
}
