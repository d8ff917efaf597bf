//! Command-line entry point for brokerload.
//!
//! ```bash
//! # Run a plan against the loopback transport
//! brokerload run --config testplan.yaml
//!
//! # Check a plan without starting any workers
//! brokerload validate --config testplan.yaml
//! ```

use anyhow::Context;
use brokerload::cli::{Cli, Commands};
use brokerload::runner::{run_plan, CancelToken};
use brokerload::TestPlan;
use clap::Parser;
use tracing::info;

fn main() -> anyhow::Result<()> {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let plan = TestPlan::from_path(&args.config)
                .with_context(|| format!("failed to load test plan {:?}", args.config))?;
            let summary = run_plan(&plan, CancelToken::new())?;
            info!(
                total_sent = summary.total_sent(),
                complete = summary.all_complete(),
                "run finished"
            );
            if !summary.all_complete() {
                anyhow::bail!("one or more workers did not reach their configured message count");
            }
        }
        Commands::Validate(args) => {
            let plan = TestPlan::from_path(&args.config)
                .with_context(|| format!("failed to load test plan {:?}", args.config))?;
            info!(
                publishers = plan.publishers().count(),
                subscribers = plan.subscribers().count(),
                "test plan is valid"
            );
        }
    }
    Ok(())
}
