//! CLI argument definitions for brokerload.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Configurable load-generation and measurement harness for message brokers.
#[derive(Parser)]
#[command(name = "brokerload")]
#[command(about = "Load-generation and measurement harness for message brokers")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a test plan (loopback transport unless a binding is wired in)
    Run(PlanArgs),

    /// Parse and validate a test plan without running it
    Validate(PlanArgs),
}

#[derive(Args)]
pub struct PlanArgs {
    /// Path to the YAML test plan
    #[arg(long, env = "BROKERLOAD_CONFIG")]
    pub config: PathBuf,
}
