//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod apply;
mod output;
mod resolve;
mod run;
mod runs;
mod validate;

pub use runs::RunsCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Build, publish and deploy every service from this machine
    Run,
    /// Apply the composition descriptor on the target host without building
    Apply,
    /// Validate a composition descriptor file
    Validate {
        /// Path to the descriptor (YAML)
        descriptor: PathBuf,
    },
    /// Resolve a registry tag to the digest it currently points at
    Resolve {
        /// Image reference, e.g. docker.io/acme/backend:latest
        reference: String,

        /// Registry host; inferred from the reference when omitted
        #[arg(long)]
        registry: Option<String>,

        /// Talk to the registry over plain HTTP
        #[arg(long)]
        insecure: bool,
    },
    /// Inspect and trigger runs on a trigger server
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Run => run::run_pipeline(config).await,
        Commands::Apply => apply::apply_descriptor(config).await,
        Commands::Validate { descriptor } => validate::validate_descriptor(&descriptor),
        Commands::Resolve {
            reference,
            registry,
            insecure,
        } => resolve::resolve_reference(&reference, registry.as_deref(), insecure).await,
        Commands::Runs { command } => runs::handle_runs_command(command, config).await,
    }
}
