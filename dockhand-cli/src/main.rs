//! Dockhand CLI
//!
//! Runs the build, publish and deploy pipeline from a workstation and talks
//! to a Dockhand trigger server.

mod commands;
mod config;
mod id_resolver;
mod types;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "dockhand")]
#[command(about = "Build, publish and deploy containerized services", long_about = None)]
struct Cli {
    /// Trigger server URL
    #[arg(long, env = "DOCKHAND_SERVER_URL", default_value = "http://localhost:8080")]
    server_url: String,

    /// Pipeline definition file
    #[arg(
        short = 'f',
        long,
        env = "DOCKHAND_PIPELINE",
        default_value = "dockhand.toml"
    )]
    pipeline: PathBuf,

    /// Show diagnostic logs (repeat for more detail)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "dockhand=warn",
        1 => "dockhand=info",
        _ => "dockhand=debug",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = Config {
        server_url: cli.server_url,
        pipeline_path: cli.pipeline,
    };
    config.validate()?;

    handle_command(cli.command, &config).await
}
