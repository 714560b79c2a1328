//! Runs commands
//!
//! Talks to a trigger server: list, inspect and trigger runs.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use dockhand_client::DockhandClient;

use super::output;
use crate::config::Config;
use crate::id_resolver::resolve_run_id;
use crate::types::IdOrPrefix;

/// Run subcommands
#[derive(Subcommand)]
pub enum RunsCommands {
    /// List runs, newest first
    List,
    /// Show a run's state, stages and artifacts
    Get {
        /// Run ID or unique prefix
        id: String,

        /// Print the raw run record as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a run's log
    Logs {
        /// Run ID or unique prefix
        id: String,
    },
    /// Start a run on the server
    Trigger {
        /// Send a push event for this branch instead of a manual trigger
        #[arg(long)]
        branch: Option<String>,
    },
}

/// Handle run commands
pub async fn handle_runs_command(command: RunsCommands, config: &Config) -> Result<()> {
    let client = DockhandClient::new(&config.server_url);

    match command {
        RunsCommands::List => list_runs(&client).await,
        RunsCommands::Get { id, json } => get_run(&client, &id, json).await,
        RunsCommands::Logs { id } => get_logs(&client, &id).await,
        RunsCommands::Trigger { branch } => trigger(&client, branch.as_deref()).await,
    }
}

async fn list_runs(client: &DockhandClient) -> Result<()> {
    let runs = client.list_runs().await.context("Failed to list runs")?;

    if runs.is_empty() {
        println!("{}", "No runs yet".dimmed());
        return Ok(());
    }

    println!("{}", format!("Runs ({}):", runs.len()).bold());
    println!();
    for run in &runs {
        output::print_run_summary(run);
    }
    Ok(())
}

async fn get_run(client: &DockhandClient, id: &str, json: bool) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let run = client
        .get_run(run_id)
        .await
        .with_context(|| format!("Failed to get run {}", run_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&run)?);
        return Ok(());
    }

    output::print_run_details(&run);
    Ok(())
}

async fn get_logs(client: &DockhandClient, id: &str) -> Result<()> {
    let run_id = resolve_run_id(client, &IdOrPrefix::parse(id)).await?;
    let logs = client
        .get_logs(run_id)
        .await
        .with_context(|| format!("Failed to get logs for run {}", run_id))?;

    if logs.is_empty() {
        println!("{}", "No log entries".dimmed());
        return Ok(());
    }

    for entry in &logs {
        output::print_log_entry(entry);
    }
    Ok(())
}

async fn trigger(client: &DockhandClient, branch: Option<&str>) -> Result<()> {
    let Some(branch) = branch else {
        let run = client.trigger_run().await.context("Failed to start run")?;
        println!("{}", "✓ Run started".green().bold());
        println!("  ID: {}", run.id.to_string().cyan());
        return Ok(());
    };

    let response = client
        .push(branch)
        .await
        .with_context(|| format!("Failed to send push for {}", branch))?;

    match (response.accepted, response.run_id) {
        (true, Some(run_id)) => {
            println!("{}", "✓ Push accepted".green().bold());
            println!("  ID: {}", run_id.to_string().cyan());
        }
        _ => {
            println!(
                "{} {}",
                "Push ignored:".yellow(),
                response.reason.as_deref().unwrap_or("no reason given")
            );
        }
    }
    Ok(())
}
