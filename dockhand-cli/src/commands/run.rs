//! Local pipeline run
//!
//! Runs build, publish and deploy in-process and streams progress to the
//! terminal. Exits non-zero when the run fails.

use anyhow::{Context, Result};
use colored::*;
use dockhand_core::definition::Secrets;
use dockhand_core::domain::log::LogEntry;
use dockhand_core::domain::run::{PipelineRun, RunState, Trigger};
use dockhand_runner::{ContainerEngine, Pipeline, RunReporter};
use std::sync::Mutex;
use uuid::Uuid;

use super::output;
use crate::config::Config;

/// Prints log lines as they arrive and announces each state change once
struct ConsoleReporter {
    last_state: Mutex<Option<RunState>>,
}

impl ConsoleReporter {
    fn new() -> Self {
        Self {
            last_state: Mutex::new(None),
        }
    }
}

impl RunReporter for ConsoleReporter {
    fn update(&self, run: &PipelineRun) {
        let Ok(mut last) = self.last_state.lock() else {
            return;
        };
        if *last != Some(run.state) {
            *last = Some(run.state);
            println!("{} {}", "==>".cyan().bold(), output::colorize_state(run.state));
        }
    }

    fn log(&self, _run_id: Uuid, entry: LogEntry) {
        output::print_log_entry(&entry);
    }
}

/// Run the whole pipeline from this machine
pub async fn run_pipeline(config: &Config) -> Result<()> {
    let definition = config.load_definition()?;
    let secrets = Secrets::from_env().context("Deploy secrets are incomplete")?;

    ContainerEngine::new(definition.engine.clone())
        .check_available()
        .await
        .context("Container engine is not available")?;
    tracing::debug!("Loaded pipeline {} from {}", definition.name, config.pipeline_path.display());

    println!(
        "{} {} ({} services)",
        "Running pipeline".bold(),
        definition.name.cyan(),
        definition.services.len()
    );

    let pipeline = Pipeline::standard(definition);
    let run = pipeline.new_run(Trigger::Manual);
    let run = pipeline
        .execute(run, &secrets, &ConsoleReporter::new())
        .await;

    println!();
    output::print_run_details(&run);

    if run.state != RunState::Succeeded {
        anyhow::bail!(
            "Run {} failed{}",
            run.id,
            run.failed_stage()
                .map(|s| format!(" at {}", s.name))
                .unwrap_or_default()
        );
    }

    println!("\n{}", "✓ Deployed successfully".green().bold());
    Ok(())
}
