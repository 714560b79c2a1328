//! Apply command
//!
//! Runs only the deploy stage: connect to the host, read its descriptor and
//! converge it. Useful after a manual publish or to repair drift.

use anyhow::{Context, Result};
use colored::*;
use dockhand_core::definition::Secrets;
use dockhand_core::error::PipelineError;
use dockhand_runner::remote::{self, RemoteExecutor, StandardRemoteExecutor};

use super::output;
use crate::config::Config;

pub async fn apply_descriptor(config: &Config) -> Result<()> {
    let definition = config.load_definition()?;
    let secrets = Secrets::from_env().context("Deploy secrets are incomplete")?;
    let deploy = &definition.deploy;

    println!(
        "{} {} on {}",
        "Applying".bold(),
        deploy.descriptor.cyan(),
        secrets.host.destination()
    );

    let executor = StandardRemoteExecutor::new(deploy.connect_timeout());
    let session = executor
        .connect(&secrets.host)
        .await
        .with_context(|| format!("Failed to connect to {}", secrets.host.address))?;

    let descriptor = remote::read_descriptor(session.as_ref(), &deploy.descriptor).await?;

    match remote::apply(session.as_ref(), &deploy.engine, &descriptor).await {
        Ok(report) => {
            output::print_apply_report(&report);
            if report.is_noop() {
                println!("{}", "Nothing to do; every service is up to date".dimmed());
            } else {
                println!("{}", "✓ Applied".green().bold());
            }
            Ok(())
        }
        Err(e) => {
            if let PipelineError::DeployFailure { report, .. } = &e {
                println!("{}", "Partial apply:".yellow());
                output::print_apply_report(report);
            }
            Err(e).context("Apply failed")
        }
    }
}
