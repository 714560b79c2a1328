//! Dockhand trigger server
//!
//! Accepts source-push webhooks and manual run requests, executes pipeline
//! runs in the background one at a time, and serves their status and logs.

use anyhow::{Context, Result};
use dockhand_core::definition::{PipelineDefinition, Secrets};
use dockhand_runner::Pipeline;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod config;
pub mod repository;
pub mod service;
pub mod state;

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dockhand_orchestrator=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Dockhand trigger server...");

    let config = Config::from_env().context("Invalid server configuration")?;

    let definition = PipelineDefinition::load(&config.pipeline_path).with_context(|| {
        format!(
            "Failed to load pipeline definition {}",
            config.pipeline_path.display()
        )
    })?;

    tracing::info!(
        "Loaded pipeline '{}' ({} services, branch {})",
        definition.name,
        definition.services.len(),
        definition.branch
    );

    // Secrets are re-read for every run; this only reports a missing setup early
    if let Err(e) = Secrets::from_env() {
        tracing::warn!("Runs will be rejected until secrets are provided: {}", e);
    }

    let state = AppState::new(Pipeline::standard(definition), Arc::new(Secrets::from_env))
        .with_run_history(config.run_history);

    // Build router with all API endpoints
    let app = api::create_router(state);

    tracing::info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    axum::serve(listener, app)
        .await
        .context("Failed to start server")?;

    Ok(())
}
