//! Apply step
//!
//! Converges the host onto a composition descriptor:
//! 0. Ensure the project network and named volumes exist
//! 1. Pull every referenced image by tag
//! 2. Walk instances in dependency order and recreate the ones whose image
//!    id or configuration fingerprint differs from what is running
//! 3. Start containers that are up to date but not running
//!
//! Running instances that already match are left alone, so applying twice in
//! a row restarts nothing. Volumes are never removed. There is no rollback: a
//! failure returns the partial report inside the error.

use dockhand_core::compose::CompositionDescriptor;
use dockhand_core::domain::instance::{ApplyReport, RuntimeInstance};
use dockhand_core::error::{PipelineError, Result};
use std::collections::HashMap;
use tracing::{debug, info, warn};

use super::RemoteSession;
use crate::engine::args;

/// Container label carrying the configuration fingerprint
pub const CONFIG_LABEL: &str = "dockhand.config";

const IMAGE_ID_FORMAT: &str = "{{.Id}}";
const CONTAINER_STATE_FORMAT: &str =
    "{{.Image}}|{{.State.Running}}|{{index .Config.Labels \"dockhand.config\"}}";

/// Reads and validates the descriptor stored at `path` on the host
pub async fn read_descriptor(
    session: &dyn RemoteSession,
    path: &str,
) -> Result<CompositionDescriptor> {
    debug!("Reading descriptor {} on {}", path, session.host());

    let output = session.exec("cat", &[path.to_string()]).await?;
    if !output.success() {
        return Err(PipelineError::InvalidDescriptor(format!(
            "cannot read {} on {}: {}",
            path,
            session.host(),
            output.error_text()
        )));
    }

    CompositionDescriptor::parse(&output.stdout)
}

/// Applies `descriptor` on the host using the `engine` CLI
///
/// # Arguments
/// * `session` - Open session on the target host
/// * `engine` - Container engine binary on the host (e.g. "docker")
/// * `descriptor` - Validated descriptor; instances are already in start order
///
/// # Returns
/// What was pulled, recreated and left unchanged
pub async fn apply(
    session: &dyn RemoteSession,
    engine: &str,
    descriptor: &CompositionDescriptor,
) -> Result<ApplyReport> {
    let mut report = ApplyReport::default();

    info!(
        "Applying project '{}' ({} services) on {}",
        descriptor.project,
        descriptor.instances.len(),
        session.host()
    );

    ensure_exists(session, engine, "network", &descriptor.network, &report).await?;
    for volume in &descriptor.volumes {
        ensure_exists(session, engine, "volume", volume, &report).await?;
    }

    let mut image_ids: HashMap<String, String> = HashMap::new();
    for image in descriptor.images() {
        let reference = image.to_string();
        info!("Pulling {}", reference);

        let pulled = session.exec(engine, &args(["pull", reference.as_str()])).await;
        let output = pulled.map_err(|e| with_report(e, &report))?;
        if !output.success() {
            return Err(failure(
                format!("pull of {} failed: {}", reference, output.error_text()),
                &report,
            ));
        }

        let inspect = session
            .exec(
                engine,
                &args(["image", "inspect", "--format", IMAGE_ID_FORMAT, reference.as_str()]),
            )
            .await
            .map_err(|e| with_report(e, &report))?;
        let id = inspect.stdout.trim().to_string();
        if !inspect.success() || id.is_empty() {
            return Err(failure(
                format!("pulled image {} could not be inspected", reference),
                &report,
            ));
        }

        report.pulled.push(image);
        image_ids.insert(reference, id);
    }

    for instance in &descriptor.instances {
        let container = descriptor.container_name(&instance.service);
        let fingerprint = instance.config_fingerprint();
        let wanted_id = image_ids
            .get(&instance.image.to_string())
            .cloned()
            .unwrap_or_default();

        let existing = container_state(session, engine, &container)
            .await
            .map_err(|e| with_report(e, &report))?;

        match existing {
            Some(state) if state.matches(&wanted_id, &fingerprint) && state.running => {
                debug!("{} is up to date", container);
                report.unchanged.push(instance.service.clone());
                continue;
            }
            Some(state) if state.matches(&wanted_id, &fingerprint) => {
                info!("Starting stopped container {}", container);
                let started = session
                    .exec(engine, &args(["start", container.as_str()]))
                    .await
                    .map_err(|e| with_report(e, &report))?;
                if !started.success() {
                    return Err(failure(
                        format!("starting {} failed: {}", container, started.error_text()),
                        &report,
                    ));
                }
                report.restarted.push(instance.service.clone());
                continue;
            }
            Some(_) => {
                info!("Recreating {}", container);
                let removed = session
                    .exec(engine, &args(["rm", "-f", container.as_str()]))
                    .await
                    .map_err(|e| with_report(e, &report))?;
                if !removed.success() {
                    return Err(failure(
                        format!("removing {} failed: {}", container, removed.error_text()),
                        &report,
                    ));
                }
            }
            None => info!("Creating {}", container),
        }

        let started = session
            .exec(
                engine,
                &run_args(&container, &descriptor.network, instance, &fingerprint),
            )
            .await
            .map_err(|e| with_report(e, &report))?;
        if !started.success() {
            warn!("Starting {} failed", container);
            return Err(failure(
                format!("starting {} failed: {}", container, started.error_text()),
                &report,
            ));
        }

        report.recreated.push(instance.service.clone());
    }

    info!(
        "Apply finished: {} recreated, {} restarted, {} unchanged",
        report.recreated.len(),
        report.restarted.len(),
        report.unchanged.len()
    );

    Ok(report)
}

/// Creates a network or volume unless it already exists
async fn ensure_exists(
    session: &dyn RemoteSession,
    engine: &str,
    kind: &str,
    name: &str,
    report: &ApplyReport,
) -> Result<()> {
    let inspect = session
        .exec(engine, &args([kind, "inspect", name]))
        .await
        .map_err(|e| with_report(e, report))?;
    if inspect.success() {
        return Ok(());
    }

    info!("Creating {} {}", kind, name);
    let created = session
        .exec(engine, &args([kind, "create", name]))
        .await
        .map_err(|e| with_report(e, report))?;
    if !created.success() {
        return Err(failure(
            format!("creating {} {} failed: {}", kind, name, created.error_text()),
            report,
        ));
    }
    Ok(())
}

/// What the engine reports about an existing container
#[derive(Debug, PartialEq, Eq)]
struct ContainerState {
    image_id: String,
    running: bool,
    fingerprint: String,
}

impl ContainerState {
    fn parse(line: &str) -> Self {
        let mut fields = line.trim().splitn(3, '|');
        let image_id = fields.next().unwrap_or_default().to_string();
        let running = fields.next() == Some("true");
        let fingerprint = fields.next().unwrap_or_default().to_string();
        Self {
            image_id,
            running,
            fingerprint,
        }
    }

    fn matches(&self, image_id: &str, fingerprint: &str) -> bool {
        self.image_id == image_id && self.fingerprint == fingerprint
    }
}

async fn container_state(
    session: &dyn RemoteSession,
    engine: &str,
    container: &str,
) -> Result<Option<ContainerState>> {
    let output = session
        .exec(
            engine,
            &args(["container", "inspect", "--format", CONTAINER_STATE_FORMAT, container]),
        )
        .await?;

    if !output.success() {
        return Ok(None);
    }

    Ok(Some(ContainerState::parse(&output.stdout)))
}

fn run_args(
    container: &str,
    network: &str,
    instance: &RuntimeInstance,
    fingerprint: &str,
) -> Vec<String> {
    let mut cmd = args([
        "run",
        "-d",
        "--name",
        container,
        "--network",
        network,
        "--network-alias",
        instance.service.as_str(),
        "--restart",
        instance.restart.as_flag(),
        "--label",
    ]);
    cmd.push(format!("{}={}", CONFIG_LABEL, fingerprint));

    for port in &instance.ports {
        cmd.push("-p".to_string());
        cmd.push(format!("{}:{}", port.host, port.container));
    }
    for (key, value) in &instance.environment {
        cmd.push("-e".to_string());
        cmd.push(format!("{}={}", key, value));
    }
    for volume in &instance.volumes {
        cmd.push("-v".to_string());
        cmd.push(format!("{}:{}", volume.volume, volume.target));
    }

    cmd.push(instance.image.to_string());
    cmd
}

fn failure(message: String, report: &ApplyReport) -> PipelineError {
    PipelineError::DeployFailure {
        message,
        report: report.clone(),
    }
}

/// Attaches the partial report to a transport-level deploy failure
fn with_report(err: PipelineError, report: &ApplyReport) -> PipelineError {
    match err {
        PipelineError::DeployFailure { message, .. } => failure(message, report),
        other => other,
    }
}
