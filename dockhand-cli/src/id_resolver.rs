//! ID resolver module
//!
//! Resolves run ID prefixes to full UUIDs by querying the trigger server, so
//! users can type `dockhand runs get 3f2a` instead of a full UUID.

use anyhow::{Context, Result, anyhow};
use dockhand_client::DockhandClient;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a run ID or prefix to a full UUID
///
/// If the input is already a full UUID, returns it immediately.
/// Otherwise, fetches the run list and finds the one matching the prefix.
///
/// # Errors
/// Returns an error if:
/// - No run matches the prefix
/// - Multiple runs match the prefix (ambiguous)
/// - API call fails
pub async fn resolve_run_id(client: &DockhandClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let runs = client
        .list_runs()
        .await
        .context("Failed to fetch runs for ID resolution")?;

    match_prefix(runs.iter().map(|r| r.id), &id_or_prefix.to_string())
}

/// Finds the single id starting with `prefix`
fn match_prefix(ids: impl Iterator<Item = Uuid>, prefix: &str) -> Result<Uuid> {
    let matches: Vec<Uuid> = ids
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No run found with ID starting with '{}'", prefix)),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple runs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
