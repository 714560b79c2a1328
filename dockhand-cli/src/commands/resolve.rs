//! Resolve command

use anyhow::{Context, Result, anyhow};
use dockhand_core::definition::RegistryCredentials;
use dockhand_core::domain::artifact::ImageRef;
use dockhand_runner::registry::RegistryApi;

const DEFAULT_REGISTRY: &str = "docker.io";

/// Print the digest `reference` currently points at
pub async fn resolve_reference(
    reference: &str,
    registry: Option<&str>,
    insecure: bool,
) -> Result<()> {
    let image = ImageRef::parse(reference)
        .ok_or_else(|| anyhow!("'{}' is not a valid image reference", reference))?;
    let host = registry.unwrap_or_else(|| registry_host(&image.name));
    let credentials = RegistryCredentials::from_env()?;
    tracing::debug!("Resolving {} against {}", image, host);

    let digest = RegistryApi::new(host, insecure)
        .manifest_digest(&image.name, &image.tag, credentials.as_ref())
        .await
        .with_context(|| format!("Failed to resolve {}", image))?;

    println!("{}", digest);
    Ok(())
}

/// Registry host named by an image, following the engine's rules
///
/// The first path segment is a host when it looks like one (has a dot or a
/// port, or is `localhost`); otherwise the image lives on Docker Hub.
fn registry_host(name: &str) -> &str {
    match name.split_once('/') {
        Some((first, _)) if first.contains('.') || first.contains(':') || first == "localhost" => {
            first
        }
        _ => DEFAULT_REGISTRY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_host() {
        assert_eq!(registry_host("registry.example.com/acme/backend"), "registry.example.com");
        assert_eq!(registry_host("localhost:5000/backend"), "localhost:5000");
        assert_eq!(registry_host("localhost/backend"), "localhost");
        assert_eq!(registry_host("acme/backend"), "docker.io");
        assert_eq!(registry_host("mongo"), "docker.io");
    }
}
