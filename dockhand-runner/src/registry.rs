//! Artifact registry client
//!
//! Publishing goes through the local container engine (`login`, `tag`,
//! `push`) because the engine owns the image layers. Resolving a tag talks to
//! the Registry HTTP API v2 directly and reads the manifest digest the
//! registry serves for it right now.

use async_trait::async_trait;
use dockhand_core::definition::{RegistryConfig, RegistryCredentials};
use dockhand_core::domain::artifact::Artifact;
use dockhand_core::error::{PipelineError, Result};
use reqwest::header::{ACCEPT, HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::engine::{CommandOutput, ContainerEngine, args};

/// Manifest media types accepted when resolving a tag
const MANIFEST_TYPES: &str = "application/vnd.oci.image.index.v1+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.docker.distribution.manifest.v2+json";

/// Publishes artifacts and resolves tags
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// Authenticates the engine against the registry
    ///
    /// Called once per publish stage, before any push. Without credentials
    /// the pushes go out anonymously.
    async fn login(&self, credentials: Option<&RegistryCredentials>) -> Result<()>;

    /// Uploads `artifact` under each tag, in order
    ///
    /// Tags are not updated atomically: a failure partway leaves the earlier
    /// tags pointing at the new artifact.
    ///
    /// # Returns
    /// The references that were pushed
    async fn publish(&self, artifact: &Artifact, tags: &[String]) -> Result<Vec<String>>;

    /// Returns the digest `name:tag` currently points at
    async fn resolve(
        &self,
        name: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String>;
}

/// Registry client backed by the local engine and the v2 HTTP API
pub struct EngineRegistry {
    engine: ContainerEngine,
    api: RegistryApi,
}

impl EngineRegistry {
    pub fn new(engine: ContainerEngine, config: &RegistryConfig) -> Self {
        Self {
            engine,
            api: RegistryApi::new(&config.host, config.insecure),
        }
    }

    async fn engine_login(&self, credentials: &RegistryCredentials) -> Result<()> {
        let host = self.api.host().to_string();
        let output = self
            .engine
            .run_with_stdin(
                &args([
                    "login",
                    "--username",
                    credentials.username.as_str(),
                    "--password-stdin",
                    host.as_str(),
                ]),
                &credentials.password,
            )
            .await
            .map_err(|e| PipelineError::AuthFailure {
                target: host.clone(),
                message: format!("{:#}", e),
            })?;

        if !output.success() {
            return Err(PipelineError::AuthFailure {
                target: host,
                message: output.error_text(),
            });
        }

        debug!("Logged in to {} as {}", host, credentials.username);
        Ok(())
    }

    async fn engine_step(&self, cmd: Vec<String>, reference: &str) -> Result<()> {
        let output = self
            .engine
            .run(&cmd)
            .await
            .map_err(|e| PipelineError::PublishFailure {
                reference: reference.to_string(),
                message: format!("{:#}", e),
            })?;

        if output.success() {
            Ok(())
        } else {
            Err(classify_push_failure(&output, self.api.host(), reference))
        }
    }
}

#[async_trait]
impl ArtifactRegistry for EngineRegistry {
    async fn login(&self, credentials: Option<&RegistryCredentials>) -> Result<()> {
        match credentials {
            Some(credentials) => self.engine_login(credentials).await,
            None => {
                debug!("No registry credentials; pushing to {} anonymously", self.api.host());
                Ok(())
            }
        }
    }

    async fn publish(&self, artifact: &Artifact, tags: &[String]) -> Result<Vec<String>> {
        let mut pushed = Vec::with_capacity(tags.len());
        for tag in tags {
            let reference = artifact.reference(tag).to_string();
            info!("Pushing {} ({})", reference, artifact.short_id());

            self.engine_step(
                args(["tag", artifact.id.as_str(), reference.as_str()]),
                &reference,
            )
            .await?;
            self.engine_step(args(["push", reference.as_str()]), &reference)
                .await
                .inspect_err(|_| {
                    if !pushed.is_empty() {
                        warn!(
                            "Publish of {} stopped partway; already pushed: {}",
                            artifact.repository,
                            pushed.join(", ")
                        );
                    }
                })?;

            pushed.push(reference);
        }

        Ok(pushed)
    }

    async fn resolve(
        &self,
        name: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        self.api.manifest_digest(name, tag, credentials).await
    }
}

fn classify_push_failure(output: &CommandOutput, host: &str, reference: &str) -> PipelineError {
    let text = output.error_text();
    let lower = text.to_lowercase();
    if lower.contains("unauthorized")
        || lower.contains("authentication required")
        || lower.contains("denied")
    {
        PipelineError::AuthFailure {
            target: host.to_string(),
            message: text,
        }
    } else {
        PipelineError::PublishFailure {
            reference: reference.to_string(),
            message: text,
        }
    }
}

/// Minimal Registry HTTP API v2 client
#[derive(Debug, Clone)]
pub struct RegistryApi {
    host: String,
    base_url: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

/// Parsed `WWW-Authenticate` challenge
#[derive(Debug, Clone, PartialEq, Eq)]
enum Challenge {
    Basic,
    Bearer(HashMap<String, String>),
}

impl RegistryApi {
    /// Creates a client for a registry host
    ///
    /// Docker Hub's API lives on `registry-1.docker.io` even though images
    /// are named after `docker.io`.
    pub fn new(host: &str, insecure: bool) -> Self {
        let host = host.trim_end_matches('/').to_string();
        let api_host = match host.as_str() {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            other => other,
        };
        let scheme = if insecure { "http" } else { "https" };
        Self {
            base_url: format!("{}://{}", scheme, api_host),
            host,
            client: Client::new(),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Repository path inside the registry for a (possibly host-qualified) name
    pub fn repository_path(&self, name: &str) -> String {
        let path = name
            .strip_prefix(&format!("{}/", self.host))
            .unwrap_or(name)
            .to_string();
        if self.is_docker_hub() && !path.contains('/') {
            format!("library/{}", path)
        } else {
            path
        }
    }

    fn is_docker_hub(&self) -> bool {
        self.base_url.ends_with("registry-1.docker.io")
    }

    /// HEADs the manifest for `name:tag` and returns its digest
    pub async fn manifest_digest(
        &self,
        name: &str,
        tag: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let reference = format!("{}:{}", name, tag);
        let url = format!(
            "{}/v2/{}/manifests/{}",
            self.base_url,
            self.repository_path(name),
            tag
        );

        let publish_error = |message: String| PipelineError::PublishFailure {
            reference: reference.clone(),
            message,
        };

        let mut response = self
            .client
            .head(&url)
            .header(ACCEPT, MANIFEST_TYPES)
            .send()
            .await
            .map_err(|e| publish_error(e.to_string()))?;

        if response.status() == StatusCode::UNAUTHORIZED {
            let challenge = parse_challenge(response.headers()).ok_or_else(|| {
                publish_error("registry returned 401 without a usable challenge".to_string())
            })?;

            let request = self.client.head(&url).header(ACCEPT, MANIFEST_TYPES);
            let request = match challenge {
                Challenge::Basic => match credentials {
                    Some(c) => request.basic_auth(&c.username, Some(&c.password)),
                    None => {
                        return Err(PipelineError::AuthFailure {
                            target: self.host.clone(),
                            message: "registry requires credentials".to_string(),
                        });
                    }
                },
                Challenge::Bearer(params) => {
                    let token = self.fetch_token(&params, credentials).await?;
                    request.bearer_auth(token)
                }
            };

            response = request
                .send()
                .await
                .map_err(|e| publish_error(e.to_string()))?;
        }

        match response.status() {
            status if status.is_success() => response
                .headers()
                .get("Docker-Content-Digest")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| publish_error("response has no Docker-Content-Digest".to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(PipelineError::AuthFailure {
                target: self.host.clone(),
                message: format!("registry rejected credentials ({})", response.status()),
            }),
            StatusCode::NOT_FOUND => Err(publish_error("tag not found".to_string())),
            status => Err(publish_error(format!("registry returned {}", status))),
        }
    }

    /// Runs the token half of the bearer challenge
    async fn fetch_token(
        &self,
        params: &HashMap<String, String>,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let auth_error = |message: String| PipelineError::AuthFailure {
            target: self.host.clone(),
            message,
        };

        let realm = params
            .get("realm")
            .ok_or_else(|| auth_error("bearer challenge without realm".to_string()))?;

        let query: Vec<(&str, &str)> = ["service", "scope"]
            .iter()
            .filter_map(|k| params.get(*k).map(|v| (*k, v.as_str())))
            .collect();

        let mut request = self.client.get(realm.as_str()).query(&query);
        if let Some(c) = credentials {
            request = request.basic_auth(&c.username, Some(&c.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| auth_error(format!("token request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(auth_error(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error(format!("invalid token response: {}", e)))?;

        body.token
            .or(body.access_token)
            .ok_or_else(|| auth_error("token response has no token".to_string()))
    }
}

fn parse_challenge(headers: &HeaderMap) -> Option<Challenge> {
    let value = headers.get(WWW_AUTHENTICATE)?.to_str().ok()?;
    parse_challenge_value(value)
}

fn parse_challenge_value(value: &str) -> Option<Challenge> {
    let (scheme, rest) = value.trim().split_once(' ').unwrap_or((value.trim(), ""));
    match scheme.to_ascii_lowercase().as_str() {
        "basic" => Some(Challenge::Basic),
        "bearer" => {
            let mut params = HashMap::new();
            let mut remaining = rest.trim();
            while !remaining.is_empty() {
                let (key, after_key) = remaining.split_once('=')?;
                let after_key = after_key.trim_start();
                let (val, after_val) = match after_key.strip_prefix('"') {
                    Some(quoted) => {
                        let end = quoted.find('"')?;
                        (&quoted[..end], &quoted[end + 1..])
                    }
                    None => match after_key.find(',') {
                        Some(end) => (&after_key[..end], &after_key[end..]),
                        None => (after_key, ""),
                    },
                };
                params.insert(key.trim().to_ascii_lowercase(), val.to_string());
                remaining = after_val.trim_start_matches([',', ' ']);
            }
            Some(Challenge::Bearer(params))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_docker_hub_api_host() {
        let api = RegistryApi::new("docker.io", false);
        assert_eq!(api.base_url(), "https://registry-1.docker.io");
        assert_eq!(api.repository_path("docker.io/acme/backend"), "acme/backend");
        assert_eq!(api.repository_path("mongo"), "library/mongo");
    }

    #[test]
    fn test_private_registry_paths() {
        let api = RegistryApi::new("localhost:5000/", true);
        assert_eq!(api.base_url(), "http://localhost:5000");
        assert_eq!(api.host(), "localhost:5000");
        assert_eq!(api.repository_path("localhost:5000/frontend"), "frontend");
    }

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = parse_challenge_value(
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:acme/backend:pull""#,
        )
        .unwrap();

        match challenge {
            Challenge::Bearer(params) => {
                assert_eq!(params["realm"], "https://auth.docker.io/token");
                assert_eq!(params["service"], "registry.docker.io");
                assert_eq!(params["scope"], "repository:acme/backend:pull");
            }
            other => panic!("unexpected challenge: {other:?}"),
        }
    }

    #[test]
    fn test_parse_basic_and_unknown_challenges() {
        assert_eq!(
            parse_challenge_value(r#"Basic realm="Registry""#),
            Some(Challenge::Basic)
        );
        assert_eq!(parse_challenge_value("Negotiate"), None);
    }

    #[test]
    fn test_classify_push_failure() {
        let denied = CommandOutput {
            stdout: String::new(),
            stderr: "denied: requested access to the resource is denied".to_string(),
            exit_code: 1,
        };
        assert!(classify_push_failure(&denied, "docker.io", "acme/backend:v1").is_auth());

        let network = CommandOutput {
            stdout: String::new(),
            stderr: "dial tcp: i/o timeout".to_string(),
            exit_code: 125,
        };
        assert!(matches!(
            classify_push_failure(&network, "docker.io", "acme/backend:v1"),
            PipelineError::PublishFailure { .. }
        ));
    }
}
