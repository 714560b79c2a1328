//! In-memory fakes for the pipeline components
//!
//! Used by this crate's tests and, through the `testing` feature, by the
//! trigger server's tests. The fake host understands just enough engine
//! commands to run the apply step against an in-memory container table.

use async_trait::async_trait;
use dockhand_core::definition::{HostTarget, RegistryCredentials, ServiceBuild};
use dockhand_core::domain::artifact::Artifact;
use dockhand_core::error::{PipelineError, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::builder::ImageBuilder;
use crate::engine::CommandOutput;
use crate::registry::ArtifactRegistry;
use crate::remote::apply::CONFIG_LABEL;
use crate::remote::{RemoteExecutor, RemoteSession};

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        stderr: String::new(),
        exit_code: 0,
    }
}

fn err(code: i32, stderr: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: String::new(),
        stderr: stderr.into(),
        exit_code: code,
    }
}

#[derive(Default)]
struct BuilderState {
    builds: Vec<String>,
    failing: HashSet<String>,
    counter: usize,
    delay: Option<Duration>,
    events: Vec<String>,
}

/// Builder that produces ids like `sha256:backend-1` without an engine
#[derive(Clone, Default)]
pub struct FakeBuilder {
    state: Arc<Mutex<BuilderState>>,
}

impl FakeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every build of `service` fail
    pub fn fail(&self, service: &str) {
        guard(&self.state).failing.insert(service.to_string());
    }

    /// Makes every build take at least `delay`
    pub fn slow_down(&self, delay: Duration) {
        guard(&self.state).delay = Some(delay);
    }

    /// Services built so far, in completion order
    pub fn builds(&self) -> Vec<String> {
        guard(&self.state).builds.clone()
    }

    /// `start:<service>` / `end:<service>` markers in the order they happened
    pub fn events(&self) -> Vec<String> {
        guard(&self.state).events.clone()
    }
}

#[async_trait]
impl ImageBuilder for FakeBuilder {
    async fn build(
        &self,
        service: &ServiceBuild,
        repository: &str,
        _tag: &str,
    ) -> Result<Artifact> {
        let delay = {
            let mut state = guard(&self.state);
            state.events.push(format!("start:{}", service.name));
            state.delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = guard(&self.state);
        state.events.push(format!("end:{}", service.name));
        state.builds.push(service.name.clone());

        if state.failing.contains(&service.name) {
            return Err(PipelineError::BuildFailure {
                service: service.name.clone(),
                message: "step 3/5 RUN npm ci exited with code 1".to_string(),
                log: "npm ERR! missing: react@18".to_string(),
            });
        }

        state.counter += 1;
        Ok(Artifact {
            service: service.name.clone(),
            repository: repository.to_string(),
            id: format!("sha256:{}-{}", service.name, state.counter),
            tags: Vec::new(),
            context: service.context.clone(),
        })
    }
}

#[derive(Default)]
struct RegistryState {
    tags: HashMap<String, String>,
    published: Vec<String>,
    reject_auth: bool,
    logins: usize,
    failing: HashSet<String>,
}

/// Registry that keeps `reference -> id` in memory
#[derive(Clone, Default)]
pub struct FakeRegistry {
    state: Arc<Mutex<RegistryState>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `reference` at `id`, as if someone else had pushed it
    pub fn seed(&self, reference: &str, id: &str) {
        guard(&self.state)
            .tags
            .insert(reference.to_string(), id.to_string());
    }

    pub fn forget(&self, reference: &str) {
        guard(&self.state).tags.remove(reference);
    }

    pub fn lookup(&self, reference: &str) -> Option<String> {
        guard(&self.state).tags.get(reference).cloned()
    }

    /// Rejects every login with an auth failure
    pub fn reject_credentials(&self) {
        guard(&self.state).reject_auth = true;
    }

    /// Fails publishes of `service` with a publish failure
    pub fn fail_publish_of(&self, service: &str) {
        guard(&self.state).failing.insert(service.to_string());
    }

    pub fn logins(&self) -> usize {
        guard(&self.state).logins
    }

    /// References pushed so far
    pub fn published(&self) -> Vec<String> {
        guard(&self.state).published.clone()
    }
}

#[async_trait]
impl ArtifactRegistry for FakeRegistry {
    async fn login(&self, _credentials: Option<&RegistryCredentials>) -> Result<()> {
        let mut state = guard(&self.state);
        state.logins += 1;

        if state.reject_auth {
            return Err(PipelineError::AuthFailure {
                target: "registry.example.com".to_string(),
                message: "unauthorized: incorrect username or password".to_string(),
            });
        }
        Ok(())
    }

    async fn publish(&self, artifact: &Artifact, tags: &[String]) -> Result<Vec<String>> {
        let mut state = guard(&self.state);

        let mut pushed = Vec::with_capacity(tags.len());
        for tag in tags {
            let reference = artifact.reference(tag).to_string();
            if state.failing.contains(&artifact.service) {
                return Err(PipelineError::PublishFailure {
                    reference,
                    message: "blob upload unknown".to_string(),
                });
            }
            state.tags.insert(reference.clone(), artifact.id.clone());
            state.published.push(reference.clone());
            pushed.push(reference);
        }
        Ok(pushed)
    }

    async fn resolve(
        &self,
        name: &str,
        tag: &str,
        _credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let reference = format!("{}:{}", name, tag);
        self.lookup(&reference)
            .ok_or_else(|| PipelineError::PublishFailure {
                reference,
                message: "manifest unknown".to_string(),
            })
    }
}

#[derive(Default)]
struct HostState {
    files: HashMap<String, String>,
    networks: HashSet<String>,
    volumes: HashSet<String>,
    images: HashMap<String, String>,
    containers: HashMap<String, FakeContainer>,
    started: Vec<String>,
    failing_runs: HashSet<String>,
    unreachable: bool,
    reject_auth: bool,
    connects: usize,
    delay: Option<Duration>,
}

struct FakeContainer {
    image_id: String,
    fingerprint: String,
    running: bool,
}

/// Target host with an in-memory engine; acts as both executor and session
#[derive(Clone)]
pub struct FakeHost {
    registry: FakeRegistry,
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    /// Creates a host whose pulls are served by `registry`
    pub fn new(registry: FakeRegistry) -> Self {
        Self {
            registry,
            state: Arc::new(Mutex::new(HostState::default())),
        }
    }

    pub fn put_file(&self, path: &str, contents: &str) {
        guard(&self.state)
            .files
            .insert(path.to_string(), contents.to_string());
    }

    pub fn set_unreachable(&self) {
        guard(&self.state).unreachable = true;
    }

    pub fn reject_credentials(&self) {
        guard(&self.state).reject_auth = true;
    }

    /// Makes `run` of the named container fail
    pub fn fail_run_of(&self, container: &str) {
        guard(&self.state).failing_runs.insert(container.to_string());
    }

    /// Makes every command take at least `delay`
    pub fn slow_down(&self, delay: Duration) {
        guard(&self.state).delay = Some(delay);
    }

    pub fn connects(&self) -> usize {
        guard(&self.state).connects
    }

    /// Containers started so far, in start order
    pub fn started(&self) -> Vec<String> {
        guard(&self.state).started.clone()
    }

    pub fn container_image(&self, container: &str) -> Option<String> {
        guard(&self.state)
            .containers
            .get(container)
            .map(|c| c.image_id.clone())
    }

    /// Marks a container as exited, as after a crash or a manual stop
    pub fn stop_container(&self, container: &str) {
        if let Some(c) = guard(&self.state).containers.get_mut(container) {
            c.running = false;
        }
    }

    pub fn is_running(&self, container: &str) -> bool {
        guard(&self.state)
            .containers
            .get(container)
            .is_some_and(|c| c.running)
    }

    pub fn has_network(&self, name: &str) -> bool {
        guard(&self.state).networks.contains(name)
    }

    pub fn has_volume(&self, name: &str) -> bool {
        guard(&self.state).volumes.contains(name)
    }

    fn engine(&self, args: &[String]) -> CommandOutput {
        let words: Vec<&str> = args.iter().map(String::as_str).collect();
        let mut state = guard(&self.state);

        match words.as_slice() {
            ["network", "inspect", name] => exists(state.networks.contains(*name)),
            ["network", "create", name] => {
                state.networks.insert(name.to_string());
                ok(*name)
            }
            ["volume", "inspect", name] => exists(state.volumes.contains(*name)),
            ["volume", "create", name] => {
                state.volumes.insert(name.to_string());
                ok(*name)
            }
            ["pull", reference] => match self.registry.lookup(reference) {
                Some(id) => {
                    state.images.insert(reference.to_string(), id);
                    ok("")
                }
                None => err(1, format!("manifest for {} not found: manifest unknown", reference)),
            },
            ["image", "inspect", "--format", _, reference] => match state.images.get(*reference) {
                Some(id) => ok(format!("{}\n", id)),
                None => err(1, format!("No such image: {}", reference)),
            },
            ["container", "inspect", "--format", _, name] => match state.containers.get(*name) {
                Some(c) => ok(format!("{}|{}|{}\n", c.image_id, c.running, c.fingerprint)),
                None => err(1, format!("No such container: {}", name)),
            },
            ["start", name] => match state.containers.get_mut(*name) {
                Some(c) => {
                    c.running = true;
                    ok(*name)
                }
                None => err(1, format!("No such container: {}", name)),
            },
            ["rm", "-f", name] => {
                state.containers.remove(*name);
                ok(*name)
            }
            ["run", rest @ ..] => {
                let value_of = |flag: &str| {
                    rest.iter()
                        .position(|w| *w == flag)
                        .and_then(|i| rest.get(i + 1))
                        .map(|w| w.to_string())
                };
                let name = value_of("--name").unwrap_or_default();
                let label_prefix = format!("{}=", CONFIG_LABEL);
                let fingerprint = value_of("--label")
                    .and_then(|l| l.strip_prefix(&label_prefix).map(str::to_string))
                    .unwrap_or_default();
                let image = rest.last().map(|w| w.to_string()).unwrap_or_default();

                if state.failing_runs.contains(&name) {
                    return err(125, format!("container {} exited immediately", name));
                }
                if state.containers.contains_key(&name) {
                    return err(125, format!("container name \"{}\" is already in use", name));
                }
                let Some(id) = state.images.get(&image).cloned() else {
                    return err(125, format!("Unable to find image '{}' locally", image));
                };

                state.containers.insert(
                    name.clone(),
                    FakeContainer {
                        image_id: id,
                        fingerprint,
                        running: true,
                    },
                );
                state.started.push(name.clone());
                ok(format!("{}\n", name))
            }
            _ => err(127, format!("unsupported command: {}", words.join(" "))),
        }
    }
}

fn exists(found: bool) -> CommandOutput {
    if found { ok("[]") } else { err(1, "no such object") }
}

#[async_trait]
impl RemoteSession for FakeHost {
    fn host(&self) -> &str {
        "fake-host"
    }

    async fn exec(&self, program: &str, args: &[String]) -> Result<CommandOutput> {
        let delay = guard(&self.state).delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if program == "cat" {
            let state = guard(&self.state);
            let path = args.first().map(String::as_str).unwrap_or_default();
            return Ok(match state.files.get(path) {
                Some(contents) => ok(contents.clone()),
                None => err(1, format!("cat: {}: No such file or directory", path)),
            });
        }

        Ok(self.engine(args))
    }
}

#[async_trait]
impl RemoteExecutor for FakeHost {
    async fn connect(&self, target: &HostTarget) -> Result<Box<dyn RemoteSession>> {
        let mut state = guard(&self.state);
        state.connects += 1;

        if state.unreachable {
            return Err(PipelineError::ConnectTimeout {
                host: target.address.clone(),
                after: Duration::from_secs(15),
            });
        }
        if state.reject_auth {
            return Err(PipelineError::AuthFailure {
                target: target.destination(),
                message: "Permission denied (publickey)".to_string(),
            });
        }

        drop(state);
        Ok(Box::new(self.clone()))
    }
}
