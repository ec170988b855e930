//! Test doubles for the container engine and readiness probe.
//!
//! Provides:
//! - [`StubEngine`]: an in-memory [`ContainerEngine`] with scriptable failures
//! - [`StubProbe`]: a [`ReadinessProbe`] that reports ready after N refusals
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dockspace::testing::{StubEngine, StubProbe};
//! use dockspace::workspace::EngineClient;
//!
//! let engine = Arc::new(StubEngine::new());
//! let client = Arc::new(EngineClient::from_engine(engine.clone()));
//! let probe = Arc::new(StubProbe::ready_after(2));
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::workspace::engine::{ContainerEngine, PublishedPort};
use crate::workspace::error::{EngineError, Result, WorkspaceError};
use crate::workspace::launch::LaunchSpec;
use crate::workspace::readiness::{ProbeStatus, ReadinessProbe};

/// First host port handed out for ephemeral bindings.
const STUB_EPHEMERAL_BASE: u16 = 40000;

#[derive(Debug, Clone)]
struct StubContainer {
    running: bool,
    spec: Option<LaunchSpec>,
}

#[derive(Default)]
struct StubState {
    containers: HashMap<String, StubContainer>,
    launched: Vec<LaunchSpec>,
    missing_images: HashSet<String>,
    pull_error: Option<EngineError>,
    pulled: Vec<String>,
    create_error: Option<EngineError>,
    start_errors: VecDeque<EngineError>,
    kill_error: Option<EngineError>,
    published: Option<Vec<PublishedPort>>,
    removed: Vec<String>,
}

/// In-memory container engine.
///
/// Containers are keyed by name. `published_ports` reports the spec's port
/// map in spec order unless overridden with [`StubEngine::set_published`].
#[derive(Default)]
pub struct StubEngine {
    state: Mutex<StubState>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a running container that was not created through `create`.
    pub fn add_running(&self, name: &str) {
        self.state().containers.insert(
            name.to_string(),
            StubContainer {
                running: true,
                spec: None,
            },
        );
    }

    /// Seed an exited container.
    pub fn add_stopped(&self, name: &str) {
        self.state().containers.insert(
            name.to_string(),
            StubContainer {
                running: false,
                spec: None,
            },
        );
    }

    /// Treat `image` as absent locally until it is pulled.
    pub fn without_image(&self, image: &str) {
        self.state().missing_images.insert(image.to_string());
    }

    /// Fail every `pull_image` with `err`.
    pub fn fail_pull_with(&self, err: EngineError) {
        self.state().pull_error = Some(err);
    }

    /// Images passed to `pull_image`, in call order.
    pub fn pulled(&self) -> Vec<String> {
        self.state().pulled.clone()
    }

    /// Fail every `create` with `err`.
    pub fn fail_create_with(&self, err: EngineError) {
        self.state().create_error = Some(err);
    }

    /// Fail the next `start` with `err`. Queued errors are consumed in order.
    pub fn fail_next_start_with(&self, err: EngineError) {
        self.state().start_errors.push_back(err);
    }

    /// Fail the next `kill` with `err`.
    pub fn fail_kill_with(&self, err: EngineError) {
        self.state().kill_error = Some(err);
    }

    /// Report these bindings from `published_ports` instead of the spec's.
    pub fn set_published(&self, ports: Vec<PublishedPort>) {
        self.state().published = Some(ports);
    }

    /// Drop a container behind the workspace's back.
    pub fn remove_out_of_band(&self, name: &str) {
        self.state().containers.remove(name);
    }

    pub fn exists(&self, name: &str) -> bool {
        self.state().containers.contains_key(name)
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.state()
            .containers
            .get(name)
            .is_some_and(|c| c.running)
    }

    /// Every spec passed to `create`, in call order.
    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.state().launched.clone()
    }

    /// Names passed to successful `remove` calls.
    pub fn removed(&self) -> Vec<String> {
        self.state().removed.clone()
    }
}

#[async_trait]
impl ContainerEngine for StubEngine {
    async fn ping(&self) -> std::result::Result<(), EngineError> {
        Ok(())
    }

    async fn pull_image(&self, image: &str) -> std::result::Result<(), EngineError> {
        let mut state = self.state();
        state.pulled.push(image.to_string());
        if let Some(err) = state.pull_error.clone() {
            return Err(err);
        }
        state.missing_images.remove(image);
        Ok(())
    }

    async fn create(&self, spec: &LaunchSpec) -> std::result::Result<String, EngineError> {
        let mut state = self.state();
        state.launched.push(spec.clone());
        if let Some(err) = state.create_error.clone() {
            return Err(err);
        }
        if state.missing_images.contains(&spec.image) {
            return Err(EngineError::ImageNotFound {
                image: spec.image.clone(),
            });
        }
        if state.containers.contains_key(&spec.name) {
            return Err(EngineError::Api {
                reason: format!("409: Conflict. The container name \"/{}\" is already in use", spec.name),
            });
        }
        state.containers.insert(
            spec.name.clone(),
            StubContainer {
                running: false,
                spec: Some(spec.clone()),
            },
        );
        Ok(spec.name.clone())
    }

    async fn start(&self, container: &str) -> std::result::Result<(), EngineError> {
        let mut state = self.state();
        if let Some(err) = state.start_errors.pop_front() {
            return Err(err);
        }
        match state.containers.get_mut(container) {
            Some(c) => {
                c.running = true;
                Ok(())
            }
            None => Err(EngineError::NotFound {
                name: container.to_string(),
            }),
        }
    }

    async fn published_ports(
        &self,
        container: &str,
    ) -> std::result::Result<Vec<PublishedPort>, EngineError> {
        let state = self.state();
        let found = state
            .containers
            .get(container)
            .ok_or_else(|| EngineError::NotFound {
                name: container.to_string(),
            })?;
        if let Some(ref published) = state.published {
            return Ok(published.clone());
        }
        let Some(ref spec) = found.spec else {
            return Ok(Vec::new());
        };
        Ok(spec
            .ports
            .iter()
            .enumerate()
            .map(|(i, (container_port, request))| PublishedPort {
                container_port: *container_port,
                host_port: request
                    .host_port()
                    .unwrap_or(STUB_EPHEMERAL_BASE + i as u16),
            })
            .collect())
    }

    async fn kill(&self, container: &str) -> std::result::Result<(), EngineError> {
        let mut state = self.state();
        if let Some(err) = state.kill_error.take() {
            return Err(err);
        }
        match state.containers.get_mut(container) {
            Some(c) if c.running => {
                c.running = false;
                Ok(())
            }
            Some(_) => Err(EngineError::NotRunning {
                name: container.to_string(),
            }),
            None => Err(EngineError::NotFound {
                name: container.to_string(),
            }),
        }
    }

    async fn remove(&self, container: &str, force: bool) -> std::result::Result<(), EngineError> {
        let mut state = self.state();
        let running = state.containers.get(container).map(|c| c.running);
        match running {
            None => Err(EngineError::NotFound {
                name: container.to_string(),
            }),
            Some(true) if !force => Err(EngineError::Api {
                reason: format!("409: container {} is running", container),
            }),
            Some(_) => {
                state.containers.remove(container);
                state.removed.push(container.to_string());
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone)]
enum ProbeMode {
    ReadyAfter(u32),
    Never,
    Fail(String),
}

/// Readiness probe with a scripted answer sequence.
#[derive(Debug)]
pub struct StubProbe {
    mode: ProbeMode,
    call_count: AtomicU32,
}

impl StubProbe {
    /// Report `NotReady` for the first `refusals` calls, then `Ready`.
    pub fn ready_after(refusals: u32) -> Self {
        Self {
            mode: ProbeMode::ReadyAfter(refusals),
            call_count: AtomicU32::new(0),
        }
    }

    /// Never become ready.
    pub fn never_ready() -> Self {
        Self {
            mode: ProbeMode::Never,
            call_count: AtomicU32::new(0),
        }
    }

    /// Fail every call with a non-retryable error.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            mode: ProbeMode::Fail(reason.into()),
            call_count: AtomicU32::new(0),
        }
    }

    /// Number of probes issued so far.
    pub fn calls(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ReadinessProbe for StubProbe {
    async fn probe(&self, url: &str) -> Result<ProbeStatus> {
        let previous = self.call_count.fetch_add(1, Ordering::Relaxed);
        match &self.mode {
            ProbeMode::ReadyAfter(refusals) if previous >= *refusals => Ok(ProbeStatus::Ready),
            ProbeMode::ReadyAfter(_) | ProbeMode::Never => Ok(ProbeStatus::NotReady),
            ProbeMode::Fail(reason) => Err(WorkspaceError::Readiness {
                url: url.to_string(),
                reason: reason.clone(),
            }),
        }
    }
}
