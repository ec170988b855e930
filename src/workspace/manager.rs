//! Docker workspace lifecycle: setup, readiness, network state, teardown.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::config::WorkspaceSettings;
use crate::workspace::base::WorkspaceBase;
use crate::workspace::config::{WorkspaceConfig, WorkspaceEndpoint};
use crate::workspace::engine::{
    ContainerEngine, EngineClient, PublishedPort, RemovalOutcome, remove_workspace_container,
};
use crate::workspace::error::{EngineError, Result, WorkspaceError};
use crate::workspace::launch::{LaunchSpec, LaunchSpecBuilder};
use crate::workspace::port::PortAllocator;
use crate::workspace::readiness::{HttpProbe, ReadinessProbe, wait_until_ready};

/// Where a workspace is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Constructed, nothing created on the engine yet.
    Uncreated,
    /// Creating and starting the container.
    Starting,
    /// Container running, waiting for the tooling server.
    WaitingReady,
    /// Tooling server answered; endpoint usable.
    Ready,
    /// Stopping and removing the container.
    TearingDown,
    /// Container gone. Terminal.
    Terminated,
    /// Setup or teardown aborted; a container may still exist.
    Failed,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uncreated => "uncreated",
            Self::Starting => "starting",
            Self::WaitingReady => "waiting for readiness",
            Self::Ready => "ready",
            Self::TearingDown => "tearing down",
            Self::Terminated => "terminated",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The engine-side container a workspace owns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned id.
    pub id: String,
    /// Container name, equal to the workspace id.
    pub name: String,
}

/// A sandbox workspace running in a Docker container.
///
/// Setup allocates a host port for the tooling server, starts the container,
/// and resolves once the server answers on `http://localhost:<port>/api`.
/// Teardown is explicit; dropping a live workspace leaks its container.
pub struct DockerWorkspace {
    base: WorkspaceBase,
    image: String,
    config: WorkspaceConfig,
    settings: WorkspaceSettings,
    engine: Arc<EngineClient>,
    probe: Arc<dyn ReadinessProbe>,
    allocator: PortAllocator,
    state: LifecycleState,
    control_port: Option<u16>,
    url: Option<String>,
    host: Option<String>,
    ports: Vec<u16>,
    container: Option<ContainerHandle>,
    started_at: Option<DateTime<Utc>>,
}

impl DockerWorkspace {
    /// Create a workspace that will use `engine` for all container calls.
    pub fn new(config: WorkspaceConfig, settings: WorkspaceSettings, engine: Arc<EngineClient>) -> Self {
        let base = WorkspaceBase::new(&config, &settings);
        Self::from_base(base, config, settings, engine)
    }

    /// Like [`new`](Self::new) with a caller-chosen workspace id.
    pub fn with_id(
        id: impl Into<String>,
        config: WorkspaceConfig,
        settings: WorkspaceSettings,
        engine: Arc<EngineClient>,
    ) -> Self {
        let base = WorkspaceBase::with_id(id, &config, &settings);
        Self::from_base(base, config, settings, engine)
    }

    fn from_base(
        base: WorkspaceBase,
        config: WorkspaceConfig,
        settings: WorkspaceSettings,
        engine: Arc<EngineClient>,
    ) -> Self {
        let image = LaunchSpecBuilder::new(&config, &settings).image();
        let probe: Arc<dyn ReadinessProbe> = Arc::new(HttpProbe::new(base.http().clone()));
        Self {
            base,
            image,
            config,
            settings,
            engine,
            probe,
            allocator: PortAllocator,
            state: LifecycleState::Uncreated,
            control_port: None,
            url: None,
            host: None,
            ports: Vec::new(),
            container: None,
            started_at: None,
        }
    }

    /// Replace the HTTP readiness probe.
    pub fn with_probe(mut self, probe: Arc<dyn ReadinessProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    /// Resolved image reference.
    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Base URL of the tooling server. Set as soon as the control port is chosen.
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Host the workspace is reachable on. Set once ready.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Host port bound to the tooling server.
    pub fn control_port(&self) -> Option<u16> {
        self.control_port
    }

    /// Additional host ports published for the workspace, excluding the control port.
    pub fn ports(&self) -> &[u16] {
        &self.ports
    }

    pub fn container(&self) -> Option<&ContainerHandle> {
        self.container.as_ref()
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Endpoint for tool requests, available only while ready.
    pub fn endpoint(&self) -> Option<WorkspaceEndpoint> {
        if self.state != LifecycleState::Ready {
            return None;
        }
        Some(WorkspaceEndpoint {
            host: self.host.clone()?,
            port: self.control_port?,
            url: self.url.clone()?,
        })
    }

    /// Environment passed to the container, before any dev-mode overlay.
    pub fn environment(&self) -> &std::collections::BTreeMap<String, String> {
        self.base.environment()
    }

    /// Start the workspace and wait until its tooling server answers.
    pub async fn setup(&mut self) -> Result<WorkspaceEndpoint> {
        self.setup_with_cancel(&CancellationToken::new()).await
    }

    /// [`setup`](Self::setup) that gives up when `cancel` fires during the
    /// readiness wait. The container is left for [`teardown`](Self::teardown).
    pub async fn setup_with_cancel(&mut self, cancel: &CancellationToken) -> Result<WorkspaceEndpoint> {
        if self.state != LifecycleState::Uncreated {
            return Err(self.invalid_state("set up"));
        }

        tracing::debug!("Creating docker workspace {} with image {}", self.id(), self.image);
        self.state = LifecycleState::Starting;

        match self.start_and_wait(cancel).await {
            Ok(endpoint) => {
                self.state = LifecycleState::Ready;
                self.started_at = Some(Utc::now());
                tracing::info!(
                    id = %self.id(),
                    url = %endpoint.url,
                    ports = ?self.ports,
                    "Workspace ready"
                );
                Ok(endpoint)
            }
            Err(e) => {
                self.state = LifecycleState::Failed;
                tracing::warn!("Workspace {} setup failed: {}", self.id(), e);
                Err(e)
            }
        }
    }

    async fn start_and_wait(&mut self, cancel: &CancellationToken) -> Result<WorkspaceEndpoint> {
        let engine = self.engine.get().await?;
        let container = self.launch_with_port_retry(engine.as_ref()).await?;

        // The create response predates port binding; read the live state.
        let published = engine
            .published_ports(&container.id)
            .await
            .map_err(|source| WorkspaceError::Inspect {
                id: self.id().to_string(),
                source,
            })?;

        self.state = LifecycleState::WaitingReady;
        let url = self.url.clone().unwrap_or_default();
        wait_until_ready(self.probe.as_ref(), &url, &self.settings.wait, cancel).await?;

        let control_port = self.control_port.unwrap_or_default();
        let endpoint = WorkspaceEndpoint::local(control_port);
        self.host = Some(endpoint.host.clone());
        self.ports = extra_host_ports(&published, control_port);
        Ok(endpoint)
    }

    /// Allocate a control port, create and start the container. On a host port
    /// conflict the half-created container is removed and a new port tried.
    ///
    /// The handle is recorded as soon as the engine creates the container, so
    /// a container whose start failed is still torn down.
    async fn launch_with_port_retry(&mut self, engine: &dyn ContainerEngine) -> Result<ContainerHandle> {
        let builder = LaunchSpecBuilder::new(&self.config, &self.settings);
        let mut retries = 0;

        loop {
            let port = self.allocator.allocate()?;
            self.control_port = Some(port);
            self.url = Some(WorkspaceEndpoint::local(port).url);

            let spec = builder.build(self.base.id(), self.base.environment(), port);
            let id = match create_container(engine, &spec).await {
                Ok(id) => id,
                Err(e) if e.is_port_conflict() && retries < self.settings.port_retries => {
                    retries += 1;
                    tracing::warn!(port, attempt = retries, "Host port conflict at create, retrying: {}", e);
                    continue;
                }
                Err(source) => {
                    return Err(WorkspaceError::ContainerStart {
                        id: spec.name,
                        source,
                    });
                }
            };

            let handle = ContainerHandle {
                id,
                name: spec.name,
            };
            self.container = Some(handle.clone());

            match engine.start(&handle.id).await {
                Ok(()) => {
                    tracing::info!("Started workspace container {} ({})", handle.name, handle.id);
                    return Ok(handle);
                }
                Err(e) if e.is_port_conflict() && retries < self.settings.port_retries => {
                    retries += 1;
                    tracing::warn!(
                        port,
                        attempt = retries,
                        "Host port taken before the engine bound it, retrying: {}",
                        e
                    );
                    if !discard_container(engine, &handle.id).await {
                        return Err(WorkspaceError::ContainerStart {
                            id: handle.name,
                            source: e,
                        });
                    }
                    self.container = None;
                }
                Err(source) => {
                    return Err(WorkspaceError::ContainerStart {
                        id: handle.name,
                        source,
                    });
                }
            }
        }
    }

    /// Close the session, then kill and remove the container this workspace
    /// created.
    ///
    /// Safe to call repeatedly and on a container that was removed out of
    /// band; both report [`RemovalOutcome::AlreadyAbsent`]. A workspace that
    /// never created a container, or was already torn down, does not call the
    /// engine at all.
    pub async fn teardown(&mut self) -> Result<RemovalOutcome> {
        self.base.teardown();

        let Some(container) = self.container.clone() else {
            tracing::debug!("Workspace {} owns no container", self.id());
            self.host = None;
            self.ports.clear();
            self.state = LifecycleState::Terminated;
            return Ok(RemovalOutcome::AlreadyAbsent);
        };

        self.state = LifecycleState::TearingDown;
        let engine = match self.engine.get().await {
            Ok(engine) => engine,
            Err(e) => {
                self.state = LifecycleState::Failed;
                return Err(e);
            }
        };

        let name = container.name;
        match remove_workspace_container(engine.as_ref(), &container.id).await {
            RemovalOutcome::Failed(source) => {
                self.state = LifecycleState::Failed;
                Err(WorkspaceError::Teardown {
                    id: self.id().to_string(),
                    source,
                })
            }
            outcome => {
                if outcome == RemovalOutcome::AlreadyAbsent {
                    tracing::debug!("Error cleaning {} - container already absent", name);
                } else {
                    tracing::info!("Removed workspace container {}", name);
                }
                self.container = None;
                self.host = None;
                self.ports.clear();
                self.state = LifecycleState::Terminated;
                Ok(outcome)
            }
        }
    }

    fn invalid_state(&self, operation: &'static str) -> WorkspaceError {
        WorkspaceError::InvalidState {
            id: self.id().to_string(),
            operation,
            state: self.state.as_str(),
        }
    }
}

impl Drop for DockerWorkspace {
    fn drop(&mut self) {
        if self.container.is_some() {
            tracing::warn!(
                "DockerWorkspace '{}' dropped without teardown(), container may remain running",
                self.base.id()
            );
        }
    }
}

/// Create the container, pulling the image first if the engine lacks it.
async fn create_container(
    engine: &dyn ContainerEngine,
    spec: &LaunchSpec,
) -> std::result::Result<String, EngineError> {
    match engine.create(spec).await {
        Err(e) if e.is_image_not_found() => {
            tracing::info!("Image {} not present locally", spec.image);
            engine.pull_image(&spec.image).await?;
            engine.create(spec).await
        }
        other => other,
    }
}

/// Force-remove a container whose start failed. False if it may still exist.
async fn discard_container(engine: &dyn ContainerEngine, id: &str) -> bool {
    match engine.remove(id, true).await {
        Ok(()) => true,
        Err(e) if e.is_not_found() => true,
        Err(e) => {
            tracing::warn!("Failed to remove conflicting container {}: {}", id, e);
            false
        }
    }
}

/// Host ports in engine order, minus the control port.
fn extra_host_ports(published: &[PublishedPort], control_port: u16) -> Vec<u16> {
    published
        .iter()
        .map(|p| p.host_port)
        .filter(|port| *port != control_port)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::ENV_DEV_MODE;
    use crate::testing::{StubEngine, StubProbe};
    use crate::workspace::config::CONTROL_PORT;
    use crate::workspace::readiness::WaitPolicy;

    fn settings() -> WorkspaceSettings {
        WorkspaceSettings {
            wait: WaitPolicy::unbounded(Duration::from_millis(1)),
            ..Default::default()
        }
    }

    fn workspace(
        config: WorkspaceConfig,
        settings: WorkspaceSettings,
        engine: &Arc<StubEngine>,
        probe: StubProbe,
    ) -> DockerWorkspace {
        let client = Arc::new(EngineClient::from_engine(engine.clone()));
        DockerWorkspace::with_id("ws-test", config, settings, client).with_probe(Arc::new(probe))
    }

    #[tokio::test]
    async fn test_setup_with_empty_config() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        let endpoint = ws.setup().await.unwrap();

        assert_eq!(ws.state(), LifecycleState::Ready);
        assert_eq!(ws.host(), Some("localhost"));
        assert_eq!(endpoint.url, format!("http://localhost:{}/api", endpoint.port));
        assert_eq!(ws.url(), Some(endpoint.url.as_str()));
        assert!(ws.ports().is_empty());
        assert!(engine.is_running("ws-test"));
        assert!(ws.started_at().is_some());

        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_extracts_extra_ports() {
        let engine = Arc::new(StubEngine::new());
        let config = WorkspaceConfig::default().publish(9000, 9000);
        let mut ws = workspace(config, settings(), &engine, StubProbe::ready_after(0));

        let endpoint = ws.setup().await.unwrap();

        assert_eq!(ws.ports(), &[9000]);
        assert!(!ws.ports().contains(&endpoint.port));
        let spec = &engine.launched()[0];
        assert_eq!(spec.control_port(), Some(endpoint.port));

        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_ports_follow_engine_report() {
        let engine = Arc::new(StubEngine::new());
        engine.set_published(vec![
            PublishedPort {
                container_port: 9100,
                host_port: 19100,
            },
            PublishedPort {
                container_port: 9000,
                host_port: 19000,
            },
        ]);
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        ws.setup().await.unwrap();
        assert_eq!(ws.ports(), &[19100, 19000]);

        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_waits_for_readiness() {
        let engine = Arc::new(StubEngine::new());
        let probe = Arc::new(StubProbe::ready_after(5));
        let client = Arc::new(EngineClient::from_engine(engine.clone()));
        let mut ws = DockerWorkspace::with_id("ws-wait", WorkspaceConfig::default(), settings(), client)
            .with_probe(probe.clone());

        ws.setup().await.unwrap();
        assert_eq!(probe.calls(), 6);

        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_dev_mode_overlay() {
        let engine = Arc::new(StubEngine::new());
        let dev = WorkspaceSettings {
            dev_mode: true,
            source_root: PathBuf::from("/src/dockspace"),
            cache_dir: PathBuf::from("/home/u/.dockspace"),
            ..settings()
        };
        let mut ws = workspace(WorkspaceConfig::default(), dev, &engine, StubProbe::ready_after(0));
        ws.setup().await.unwrap();

        let spec = &engine.launched()[0];
        assert_eq!(spec.volumes.len(), 2);
        assert_eq!(spec.environment.get(ENV_DEV_MODE).map(String::as_str), Some("1"));

        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_engine_create_failure_wraps_error() {
        let engine = Arc::new(StubEngine::new());
        engine.fail_create_with(EngineError::Api {
            reason: "400: invalid reference format".to_string(),
        });
        let mut ws = workspace(
            WorkspaceConfig::with_image("nope:latest"),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        let err = ws.setup().await.unwrap_err();
        match err {
            WorkspaceError::ContainerStart { ref id, ref source } => {
                assert_eq!(id, "ws-test");
                assert!(source.to_string().contains("invalid reference format"));
            }
            ref other => panic!("expected ContainerStart, got {other:?}"),
        }
        assert_eq!(ws.state(), LifecycleState::Failed);
        assert!(ws.url().is_some());
        assert!(ws.host().is_none());
        assert!(ws.endpoint().is_none());
        assert!(ws.container().is_none());
    }

    #[tokio::test]
    async fn test_port_conflict_retries_with_new_port() {
        let engine = Arc::new(StubEngine::new());
        engine.fail_next_start_with(EngineError::PortConflict {
            reason: "port is already allocated".to_string(),
        });
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        let endpoint = ws.setup().await.unwrap();

        let launched = engine.launched();
        assert_eq!(launched.len(), 2);
        assert_eq!(launched[1].control_port(), Some(endpoint.port));
        assert_eq!(engine.removed(), vec!["ws-test".to_string()]);
        assert!(engine.is_running("ws-test"));

        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_port_conflict_gives_up_after_retries() {
        let engine = Arc::new(StubEngine::new());
        for _ in 0..3 {
            engine.fail_next_start_with(EngineError::PortConflict {
                reason: "port is already allocated".to_string(),
            });
        }
        let mut ws = workspace(
            WorkspaceConfig::default(),
            WorkspaceSettings {
                port_retries: 2,
                ..settings()
            },
            &engine,
            StubProbe::ready_after(0),
        );

        let err = ws.setup().await.unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::ContainerStart {
                source: EngineError::PortConflict { .. },
                ..
            }
        ));
        assert_eq!(engine.launched().len(), 3);

        // The last half-created container is still owned and torn down.
        assert!(engine.exists("ws-test"));
        assert!(ws.container().is_some());
        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::Removed);
        assert!(!engine.exists("ws-test"));
    }

    #[tokio::test]
    async fn test_engine_unavailable_fails_setup() {
        let client = Arc::new(EngineClient::with_connector(|| async {
            Err::<Arc<dyn ContainerEngine>, _>(EngineError::Unavailable {
                reason: "connection refused".to_string(),
            })
        }));
        let mut ws = DockerWorkspace::with_id("ws-x", WorkspaceConfig::default(), settings(), client);

        let err = ws.setup().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::EngineUnavailable { .. }));
        assert!(ws.url().is_none());
    }

    #[tokio::test]
    async fn test_readiness_error_leaves_container_for_teardown() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::failing("unexpected response"),
        );

        let err = ws.setup().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Readiness { .. }));
        assert_eq!(ws.state(), LifecycleState::Failed);
        assert!(engine.is_running("ws-test"));

        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::Removed);
    }

    #[tokio::test]
    async fn test_cancelled_setup() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::never_ready(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = ws.setup_with_cancel(&cancel).await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Cancelled { .. }));
        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_twice() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        ws.setup().await.unwrap();

        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::Removed);
        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::AlreadyAbsent);
        assert_eq!(ws.state(), LifecycleState::Terminated);
        assert!(ws.container().is_none());
    }

    #[tokio::test]
    async fn test_teardown_after_out_of_band_removal() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        ws.setup().await.unwrap();
        engine.remove_out_of_band("ws-test");

        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::AlreadyAbsent);
    }

    #[tokio::test]
    async fn test_teardown_propagates_other_errors() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        ws.setup().await.unwrap();
        engine.fail_kill_with(EngineError::Api {
            reason: "500: daemon error".to_string(),
        });

        let err = ws.teardown().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::Teardown { .. }));
        assert_eq!(ws.state(), LifecycleState::Failed);
        assert!(ws.container().is_some());
        engine.remove_out_of_band("ws-test");
        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_setup_only_once() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        ws.setup().await.unwrap();
        ws.teardown().await.unwrap();

        let err = ws.setup().await.unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::InvalidState {
                operation: "set up",
                state: "terminated",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_missing_image_is_pulled_before_create() {
        let engine = Arc::new(StubEngine::new());
        engine.without_image("tools:fresh");
        let mut ws = workspace(
            WorkspaceConfig::with_image("tools:fresh"),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        ws.setup().await.unwrap();

        assert_eq!(engine.pulled(), vec!["tools:fresh".to_string()]);
        assert_eq!(engine.launched().len(), 2);
        assert!(engine.is_running("ws-test"));
        ws.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_pull_is_a_start_failure() {
        let engine = Arc::new(StubEngine::new());
        engine.without_image("tools:private");
        engine.fail_pull_with(EngineError::ImagePull {
            image: "tools:private".to_string(),
            reason: "unauthorized".to_string(),
        });
        let mut ws = workspace(
            WorkspaceConfig::with_image("tools:private"),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        let err = ws.setup().await.unwrap_err();
        assert!(matches!(
            err,
            WorkspaceError::ContainerStart {
                source: EngineError::ImagePull { .. },
                ..
            }
        ));
        assert!(ws.container().is_none());
        assert!(!engine.exists("ws-test"));
    }

    #[tokio::test]
    async fn test_teardown_spares_container_it_did_not_create() {
        let engine = Arc::new(StubEngine::new());
        engine.add_running("ws-test");
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );

        let err = ws.setup().await.unwrap_err();
        assert!(matches!(err, WorkspaceError::ContainerStart { .. }));
        assert!(ws.container().is_none());

        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::AlreadyAbsent);
        assert!(engine.is_running("ws-test"));
        assert!(engine.removed().is_empty());
    }

    #[tokio::test]
    async fn test_terminated_teardown_spares_successor_with_same_id() {
        let engine = Arc::new(StubEngine::new());
        let mut first = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        first.setup().await.unwrap();
        first.teardown().await.unwrap();

        let mut second = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        second.setup().await.unwrap();

        assert_eq!(first.teardown().await.unwrap(), RemovalOutcome::AlreadyAbsent);
        assert!(engine.is_running("ws-test"));

        second.teardown().await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_before_setup_touches_nothing() {
        let engine = Arc::new(StubEngine::new());
        let mut ws = workspace(
            WorkspaceConfig::default(),
            settings(),
            &engine,
            StubProbe::ready_after(0),
        );
        assert_eq!(ws.teardown().await.unwrap(), RemovalOutcome::AlreadyAbsent);
        assert_eq!(ws.state(), LifecycleState::Terminated);
        assert!(engine.launched().is_empty());
    }

    #[test]
    fn test_extra_host_ports_excludes_control() {
        let published = [
            PublishedPort {
                container_port: CONTROL_PORT,
                host_port: 5555,
            },
            PublishedPort {
                container_port: 9000,
                host_port: 9000,
            },
        ];
        assert_eq!(extra_host_ports(&published, 5555), vec![9000]);
    }

    #[test]
    fn test_image_resolution() {
        let client = Arc::new(EngineClient::from_engine(Arc::new(StubEngine::new())));
        let ws = DockerWorkspace::new(
            WorkspaceConfig::with_image("custom:tag"),
            WorkspaceSettings {
                default_image: "env:override".to_string(),
                ..Default::default()
            },
            client.clone(),
        );
        assert_eq!(ws.image(), "custom:tag");

        let mut ws = DockerWorkspace::new(
            WorkspaceConfig::default(),
            WorkspaceSettings {
                default_image: "env:override".to_string(),
                ..Default::default()
            },
            client,
        );
        assert_eq!(ws.image(), "env:override");
        assert_eq!(ws.state(), LifecycleState::Uncreated);
        assert_eq!(
            tokio_test::block_on(ws.teardown()).unwrap(),
            RemovalOutcome::AlreadyAbsent
        );
    }
}
