//! Container engine seam and the shared, lazily connected engine handle.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::OnceCell;

use crate::workspace::docker::DockerEngine;
use crate::workspace::error::{EngineError, Result, WorkspaceError};
use crate::workspace::launch::LaunchSpec;

/// A container port published on the host, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublishedPort {
    pub container_port: u16,
    pub host_port: u16,
}

/// Operations the workspace lifecycle needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Check that the engine answers.
    async fn ping(&self) -> std::result::Result<(), EngineError>;

    /// Fetch `image` from its registry.
    async fn pull_image(&self, image: &str) -> std::result::Result<(), EngineError>;

    /// Create a container from `spec`, returning its id. Does not start it.
    /// Fails with [`EngineError::ImageNotFound`] when the image is not local.
    async fn create(&self, spec: &LaunchSpec) -> std::result::Result<String, EngineError>;

    /// Start a created container.
    async fn start(&self, container: &str) -> std::result::Result<(), EngineError>;

    /// Current host port bindings of a running container.
    async fn published_ports(
        &self,
        container: &str,
    ) -> std::result::Result<Vec<PublishedPort>, EngineError>;

    /// Send SIGKILL to a running container.
    async fn kill(&self, container: &str) -> std::result::Result<(), EngineError>;

    /// Delete a container. `force` also kills it if still running.
    async fn remove(&self, container: &str, force: bool) -> std::result::Result<(), EngineError>;
}

/// Result of trying to get rid of a workspace container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemovalOutcome {
    /// The container was killed (if running) and removed.
    Removed,
    /// The engine had no such container; nothing to do.
    AlreadyAbsent,
    /// The engine refused; the container may still exist.
    Failed(EngineError),
}

impl RemovalOutcome {
    /// `Removed` and `AlreadyAbsent` both count as success.
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }
}

/// Kill then remove the container `name` (a name or an engine id).
///
/// A missing container at either step yields `AlreadyAbsent`; a container that
/// exists but is no longer running is removed without the kill.
pub async fn remove_workspace_container(engine: &dyn ContainerEngine, name: &str) -> RemovalOutcome {
    match engine.kill(name).await {
        Ok(()) => {}
        Err(e) if e.is_not_found() => {
            tracing::debug!("Container {} already removed", name);
            return RemovalOutcome::AlreadyAbsent;
        }
        Err(EngineError::NotRunning { .. }) => {
            tracing::debug!("Container {} was not running", name);
        }
        Err(e) => return RemovalOutcome::Failed(e),
    }

    match engine.remove(name, false).await {
        Ok(()) => RemovalOutcome::Removed,
        Err(e) if e.is_not_found() => {
            tracing::debug!("Container {} disappeared before removal", name);
            RemovalOutcome::AlreadyAbsent
        }
        Err(e) => RemovalOutcome::Failed(e),
    }
}

type Connector =
    Box<dyn Fn() -> BoxFuture<'static, std::result::Result<Arc<dyn ContainerEngine>, EngineError>> + Send + Sync>;

/// Shared handle to the container engine.
///
/// Connects on first use and keeps the connection for every workspace that
/// holds the same `Arc<EngineClient>`. Concurrent first calls wait on a single
/// connection attempt. A failed attempt is not cached, so the next caller
/// tries again.
pub struct EngineClient {
    engine: OnceCell<Arc<dyn ContainerEngine>>,
    connector: Connector,
}

impl EngineClient {
    /// Client for the local Docker daemon, discovered from the environment.
    pub fn docker(timeout: Duration) -> Self {
        Self::with_connector(move || async move {
            let engine = DockerEngine::connect(timeout).await?;
            Ok::<_, EngineError>(Arc::new(engine) as Arc<dyn ContainerEngine>)
        })
    }

    /// Client that connects with `connect` on first use.
    pub fn with_connector<F, Fut>(connect: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Arc<dyn ContainerEngine>, EngineError>>
            + Send
            + 'static,
    {
        Self {
            engine: OnceCell::new(),
            connector: Box::new(move || connect().boxed()),
        }
    }

    /// Client around an engine that is already connected.
    pub fn from_engine(engine: Arc<dyn ContainerEngine>) -> Self {
        Self {
            engine: OnceCell::new_with(Some(engine)),
            connector: Box::new(|| {
                async {
                    Err::<Arc<dyn ContainerEngine>, _>(EngineError::Unavailable {
                        reason: "engine handle was injected".to_string(),
                    })
                }
                .boxed()
            }),
        }
    }

    /// The engine, connecting first if needed.
    pub async fn get(&self) -> Result<Arc<dyn ContainerEngine>> {
        self.engine
            .get_or_try_init(|| async {
                let engine = (self.connector)().await?;
                tracing::info!("Connected to container engine");
                Ok::<_, EngineError>(engine)
            })
            .await
            .cloned()
            .map_err(|source| WorkspaceError::EngineUnavailable { source })
    }

    /// Whether a connection has been established.
    pub fn is_connected(&self) -> bool {
        self.engine.initialized()
    }
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient")
            .field("connected", &self.is_connected())
            .finish()
    }
}
