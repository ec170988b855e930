//! Error types for workspace management.

use std::time::Duration;

use thiserror::Error;

/// Result type for workspace operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;

/// Failures reported by the container engine.
///
/// The variants are the conditions the lifecycle code branches on; anything
/// else ends up in [`EngineError::Api`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// The engine has no container by that name.
    #[error("No such container: {name}")]
    NotFound {
        /// Container name or id.
        name: String,
    },

    /// The container exists but is not running.
    #[error("Container {name} is not running")]
    NotRunning {
        /// Container name or id.
        name: String,
    },

    /// A requested host port is already bound on the host.
    #[error("Host port conflict: {reason}")]
    PortConflict {
        /// Engine message.
        reason: String,
    },

    /// The image is not present locally.
    #[error("No such image: {image}")]
    ImageNotFound {
        /// Image reference.
        image: String,
    },

    /// Pulling an image from its registry failed.
    #[error("Failed to pull image {image}: {reason}")]
    ImagePull {
        /// Image reference.
        image: String,
        /// Registry or engine message.
        reason: String,
    },

    /// The engine could not be reached.
    #[error("Container engine unreachable: {reason}")]
    Unavailable {
        /// Underlying cause.
        reason: String,
    },

    /// Any other engine failure.
    #[error("Container engine error: {reason}")]
    Api {
        /// Engine message.
        reason: String,
    },
}

impl EngineError {
    /// Whether the error means the container is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Whether the image has to be pulled before the container can be created.
    pub fn is_image_not_found(&self) -> bool {
        matches!(self, Self::ImageNotFound { .. })
    }

    /// Whether a retry with a different host port could succeed.
    pub fn is_port_conflict(&self) -> bool {
        matches!(self, Self::PortConflict { .. })
    }
}

/// Errors that can occur while setting up or tearing down a workspace.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// The container engine could not be initialized.
    #[error(
        "Error initializing container engine client: {source}. \
         Please make sure Docker is running and try again."
    )]
    EngineUnavailable {
        #[source]
        source: EngineError,
    },

    /// The engine rejected creating or starting the container.
    #[error("Error starting workspace {id}: {source}")]
    ContainerStart {
        /// Workspace id.
        id: String,
        #[source]
        source: EngineError,
    },

    /// The engine failed while reading container state after start.
    #[error("Error inspecting workspace {id}: {source}")]
    Inspect {
        /// Workspace id.
        id: String,
        #[source]
        source: EngineError,
    },

    /// The readiness endpoint failed with something other than a refused connection.
    #[error("Readiness check against {url} failed: {reason}")]
    Readiness {
        /// Endpoint being polled.
        url: String,
        /// Underlying cause.
        reason: String,
    },

    /// The readiness endpoint did not answer within the deadline.
    #[error("Workspace at {url} not ready after {timeout:?} ({attempts} attempts)")]
    ReadinessTimeout {
        /// Endpoint being polled.
        url: String,
        /// Deadline that expired.
        timeout: Duration,
        /// Probes issued before giving up.
        attempts: u32,
    },

    /// The caller cancelled the readiness wait.
    #[error("Readiness wait for {url} was cancelled")]
    Cancelled {
        /// Endpoint being polled.
        url: String,
    },

    /// Stopping or removing the container failed.
    #[error("Error tearing down workspace {id}: {source}")]
    Teardown {
        /// Workspace id.
        id: String,
        #[source]
        source: EngineError,
    },

    /// An operation was attempted in a lifecycle state that does not allow it.
    #[error("Workspace {id} cannot {operation} while {state}")]
    InvalidState {
        /// Workspace id.
        id: String,
        /// Operation attempted.
        operation: &'static str,
        /// Current state name.
        state: &'static str,
    },

    /// I/O error, e.g. while allocating a host port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
