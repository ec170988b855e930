//! Docker-backed sandbox workspaces.
//!
//! A workspace is a container running a tooling server that agents talk to over
//! HTTP. This module owns its whole lifecycle:
//! - Allocate a free host port for the server's control port (8000)
//! - Create and start the container, pulling a missing image and retrying on
//!   host port races
//! - Poll `http://localhost:<port>/api` until the server answers
//! - Expose the endpoint and any extra published ports
//! - Kill and remove the container on teardown, tolerating it being gone
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                            DockerWorkspace                               │
//! │                                                                          │
//! │   setup()                                                                │
//! │      │                                                                   │
//! │      ▼                                                                   │
//! │   ┌──────────────┐    ┌──────────────┐    ┌──────────────────────────┐   │
//! │   │ PortAllocator│───▶│ LaunchSpec   │───▶│ EngineClient             │   │
//! │   │ (bind :0)    │    │ Builder      │    │ create → start → inspect │   │
//! │   └──────────────┘    └──────────────┘    └──────────────────────────┘   │
//! │          ▲                                          │                    │
//! │          │ port conflict                            ▼                    │
//! │          └──────────────────────────────  ┌──────────────────────────┐   │
//! │                                           │ wait_until_ready         │   │
//! │                                           │ (GET /api, backoff)      │   │
//! │                                           └──────────────────────────┘   │
//! │                                                     │                    │
//! │                                                     ▼                    │
//! │                                           ┌──────────────────────────┐   │
//! │                                           │ WorkspaceEndpoint        │   │
//! │                                           └──────────────────────────┘   │
//! │                                                                          │
//! │   teardown() ──▶ close session ──▶ kill ──▶ remove (NotFound = absent)   │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dockspace::config::WorkspaceSettings;
//! use dockspace::workspace::{DockerWorkspace, EngineClient, WorkspaceConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = WorkspaceSettings::resolve()?;
//! let engine = Arc::new(EngineClient::docker(settings.engine_timeout));
//! let config = WorkspaceConfig::default().publish(9000, 9000);
//!
//! let mut workspace = DockerWorkspace::new(config, settings, engine);
//! let endpoint = workspace.setup().await?;
//! println!("tools at {} (extra ports {:?})", endpoint.url, workspace.ports());
//!
//! workspace.teardown().await?;
//! # Ok(())
//! # }
//! ```

mod base;
pub mod config;
mod docker;
pub mod engine;
pub mod error;
pub mod launch;
mod manager;
mod port;
pub mod readiness;

pub use base::WorkspaceBase;
pub use config::{
    CONTROL_PORT, PortRequest, VolumeBind, VolumeMode, WorkspaceConfig, WorkspaceEndpoint,
};
pub use docker::DockerEngine;
pub use engine::{
    ContainerEngine, EngineClient, PublishedPort, RemovalOutcome, remove_workspace_container,
};
pub use error::{EngineError, Result, WorkspaceError};
pub use launch::{LaunchSpec, LaunchSpecBuilder};
pub use manager::{ContainerHandle, DockerWorkspace, LifecycleState};
pub use port::PortAllocator;
pub use readiness::{HttpProbe, ProbeStatus, ReadinessProbe, WaitPolicy, wait_until_ready};
