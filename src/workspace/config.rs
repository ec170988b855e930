//! Configuration types for Docker workspaces.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Port reserved for the tooling server inside every workspace container.
pub const CONTROL_PORT: u16 = 8000;

/// Caller intent for one workspace.
///
/// All fields are optional; absent ones fall back to [`WorkspaceSettings`]
/// defaults when the launch spec is built.
///
/// [`WorkspaceSettings`]: crate::config::WorkspaceSettings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceConfig {
    /// Image to run. Overrides `DOCKSPACE_IMAGE` and the built-in default.
    pub image: Option<String>,
    /// Container port -> host binding. Port 8000 is reserved and ignored here.
    pub ports: BTreeMap<u16, PortRequest>,
    /// Host path or volume name -> mount inside the container.
    pub volumes: BTreeMap<String, VolumeBind>,
    /// Extra environment for the tooling server.
    pub environment: BTreeMap<String, String>,
}

impl WorkspaceConfig {
    /// Config that only pins the image.
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
            ..Default::default()
        }
    }

    /// Publish a container port on a fixed host port.
    pub fn publish(mut self, container_port: u16, host_port: u16) -> Self {
        self.ports.insert(container_port, PortRequest::Port(host_port));
        self
    }

    /// Mount a host path or named volume.
    pub fn mount(mut self, source: impl Into<String>, bind: VolumeBind) -> Self {
        self.volumes.insert(source.into(), bind);
        self
    }

    /// Parse a TOML workspace config.
    ///
    /// ```toml
    /// image = "dockspace/workspace:latest"
    ///
    /// [ports]
    /// 9000 = 9000
    /// 9001 = "auto"
    /// 9002 = { host_ip = "127.0.0.1", port = 19002 }
    ///
    /// [volumes]
    /// "/srv/data" = { bind = "/data", mode = "ro" }
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self, toml::de::Error> {
        let file: ConfigFile = toml::from_str(raw)?;
        file.try_into()
    }

    /// Read and parse a TOML workspace config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// How a container port is published on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortRequest {
    /// Let the engine choose a free host port.
    Ephemeral,
    /// Bind on all interfaces at this host port.
    Port(u16),
    /// Bind on one interface, optionally at a fixed port.
    Bind {
        /// Host interface address.
        host_ip: String,
        /// Host port, engine-chosen when `None`.
        port: Option<u16>,
    },
}

impl PortRequest {
    /// Host IP the engine should bind, if restricted.
    pub fn host_ip(&self) -> Option<&str> {
        match self {
            Self::Bind { host_ip, .. } => Some(host_ip),
            _ => None,
        }
    }

    /// Host port the engine should bind, if fixed.
    pub fn host_port(&self) -> Option<u16> {
        match self {
            Self::Ephemeral => None,
            Self::Port(port) => Some(*port),
            Self::Bind { port, .. } => *port,
        }
    }
}

/// Access mode for a bind mount.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeMode {
    #[default]
    Rw,
    Ro,
}

impl VolumeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rw => "rw",
            Self::Ro => "ro",
        }
    }
}

/// Where and how a volume is mounted inside the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeBind {
    /// Path inside the container.
    pub bind: String,
    #[serde(default)]
    pub mode: VolumeMode,
}

impl VolumeBind {
    /// Read-write mount at `bind`.
    pub fn rw(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: VolumeMode::Rw,
        }
    }

    /// Read-only mount at `bind`.
    pub fn ro(bind: impl Into<String>) -> Self {
        Self {
            bind: bind.into(),
            mode: VolumeMode::Ro,
        }
    }
}

/// Network location of a ready workspace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceEndpoint {
    /// Host the tooling server is reachable on.
    pub host: String,
    /// Host port mapped to the control port.
    pub port: u16,
    /// Base URL for tool requests.
    pub url: String,
}

impl WorkspaceEndpoint {
    /// Endpoint for a tooling server published on `port` of the local host.
    pub fn local(port: u16) -> Self {
        let host = "localhost".to_string();
        let url = format!("http://{host}:{port}/api");
        Self { host, port, url }
    }
}

impl std::fmt::Display for WorkspaceEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    image: Option<String>,
    #[serde(default)]
    ports: BTreeMap<String, FilePort>,
    #[serde(default)]
    volumes: BTreeMap<String, VolumeBind>,
    #[serde(default)]
    environment: BTreeMap<String, String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FilePort {
    Port(u16),
    Auto(String),
    Bind {
        host_ip: String,
        #[serde(default)]
        port: Option<u16>,
    },
}

impl TryFrom<ConfigFile> for WorkspaceConfig {
    type Error = toml::de::Error;

    fn try_from(file: ConfigFile) -> Result<Self, Self::Error> {
        let mut ports = BTreeMap::new();
        for (key, value) in file.ports {
            let container_port: u16 = key.trim().parse().map_err(|_| {
                <toml::de::Error as serde::de::Error>::custom(format!(
                    "port key '{key}' is not a valid port number"
                ))
            })?;
            let request = match value {
                FilePort::Port(port) => PortRequest::Port(port),
                FilePort::Auto(s) if s == "auto" => PortRequest::Ephemeral,
                FilePort::Auto(s) => {
                    return Err(<toml::de::Error as serde::de::Error>::custom(format!(
                        "port {container_port}: expected a number, \"auto\" or a table, got '{s}'"
                    )));
                }
                FilePort::Bind { host_ip, port } => PortRequest::Bind { host_ip, port },
            };
            ports.insert(container_port, request);
        }

        Ok(Self {
            image: file.image,
            ports,
            volumes: file.volumes,
            environment: file.environment,
        })
    }
}
