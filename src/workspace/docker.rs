//! [`ContainerEngine`] backed by the Docker API via bollard.

use std::collections::HashMap;
#[cfg(unix)]
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, KillContainerOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, PortMap};
use futures::StreamExt;

use crate::workspace::engine::{ContainerEngine, PublishedPort};
use crate::workspace::error::EngineError;
use crate::workspace::launch::LaunchSpec;

/// Docker daemon connection.
#[derive(Clone)]
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connect to the local daemon and verify it answers.
    pub async fn connect(timeout: Duration) -> Result<Self, EngineError> {
        let docker = connect_docker(timeout).await?;
        Ok(Self { docker })
    }
}

/// Connect using `DOCKER_HOST` or the platform default socket, then fall back
/// to the Docker Desktop, Colima and rootless sockets.
async fn connect_docker(timeout: Duration) -> Result<Docker, EngineError> {
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => {
            let docker = docker.with_timeout(timeout);
            match docker.ping().await {
                Ok(_) => return Ok(docker),
                Err(e) => e.to_string(),
            }
        }
        Err(e) => e.to_string(),
    };

    #[cfg(unix)]
    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let path = socket.to_string_lossy();
        match Docker::connect_with_socket(&path, timeout.as_secs(), bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = e.to_string(),
            },
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(EngineError::Unavailable { reason: last_error })
}

#[cfg(unix)]
fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
        sockets.push(home.join(".colima/default/docker.sock"));
    }
    if let Some(runtime) = dirs::runtime_dir() {
        sockets.push(runtime.join("docker.sock"));
    }
    sockets
}

fn is_port_conflict(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("port is already allocated") || message.contains("address already in use")
}

/// Map a bollard error for an operation on an existing container.
fn classify(err: BollardError, container: &str) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound {
            name: container.to_string(),
        },
        BollardError::DockerResponseServerError {
            status_code: 409,
            message,
        } if message.contains("is not running") => EngineError::NotRunning {
            name: container.to_string(),
        },
        BollardError::DockerResponseServerError { message, .. } if is_port_conflict(&message) => {
            EngineError::PortConflict { reason: message }
        }
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } => EngineError::Api {
            reason: format!("{status_code}: {message}"),
        },
        other => EngineError::Api {
            reason: other.to_string(),
        },
    }
}

/// Map a bollard error from container creation, where 404 means a missing image.
fn classify_create(err: BollardError, image: &str) -> EngineError {
    match err {
        BollardError::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::ImageNotFound {
            image: image.to_string(),
        },
        BollardError::DockerResponseServerError {
            status_code,
            message,
        } if !is_port_conflict(&message) => EngineError::Api {
            reason: format!("{status_code}: {message}"),
        },
        other => classify(other, ""),
    }
}

fn tcp_key(port: u16) -> String {
    format!("{}/tcp", port)
}

/// Translate a launch spec into the bollard create body.
fn container_config(spec: &LaunchSpec) -> Config<String> {
    let env: Vec<String> = spec
        .environment
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();

    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .ports
        .keys()
        .map(|port| (tcp_key(*port), HashMap::new()))
        .collect();

    let port_bindings: PortMap = spec
        .ports
        .iter()
        .map(|(container_port, request)| {
            (
                tcp_key(*container_port),
                Some(vec![PortBinding {
                    host_ip: request.host_ip().map(str::to_string),
                    host_port: request.host_port().map(|p| p.to_string()),
                }]),
            )
        })
        .collect();

    let binds: Vec<String> = spec
        .volumes
        .iter()
        .map(|(source, bind)| format!("{}:{}:{}", source, bind.bind, bind.mode.as_str()))
        .collect();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        binds: if binds.is_empty() { None } else { Some(binds) },
        auto_remove: Some(spec.auto_remove),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: if env.is_empty() { None } else { Some(env) },
        cmd: Some(spec.command.clone()),
        tty: Some(spec.tty),
        open_stdin: Some(spec.stdin_open),
        attach_stdin: Some(!spec.detach && spec.stdin_open),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

/// First host binding of every published TCP port, sorted by container port.
fn published_from_port_map(ports: PortMap) -> Vec<PublishedPort> {
    let mut published: Vec<PublishedPort> = ports
        .into_iter()
        .filter_map(|(key, bindings)| {
            let (port, proto) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            if proto != "tcp" {
                return None;
            }
            let container_port = port.parse().ok()?;
            let host_port = bindings?
                .first()?
                .host_port
                .as_deref()?
                .parse()
                .ok()?;
            Some(PublishedPort {
                container_port,
                host_port,
            })
        })
        .collect();
    published.sort_by_key(|p| p.container_port);
    published
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> Result<(), EngineError> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Unavailable {
                reason: e.to_string(),
            })
    }

    async fn pull_image(&self, image: &str) -> Result<(), EngineError> {
        tracing::info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };
        let mut stream = self.docker.create_image(Some(options), None, None);

        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(EngineError::ImagePull {
                        image: image.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    async fn create(&self, spec: &LaunchSpec) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| classify_create(e, &spec.image))?;

        for warning in &response.warnings {
            tracing::warn!("Docker warning for {}: {}", spec.name, warning);
        }
        Ok(response.id)
    }

    async fn start(&self, container: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(container, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, container))
    }

    async fn published_ports(&self, container: &str) -> Result<Vec<PublishedPort>, EngineError> {
        let info = self
            .docker
            .inspect_container(container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| classify(e, container))?;

        Ok(info
            .network_settings
            .and_then(|settings| settings.ports)
            .map(published_from_port_map)
            .unwrap_or_default())
    }

    async fn kill(&self, container: &str) -> Result<(), EngineError> {
        self.docker
            .kill_container(container, None::<KillContainerOptions<String>>)
            .await
            .map_err(|e| classify(e, container))
    }

    async fn remove(&self, container: &str, force: bool) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                container,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| classify(e, container))
    }
}
