//! Assembly of the engine-facing container launch spec.

use std::collections::BTreeMap;

use crate::config::{ENV_DEV_MODE, WorkspaceSettings};
use crate::workspace::config::{CONTROL_PORT, PortRequest, VolumeBind, WorkspaceConfig};

/// Startup script baked into the workspace image.
pub const ENTRYPOINT: &str = "/root/entrypoint.sh";
/// Where the source tree is mounted in dev mode.
pub const DEV_SOURCE_MOUNT: &str = "/opt/dockspace-core";
/// Where the cache directory is mounted in dev mode.
pub const DEV_CACHE_MOUNT: &str = "/root/.dockspace";

/// Everything the engine needs to create and start a workspace container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub image: String,
    /// Container name; also the workspace id.
    pub name: String,
    pub environment: BTreeMap<String, String>,
    pub command: Vec<String>,
    /// Container port -> host binding, always including the control port.
    pub ports: BTreeMap<u16, PortRequest>,
    /// Host path or volume name -> mount.
    pub volumes: BTreeMap<String, VolumeBind>,
    pub tty: bool,
    pub detach: bool,
    pub stdin_open: bool,
    pub auto_remove: bool,
}

impl LaunchSpec {
    /// Host port bound to the tooling server.
    pub fn control_port(&self) -> Option<u16> {
        self.ports.get(&CONTROL_PORT).and_then(PortRequest::host_port)
    }
}

/// Builds a [`LaunchSpec`] from caller config and host settings.
///
/// Never fails; the engine validates the result.
pub struct LaunchSpecBuilder<'a> {
    config: &'a WorkspaceConfig,
    settings: &'a WorkspaceSettings,
}

impl<'a> LaunchSpecBuilder<'a> {
    pub fn new(config: &'a WorkspaceConfig, settings: &'a WorkspaceSettings) -> Self {
        Self { config, settings }
    }

    /// Image from the config, else the settings default.
    pub fn image(&self) -> String {
        self.config
            .image
            .clone()
            .unwrap_or_else(|| self.settings.default_image.clone())
    }

    pub fn build(
        &self,
        name: &str,
        environment: &BTreeMap<String, String>,
        control_port: u16,
    ) -> LaunchSpec {
        let mut environment = environment.clone();
        let mut volumes = self.config.volumes.clone();
        if self.settings.dev_mode {
            volumes.insert(
                self.settings.source_root.display().to_string(),
                VolumeBind::rw(DEV_SOURCE_MOUNT),
            );
            volumes.insert(
                self.settings.cache_dir.display().to_string(),
                VolumeBind::rw(DEV_CACHE_MOUNT),
            );
            environment.insert(ENV_DEV_MODE.to_string(), "1".to_string());
        }

        let mut ports = self.config.ports.clone();
        // Inserted last so a caller-supplied 8000 mapping never wins.
        ports.insert(CONTROL_PORT, PortRequest::Port(control_port));

        let spec = LaunchSpec {
            image: self.image(),
            name: name.to_string(),
            environment,
            command: vec![ENTRYPOINT.to_string()],
            ports,
            volumes,
            tty: true,
            detach: true,
            stdin_open: true,
            auto_remove: false,
        };
        tracing::debug!(
            name = %spec.name,
            image = %spec.image,
            ports = spec.ports.len(),
            volumes = spec.volumes.len(),
            dev_mode = self.settings.dev_mode,
            "Built launch spec"
        );
        spec
    }
}
