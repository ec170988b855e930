//! Identity, environment and HTTP session shared by every remote workspace.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::ExposeSecret;

use crate::config::{ENV_API_KEY, ENV_BASE_URL, ENV_GITHUB_ACCESS_TOKEN, WorkspaceSettings};
use crate::workspace::config::WorkspaceConfig;

/// The backend-agnostic half of a workspace.
///
/// Owns the workspace id, the environment handed to the tooling server and the
/// HTTP client used to reach it.
#[derive(Debug)]
pub struct WorkspaceBase {
    id: String,
    environment: BTreeMap<String, String>,
    http: reqwest::Client,
    closed: bool,
}

impl WorkspaceBase {
    pub fn new(config: &WorkspaceConfig, settings: &WorkspaceSettings) -> Self {
        Self::with_id(format!("dockspace-{}", uuid::Uuid::new_v4()), config, settings)
    }

    /// Base with a caller-chosen id. The id doubles as the container name and
    /// must be unique on the engine host.
    pub fn with_id(id: impl Into<String>, config: &WorkspaceConfig, settings: &WorkspaceSettings) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            id: id.into(),
            environment: base_environment(config, settings),
            http,
            closed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Environment passed to the container.
    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.environment
    }

    /// Client for requests to the workspace endpoint.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Stop using the endpoint. Idempotent.
    pub fn teardown(&mut self) {
        if !self.closed {
            tracing::debug!("Closing workspace session {}", self.id);
            self.closed = true;
        }
    }
}

/// Config environment plus forwarded credentials. Credentials win on collision.
fn base_environment(
    config: &WorkspaceConfig,
    settings: &WorkspaceSettings,
) -> BTreeMap<String, String> {
    let mut env = config.environment.clone();
    if let Some(ref key) = settings.api_key {
        env.insert(ENV_API_KEY.to_string(), key.expose_secret().to_string());
    }
    if let Some(ref url) = settings.base_url {
        env.insert(ENV_BASE_URL.to_string(), url.clone());
    }
    if let Some(ref token) = settings.github_access_token {
        env.insert(
            ENV_GITHUB_ACCESS_TOKEN.to_string(),
            token.expose_secret().to_string(),
        );
    }
    env
}
