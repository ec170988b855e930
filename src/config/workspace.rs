use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::config::helpers::{EnvLookup, optional_env, parse_optional_env};
use crate::error::ConfigError;
use crate::workspace::WaitPolicy;

/// Toggles dev mode on the host and, when set, inside the container.
pub const ENV_DEV_MODE: &str = "DOCKSPACE_DEV_MODE";
/// Overrides the image used when a workspace config names none.
pub const ENV_IMAGE: &str = "DOCKSPACE_IMAGE";
/// API key forwarded to the tooling server.
pub const ENV_API_KEY: &str = "DOCKSPACE_API_KEY";
/// Backend base URL forwarded to the tooling server.
pub const ENV_BASE_URL: &str = "DOCKSPACE_BASE_URL";
/// GitHub token forwarded to the tooling server.
pub const ENV_GITHUB_ACCESS_TOKEN: &str = "GITHUB_ACCESS_TOKEN";

/// Image used when neither the config nor `DOCKSPACE_IMAGE` names one.
pub const DEFAULT_IMAGE: &str = "dockspace/workspace:latest";

/// Host-side settings shared by every workspace in the process.
///
/// Resolved once from the environment and then passed around as plain data,
/// so nothing downstream re-reads process state.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    /// Mount the local source tree and cache into the container.
    pub dev_mode: bool,
    /// Image used when the workspace config does not name one.
    pub default_image: String,
    /// Repository root bind-mounted in dev mode. Defaults to this crate's
    /// own source tree.
    pub source_root: PathBuf,
    /// Per-user cache directory bind-mounted in dev mode.
    pub cache_dir: PathBuf,
    /// Timeout for every engine API call.
    pub engine_timeout: Duration,
    /// How to wait for the tooling server to answer.
    pub wait: WaitPolicy,
    /// Extra setup attempts after a host port turns out to be taken.
    pub port_retries: u32,
    /// Forwarded as `DOCKSPACE_API_KEY`.
    pub api_key: Option<SecretString>,
    /// Forwarded as `DOCKSPACE_BASE_URL`.
    pub base_url: Option<String>,
    /// Forwarded as `GITHUB_ACCESS_TOKEN`.
    pub github_access_token: Option<SecretString>,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            dev_mode: false,
            default_image: DEFAULT_IMAGE.to_string(),
            source_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")),
            cache_dir: default_cache_dir(),
            engine_timeout: Duration::from_secs(100),
            wait: WaitPolicy::default(),
            port_retries: 2,
            api_key: None,
            base_url: None,
            github_access_token: None,
        }
    }
}

impl WorkspaceSettings {
    /// Resolve settings from the process environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Self::resolve_from(&|key: &str| std::env::var(key))
    }

    pub(crate) fn resolve_from(env: EnvLookup<'_>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let source_root = optional_env(env, "DOCKSPACE_SOURCE_ROOT")?
            .map(PathBuf::from)
            .unwrap_or(defaults.source_root);
        let cache_dir = optional_env(env, "DOCKSPACE_CACHE_DIR")?
            .map(PathBuf::from)
            .unwrap_or(defaults.cache_dir);

        let ready_timeout_secs: u64 = parse_optional_env(
            env,
            "DOCKSPACE_READY_TIMEOUT_SECS",
            defaults.wait.timeout.map_or(0, |t| t.as_secs()),
        )?;
        let poll_ms: u64 = parse_optional_env(
            env,
            "DOCKSPACE_READY_POLL_MS",
            defaults.wait.initial_interval.as_millis() as u64,
        )?;
        if poll_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: "DOCKSPACE_READY_POLL_MS".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        let base_url = optional_env(env, ENV_BASE_URL)?;
        if let Some(ref raw) = base_url
            && let Err(e) = url::Url::parse(raw)
        {
            return Err(ConfigError::InvalidValue {
                key: ENV_BASE_URL.to_string(),
                message: format!("not a valid URL: {e}"),
            });
        }

        Ok(Self {
            dev_mode: optional_env(env, ENV_DEV_MODE)?.is_some_and(|v| v.trim() == "1"),
            default_image: optional_env(env, ENV_IMAGE)?.unwrap_or(defaults.default_image),
            source_root,
            cache_dir,
            engine_timeout: Duration::from_secs(parse_optional_env(
                env,
                "DOCKSPACE_ENGINE_TIMEOUT_SECS",
                defaults.engine_timeout.as_secs(),
            )?),
            wait: WaitPolicy {
                timeout: (ready_timeout_secs > 0).then(|| Duration::from_secs(ready_timeout_secs)),
                initial_interval: Duration::from_millis(poll_ms),
                ..defaults.wait
            },
            port_retries: parse_optional_env(env, "DOCKSPACE_PORT_RETRIES", defaults.port_retries)?,
            api_key: optional_env(env, ENV_API_KEY)?.map(SecretString::from),
            base_url,
            github_access_token: optional_env(env, ENV_GITHUB_ACCESS_TOKEN)?
                .map(SecretString::from),
        })
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".dockspace")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::env::VarError;

    use secrecy::ExposeSecret;

    use super::*;

    fn resolve(vars: &[(&str, &str)]) -> Result<WorkspaceSettings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        WorkspaceSettings::resolve_from(&move |key: &str| {
            map.get(key).cloned().ok_or(VarError::NotPresent)
        })
    }

    #[test]
    fn test_defaults_when_environment_is_empty() {
        let settings = resolve(&[]).unwrap();
        assert!(!settings.dev_mode);
        assert_eq!(settings.default_image, DEFAULT_IMAGE);
        assert_eq!(settings.engine_timeout, Duration::from_secs(100));
        assert_eq!(settings.wait.timeout, Some(Duration::from_secs(60)));
        assert_eq!(settings.wait.initial_interval, Duration::from_millis(100));
        assert_eq!(settings.port_retries, 2);
        assert!(settings.api_key.is_none());
        assert!(settings.source_root.join("Cargo.toml").exists());
    }

    #[test]
    fn test_source_root_override() {
        let settings = resolve(&[("DOCKSPACE_SOURCE_ROOT", "/work/dockspace")]).unwrap();
        assert_eq!(settings.source_root, PathBuf::from("/work/dockspace"));
    }

    #[test]
    fn test_dev_mode_requires_exactly_one() {
        assert!(resolve(&[(ENV_DEV_MODE, "1")]).unwrap().dev_mode);
        assert!(!resolve(&[(ENV_DEV_MODE, "0")]).unwrap().dev_mode);
        assert!(!resolve(&[(ENV_DEV_MODE, "true")]).unwrap().dev_mode);
    }

    #[test]
    fn test_image_override() {
        let settings = resolve(&[(ENV_IMAGE, "registry.local/tools:dev")]).unwrap();
        assert_eq!(settings.default_image, "registry.local/tools:dev");
    }

    #[test]
    fn test_zero_ready_timeout_disables_deadline() {
        let settings = resolve(&[("DOCKSPACE_READY_TIMEOUT_SECS", "0")]).unwrap();
        assert_eq!(settings.wait.timeout, None);
    }

    #[test]
    fn test_max_ready_timeout_resolves() {
        let settings =
            resolve(&[("DOCKSPACE_READY_TIMEOUT_SECS", "18446744073709551615")]).unwrap();
        assert_eq!(settings.wait.timeout, Some(Duration::from_secs(u64::MAX)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let err = resolve(&[("DOCKSPACE_READY_POLL_MS", "0")]).unwrap_err();
        assert!(err.to_string().contains("DOCKSPACE_READY_POLL_MS"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        assert!(resolve(&[(ENV_BASE_URL, "not a url")]).is_err());
        let ok = resolve(&[(ENV_BASE_URL, "https://backend.example.com/api")]).unwrap();
        assert_eq!(
            ok.base_url.as_deref(),
            Some("https://backend.example.com/api")
        );
    }

    #[test]
    fn test_credentials_are_secret() {
        let settings = resolve(&[(ENV_API_KEY, "sk-123"), (ENV_GITHUB_ACCESS_TOKEN, "ghp_x")]).unwrap();
        assert_eq!(
            settings.api_key.as_ref().map(|k| k.expose_secret().to_string()),
            Some("sk-123".to_string())
        );
        assert!(!format!("{:?}", settings).contains("ghp_x"));
    }
}
