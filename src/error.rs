//! Crate-level error types.

use thiserror::Error;

pub use crate::workspace::error::{EngineError, WorkspaceError};

/// Errors raised while resolving configuration from the environment or files.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable holds a value that cannot be used.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable or field name.
        key: String,
        /// What was wrong with it.
        message: String,
    },

    /// An environment variable is set but is not valid unicode.
    #[error("Environment variable {key} is not valid unicode")]
    NotUnicode {
        /// Variable name.
        key: String,
    },

    /// A workspace config file could not be read.
    #[error("Failed to read config file {path}: {source}")]
    Read {
        /// Path that was read.
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A workspace config file could not be parsed.
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was parsed.
        path: std::path::PathBuf,
        #[source]
        source: toml::de::Error,
    },
}
