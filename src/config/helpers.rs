use std::env::VarError;
use std::str::FromStr;

use crate::error::ConfigError;

/// Source of environment values.
///
/// Production code reads the process environment; tests pass a closure over a
/// fixed map so they never mutate global state.
pub(crate) type EnvLookup<'a> = &'a dyn Fn(&str) -> Result<String, VarError>;

/// Read an env var, treating unset and empty the same.
pub(crate) fn optional_env(env: EnvLookup<'_>, key: &str) -> Result<Option<String>, ConfigError> {
    match env(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(VarError::NotUnicode(_)) => Err(ConfigError::NotUnicode {
            key: key.to_string(),
        }),
    }
}

/// Parse an optional env var, falling back to `default` when unset.
pub(crate) fn parse_optional_env<T>(
    env: EnvLookup<'_>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    optional_env(env, key)?
        .map(|s| {
            s.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            })
        })
        .transpose()
        .map(|v| v.unwrap_or(default))
}
