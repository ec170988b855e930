//! Configuration resolved from the environment and workspace config files.
//!
//! `.env` files are loaded by the binary with `dotenvy` before
//! [`WorkspaceSettings::resolve`] runs, so values there behave like real
//! environment variables.

pub(crate) mod helpers;
mod workspace;

pub use workspace::{
    DEFAULT_IMAGE, ENV_API_KEY, ENV_BASE_URL, ENV_DEV_MODE, ENV_GITHUB_ACCESS_TOKEN, ENV_IMAGE,
    WorkspaceSettings,
};
