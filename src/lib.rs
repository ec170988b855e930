//! dockspace: Docker-backed sandbox workspaces for agent tooling.
//!
//! The [`workspace`] module owns the container lifecycle; [`config`] resolves
//! host settings from the environment; [`testing`] provides in-memory engine
//! and probe doubles.

pub mod cli;
pub mod config;
pub mod error;
pub mod testing;
pub mod workspace;
