//! CLI command handling.
//!
//! Provides subcommands for:
//! - Starting a workspace and holding it until Ctrl-C (`up`)
//! - Removing a workspace container by id (`down`)
//! - Checking that the container engine is reachable (`check`)

mod workspace;

pub use workspace::{run_check_command, run_down_command, run_up_command};

use std::path::PathBuf;

use clap::{ColorChoice, Parser, Subcommand};

use crate::workspace::{PortRequest, VolumeBind};

#[derive(Parser, Debug)]
#[command(name = "dockspace")]
#[command(about = "Run sandboxed tool workspaces in Docker containers")]
#[command(
    long_about = "dockspace starts a containerized tooling server and exposes it on a local port.\nExamples:\n  dockspace up --publish 9000:9000  # Start a workspace\n  dockspace down dockspace-<id>  # Remove a leftover container"
)]
#[command(version)]
#[command(color = ColorChoice::Auto)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a workspace, print its endpoint as JSON, and tear it down on Ctrl-C
    Up(UpArgs),

    /// Kill and remove a workspace container
    Down {
        /// Workspace id (the container name)
        id: String,
    },

    /// Check that the container engine answers
    Check,
}

#[derive(clap::Args, Debug, Default)]
pub struct UpArgs {
    /// Image to run (overrides the config file and DOCKSPACE_IMAGE)
    #[arg(long)]
    pub image: Option<String>,

    /// Publish a container port, as CONTAINER:HOST or CONTAINER for any free host port
    #[arg(short, long = "publish", value_parser = parse_publish)]
    pub publish: Vec<PublishArg>,

    /// Bind mount, as SRC:DST[:ro|rw]
    #[arg(short, long = "volume", value_parser = parse_volume)]
    pub volume: Vec<VolumeArg>,

    /// Workspace config file (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Mount the local source tree and cache into the container
    #[arg(long)]
    pub dev: bool,

    /// Seconds to wait for the tooling server; 0 waits forever
    #[arg(long, value_name = "SECS")]
    pub ready_timeout: Option<u64>,
}

/// A `--publish` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishArg {
    pub container_port: u16,
    pub request: PortRequest,
}

/// A `--volume` value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeArg {
    pub source: String,
    pub bind: VolumeBind,
}

fn parse_port(raw: &str) -> Result<u16, String> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| format!("'{raw}' is not a valid port"))
}

fn parse_publish(raw: &str) -> Result<PublishArg, String> {
    match raw.split_once(':') {
        Some((container, host)) => Ok(PublishArg {
            container_port: parse_port(container)?,
            request: PortRequest::Port(parse_port(host)?),
        }),
        None => Ok(PublishArg {
            container_port: parse_port(raw)?,
            request: PortRequest::Ephemeral,
        }),
    }
}

fn parse_volume(raw: &str) -> Result<VolumeArg, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let (source, target, mode) = match parts.as_slice() {
        [source, target] => (*source, *target, "rw"),
        [source, target, mode] => (*source, *target, *mode),
        _ => return Err(format!("expected SRC:DST[:ro|rw], got '{raw}'")),
    };
    if source.is_empty() || target.is_empty() {
        return Err(format!("expected SRC:DST[:ro|rw], got '{raw}'"));
    }
    let bind = match mode {
        "rw" => VolumeBind::rw(target),
        "ro" => VolumeBind::ro(target),
        other => return Err(format!("unknown volume mode '{other}', expected ro or rw")),
    };
    Ok(VolumeArg {
        source: source.to_string(),
        bind,
    })
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;
    use crate::workspace::VolumeMode;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_publish() {
        assert_eq!(
            parse_publish("9000:19000").unwrap(),
            PublishArg {
                container_port: 9000,
                request: PortRequest::Port(19000),
            }
        );
        assert_eq!(
            parse_publish("9000").unwrap().request,
            PortRequest::Ephemeral
        );
        assert!(parse_publish("http:80").is_err());
        assert!(parse_publish("70000:1").is_err());
    }

    #[test]
    fn test_parse_volume() {
        let vol = parse_volume("/data:/mnt/data:ro").unwrap();
        assert_eq!(vol.source, "/data");
        assert_eq!(vol.bind.bind, "/mnt/data");
        assert_eq!(vol.bind.mode, VolumeMode::Ro);

        assert_eq!(parse_volume("/a:/b").unwrap().bind.mode, VolumeMode::Rw);
        assert!(parse_volume("/a").is_err());
        assert!(parse_volume("/a:/b:rx").is_err());
        assert!(parse_volume(":/b").is_err());
    }

    #[test]
    fn test_up_args() {
        let cli = Cli::try_parse_from([
            "dockspace",
            "up",
            "--image",
            "custom:1",
            "-p",
            "9000:9000",
            "--volume",
            "/src:/work",
            "--dev",
            "--ready-timeout",
            "0",
        ])
        .unwrap();
        let Command::Up(args) = cli.command else {
            panic!("expected up");
        };
        assert_eq!(args.image.as_deref(), Some("custom:1"));
        assert_eq!(args.publish.len(), 1);
        assert_eq!(args.volume.len(), 1);
        assert!(args.dev);
        assert_eq!(args.ready_timeout, Some(0));
    }

    #[test]
    fn test_down_requires_id() {
        assert!(Cli::try_parse_from(["dockspace", "down"]).is_err());
        let cli = Cli::try_parse_from(["dockspace", "down", "dockspace-1"]).unwrap();
        assert!(matches!(cli.command, Command::Down { ref id } if id == "dockspace-1"));
    }
}
