//! `up`, `down` and `check` commands.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use crate::cli::UpArgs;
use crate::config::WorkspaceSettings;
use crate::workspace::{
    DockerWorkspace, EngineClient, RemovalOutcome, WorkspaceConfig, WorkspaceError,
    remove_workspace_container,
};

/// Merge the config file with command line flags. Flags win.
pub(crate) fn workspace_config(args: &UpArgs) -> anyhow::Result<WorkspaceConfig> {
    let mut config = match args.config {
        Some(ref path) => WorkspaceConfig::load(path)?,
        None => WorkspaceConfig::default(),
    };
    if let Some(ref image) = args.image {
        config.image = Some(image.clone());
    }
    for publish in &args.publish {
        config
            .ports
            .insert(publish.container_port, publish.request.clone());
    }
    for volume in &args.volume {
        config
            .volumes
            .insert(volume.source.clone(), volume.bind.clone());
    }
    Ok(config)
}

pub(crate) fn apply_overrides(mut settings: WorkspaceSettings, args: &UpArgs) -> WorkspaceSettings {
    if args.dev {
        settings.dev_mode = true;
    }
    if let Some(secs) = args.ready_timeout {
        settings.wait = settings
            .wait
            .with_timeout((secs > 0).then(|| Duration::from_secs(secs)));
    }
    settings
}

/// Start a workspace, print its endpoint, and hold it until Ctrl-C.
pub async fn run_up_command(args: UpArgs) -> anyhow::Result<()> {
    let config = workspace_config(&args)?;
    let settings = apply_overrides(WorkspaceSettings::resolve()?, &args);
    let engine = Arc::new(EngineClient::docker(settings.engine_timeout));
    let mut workspace = DockerWorkspace::new(config, settings, engine);

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl-C, shutting down");
        }
        trigger.cancel();
    });

    let setup = workspace.setup_with_cancel(&shutdown).await;
    let endpoint = match setup {
        Ok(endpoint) => endpoint,
        Err(e) => {
            // Leave nothing behind when the container got as far as being created.
            if let Err(teardown) = workspace.teardown().await {
                tracing::warn!("Cleanup after failed setup also failed: {}", teardown);
            }
            if matches!(e, WorkspaceError::Cancelled { .. }) {
                return Ok(());
            }
            return Err(e.into());
        }
    };

    let summary = serde_json::json!({
        "id": workspace.id(),
        "image": workspace.image(),
        "host": endpoint.host,
        "port": endpoint.port,
        "url": endpoint.url,
        "ports": workspace.ports(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    shutdown.cancelled().await;
    let outcome = workspace
        .teardown()
        .await
        .with_context(|| format!("failed to tear down {}", workspace.id()))?;
    tracing::debug!("Teardown finished: {:?}", outcome);
    Ok(())
}

/// Kill and remove a workspace container by id.
pub async fn run_down_command(id: &str) -> anyhow::Result<()> {
    let settings = WorkspaceSettings::resolve()?;
    let client = EngineClient::docker(settings.engine_timeout);
    let engine = client.get().await?;

    match remove_workspace_container(engine.as_ref(), id).await {
        RemovalOutcome::Removed => println!("Removed {id}"),
        RemovalOutcome::AlreadyAbsent => println!("{id} is not present"),
        RemovalOutcome::Failed(source) => {
            return Err(WorkspaceError::Teardown {
                id: id.to_string(),
                source,
            }
            .into());
        }
    }
    Ok(())
}

/// Ping the engine and report the resolved settings.
pub async fn run_check_command() -> anyhow::Result<()> {
    let settings = WorkspaceSettings::resolve()?;
    println!("Image:          {}", settings.default_image);
    println!("Dev mode:       {}", if settings.dev_mode { "on" } else { "off" });
    match settings.wait.timeout {
        Some(timeout) => println!("Ready timeout:  {}s", timeout.as_secs()),
        None => println!("Ready timeout:  none"),
    }

    let client = EngineClient::docker(settings.engine_timeout);
    let engine = client.get().await?;
    engine
        .ping()
        .await
        .map_err(|source| WorkspaceError::EngineUnavailable { source })?;
    println!("Engine:         reachable");
    Ok(())
}
