//! zlayer-linkd - boot-time management link provisioning
//!
//! Thin daemon around the `zlayer-link` crate: probes local networking,
//! runs the link controller once and persists the published link and
//! address specs under the data directory.

mod cli;
mod logging;
mod probe;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use zlayer_link::{
    Cmdline, DmiProductUuid, FileStore, GrpcConnector, LinkConfig, LinkController, LinkOutcome,
    NodeIdSource, ResourceKey, StaticNodeId,
};

use crate::cli::Cli;

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level, cli.log_format);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref()).await?;
    if let Some(path) = cli.cmdline {
        config.cmdline_path = path;
    }
    config.validate().context("Invalid link configuration")?;

    let cmdline = read_cmdline(&config, cli.api.as_deref()).await?;

    let node_id: Arc<dyn NodeIdSource> = match cli.node_uuid.as_deref() {
        Some(uuid) => Arc::new(StaticNodeId::new(uuid).context("Invalid --node-uuid")?),
        None => Arc::new(DmiProductUuid::new(&config.product_uuid_path)),
    };

    let store = FileStore::open(&cli.data_dir).await.with_context(|| {
        format!("Failed to open resource store at {}", cli.data_dir.display())
    })?;

    // The first sample lands before the controller evaluates readiness.
    probe::publish(store.memory(), probe::sample(&config.link_name).await).await;
    let events = store.memory().watch(ResourceKey::network_status()).await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);

    let signals = tokio::spawn({
        let shutdown_tx = shutdown_tx.clone();
        async move {
            if wait_for_signal().await.is_ok() {
                info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
        }
    });

    let probe = tokio::spawn(probe::run(
        store.memory().clone(),
        config.link_name.clone(),
        Duration::from_secs(cli.probe_interval),
        shutdown_rx.clone(),
    ));

    let connector = GrpcConnector::new().with_connect_timeout(config.connect_timeout);
    let mut controller = LinkController::new(
        config,
        cmdline,
        Arc::new(store.clone()),
        Arc::new(connector),
        node_id,
    );

    let outcome = controller.run(events, shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    signals.abort();
    if let Err(e) = probe.await {
        warn!(error = %e, "Network probe task failed");
    }

    match outcome.context("Management link provisioning failed")? {
        LinkOutcome::Disabled => info!("Management link not requested on the kernel command line"),
        LinkOutcome::Cancelled => info!("Management link provisioning cancelled"),
        LinkOutcome::Published(specs) => {
            println!("{}", specs.link_key);
            println!("{}", specs.address_key);
        }
    }

    Ok(())
}

async fn load_config(path: Option<&Path>) -> Result<LinkConfig> {
    let Some(path) = path else {
        return Ok(LinkConfig::default());
    };

    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))
}

/// Kernel command line, with `api` replacing the link parameter when given
async fn read_cmdline(config: &LinkConfig, api: Option<&str>) -> Result<Cmdline> {
    let mut cmdline = match Cmdline::read(&config.cmdline_path).await {
        Ok(cmdline) => cmdline,
        Err(e) if api.is_some() => {
            warn!(error = %e, "Ignoring unreadable kernel command line");
            Cmdline::default()
        }
        Err(e) => return Err(e).context("Failed to read kernel command line"),
    };

    if let Some(api) = api {
        cmdline.set(config.kernel_param.clone(), api);
    }

    Ok(cmdline)
}

#[cfg(unix)]
async fn wait_for_signal() -> std::io::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
