//! `lightbridge` daemon.
//!
//! Connects the configured lights and bridges them to a line-oriented bus on
//! stdin/stdout until interrupted.

use std::sync::Arc;

use lightbridge::{
    BleRadio, Config, ConnectionManager, EventDispatcher, HubBridge, LineBus, ReconnectSupervisor,
    Topics,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_CONFIG: &str = "lightbridge.toml";

fn print_help() {
    eprintln!(
        r"lightbridge - BLE light to hub bridge

Usage: lightbridge [config.toml]

Reads `<topic> <json>` command lines from stdin and writes state and
availability lines to stdout. Logs go to stderr; set RUST_LOG to tune.

Defaults to ./{DEFAULT_CONFIG}."
    );
}

#[tokio::main]
async fn main() -> lightbridge::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lightbridge=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config_path = DEFAULT_CONFIG.to_string();
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            arg if !arg.starts_with('-') => config_path = arg.to_string(),
            _ => tracing::warn!("unknown argument: {arg}"),
        }
    }

    let config = Config::load(&config_path)?;
    let devices = config.device_configs()?;
    tracing::info!(config = %config_path, devices = devices.len(), "starting lightbridge");

    let mut services: Vec<_> = devices.iter().map(|d| d.service).collect();
    services.sort_unstable();
    services.dedup();
    let radio = match BleRadio::new(config.adapter.as_deref()).await {
        Ok(radio) => radio.with_scan_services(services),
        Err(e) => {
            tracing::error!("no usable radio: {e}");
            return Err(e);
        }
    };

    let (manager, losses) = ConnectionManager::new(
        radio,
        config.connection_settings(),
        devices,
        EventDispatcher::default(),
    )?;
    let manager = Arc::new(manager);
    let shutdown = CancellationToken::new();

    let bus = Arc::new(LineBus::stdio());
    let bridge = HubBridge::new(
        Arc::clone(&manager),
        bus,
        Topics::new(config.hub.topic_prefix.clone()),
        config.poll_interval(),
    );
    let mut bridge = tokio::spawn(bridge.run(shutdown.clone()));
    let supervisor = tokio::spawn(
        ReconnectSupervisor::new(Arc::clone(&manager), config.reconnect_policy())
            .run(losses, shutdown.clone()),
    );

    for (id, state) in manager.connect_all().await {
        tracing::info!(device = %id, %state, "initial connect settled");
    }

    // A bridge that stops on its own takes the daemon down with it
    let stopped = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!("waiting for ctrl-c: {e}");
            }
            None
        }
        result = &mut bridge => Some(result),
    };
    tracing::info!("shutting down");
    shutdown.cancel();

    let result = match stopped {
        Some(result) => result,
        None => bridge.await,
    };
    match result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!("bridge stopped: {e}"),
        Err(e) => tracing::error!("bridge task failed: {e}"),
    }
    let _ = supervisor.await;
    manager.disconnect_all().await;
    Ok(())
}
