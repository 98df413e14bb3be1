use anyhow::Context;
use dsmr_mqtt_bridge::{Config, InstanceLock, MqttPublisher, TelegramCoordinator};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let version = env!("CARGO_PKG_VERSION");
    let _lock = InstanceLock::acquire(concat!(env!("CARGO_PKG_NAME"), "_lockfile"))?;
    info!(version, "Starting DSMR MQTT bridge");

    let config = Config::from_env().context("Invalid configuration")?;
    let schema = Arc::new(config.load_schema().context("Invalid field schema")?);
    info!(fields = schema.len(), schema = ?config.schema, "Field schema loaded");

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let (outbound, publisher) = MqttPublisher::start(&config.mqtt, version);

    // The coordinator owns the only senders from here on; the publisher stops
    // once they are all dropped
    let coordinator =
        TelegramCoordinator::start(&config, schema, version, outbound, shutdown.clone());
    let coordinator = match coordinator {
        Ok(coordinator) => coordinator,
        Err(e) => {
            shutdown.cancel();
            let _ = publisher.await;
            return Err(e);
        }
    };

    coordinator.wait().await?;
    publisher.await.context("MQTT publisher failed")?;
    info!("DSMR MQTT bridge stopped");
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C or SIGTERM.
async fn watch_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!(error = %e, "Cannot listen for Ctrl-C");
                return;
            }
        }
        _ = terminate => {}
    }
    info!("Shutdown requested");
    shutdown.cancel();
}
