//! PTT Relay Server
//!
//! Serves the WebSocket relay, the status API, the static client and the
//! live HLS mirror from one port.

use anyhow::Result;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ptt_relay::{
    config::{AppConfig, LoggingConfig},
    coordinator::Coordinator,
    hub::Hub,
    keepalive::KeepAliveScheduler,
    live::{DisabledSink, HlsBridge, LiveSink},
    ui::WebServer,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = AppConfig::locate(std::env::args().nth(1));
    let mut config = AppConfig::load(&config_path)?;
    config.apply_env()?;
    config.validate()?;

    init_logging(&config.logging);

    tracing::info!(config = %config_path.display(), "Starting PTT relay");
    tracing::info!(
        secrets = config.auth.passwords.len(),
        live = config.live.enabled,
        keepalive = config.keepalive.enabled,
        "Configuration loaded"
    );

    let live: Box<dyn LiveSink> = if config.live.enabled {
        tracing::info!(
            "Live mirror: {} -> {}",
            config.live.ffmpeg_path,
            config.live.playlist_path().display()
        );
        Box::new(HlsBridge::new(&config.live))
    } else {
        Box::new(DisabledSink)
    };

    let coordinator = Coordinator::new(&config, live);
    let (hub, hub_task) = Hub::spawn(
        coordinator,
        config.server.mailbox_capacity,
        config.keepalive.end_delay(),
    );

    let keepalive = config
        .keepalive
        .enabled
        .then(|| KeepAliveScheduler::new(config.keepalive.clone()).spawn(hub.clone()));

    WebServer::new(&config, hub.clone())
        .run(shutdown_signal())
        .await?;

    if let Some(task) = keepalive {
        task.abort();
    }
    if hub.shutdown().await.is_ok() {
        let _ = hub_task.await;
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

fn init_logging(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match config.format.as_str() {
        "json" => registry
            .with(fmt::layer().json().with_current_span(true))
            .init(),
        _ => registry.with(fmt::layer().with_target(true)).init(),
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Ctrl-C received, shutting down"),
        Err(e) => {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    }
}
