//! Tessera Server - standalone headless UPnP control point and device host.
//!
//! Discovers devices on the LAN, subscribes to their events and exposes them
//! over a JSON/WebSocket API. Optionally hosts a sample BinaryLight device.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tessera_core::{
    binary_light, bind_listener, bootstrap_services_with_network, serve, LocalIpDetector,
    LoggingEventEmitter, NetworkContext,
};
use tokio::signal;

use crate::config::ServerConfig;

/// Tessera Server - headless UPnP control point and device host.
#[derive(Parser, Debug)]
#[command(name = "tessera-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "TESSERA_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long, env = "TESSERA_BIND_PORT")]
    port: Option<u16>,

    /// Advertise IP address (overrides config file).
    #[arg(short = 'a', long, env = "TESSERA_ADVERTISE_IP")]
    advertise_ip: Option<std::net::IpAddr>,

    /// Host a sample BinaryLight with this friendly name.
    #[arg(long, value_name = "NAME")]
    binary_light: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Tessera Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }
    if let Some(name) = args.binary_light {
        config.binary_light = Some(config::BinaryLightConfig { name, udn: None });
    }

    // Resolve advertise IP: use explicit config, or fall back to auto-detection
    let network = if let Some(ip) = config.advertise_ip {
        log::info!(
            "Configuration: bind_port={}, advertise_ip={}",
            config.bind_port,
            ip
        );
        NetworkContext::explicit(config.bind_port, ip)
    } else {
        log::info!(
            "Configuration: bind_port={}, advertise_ip=auto",
            config.bind_port
        );
        NetworkContext::auto_detect(config.bind_port, LocalIpDetector::arc()).context(
            "Failed to auto-detect local IP address. \
             Please specify --advertise-ip or set TESSERA_ADVERTISE_IP to the IP \
             address that other UPnP devices can reach.",
        )?
    };

    let services = bootstrap_services_with_network(&config.to_core_config(), network)
        .context("Failed to bootstrap services")?;
    services
        .event_bridge
        .set_external_emitter(Arc::new(LoggingEventEmitter));
    log::info!("Services bootstrapped successfully");

    // Bind before announcing anything: LOCATION and CALLBACK URLs carry the port.
    let app_state = services.app_state();
    let (port, listener) = bind_listener(&app_state)
        .await
        .context("Failed to bind HTTP listener")?;
    log::info!("HTTP server listening on port {}", port);

    services.start();

    if let Some(light) = &config.binary_light {
        let device = services
            .device_host
            .publish(binary_light(light.udn.as_deref(), &light.name))
            .await;
        log::info!("Hosting BinaryLight \"{}\" as {}", light.name, device.udn());
    }

    let server_handle = tokio::spawn(async move {
        if let Err(e) = serve(app_state, listener).await {
            log::error!("Server error: {}", e);
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    // Graceful shutdown; cancelling the services also stops the HTTP server
    services.shutdown().await;
    if let Err(e) = server_handle.await {
        log::warn!("HTTP server task ended abnormally: {}", e);
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
