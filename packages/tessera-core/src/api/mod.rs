//! HTTP/WebSocket API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::events::BroadcastEvent;
use crate::protocol_constants::HTTP_PORT_RANGE;
use crate::services::{ControlPoint, DeviceHost};
use crate::state::Config;

pub mod http;
pub mod response;
pub mod ws;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),

    /// No available ports in the specified range.
    #[error("No available ports in range {start}-{end}")]
    NoAvailablePort { start: u16, end: u16 },
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Drives detected remote devices.
    pub control_point: Arc<ControlPoint>,
    /// Serves hosted devices.
    pub device_host: Arc<DeviceHost>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Network configuration (port, local IP).
    pub network: NetworkContext,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
    /// Cancelled on shutdown; closes WebSocket connections.
    pub shutdown: CancellationToken,
}

async fn find_available_port(
    start: u16,
    end: u16,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    for port in start..=end {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        match tokio::net::TcpListener::bind(&addr).await {
            Ok(listener) => return Ok((port, listener)),
            Err(_) => continue,
        }
    }
    Err(ServerError::NoAvailablePort { start, end })
}

/// Binds the HTTP listener on the configured or auto-discovered port and
/// publishes the port into the network context.
pub async fn bind_listener(
    state: &AppState,
) -> Result<(u16, tokio::net::TcpListener), ServerError> {
    let preferred_port = state.config.read().preferred_port;
    let (port, listener) = if preferred_port > 0 {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], preferred_port));
        (preferred_port, tokio::net::TcpListener::bind(&addr).await?)
    } else {
        find_available_port(*HTTP_PORT_RANGE.start(), *HTTP_PORT_RANGE.end()).await?
    };

    // Set port and signal waiters
    state.network.set_port(port);
    Ok((port, listener))
}

/// Serves the API on an already bound listener until `state.shutdown` fires.
pub async fn serve(
    state: AppState,
    listener: tokio::net::TcpListener,
) -> Result<(), ServerError> {
    let shutdown = state.shutdown.clone();
    let app = http::create_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// Starts the HTTP server on the configured or auto-discovered port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let (port, listener) = bind_listener(&state).await?;
    log::info!("[Server] Listening on http://0.0.0.0:{}", port);
    serve(state, listener).await
}
