//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. Embedders call
//! [`bootstrap_services`], then [`BootstrappedServices::start`], and hand
//! [`BootstrappedServices::app_state`] to the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::api::AppState;
use crate::context::{LocalIpDetector, NetworkContext};
use crate::error::{TesseraError, TesseraResult};
use crate::events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
use crate::protocol_constants::SOAP_TIMEOUT_SECS;
use crate::runtime::TokioSpawner;
use crate::services::{ControlPoint, DeviceHost};
use crate::state::Config;
use crate::upnp::ssdp::{RegistrationTable, SsdpServer};
use crate::upnp::GenaSubscriptionManager;

/// Container for all bootstrapped services.
///
/// This struct holds all the wired services created during bootstrap.
/// [`app_state`](Self::app_state) derives the API state from it.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// SSDP registration table shared by the engine and the services.
    pub table: Arc<RegistrationTable>,
    /// SSDP engine (sockets, announcements, searches).
    pub ssdp: Arc<SsdpServer>,
    /// Detects and drives remote devices.
    pub control_point: Arc<ControlPoint>,
    /// Serves hosted devices.
    pub device_host: Arc<DeviceHost>,
    /// Client-role GENA subscriptions.
    pub gena: Arc<GenaSubscriptionManager>,
    /// Broadcast channel sender for real-time events.
    pub broadcast_tx: broadcast::Sender<BroadcastEvent>,
    /// Event bridge for emitting events to WebSocket and optional external consumers.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Network configuration (port, local IP).
    pub network: NetworkContext,
    /// Configuration the services were built from.
    pub config: Arc<RwLock<Config>>,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
    /// Task spawner for background operations.
    pub spawner: TokioSpawner,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Starts the background loops: SSDP receive/resend/search, the
    /// registry listener, subscription renewal and subscriber expiry.
    pub fn start(&self) {
        self.ssdp.start(&self.spawner, self.cancel_token.clone());
        self.control_point.start(self.cancel_token.clone());
        self.device_host.start(self.cancel_token.clone());
        log::info!("[Bootstrap] Services started");
    }

    /// Builds the state handed to the HTTP and WebSocket handlers.
    pub fn app_state(&self) -> AppState {
        AppState {
            control_point: Arc::clone(&self.control_point),
            device_host: Arc::clone(&self.device_host),
            broadcast_tx: self.broadcast_tx.clone(),
            network: self.network.clone(),
            config: Arc::clone(&self.config),
            shutdown: self.cancel_token.clone(),
        }
    }

    /// Initiates graceful shutdown of all services.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");

        // Signal cancellation to all background tasks
        self.cancel_token.cancel();

        // Unsubscribe from all remote services
        self.control_point.shutdown().await;

        // Withdraw hosted devices, then byebye whatever is still local
        self.device_host.shutdown().await;
        self.ssdp.shutdown().await;

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for descriptions, SOAP and GENA.
///
/// Using a shared client enables connection pooling.
fn create_http_client() -> TesseraResult<Client> {
    Client::builder()
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .build()
        .map_err(|e| TesseraError::Internal(format!("Failed to create HTTP client: {}", e)))
}

/// Bootstraps all services, detecting the local IP automatically.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or no usable local IP
/// can be detected.
pub fn bootstrap_services(config: &Config) -> TesseraResult<BootstrappedServices> {
    let network = NetworkContext::auto_detect(config.preferred_port, LocalIpDetector::arc())
        .map_err(|e| TesseraError::Internal(format!("Failed to detect local IP: {}", e)))?;
    bootstrap_services_with_network(config, network)
}

/// Bootstraps all services with a caller-supplied network context.
///
/// Services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, broadcast channel, cancellation token)
/// 2. Registration table (emits discovery events through the bridge)
/// 3. SSDP engine (owns the table's network side)
/// 4. GENA subscription manager
/// 5. Control point (depends on table, GENA, HTTP client)
/// 6. Device host (depends on SSDP engine, HTTP client)
///
/// Must be called inside a Tokio runtime.
///
/// # Errors
///
/// Returns an error if the configuration is invalid.
pub fn bootstrap_services_with_network(
    config: &Config,
    network: NetworkContext,
) -> TesseraResult<BootstrappedServices> {
    config.validate().map_err(TesseraError::Configuration)?;

    let spawner = TokioSpawner::current();
    let http_client = create_http_client()?;

    let (broadcast_tx, _) = broadcast::channel::<BroadcastEvent>(config.event_channel_capacity);
    let event_bridge = Arc::new(BroadcastEventBridge::with_sender(broadcast_tx.clone()));
    let emitter = Arc::clone(&event_bridge) as Arc<dyn EventEmitter>;

    let cancel_token = CancellationToken::new();

    let table = Arc::new(RegistrationTable::new(Arc::clone(&emitter)));
    let ssdp = Arc::new(SsdpServer::bind(Arc::clone(&table), config.ssdp.clone()));

    let gena = Arc::new(GenaSubscriptionManager::new(
        http_client.clone(),
        config.gena.clone(),
        Arc::clone(&emitter),
    ));

    let control_point = Arc::new(ControlPoint::new(
        Arc::clone(&table),
        http_client.clone(),
        Arc::clone(&gena),
        emitter,
        network.clone(),
        spawner.clone(),
    ));

    let device_host = Arc::new(DeviceHost::new(
        Arc::clone(&ssdp),
        network.clone(),
        http_client.clone(),
        config.gena.clone(),
        config.server_banner(),
        spawner.clone(),
    ));

    Ok(BootstrappedServices {
        table,
        ssdp,
        control_point,
        device_host,
        gena,
        broadcast_tx,
        event_bridge,
        network,
        config: Arc::new(RwLock::new(config.clone())),
        http_client,
        spawner,
        cancel_token,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::local::binary_light;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.ssdp.enabled = false;
        config
    }

    #[test]
    fn http_client_builds() {
        let client = create_http_client().unwrap();
        assert!(client.get("http://example.com").build().is_ok());
    }

    #[tokio::test]
    async fn invalid_config_is_rejected() {
        let mut config = test_config();
        config.event_channel_capacity = 0;
        let result = bootstrap_services_with_network(&config, NetworkContext::for_test());
        assert!(matches!(result, Err(TesseraError::Configuration(_))));
    }

    #[tokio::test]
    async fn published_device_is_registered_and_withdrawn_on_shutdown() {
        let services =
            bootstrap_services_with_network(&test_config(), NetworkContext::for_test()).unwrap();
        services.start();

        let device = services
            .device_host
            .publish(binary_light(None, "Bench Lamp"))
            .await;
        assert!(services.table.is_known(&format!("{}::upnp:rootdevice", device.udn())));
        assert_eq!(services.app_state().device_host.devices().len(), 1);

        services.shutdown().await;
        assert!(services.cancel_token.is_cancelled());
        assert!(services.device_host.devices().is_empty());
        assert!(services.table.local_entries().is_empty());
    }

    #[tokio::test]
    async fn discovery_events_reach_broadcast_subscribers() {
        let services =
            bootstrap_services_with_network(&test_config(), NetworkContext::for_test()).unwrap();
        let mut rx = services.broadcast_tx.subscribe();

        services
            .device_host
            .publish(binary_light(None, "Porch"))
            .await;

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            BroadcastEvent::Discovery(crate::events::DiscoveryEvent::NewDevice { local: true, .. })
        ));
    }
}
