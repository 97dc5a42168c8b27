//! Network configuration context.
//!
//! [`NetworkContext`] holds the address other UPnP nodes reach this process
//! at. Both the GENA callback URL and the locations of hosted devices are
//! derived from it. The IP is either configured explicitly or detected; the
//! port is published once the HTTP listener has bound.

use std::net::IpAddr;
#[cfg(test)]
use std::net::Ipv4Addr;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Notify;

use crate::protocol_constants::GENA_CALLBACK_PATH;
use crate::upnp::local::{description_path, DEVICES_PATH};

/// Network configuration shared across services.
///
/// # Modes
///
/// - **Explicit**: the advertise IP comes from configuration. Use
///   [`NetworkContext::explicit`].
/// - **Auto-detect**: the local IP is detected through an [`IpDetector`].
///   Use [`NetworkContext::auto_detect`].
#[derive(Clone)]
pub struct NetworkContext {
    /// HTTP port (0 until the server has bound).
    pub port: Arc<RwLock<u16>>,
    /// Notifier signaled when the port is assigned.
    pub port_notify: Arc<Notify>,
    /// IP address other nodes can reach us at.
    pub local_ip: Arc<RwLock<String>>,
    ip_detector: Option<Arc<dyn IpDetector>>,
}

impl NetworkContext {
    /// Creates a context with an explicitly configured advertise IP.
    ///
    /// `bind_port` may be 0; the real port is set once the listener binds.
    #[must_use]
    pub fn explicit(bind_port: u16, advertise_ip: IpAddr) -> Self {
        Self {
            port: Arc::new(RwLock::new(bind_port)),
            port_notify: Arc::new(Notify::new()),
            local_ip: Arc::new(RwLock::new(advertise_ip.to_string())),
            ip_detector: None,
        }
    }

    /// Creates a context whose IP is detected now and can be re-detected later.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial detection fails.
    pub fn auto_detect(
        preferred_port: u16,
        ip_detector: Arc<dyn IpDetector>,
    ) -> Result<Self, NetworkError> {
        let local_ip = ip_detector.detect()?;
        Ok(Self {
            port: Arc::new(RwLock::new(preferred_port)),
            port_notify: Arc::new(Notify::new()),
            local_ip: Arc::new(RwLock::new(local_ip)),
            ip_detector: Some(ip_detector),
        })
    }

    #[cfg(test)]
    pub fn for_test() -> Self {
        Self::explicit(0, IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)))
    }

    /// Re-runs IP detection. Fails in explicit mode.
    pub fn detect_ip(&self) -> Result<String, NetworkError> {
        match &self.ip_detector {
            Some(detector) => detector.detect(),
            None => Err(NetworkError::NoDetector),
        }
    }

    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    #[must_use]
    pub fn get_local_ip(&self) -> String {
        self.local_ip.read().clone()
    }

    /// Sets the port and wakes everyone waiting for it.
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
        self.port_notify.notify_waiters();
    }

    pub fn set_local_ip(&self, ip: String) {
        *self.local_ip.write() = ip;
    }

    #[must_use]
    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.get_local_ip(), self.get_port())
    }

    /// Callback URL remote services deliver GENA events to.
    #[must_use]
    pub fn gena_callback_url(&self) -> String {
        self.url_builder().gena_callback_url()
    }

    /// Description URL of the hosted device `uuid`.
    #[must_use]
    pub fn device_location(&self, uuid: &str) -> String {
        self.url_builder().device_description_url(uuid)
    }
}

/// Detects the local IP address.
pub trait IpDetector: Send + Sync {
    fn detect(&self) -> Result<String, NetworkError>;
}

/// IP detector backed by the system's network interfaces.
#[derive(Debug, Clone, Default)]
pub struct LocalIpDetector;

impl LocalIpDetector {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LocalIpDetector {
    fn detect(&self) -> Result<String, NetworkError> {
        local_ip_address::local_ip()
            .map(|ip| ip.to_string())
            .map_err(|e| NetworkError::Detection(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Failed to detect local IP: {0}")]
    Detection(String),

    #[error("No IP detector configured (using explicit mode)")]
    NoDetector,

    #[error("No free port in {0}")]
    NoFreePort(String),
}

/// Builds absolute URLs served by this process.
pub struct UrlBuilder {
    ip: String,
    port: u16,
}

impl UrlBuilder {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// `http://<ip>:<port>`
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.ip, self.port)
    }

    #[must_use]
    pub fn gena_callback_url(&self) -> String {
        format!("{}{}", self.base_url(), GENA_CALLBACK_PATH)
    }

    #[must_use]
    pub fn device_description_url(&self, uuid: &str) -> String {
        format!("{}{}", self.base_url(), description_path(uuid))
    }

    /// Base URL of everything served for the hosted device `uuid`.
    #[must_use]
    pub fn device_base_url(&self, uuid: &str) -> String {
        format!("{}{}/{}", self.base_url(), DEVICES_PATH, uuid)
    }

    #[must_use]
    pub fn websocket_url(&self) -> String {
        format!("ws://{}:{}/ws", self.ip, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockIpDetector {
        ip: String,
    }

    impl IpDetector for MockIpDetector {
        fn detect(&self) -> Result<String, NetworkError> {
            Ok(self.ip.clone())
        }
    }

    #[test]
    fn explicit_context_uses_provided_ip() {
        let ctx = NetworkContext::explicit(8080, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 100)));
        assert_eq!(ctx.get_local_ip(), "192.168.1.100");
        assert_eq!(ctx.get_port(), 8080);
        assert!(matches!(ctx.detect_ip(), Err(NetworkError::NoDetector)));
    }

    #[test]
    fn auto_detect_context_uses_detector() {
        let detector = Arc::new(MockIpDetector {
            ip: "10.0.0.5".to_string(),
        });
        let ctx = NetworkContext::auto_detect(0, detector).unwrap();
        assert_eq!(ctx.get_local_ip(), "10.0.0.5");
        assert_eq!(ctx.detect_ip().unwrap(), "10.0.0.5");
    }

    #[test]
    fn urls_follow_the_bound_port() {
        let ctx = NetworkContext::for_test();
        ctx.set_port(49501);
        assert_eq!(ctx.gena_callback_url(), "http://127.0.0.1:49501/events");
        assert_eq!(
            ctx.device_location("abc"),
            "http://127.0.0.1:49501/devices/abc/description.xml"
        );
    }

    #[test]
    fn url_builder_generates_correct_urls() {
        let builder = UrlBuilder::new("192.168.1.100", 8080);
        assert_eq!(builder.base_url(), "http://192.168.1.100:8080");
        assert_eq!(
            builder.device_base_url("abc"),
            "http://192.168.1.100:8080/devices/abc"
        );
        assert_eq!(builder.websocket_url(), "ws://192.168.1.100:8080/ws");
    }
}
