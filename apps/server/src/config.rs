//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::net::IpAddr;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tessera_core::protocol_constants::SSDP_MSEARCH_INTERVAL_SECS;

/// A sample BinaryLight device hosted by the server.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct BinaryLightConfig {
    /// Friendly name shown to control points.
    #[serde(default = "default_light_name")]
    pub name: String,

    /// Fixed UDN. A fresh one is generated at every start when unset.
    #[serde(default)]
    pub udn: Option<String>,
}

fn default_light_name() -> String {
    format!("{} Light", tessera_core::utils::local_hostname())
}

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to. 0 picks the first free port in the
    /// default range.
    /// Override: `TESSERA_BIND_PORT`
    pub bind_port: u16,

    /// IP address put into LOCATION and CALLBACK URLs.
    /// If not specified, auto-detection will be attempted.
    /// Override: `TESSERA_ADVERTISE_IP`
    pub advertise_ip: Option<IpAddr>,

    /// Enable the SSDP sockets.
    pub ssdp_enabled: bool,

    /// Interval in seconds between M-SEARCH rounds.
    /// Override: `TESSERA_MSEARCH_INTERVAL`
    pub msearch_interval: u64,

    /// Subscribe to evented services of every detected device.
    pub auto_subscribe: bool,

    /// Overrides the SERVER header.
    pub server_banner: Option<String>,

    /// Host a sample BinaryLight device.
    pub binary_light: Option<BinaryLightConfig>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_port: 0,
            advertise_ip: None,
            ssdp_enabled: true,
            msearch_interval: SSDP_MSEARCH_INTERVAL_SECS,
            auto_subscribe: true,
            server_banner: None,
            binary_light: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    ///
    /// Unparseable values are ignored.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("TESSERA_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(ip) = var("TESSERA_ADVERTISE_IP").and_then(|v| v.parse().ok()) {
            self.advertise_ip = Some(ip);
        }

        if let Some(interval) = var("TESSERA_MSEARCH_INTERVAL").and_then(|v| v.parse().ok()) {
            self.msearch_interval = interval;
        }
    }

    /// Converts to tessera-core's Config type.
    pub fn to_core_config(&self) -> tessera_core::Config {
        let mut config = tessera_core::Config {
            preferred_port: self.bind_port,
            server_banner: self.server_banner.clone(),
            ..Default::default()
        };
        config.ssdp.enabled = self.ssdp_enabled;
        config.ssdp.msearch_interval_secs = self.msearch_interval;
        config.gena.auto_subscribe = self.auto_subscribe;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn missing_file_uses_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_port, 0);
        assert!(config.ssdp_enabled);
        assert!(config.binary_light.is_none());
        assert!(config.to_core_config().validate().is_ok());
    }

    #[test]
    fn loads_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "bind_port: 49555\nssdp_enabled: false\nbinary_light:\n  name: Desk Lamp\n"
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert!(!config.ssdp_enabled);
        assert!(config.auto_subscribe);
        assert_eq!(
            config.binary_light,
            Some(BinaryLightConfig {
                name: "Desk Lamp".to_string(),
                udn: None
            })
        );

        let core = config.to_core_config();
        assert!(!core.ssdp.enabled);
    }

    #[test]
    fn binary_light_name_defaults_to_hostname() {
        let light: BinaryLightConfig = serde_yaml::from_str("udn: uuid:lamp-1").unwrap();
        assert!(light.name.ends_with(" Light"));
        assert_eq!(light.udn.as_deref(), Some("uuid:lamp-1"));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_port: [not, a, port]").unwrap();
        assert!(ServerConfig::load(Some(file.path())).is_err());
    }

    #[test]
    fn env_overrides_apply_and_ignore_garbage() {
        let env: HashMap<&str, &str> = [
            ("TESSERA_BIND_PORT", "49600"),
            ("TESSERA_ADVERTISE_IP", "192.168.1.20"),
            ("TESSERA_MSEARCH_INTERVAL", "soon"),
        ]
        .into_iter()
        .collect();

        let mut config = ServerConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.bind_port, 49600);
        assert_eq!(config.advertise_ip, Some("192.168.1.20".parse().unwrap()));
        assert_eq!(config.msearch_interval, SSDP_MSEARCH_INTERVAL_SECS);

        let core = config.to_core_config();
        assert_eq!(core.preferred_port, 49600);
    }
}
