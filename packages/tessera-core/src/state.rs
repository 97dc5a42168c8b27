//! Core configuration types.
//!
//! [`Config`] groups the tunable parameters of the stack. Protocol values that
//! must never change live in [`crate::protocol_constants`]; the defaults here
//! are taken from there.

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    EVENT_CHANNEL_CAPACITY, GENA_RENEWAL_BUFFER_SECS, GENA_RENEWAL_CHECK_SECS,
    GENA_SUBSCRIBER_CHECK_SECS, GENA_SUBSCRIPTION_TIMEOUT_SECS, SSDP_ALIVE_RESEND_INTERVAL_SECS,
    SSDP_DEFAULT_MAX_AGE_SECS, SSDP_MSEARCH_INTERVAL_SECS, SSDP_MSEARCH_MX,
    SSDP_SWEEP_INTERVAL_SECS,
};
use crate::upnp::ssdp::SilentEntryPolicy;

/// Configuration for the SSDP engine.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SsdpConfig {
    /// Bind the SSDP sockets at all. When false, local entries are still
    /// tracked but nothing is sent or received.
    pub enabled: bool,

    /// Interval between expiry sweeps (seconds).
    pub sweep_interval_secs: u64,

    /// Interval between re-announcements of local entries (seconds).
    pub alive_resend_interval_secs: u64,

    /// Interval between M-SEARCH rounds (seconds).
    pub msearch_interval_secs: u64,

    /// `MX` sent in our M-SEARCH requests (seconds).
    pub msearch_mx: u64,

    /// `max-age` advertised for local entries (seconds).
    pub max_age_secs: u64,

    /// How silent local entries answer searches.
    pub silent_policy: SilentEntryPolicy,
}

impl SsdpConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.sweep_interval_secs == 0 {
            return Err("ssdp.sweep_interval_secs must be >= 1".to_string());
        }
        if self.alive_resend_interval_secs == 0 {
            return Err("ssdp.alive_resend_interval_secs must be >= 1".to_string());
        }
        if self.msearch_interval_secs == 0 {
            return Err("ssdp.msearch_interval_secs must be >= 1".to_string());
        }
        if !(1..=120).contains(&self.msearch_mx) {
            return Err("ssdp.msearch_mx must be between 1 and 120".to_string());
        }
        if self.max_age_secs == 0 {
            return Err("ssdp.max_age_secs must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: SSDP_SWEEP_INTERVAL_SECS,
            alive_resend_interval_secs: SSDP_ALIVE_RESEND_INTERVAL_SECS,
            msearch_interval_secs: SSDP_MSEARCH_INTERVAL_SECS,
            msearch_mx: SSDP_MSEARCH_MX,
            max_age_secs: SSDP_DEFAULT_MAX_AGE_SECS,
            silent_policy: SilentEntryPolicy::default(),
        }
    }
}

/// Configuration for GENA eventing, both roles.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GenaConfig {
    /// Timeout requested in our SUBSCRIBE requests (seconds).
    pub subscription_timeout_secs: u64,

    /// Renew a subscription once it is this close to expiring (seconds).
    pub renewal_buffer_secs: u64,

    /// Interval between renewal checks (seconds).
    pub renewal_check_secs: u64,

    /// Interval between expiry sweeps of our own subscribers (seconds).
    pub subscriber_check_secs: u64,

    /// Subscribe to every evented service once a device is detected.
    pub auto_subscribe: bool,
}

impl GenaConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.subscription_timeout_secs <= self.renewal_buffer_secs {
            return Err(
                "gena.subscription_timeout_secs must exceed gena.renewal_buffer_secs".to_string(),
            );
        }
        if self.renewal_check_secs == 0 {
            return Err("gena.renewal_check_secs must be >= 1".to_string());
        }
        if self.subscriber_check_secs == 0 {
            return Err("gena.subscriber_check_secs must be >= 1".to_string());
        }
        Ok(())
    }
}

impl Default for GenaConfig {
    fn default() -> Self {
        Self {
            subscription_timeout_secs: GENA_SUBSCRIPTION_TIMEOUT_SECS,
            renewal_buffer_secs: GENA_RENEWAL_BUFFER_SECS,
            renewal_check_secs: GENA_RENEWAL_CHECK_SECS,
            subscriber_check_secs: GENA_SUBSCRIBER_CHECK_SECS,
            auto_subscribe: true,
        }
    }
}

/// Configuration for the Tessera stack.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Preferred port for the HTTP server (0 = first free port in the default range).
    pub preferred_port: u16,

    /// SSDP engine settings.
    pub ssdp: SsdpConfig,

    /// GENA settings.
    pub gena: GenaConfig,

    /// Overrides the `SERVER` header sent in SSDP and HTTP responses.
    pub server_banner: Option<String>,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl Config {
    /// Validates every section.
    pub fn validate(&self) -> Result<(), String> {
        self.ssdp.validate()?;
        self.gena.validate()?;
        if self.event_channel_capacity == 0 {
            return Err(
                "event_channel_capacity must be >= 1 (broadcast::channel panics on 0)".to_string(),
            );
        }
        Ok(())
    }

    /// The `SERVER` header value in effect.
    pub fn server_banner(&self) -> String {
        self.server_banner
            .clone()
            .unwrap_or_else(crate::utils::server_banner)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            ssdp: SsdpConfig::default(),
            gena: GenaConfig::default(),
            server_banner: None,
            event_channel_capacity: EVENT_CHANNEL_CAPACITY,
        }
    }
}
