//! Event system for observers of the UPnP stack.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - [`BroadcastEventBridge`] for the WebSocket transport
//! - Event types for discovery, detection, state variables and subscriptions

mod bridge;
pub(crate) mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to clients.
///
/// Each category has its own inner event type with specific variants.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// SSDP registration table changes.
    Discovery(DiscoveryEvent),

    /// Device detection outcomes.
    Device(DeviceEvent),

    /// State variable changes on remote services.
    State(StateEvent),

    /// Client-role GENA subscription lifecycle.
    Subscription(SubscriptionEvent),
}

/// Events from the SSDP registration table.
///
/// Only root device entries (`st = upnp:rootdevice`) produce these.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DiscoveryEvent {
    /// A root device entry was registered for the first time.
    NewDevice {
        usn: String,
        st: String,
        location: String,
        /// Whether the entry was announced by this process.
        local: bool,
        timestamp: u64,
    },
    /// A root device entry was unregistered (byebye, expiry or shutdown).
    RemovedDevice {
        usn: String,
        local: bool,
        timestamp: u64,
    },
}

/// Events from device detection.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// Every service schema and embedded device of the device resolved.
    DetectionCompleted {
        usn: String,
        udn: String,
        #[serde(rename = "deviceType")]
        device_type: String,
        #[serde(rename = "friendlyName")]
        friendly_name: String,
        /// `true` for the root of a device tree, `false` for embedded devices.
        root: bool,
        timestamp: u64,
    },
    /// Detection of a root device failed; the device was torn down.
    DetectionFailed {
        usn: String,
        reason: String,
        timestamp: u64,
    },
}

/// Events from state variables of detected remote services.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StateEvent {
    /// A state variable took a new value.
    VariableChanged {
        udn: String,
        #[serde(rename = "serviceId")]
        service_id: String,
        instance: u32,
        name: String,
        value: String,
        #[serde(rename = "oldValue")]
        old_value: Option<String>,
        timestamp: u64,
    },
}

/// Events from client-role GENA subscriptions.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SubscriptionEvent {
    /// A new subscription was established.
    Subscribed {
        #[serde(rename = "serviceId")]
        service_id: String,
        sid: String,
        #[serde(rename = "timeoutSecs")]
        timeout_secs: u64,
        timestamp: u64,
    },
    /// An existing subscription was renewed.
    Renewed {
        #[serde(rename = "serviceId")]
        service_id: String,
        sid: String,
        #[serde(rename = "timeoutSecs")]
        timeout_secs: u64,
        timestamp: u64,
    },
    /// A subscription could be neither renewed nor re-established.
    Lost {
        #[serde(rename = "serviceId")]
        service_id: String,
        reason: String,
        timestamp: u64,
    },
}

impl From<DiscoveryEvent> for BroadcastEvent {
    fn from(event: DiscoveryEvent) -> Self {
        BroadcastEvent::Discovery(event)
    }
}

impl From<DeviceEvent> for BroadcastEvent {
    fn from(event: DeviceEvent) -> Self {
        BroadcastEvent::Device(event)
    }
}

impl From<StateEvent> for BroadcastEvent {
    fn from(event: StateEvent) -> Self {
        BroadcastEvent::State(event)
    }
}

impl From<SubscriptionEvent> for BroadcastEvent {
    fn from(event: SubscriptionEvent) -> Self {
        BroadcastEvent::Subscription(event)
    }
}
