//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete broadcast
//! channels, enabling testing and alternative transport implementations.

use super::{DeviceEvent, DiscoveryEvent, StateEvent, SubscriptionEvent};

/// Trait for emitting domain events without knowledge of transport.
///
/// # Example
///
/// ```ignore
/// struct MyService {
///     emitter: Arc<dyn EventEmitter>,
/// }
///
/// impl MyService {
///     fn lost(&self) {
///         self.emitter.emit_subscription(SubscriptionEvent::Lost { ... });
///     }
/// }
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a registration table event.
    fn emit_discovery(&self, event: DiscoveryEvent);

    /// Emits a device detection event.
    fn emit_device(&self, event: DeviceEvent);

    /// Emits a state variable change.
    fn emit_state(&self, event: StateEvent);

    /// Emits a subscription lifecycle event.
    fn emit_subscription(&self, event: SubscriptionEvent);
}

/// No-op emitter for testing or embedding without observers.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_discovery(&self, _event: DiscoveryEvent) {}

    fn emit_device(&self, _event: DeviceEvent) {}

    fn emit_state(&self, _event: StateEvent) {}

    fn emit_subscription(&self, _event: SubscriptionEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_discovery(&self, event: DiscoveryEvent) {
        tracing::debug!(?event, "discovery_event");
    }

    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }

    fn emit_state(&self, event: StateEvent) {
        tracing::debug!(?event, "state_event");
    }

    fn emit_subscription(&self, event: SubscriptionEvent) {
        tracing::debug!(?event, "subscription_event");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Test emitter that records every event it receives.
    #[derive(Default)]
    pub(crate) struct RecordingEventEmitter {
        pub discovery: Mutex<Vec<DiscoveryEvent>>,
        pub device: Mutex<Vec<DeviceEvent>>,
        pub state: Mutex<Vec<StateEvent>>,
        pub subscription: Mutex<Vec<SubscriptionEvent>>,
    }

    impl EventEmitter for RecordingEventEmitter {
        fn emit_discovery(&self, event: DiscoveryEvent) {
            self.discovery.lock().push(event);
        }

        fn emit_device(&self, event: DeviceEvent) {
            self.device.lock().push(event);
        }

        fn emit_state(&self, event: StateEvent) {
            self.state.lock().push(event);
        }

        fn emit_subscription(&self, event: SubscriptionEvent) {
            self.subscription.lock().push(event);
        }
    }

    #[test]
    fn recording_emitter_tracks_events() {
        let emitter = Arc::new(RecordingEventEmitter::default());

        emitter.emit_discovery(DiscoveryEvent::RemovedDevice {
            usn: "uuid:a::upnp:rootdevice".to_string(),
            local: false,
            timestamp: 0,
        });
        emitter.emit_device(DeviceEvent::DetectionFailed {
            usn: "uuid:a::upnp:rootdevice".to_string(),
            reason: "timeout".to_string(),
            timestamp: 0,
        });

        assert_eq!(emitter.discovery.lock().len(), 1);
        assert_eq!(emitter.device.lock().len(), 1);
        assert!(emitter.state.lock().is_empty());
    }
}
