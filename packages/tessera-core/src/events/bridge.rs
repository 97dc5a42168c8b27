//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain services
//! and transport concerns, mapping typed domain events to the WebSocket
//! broadcast channel.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, DeviceEvent, DiscoveryEvent, StateEvent, SubscriptionEvent};

/// Bridges domain events to the broadcast channel.
///
/// Implements [`EventEmitter`] by forwarding events to a
/// `tokio::sync::broadcast` channel that WebSocket handlers subscribe to.
/// An optional external emitter (e.g. a host application's own sink) also
/// receives every event and can be set after construction.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self::with_sender(tx)
    }

    /// Creates a new bridge wrapping an existing broadcast sender.
    pub fn with_sender(tx: broadcast::Sender<BroadcastEvent>) -> Self {
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that receives every event before the broadcast.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Returns a reference to the broadcast sender.
    pub fn sender(&self) -> &broadcast::Sender<BroadcastEvent> {
        &self.tx
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_discovery, DiscoveryEvent, Discovery);
    impl_emit!(emit_device, DeviceEvent, Device);
    impl_emit!(emit_state, StateEvent, State);
    impl_emit!(emit_subscription, SubscriptionEvent, Subscription);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::tests::RecordingEventEmitter;

    #[tokio::test]
    async fn bridge_forwards_to_broadcast_and_external() {
        let bridge = BroadcastEventBridge::new(8);
        let external = Arc::new(RecordingEventEmitter::default());
        bridge.set_external_emitter(external.clone());
        let mut rx = bridge.subscribe();

        bridge.emit_subscription(SubscriptionEvent::Lost {
            service_id: "urn:upnp-org:serviceId:AVTransport".into(),
            reason: "renewal failed".into(),
            timestamp: 1,
        });

        let received = rx.recv().await.unwrap();
        assert!(matches!(
            received,
            BroadcastEvent::Subscription(SubscriptionEvent::Lost { .. })
        ));
        assert_eq!(external.subscription.lock().len(), 1);
    }

    #[test]
    fn bridge_without_receivers_does_not_panic() {
        let bridge = BroadcastEventBridge::new(1);
        bridge.emit_discovery(DiscoveryEvent::RemovedDevice {
            usn: "uuid:x".into(),
            local: true,
            timestamp: 0,
        });
    }
}
