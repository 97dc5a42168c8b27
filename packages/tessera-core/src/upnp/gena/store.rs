//! Client-role subscription index.
//!
//! Pure state container without I/O: maps SIDs back to the services they
//! belong to (for routing incoming NOTIFYs) and guards against two SUBSCRIBE
//! requests for the same event URL being in flight at once.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::upnp::model::Service;

/// Index of active client-role subscriptions.
///
/// Services are held weakly: the device tree owns them, and a service that
/// has been dropped simply stops resolving.
#[derive(Default)]
pub struct GenaSubscriptionStore {
    by_sid: RwLock<HashMap<String, Weak<Service>>>,
    /// Event URLs with a SUBSCRIBE in flight.
    pending: RwLock<HashSet<String>>,
}

impl GenaSubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks a SUBSCRIBE to `event_url` as in flight.
    ///
    /// Returns `false` if one already is.
    pub fn try_mark_pending(&self, event_url: &str) -> bool {
        self.pending.write().insert(event_url.to_string())
    }

    pub fn clear_pending(&self, event_url: &str) {
        self.pending.write().remove(event_url);
    }

    pub fn is_pending(&self, event_url: &str) -> bool {
        self.pending.read().contains(event_url)
    }

    /// Indexes `sid` and clears the pending flag of the service's event URL.
    pub fn insert(&self, sid: impl Into<String>, service: &Arc<Service>) {
        self.by_sid
            .write()
            .insert(sid.into(), Arc::downgrade(service));
        self.clear_pending(service.event_sub_url());
    }

    pub fn remove(&self, sid: &str) -> Option<Arc<Service>> {
        self.by_sid.write().remove(sid).and_then(|w| w.upgrade())
    }

    /// Service subscribed under `sid`, if it is still alive.
    pub fn get(&self, sid: &str) -> Option<Arc<Service>> {
        self.by_sid.read().get(sid).and_then(Weak::upgrade)
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.get(sid).is_some()
    }

    /// Every live subscribed service.
    pub fn services(&self) -> Vec<Arc<Service>> {
        self.by_sid
            .read()
            .values()
            .filter_map(Weak::upgrade)
            .collect()
    }

    /// Drops entries whose service no longer exists. Returns how many.
    pub fn prune_dead(&self) -> usize {
        let mut map = self.by_sid.write();
        let before = map.len();
        map.retain(|_, w| w.strong_count() > 0);
        before - map.len()
    }

    pub fn len(&self) -> usize {
        self.by_sid.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_sid.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(event_url: &str) -> Arc<Service> {
        Arc::new(Service::new(
            "uuid:dev",
            "urn:schemas-upnp-org:service:SwitchPower:1",
            "urn:upnp-org:serviceId:SwitchPower",
            "http://h/scpd.xml",
            "http://h/control",
            event_url,
        ))
    }

    #[test]
    fn pending_guard_allows_one_request_per_url() {
        let store = GenaSubscriptionStore::new();
        assert!(store.try_mark_pending("http://h/event"));
        assert!(!store.try_mark_pending("http://h/event"));
        assert!(store.try_mark_pending("http://other/event"));

        store.clear_pending("http://h/event");
        assert!(!store.is_pending("http://h/event"));
        assert!(store.try_mark_pending("http://h/event"));
    }

    #[test]
    fn insert_clears_pending_and_resolves_sid() {
        let store = GenaSubscriptionStore::new();
        let svc = service("http://h/event");
        assert!(store.try_mark_pending(svc.event_sub_url()));

        store.insert("uuid:sid-1", &svc);
        assert!(!store.is_pending(svc.event_sub_url()));
        assert!(Arc::ptr_eq(&store.get("uuid:sid-1").unwrap(), &svc));
        assert!(store.get("uuid:sid-2").is_none());

        assert!(store.remove("uuid:sid-1").is_some());
        assert!(store.is_empty());
    }

    #[test]
    fn dropped_services_stop_resolving() {
        let store = GenaSubscriptionStore::new();
        let svc = service("http://h/event");
        store.insert("uuid:sid-1", &svc);
        drop(svc);

        assert!(!store.contains("uuid:sid-1"));
        assert!(store.services().is_empty());
        assert_eq!(store.prune_dead(), 1);
        assert_eq!(store.len(), 0);
    }
}
