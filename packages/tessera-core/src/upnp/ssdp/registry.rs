//! SSDP registration table.
//!
//! Holds every USN this process knows about, both the entries it announces
//! itself (local) and the ones learned from the network (remote). All
//! mutation goes through a single lock; observers are notified after the lock
//! is released so they may call back into the table.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::events::{DiscoveryEvent, EventEmitter};
use crate::protocol_constants::{
    SSDP_ALL, SSDP_DEFAULT_MAX_AGE_SECS, SSDP_EXPIRY_GRACE_SECS, UPNP_ROOTDEVICE,
};
use crate::utils::now_millis;

/// Who announced an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Manifestation {
    /// Announced by this process.
    Local,
    /// Learned from the network.
    Remote,
}

/// How silent local entries take part in search responses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SilentEntryPolicy {
    /// Answer only an M-SEARCH whose `ST` equals the entry's `st`.
    #[default]
    ExactMatchOnly,
    /// Never answer searches for silent entries.
    Never,
    /// Treat silent entries like any other.
    Always,
}

/// One row of the registration table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationEntry {
    pub usn: String,
    pub st: String,
    pub location: String,
    pub server: String,
    pub max_age_secs: u64,
    pub manifestation: Manifestation,
    pub silent: bool,
    pub last_seen: Instant,
}

impl RegistrationEntry {
    /// Creates an entry announced by this process.
    pub fn local(
        usn: impl Into<String>,
        st: impl Into<String>,
        location: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            usn: usn.into(),
            st: st.into(),
            location: location.into(),
            server: server.into(),
            max_age_secs: SSDP_DEFAULT_MAX_AGE_SECS,
            manifestation: Manifestation::Local,
            silent: false,
            last_seen: Instant::now(),
        }
    }

    /// Creates an entry learned from an alive NOTIFY or a search response.
    pub fn remote(
        usn: impl Into<String>,
        st: impl Into<String>,
        location: impl Into<String>,
        server: impl Into<String>,
        max_age_secs: u64,
    ) -> Self {
        Self {
            usn: usn.into(),
            st: st.into(),
            location: location.into(),
            server: server.into(),
            max_age_secs,
            manifestation: Manifestation::Remote,
            silent: false,
            last_seen: Instant::now(),
        }
    }

    #[must_use]
    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    #[must_use]
    pub fn with_max_age(mut self, max_age_secs: u64) -> Self {
        self.max_age_secs = max_age_secs;
        self
    }

    #[must_use]
    pub fn seen_at(mut self, at: Instant) -> Self {
        self.last_seen = at;
        self
    }

    pub fn is_local(&self) -> bool {
        self.manifestation == Manifestation::Local
    }

    pub fn is_root_device(&self) -> bool {
        self.st == UPNP_ROOTDEVICE
    }

    /// Remote entries expire once `last_seen + max_age + grace` lies in the past.
    /// Local entries never expire.
    pub fn is_expired(&self, now: Instant) -> bool {
        if self.is_local() {
            return false;
        }
        let lifetime = Duration::from_secs(self.max_age_secs + SSDP_EXPIRY_GRACE_SECS);
        self.last_seen + lifetime < now
    }

    /// Whether this local entry answers an M-SEARCH for `st`.
    pub fn answers_search(&self, st: &str, policy: SilentEntryPolicy) -> bool {
        if !self.is_local() {
            return false;
        }
        let exact = self.st == st;
        if !exact && st != SSDP_ALL {
            return false;
        }
        if !self.silent {
            return true;
        }
        match policy {
            SilentEntryPolicy::ExactMatchOnly => exact,
            SilentEntryPolicy::Never => false,
            SilentEntryPolicy::Always => true,
        }
    }
}

/// Internal notification delivered to table subscribers (the control point).
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    NewDevice(RegistrationEntry),
    RemovedDevice(RegistrationEntry),
}

/// The USN → entry map with root-device notifications.
pub struct RegistrationTable {
    entries: Mutex<HashMap<String, RegistrationEntry>>,
    listeners: Mutex<Vec<mpsc::UnboundedSender<RegistryEvent>>>,
    emitter: Arc<dyn EventEmitter>,
}

impl RegistrationTable {
    pub fn new(emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            emitter,
        }
    }

    /// Returns a receiver of `NewDevice` / `RemovedDevice` notifications.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RegistryEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.lock().push(tx);
        rx
    }

    /// Inserts or refreshes an entry.
    ///
    /// A new root-device entry triggers `NewDevice` exactly once; refreshing a
    /// known USN only updates its fields and `last_seen`. A remote
    /// announcement never overwrites a local entry with the same USN (our own
    /// multicast looping back). Returns `true` when the entry was new.
    pub fn register(&self, entry: RegistrationEntry) -> bool {
        let announced = {
            let mut entries = self.entries.lock();
            match entries.get_mut(&entry.usn) {
                Some(existing) => {
                    if existing.is_local() && !entry.is_local() {
                        return false;
                    }
                    existing.st = entry.st;
                    existing.location = entry.location;
                    existing.server = entry.server;
                    existing.max_age_secs = entry.max_age_secs;
                    existing.silent = entry.silent;
                    existing.last_seen = entry.last_seen;
                    return false;
                }
                None => {
                    log::debug!(
                        "[Registry] Registered {:?} {} (st={})",
                        entry.manifestation,
                        entry.usn,
                        entry.st
                    );
                    entries.insert(entry.usn.clone(), entry.clone());
                    entry
                }
            }
        };

        if announced.is_root_device() {
            self.emitter.emit_discovery(DiscoveryEvent::NewDevice {
                usn: announced.usn.clone(),
                st: announced.st.clone(),
                location: announced.location.clone(),
                local: announced.is_local(),
                timestamp: now_millis(),
            });
            self.notify(RegistryEvent::NewDevice(announced));
        }
        true
    }

    /// Removes an entry, emitting `RemovedDevice` for root devices.
    ///
    /// Unknown USNs are a silent no-op.
    pub fn unregister(&self, usn: &str) -> Option<RegistrationEntry> {
        let removed = self.entries.lock().remove(usn)?;
        log::debug!("[Registry] Unregistered {}", usn);

        if removed.is_root_device() {
            self.emitter.emit_discovery(DiscoveryEvent::RemovedDevice {
                usn: removed.usn.clone(),
                local: removed.is_local(),
                timestamp: now_millis(),
            });
            self.notify(RegistryEvent::RemovedDevice(removed.clone()));
        }
        Some(removed)
    }

    pub fn is_known(&self, usn: &str) -> bool {
        self.entries.lock().contains_key(usn)
    }

    pub fn get(&self, usn: &str) -> Option<RegistrationEntry> {
        self.entries.lock().get(usn).cloned()
    }

    /// Unregisters every remote entry whose lifetime ran out before `now`.
    ///
    /// Returns the USNs that were removed.
    pub fn sweep_expired(&self, now: Instant) -> Vec<String> {
        let expired: Vec<String> = self
            .entries
            .lock()
            .values()
            .filter(|e| e.is_expired(now))
            .map(|e| e.usn.clone())
            .collect();

        for usn in &expired {
            log::info!("[Registry] Entry expired: {}", usn);
            self.unregister(usn);
        }
        expired
    }

    /// Snapshot of the entries this process announces.
    pub fn local_entries(&self) -> Vec<RegistrationEntry> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.is_local())
            .cloned()
            .collect()
    }

    /// Local entries that answer an M-SEARCH for `st`.
    pub fn search_matches(&self, st: &str, policy: SilentEntryPolicy) -> Vec<RegistrationEntry> {
        self.entries
            .lock()
            .values()
            .filter(|e| e.answers_search(st, policy))
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<RegistrationEntry> {
        self.entries.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn notify(&self, event: RegistryEvent) {
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}
