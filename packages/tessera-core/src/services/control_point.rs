//! Control point: turns discovered root devices into detected device trees.
//!
//! Responsibilities:
//! - Reacting to `NewDevice` / `RemovedDevice` from the registration table
//! - Fetching descriptions and fanning out schema fetches through the
//!   detection gates
//! - Tearing down devices that fail detection or disappear
//! - Subscribing detected services and renewing their subscriptions
//! - Forwarding state variable changes of remote services as events

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::events::{DeviceEvent, EventEmitter, StateEvent};
use crate::runtime::TokioSpawner;
use crate::upnp::description::{arm_detection, DescriptionFetcher};
use crate::upnp::detection::{DetectionStatus, GateTransition};
use crate::upnp::gena::{GenaResult, GenaSubscriptionManager};
use crate::upnp::invoker::{ActionInvoker, InvokeError};
use crate::upnp::model::{Device, StateVariableChange};
use crate::upnp::ssdp::{RegistrationEntry, RegistrationTable, RegistryEvent};
use crate::utils::now_millis;

#[derive(Debug, Error)]
pub enum ControlPointError {
    #[error("Unknown device {0}")]
    UnknownDevice(String),

    #[error("Device {udn} has no service {service}")]
    UnknownService { udn: String, service: String },

    #[error(transparent)]
    Invoke(#[from] InvokeError),
}

pub type ControlPointResult<T> = Result<T, ControlPointError>;

/// One detection run. A USN that disappears and comes back gets a new run
/// with a higher generation; a stale run never touches the newer one's slot.
#[derive(Clone)]
struct Detection {
    generation: u64,
    cancel: CancellationToken,
}

/// Orchestrates detection, eventing and action calls for remote devices.
pub struct ControlPoint {
    table: Arc<RegistrationTable>,
    fetcher: DescriptionFetcher,
    gena: Arc<GenaSubscriptionManager>,
    invoker: ActionInvoker,
    emitter: Arc<dyn EventEmitter>,
    network: NetworkContext,
    /// Detected root devices keyed by USN.
    devices: DashMap<String, Arc<Device>>,
    /// Detections in flight keyed by USN.
    detections: DashMap<String, Detection>,
    next_generation: AtomicU64,
    spawner: TokioSpawner,
}

impl ControlPoint {
    pub fn new(
        table: Arc<RegistrationTable>,
        http_client: Client,
        gena: Arc<GenaSubscriptionManager>,
        emitter: Arc<dyn EventEmitter>,
        network: NetworkContext,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            table,
            fetcher: DescriptionFetcher::new(http_client.clone()),
            gena,
            invoker: ActionInvoker::new(http_client),
            emitter,
            network,
            devices: DashMap::new(),
            detections: DashMap::new(),
            next_generation: AtomicU64::new(1),
            spawner,
        }
    }

    pub fn gena(&self) -> &Arc<GenaSubscriptionManager> {
        &self.gena
    }

    /// Detected root devices.
    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.devices.iter().map(|e| Arc::clone(e.value())).collect()
    }

    /// Finds a detected device, root or embedded, by UDN.
    pub fn device(&self, udn: &str) -> Option<Arc<Device>> {
        self.devices
            .iter()
            .flat_map(|e| e.value().all_devices())
            .find(|d| d.udn() == udn)
    }

    pub fn is_detecting(&self, usn: &str) -> bool {
        self.detections.contains_key(usn)
    }

    /// Starts the registry listener and the subscription renewal loop.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let events = self.table.subscribe();
        self.spawner
            .spawn(Arc::clone(self).registry_loop(events, cancel.clone()));
        self.spawner.spawn(Arc::clone(self).renewal_loop(cancel));
    }

    async fn registry_loop(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RegistryEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            match event {
                RegistryEvent::NewDevice(entry) => self.on_new_device(entry),
                RegistryEvent::RemovedDevice(entry) => self.remove_device(&entry.usn).await,
            }
        }
        log::debug!("[ControlPoint] Registry loop stopped");
    }

    async fn renewal_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_secs(self.gena.config().renewal_check_secs);
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let callback = self.network.gena_callback_url();
                    let renewed = self.gena.renew_expiring(&callback).await;
                    if renewed > 0 {
                        log::debug!("[ControlPoint] Renewed {} subscriptions", renewed);
                    }
                }
            }
        }
        log::debug!("[ControlPoint] Renewal loop stopped");
    }

    fn on_new_device(self: &Arc<Self>, entry: RegistrationEntry) {
        if entry.is_local() {
            return;
        }
        let Some(detection) = self.begin_detection(&entry.usn) else {
            return;
        };
        self.spawner
            .spawn(Arc::clone(self).run_detection(entry, detection));
    }

    /// Claims the detection slot of `usn`. `None` when the device is already
    /// detected or being detected.
    fn begin_detection(&self, usn: &str) -> Option<Detection> {
        if self.devices.contains_key(usn) {
            return None;
        }
        match self.detections.entry(usn.to_string()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let detection = Detection {
                    generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
                    cancel: CancellationToken::new(),
                };
                slot.insert(detection.clone());
                Some(detection)
            }
        }
    }

    /// Frees the slot of `usn` if it still belongs to `detection`. Returns
    /// whether it did.
    fn release_detection(&self, usn: &str, detection: &Detection) -> bool {
        self.detections
            .remove_if(usn, |_, current| current.generation == detection.generation)
            .is_some()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Detection
    // ─────────────────────────────────────────────────────────────────────────

    /// Detects the device behind `entry`.
    ///
    /// The device becomes visible through [`devices`](Self::devices) only
    /// once every gate of its tree completed. Any failure tears it down and
    /// removes the entry from the table. Removing the device meanwhile
    /// abandons the detection silently. Does nothing when the USN is already
    /// detected or being detected.
    pub async fn detect(self: Arc<Self>, entry: RegistrationEntry) {
        if let Some(detection) = self.begin_detection(&entry.usn) {
            self.run_detection(entry, detection).await;
        }
    }

    async fn run_detection(self: Arc<Self>, entry: RegistrationEntry, detection: Detection) {
        let usn = entry.usn.clone();
        let cancel = detection.cancel.clone();
        let fetched = tokio::select! {
            _ = cancel.cancelled() => {
                self.release_detection(&usn, &detection);
                return;
            }
            fetched = self.fetcher.fetch_device(&entry) => fetched,
        };
        let device = match fetched {
            Ok(device) => device,
            Err(e) => {
                self.fail_detection(&usn, &detection, format!("description: {}", e));
                return;
            }
        };
        self.install_change_hooks(&device);

        if self.apply_transitions(&device, arm_detection(&device)) == DetectionStatus::Completed {
            self.finish_detection(device, &detection);
            return;
        }

        let mut fetches: FuturesUnordered<_> = device
            .all_devices()
            .into_iter()
            .flat_map(|owner| {
                owner
                    .services()
                    .to_vec()
                    .into_iter()
                    .map(move |service| (Arc::clone(&owner), service))
            })
            .map(|(owner, service)| {
                let fetcher = self.fetcher.clone();
                async move {
                    let result = fetcher.fetch_service_schema(&service).await;
                    (owner, service, result)
                }
            })
            .collect();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    Self::teardown(&device);
                    self.release_detection(&usn, &detection);
                    return;
                }
                next = fetches.next() => next,
            };
            let Some((owner, service, result)) = next else {
                break;
            };
            let transitions = match result {
                Ok(()) => owner.detection().complete_one(),
                Err(e) => {
                    log::warn!(
                        "[Detection] Schema of {} failed: {}",
                        service.service_id(),
                        e
                    );
                    owner.detection().fail()
                }
            };
            match self.apply_transitions(&device, transitions) {
                DetectionStatus::Completed => {
                    self.finish_detection(device, &detection);
                    return;
                }
                DetectionStatus::Failed => {
                    drop(fetches);
                    Self::teardown(&device);
                    self.fail_detection(
                        &usn,
                        &detection,
                        format!("schema of {}", service.service_id()),
                    );
                    return;
                }
                DetectionStatus::Pending => {}
            }
        }

        // Every fetch returned but the root never settled: the gate counts
        // disagree with the tree. Treat as a failure rather than hang.
        Self::teardown(&device);
        self.fail_detection(&usn, &detection, "detection did not complete".to_string());
    }

    /// Emits events for gate transitions and returns the root's status.
    fn apply_transitions(&self, root: &Arc<Device>, transitions: Vec<GateTransition>) -> DetectionStatus {
        for transition in transitions {
            if transition.status != DetectionStatus::Completed {
                continue;
            }
            let Some(device) = root.all_devices().into_iter().find(|d| d.udn() == transition.label) else {
                continue;
            };
            log::debug!(
                "[Detection] {} ({}) completed",
                device.udn(),
                device.device_type()
            );
            self.emitter.emit_device(DeviceEvent::DetectionCompleted {
                usn: device.usn().to_string(),
                udn: device.udn().to_string(),
                device_type: device.device_type().to_string(),
                friendly_name: device.friendly_name().to_string(),
                root: transition.root,
                timestamp: now_millis(),
            });
        }
        root.detection_status()
    }

    fn finish_detection(self: &Arc<Self>, device: Arc<Device>, detection: &Detection) {
        let usn = device.usn().to_string();
        // Publish before releasing the slot so a concurrent removal always
        // sees either the slot or the device.
        self.devices.insert(usn.clone(), Arc::clone(&device));
        if !self.release_detection(&usn, detection) {
            // Removed (and possibly re-added) while the last step was in flight.
            self.devices
                .remove_if(&usn, |_, current| Arc::ptr_eq(current, &device));
            Self::teardown(&device);
            return;
        }
        log::info!(
            "[ControlPoint] Detected {} \"{}\" ({} services)",
            device.udn(),
            device.friendly_name(),
            device.all_services().len()
        );

        if self.gena.config().auto_subscribe {
            let this = Arc::clone(self);
            self.spawner.spawn(async move {
                this.subscribe_device(&device).await;
            });
        }
    }

    fn fail_detection(&self, usn: &str, detection: &Detection, reason: String) {
        if !self.release_detection(usn, detection) {
            log::debug!("[Detection] Stale detection of {} ended: {}", usn, reason);
            return;
        }
        log::warn!("[Detection] {} failed: {}", usn, reason);
        self.emitter.emit_device(DeviceEvent::DetectionFailed {
            usn: usn.to_string(),
            reason,
            timestamp: now_millis(),
        });
        self.table.unregister(usn);
    }

    fn install_change_hooks(&self, device: &Arc<Device>) {
        for service in device.all_services() {
            let emitter = Arc::clone(&self.emitter);
            let udn = service.device_udn().to_string();
            service.set_change_hook(Arc::new(move |change: &StateVariableChange| {
                emitter.emit_state(StateEvent::VariableChanged {
                    udn: udn.clone(),
                    service_id: change.service_id.clone(),
                    instance: change.instance,
                    name: change.name.clone(),
                    value: change.value.clone(),
                    old_value: change.old_value.clone(),
                    timestamp: now_millis(),
                });
            }));
        }
    }

    fn teardown(device: &Arc<Device>) {
        for service in device.all_services() {
            service.clear_change_hook();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Removal, eventing, actions
    // ─────────────────────────────────────────────────────────────────────────

    /// Forgets the device registered under `usn`, unsubscribing its services.
    pub async fn remove_device(&self, usn: &str) {
        if let Some((_, detection)) = self.detections.remove(usn) {
            detection.cancel.cancel();
        }
        let Some((_, device)) = self.devices.remove(usn) else {
            return;
        };
        log::info!("[ControlPoint] Removed {} ({})", device.udn(), usn);
        Self::teardown(&device);
        for service in device.all_services() {
            if service.is_subscribed() {
                self.gena.unsubscribe(&service).await;
            }
        }
    }

    /// Subscribes every evented service of the tree (best-effort).
    pub async fn subscribe_device(&self, device: &Arc<Device>) {
        let callback = self.network.gena_callback_url();
        for service in device.all_services() {
            if !service.is_evented() {
                continue;
            }
            if let Err(e) = self.gena.subscribe(&service, &callback).await {
                log::warn!(
                    "[ControlPoint] Subscribing {} failed: {}",
                    service.service_id(),
                    e
                );
            }
        }
    }

    /// Applies an incoming NOTIFY. Returns the number of changed variables.
    pub fn handle_notify(&self, sid: &str, body: &str) -> GenaResult<usize> {
        self.gena.handle_notify(sid, body)
    }

    /// Invokes `action` on `service` (short ID, service ID or type) of the
    /// detected device `udn`.
    pub async fn call_action(
        &self,
        udn: &str,
        service: &str,
        action: &str,
        args: &HashMap<String, String>,
    ) -> ControlPointResult<Vec<(String, String)>> {
        let device = self
            .device(udn)
            .ok_or_else(|| ControlPointError::UnknownDevice(udn.to_string()))?;
        let target = device
            .services()
            .iter()
            .find(|s| s.short_id() == service || s.service_id() == service || s.service_type() == service)
            .cloned()
            .ok_or_else(|| ControlPointError::UnknownService {
                udn: udn.to_string(),
                service: service.to_string(),
            })?;
        Ok(self.invoker.call(&target, action, args).await?)
    }

    /// Unsubscribes everything and forgets every device.
    pub async fn shutdown(&self) {
        for entry in self.detections.iter() {
            entry.value().cancel.cancel();
        }
        self.detections.clear();
        self.gena.unsubscribe_all().await;
        for entry in self.devices.iter() {
            Self::teardown(entry.value());
        }
        self.devices.clear();
    }
}
