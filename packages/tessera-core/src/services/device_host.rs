//! Device host: the device side of the stack.
//!
//! Publishes [`LocalDevice`]s over SSDP, answers their control requests and
//! runs the GENA server role for their services. The HTTP layer only maps
//! requests onto the methods here and [`HostError`]s onto status codes.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::context::NetworkContext;
use crate::protocol_constants::{
    A_ARG_TYPE_PREFIX, GENA_DEFAULT_SUBSCRIBER_TIMEOUT_SECS, GENA_INITIAL_EVENT_DELAY_MS,
    GENA_MAX_TIMEOUT_SECS, GENA_NT_EVENT, LAST_CHANGE, UPNP_ROOTDEVICE,
};
use crate::runtime::TokioSpawner;
use crate::state::GenaConfig;
use crate::upnp::gena::publisher::{parse_callback_header, EventPublisher, NotifyTarget};
use crate::upnp::gena::parse_timeout_header;
use crate::upnp::local::{build_device_description, build_event_body, build_scpd, LocalDevice, LocalService};
use crate::upnp::model::{Service, StateVariableChange};
use crate::upnp::soap::{build_soap_action_response, parse_soap_action_header, parse_soap_request, UpnpFault};
use crate::upnp::ssdp::{RegistrationEntry, SsdpServer};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("No hosted device {0}")]
    UnknownDevice(String),

    #[error("Device {uuid} hosts no service {service}")]
    UnknownService { uuid: String, service: String },

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("UPnP fault {}", .0.code)]
    Fault(UpnpFault),
}

pub type HostResult<T> = Result<T, HostError>;

/// Headers of an incoming SUBSCRIBE request.
#[derive(Debug, Clone, Default)]
pub struct SubscribeRequest {
    pub sid: Option<String>,
    pub callback: Option<String>,
    pub nt: Option<String>,
    pub timeout: Option<String>,
}

/// What a successful SUBSCRIBE answers with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeGrant {
    pub sid: String,
    pub timeout_secs: u64,
}

impl SubscribeGrant {
    /// Value of the `TIMEOUT` response header.
    pub fn timeout_header(&self) -> String {
        format!("Second-{}", self.timeout_secs)
    }
}

/// Requested subscriber timeout: the header value, clamped, or the default.
fn granted_timeout(header: Option<&str>) -> u64 {
    header
        .and_then(parse_timeout_header)
        .map(|secs| secs.clamp(1, GENA_MAX_TIMEOUT_SECS))
        .unwrap_or(GENA_DEFAULT_SUBSCRIBER_TIMEOUT_SECS)
}

/// The SSDP entries announcing one device.
pub fn announcements(
    device: &LocalDevice,
    location: &str,
    server: &str,
    max_age_secs: u64,
) -> Vec<RegistrationEntry> {
    let udn = device.udn();
    let mut targets = vec![
        (format!("{}::{}", udn, UPNP_ROOTDEVICE), UPNP_ROOTDEVICE.to_string()),
        (udn.to_string(), udn.to_string()),
        (
            format!("{}::{}", udn, device.device_type()),
            device.device_type().to_string(),
        ),
    ];
    for local in device.services() {
        let service_type = local.service().service_type();
        let usn = format!("{}::{}", udn, service_type);
        if !targets.iter().any(|(existing, _)| *existing == usn) {
            targets.push((usn, service_type.to_string()));
        }
    }
    targets
        .into_iter()
        .map(|(usn, st)| {
            RegistrationEntry::local(usn, st, location, server).with_max_age(max_age_secs)
        })
        .collect()
}

/// Whether a change must be sent to the service's subscribers.
///
/// Changes of evented variables always are. Services aggregating their state
/// into an evented `LastChange` also event changes of any variable it lists.
fn triggers_event(service: &Service, change: &StateVariableChange) -> bool {
    if service
        .variable(change.instance, &change.name)
        .is_some_and(|v| v.send_events())
    {
        return true;
    }
    change.name != LAST_CHANGE
        && !change.name.starts_with(A_ARG_TYPE_PREFIX)
        && service
            .variable(0, LAST_CHANGE)
            .is_some_and(|v| v.send_events())
}

/// One NOTIFY round of a hosted service.
enum EventJob {
    /// A new subscriber's SEQ 0 event, sent no earlier than `not_before`.
    Initial {
        target: NotifyTarget,
        body: String,
        not_before: tokio::time::Instant,
    },
    Change {
        targets: Vec<NotifyTarget>,
        body: String,
    },
}

/// Serializes the events of one hosted service.
///
/// Sequence numbers are taken and jobs enqueued under the sender lock, and a
/// single worker sends the jobs one after another. Subscribers therefore see
/// SEQ 0, 1, 2... in order, and changes queued behind a new subscriber's
/// initial event wait for it.
struct EventQueue {
    tx: Mutex<mpsc::UnboundedSender<EventJob>>,
}

impl EventQueue {
    /// Spawns the worker. It ends once the queue is dropped.
    fn start(publisher: EventPublisher, spawner: &TokioSpawner, name: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        spawner.spawn(async move {
            while let Some(job) = rx.recv().await {
                match job {
                    EventJob::Initial {
                        target,
                        body,
                        not_before,
                    } => {
                        tokio::time::sleep_until(not_before).await;
                        publisher.send_notify(&target, &body).await;
                    }
                    EventJob::Change { targets, body } => {
                        let delivered = publisher.notify_targets(&targets, &body).await;
                        log::debug!(
                            "[DeviceHost] Evented {} to {} subscribers",
                            name,
                            delivered
                        );
                    }
                }
            }
            log::debug!("[DeviceHost] Event queue of {} closed", name);
        });
        Self { tx: Mutex::new(tx) }
    }

    fn lock(&self) -> MutexGuard<'_, mpsc::UnboundedSender<EventJob>> {
        self.tx.lock()
    }
}

fn enqueue(tx: &mpsc::UnboundedSender<EventJob>, job: EventJob) {
    if tx.send(job).is_err() {
        log::debug!("[DeviceHost] Event dropped, queue worker has stopped");
    }
}

fn queue_key(uuid: &str, local: &LocalService) -> String {
    format!("{}/{}", uuid, local.short_id())
}

/// Hosts local devices.
pub struct DeviceHost {
    ssdp: Arc<SsdpServer>,
    network: NetworkContext,
    publisher: EventPublisher,
    config: GenaConfig,
    server_banner: String,
    /// Hosted devices keyed by UUID (the UDN without `uuid:`).
    devices: DashMap<String, Arc<LocalDevice>>,
    /// Event queues keyed by `<uuid>/<service short id>`.
    queues: DashMap<String, Arc<EventQueue>>,
    spawner: TokioSpawner,
}

impl DeviceHost {
    pub fn new(
        ssdp: Arc<SsdpServer>,
        network: NetworkContext,
        http_client: Client,
        config: GenaConfig,
        server_banner: String,
        spawner: TokioSpawner,
    ) -> Self {
        Self {
            ssdp,
            network,
            publisher: EventPublisher::new(http_client),
            config,
            server_banner,
            devices: DashMap::new(),
            queues: DashMap::new(),
            spawner,
        }
    }

    /// Value of the `SERVER` header sent with our responses.
    pub fn server_banner(&self) -> &str {
        &self.server_banner
    }

    pub fn devices(&self) -> Vec<Arc<LocalDevice>> {
        self.devices.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn device(&self, uuid: &str) -> HostResult<Arc<LocalDevice>> {
        self.devices
            .get(uuid)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| HostError::UnknownDevice(uuid.to_string()))
    }

    fn service(&self, uuid: &str, key: &str) -> HostResult<Arc<LocalService>> {
        self.device(uuid)?
            .service(key)
            .cloned()
            .ok_or_else(|| HostError::UnknownService {
                uuid: uuid.to_string(),
                service: key.to_string(),
            })
    }

    /// Starts the subscriber expiry sweep.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        self.spawner.spawn(Arc::clone(self).expiry_loop(cancel));
    }

    async fn expiry_loop(self: Arc<Self>, cancel: CancellationToken) {
        let period = Duration::from_secs(self.config.subscriber_check_secs);
        let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.expire_subscribers(Instant::now());
                }
            }
        }
        log::debug!("[DeviceHost] Expiry loop stopped");
    }

    /// Drops subscribers whose timeout ran out. Returns how many were dropped.
    pub fn expire_subscribers(&self, now: Instant) -> usize {
        let mut expired = 0;
        for device in self.devices.iter() {
            for local in device.services() {
                for sid in local.subscribers().expire(now) {
                    log::debug!("[DeviceHost] Subscriber {} of {} expired", sid, local.short_id());
                    expired += 1;
                }
            }
        }
        expired
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Publishing
    // ─────────────────────────────────────────────────────────────────────────

    /// Hosts `device` and announces it.
    ///
    /// A device already hosted under the same UDN is withdrawn first.
    pub async fn publish(&self, device: LocalDevice) -> Arc<LocalDevice> {
        let device = Arc::new(device);
        if self.devices.contains_key(device.uuid()) {
            self.withdraw(device.udn()).await;
        }
        for local in device.services() {
            self.install_event_hook(device.uuid(), local);
        }
        self.devices
            .insert(device.uuid().to_string(), Arc::clone(&device));

        let location = self.network.device_location(device.uuid());
        let entries = announcements(
            &device,
            &location,
            &self.server_banner,
            self.ssdp.config().max_age_secs,
        );
        log::info!(
            "[DeviceHost] Publishing {} \"{}\" at {} ({} entries)",
            device.udn(),
            device.friendly_name(),
            location,
            entries.len()
        );
        for entry in entries {
            self.ssdp.announce(entry).await;
        }
        device
    }

    /// Sends byebye for every entry of the device `udn` and stops hosting it.
    pub async fn withdraw(&self, udn: &str) -> bool {
        let uuid = udn.strip_prefix("uuid:").unwrap_or(udn);
        let Some((_, device)) = self.devices.remove(uuid) else {
            return false;
        };
        for local in device.services() {
            local.service().clear_change_hook();
            self.queues.remove(&queue_key(device.uuid(), local));
        }
        let location = self.network.device_location(device.uuid());
        for entry in announcements(&device, &location, &self.server_banner, 0) {
            self.ssdp.withdraw(&entry.usn).await;
        }
        log::info!("[DeviceHost] Withdrew {}", device.udn());
        true
    }

    /// Withdraws every hosted device.
    pub async fn shutdown(&self) {
        let udns: Vec<String> = self.devices.iter().map(|e| e.udn().to_string()).collect();
        for udn in udns {
            self.withdraw(&udn).await;
        }
    }

    fn install_event_hook(&self, uuid: &str, local: &Arc<LocalService>) {
        let key = queue_key(uuid, local);
        let queue = Arc::new(EventQueue::start(
            self.publisher.clone(),
            &self.spawner,
            key.clone(),
        ));
        self.queues.insert(key, Arc::clone(&queue));

        let weak: Weak<LocalService> = Arc::downgrade(local);
        local
            .service()
            .set_change_hook(Arc::new(move |change: &StateVariableChange| {
                let Some(local) = weak.upgrade() else {
                    return;
                };
                if local.subscribers().is_empty() || !triggers_event(local.service(), change) {
                    return;
                }
                let tx = queue.lock();
                let targets = local.subscribers().targets();
                if targets.is_empty() {
                    return;
                }
                let body = build_event_body(local.service());
                enqueue(&tx, EventJob::Change { targets, body });
            }));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Documents and control
    // ─────────────────────────────────────────────────────────────────────────

    pub fn description(&self, uuid: &str) -> HostResult<String> {
        let device = self.device(uuid)?;
        Ok(build_device_description(&device))
    }

    pub fn scpd(&self, uuid: &str, service: &str) -> HostResult<String> {
        Ok(build_scpd(self.service(uuid, service)?.service()))
    }

    /// Runs a SOAP control request and returns the response envelope.
    ///
    /// Faults come back as [`HostError::Fault`].
    pub async fn control(
        &self,
        uuid: &str,
        service: &str,
        soap_action: Option<&str>,
        body: &str,
    ) -> HostResult<String> {
        let local = self.service(uuid, service)?;
        let (header_type, header_action) = soap_action
            .and_then(parse_soap_action_header)
            .ok_or_else(|| HostError::BadRequest("missing or malformed SOAPACTION".to_string()))?;
        let request =
            parse_soap_request(body).map_err(|e| HostError::BadRequest(e.to_string()))?;

        let service_type = local.service().service_type();
        if header_action != request.action || header_type != service_type {
            log::debug!(
                "[DeviceHost] SOAPACTION {}#{} does not match {} on {}",
                header_type,
                header_action,
                request.action,
                local.short_id()
            );
            return Err(HostError::Fault(UpnpFault::invalid_action()));
        }

        log::debug!("[DeviceHost] {}.{}", local.short_id(), request.action);
        let out = local
            .invoke(&request.action, &request.args)
            .await
            .map_err(HostError::Fault)?;
        let pairs: Vec<(&str, &str)> = out
            .iter()
            .map(|(n, v)| (n.as_str(), v.as_str()))
            .collect();
        Ok(build_soap_action_response(&request.action, service_type, &pairs))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // GENA server role
    // ─────────────────────────────────────────────────────────────────────────

    /// Handles SUBSCRIBE: a new subscription or the renewal of `request.sid`.
    ///
    /// A new subscriber receives its initial event (SEQ 0) shortly after the
    /// response went out, carrying the state at subscription time. Its change
    /// events follow the initial one.
    pub fn subscribe(
        &self,
        uuid: &str,
        service: &str,
        request: &SubscribeRequest,
    ) -> HostResult<SubscribeGrant> {
        let local = self.service(uuid, service)?;
        let timeout_secs = granted_timeout(request.timeout.as_deref());

        if let Some(sid) = &request.sid {
            if request.callback.is_some() || request.nt.is_some() {
                return Err(HostError::BadRequest(
                    "SID cannot be combined with CALLBACK or NT".to_string(),
                ));
            }
            if !local.subscribers().renew(sid, timeout_secs) {
                return Err(HostError::PreconditionFailed(format!("unknown SID {}", sid)));
            }
            log::debug!("[DeviceHost] Renewed {} on {}", sid, local.short_id());
            return Ok(SubscribeGrant {
                sid: sid.clone(),
                timeout_secs,
            });
        }

        if request.nt.as_deref() != Some(GENA_NT_EVENT) {
            return Err(HostError::PreconditionFailed("NT must be upnp:event".to_string()));
        }
        let callback_urls = request
            .callback
            .as_deref()
            .map(parse_callback_header)
            .unwrap_or_default();
        if callback_urls.is_empty() {
            return Err(HostError::PreconditionFailed("missing CALLBACK".to_string()));
        }

        let queue = self
            .queues
            .get(&queue_key(uuid, &local))
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| HostError::UnknownService {
                uuid: uuid.to_string(),
                service: service.to_string(),
            })?;
        let tx = queue.lock();
        let record = local.subscribers().add(callback_urls, timeout_secs);
        if let Some(target) = local.subscribers().initial_target(&record.sid) {
            let job = EventJob::Initial {
                target,
                body: build_event_body(local.service()),
                not_before: tokio::time::Instant::now()
                    + Duration::from_millis(GENA_INITIAL_EVENT_DELAY_MS),
            };
            enqueue(&tx, job);
        }
        drop(tx);
        log::info!(
            "[DeviceHost] New subscriber {} on {} ({}s)",
            record.sid,
            local.short_id(),
            timeout_secs
        );
        Ok(SubscribeGrant {
            sid: record.sid,
            timeout_secs,
        })
    }

    /// Handles UNSUBSCRIBE.
    pub fn unsubscribe(&self, uuid: &str, service: &str, sid: Option<&str>) -> HostResult<()> {
        let local = self.service(uuid, service)?;
        let sid = sid.ok_or_else(|| HostError::PreconditionFailed("missing SID".to_string()))?;
        if !local.subscribers().remove(sid) {
            return Err(HostError::PreconditionFailed(format!("unknown SID {}", sid)));
        }
        log::info!("[DeviceHost] Subscriber {} left {}", sid, local.short_id());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::tests::RecordingEventEmitter;
    use crate::state::SsdpConfig;
    use crate::upnp::gena::parse_property_set;
    use crate::upnp::local::binary_light;
    use crate::upnp::soap::{build_soap_envelope, parse_soap_response};
    use crate::upnp::ssdp::RegistrationTable;
    use crate::upnp::test_fixtures::serve;
    use axum::http::HeaderMap;
    use axum::routing::any;
    use axum::Router;
    use parking_lot::Mutex;

    const UUID: &str = "light-1";
    const SOAP_ACTION: &str = "urn:schemas-upnp-org:service:SwitchPower:1#";

    struct Fixture {
        host: Arc<DeviceHost>,
        table: Arc<RegistrationTable>,
    }

    fn host() -> Fixture {
        let emitter = Arc::new(RecordingEventEmitter::default());
        let table = Arc::new(RegistrationTable::new(emitter));
        let ssdp = Arc::new(SsdpServer::detached(Arc::clone(&table), SsdpConfig::default()));
        let network = NetworkContext::for_test();
        network.set_port(49500);
        let host = DeviceHost::new(
            ssdp,
            network,
            Client::new(),
            GenaConfig::default(),
            "test/1.0 UPnP/1.0 tessera/0.1".to_string(),
            TokioSpawner::current(),
        );
        Fixture {
            host: Arc::new(host),
            table,
        }
    }

    type Received = Arc<Mutex<Vec<(String, String)>>>;

    /// Serves a NOTIFY sink recording `(SEQ, body)` pairs.
    async fn event_sink() -> (String, Received) {
        let received: Received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let router = Router::new().route(
            "/sink",
            any(move |headers: HeaderMap, body: String| {
                let sink = Arc::clone(&sink);
                async move {
                    let seq = headers
                        .get("SEQ")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    sink.lock().push((seq, body));
                }
            }),
        );
        let addr = serve(router).await;
        (format!("<http://{}/sink>", addr), received)
    }

    async fn wait_for(received: &Received, count: usize) {
        for _ in 0..150 {
            if received.lock().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn new_subscription(callback: &str) -> SubscribeRequest {
        SubscribeRequest {
            callback: Some(callback.to_string()),
            nt: Some(GENA_NT_EVENT.to_string()),
            timeout: Some("Second-300".to_string()),
            ..SubscribeRequest::default()
        }
    }

    #[test]
    fn announcements_cover_device_and_services() {
        let light = binary_light(Some(UUID), "Lamp");
        let entries = announcements(&light, "http://h/d.xml", "srv", 1800);
        let pairs: Vec<(&str, &str)> = entries
            .iter()
            .map(|e| (e.usn.as_str(), e.st.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("uuid:light-1::upnp:rootdevice", "upnp:rootdevice"),
                ("uuid:light-1", "uuid:light-1"),
                (
                    "uuid:light-1::urn:schemas-upnp-org:device:BinaryLight:1",
                    "urn:schemas-upnp-org:device:BinaryLight:1"
                ),
                (
                    "uuid:light-1::urn:schemas-upnp-org:service:SwitchPower:1",
                    "urn:schemas-upnp-org:service:SwitchPower:1"
                ),
            ]
        );
        assert!(entries.iter().all(|e| e.is_local() && e.location == "http://h/d.xml"));
    }

    #[test]
    fn timeout_header_is_clamped_or_defaulted() {
        assert_eq!(granted_timeout(Some("Second-300")), 300);
        assert_eq!(granted_timeout(Some("Second-infinite")), GENA_MAX_TIMEOUT_SECS);
        assert_eq!(granted_timeout(Some("soon")), GENA_DEFAULT_SUBSCRIBER_TIMEOUT_SECS);
        assert_eq!(granted_timeout(None), GENA_DEFAULT_SUBSCRIBER_TIMEOUT_SECS);
    }

    #[tokio::test]
    async fn publish_registers_local_entries_and_withdraw_removes_them() {
        let fx = host();
        fx.host.publish(binary_light(Some(UUID), "Lamp")).await;

        let local = fx.table.local_entries();
        assert_eq!(local.len(), 4);
        assert!(local
            .iter()
            .all(|e| e.location == "http://127.0.0.1:49500/devices/light-1/description.xml"));
        assert!(fx.host.description(UUID).unwrap().contains("uuid:light-1"));

        assert!(fx.host.withdraw("uuid:light-1").await);
        assert!(fx.table.local_entries().is_empty());
        assert!(matches!(
            fx.host.description(UUID),
            Err(HostError::UnknownDevice(_))
        ));
    }

    #[tokio::test]
    async fn control_runs_actions_and_reports_faults() {
        let fx = host();
        fx.host.publish(binary_light(Some(UUID), "Lamp")).await;
        let service_type = "urn:schemas-upnp-org:service:SwitchPower:1";

        let body = build_soap_envelope("SetTarget", service_type, &[("NewTargetValue", "1")]);
        let action = format!("\"{}SetTarget\"", SOAP_ACTION);
        fx.host
            .control(UUID, "SwitchPower", Some(&action), &body)
            .await
            .unwrap();

        let body = build_soap_envelope("GetStatus", service_type, &[]);
        let action = format!("\"{}GetStatus\"", SOAP_ACTION);
        let response = fx
            .host
            .control(UUID, "SwitchPower", Some(&action), &body)
            .await
            .unwrap();
        assert_eq!(
            parse_soap_response(&response, "GetStatus").unwrap(),
            vec![("ResultStatus".to_string(), "1".to_string())]
        );

        let body = build_soap_envelope("GetStatus", service_type, &[("Extra", "1")]);
        let err = fx
            .host
            .control(UUID, "SwitchPower", Some(&action), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Fault(ref f) if f.code == 402));

        let body = build_soap_envelope("Dim", service_type, &[]);
        let action = format!("\"{}Dim\"", SOAP_ACTION);
        let err = fx
            .host
            .control(UUID, "SwitchPower", Some(&action), &body)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Fault(ref f) if f.code == 401));

        let err = fx
            .host
            .control(UUID, "SwitchPower", None, &body)
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::BadRequest(_)));
    }

    #[tokio::test]
    async fn subscribe_validates_headers() {
        let fx = host();
        fx.host.publish(binary_light(Some(UUID), "Lamp")).await;

        let mixed = SubscribeRequest {
            sid: Some("uuid:x".into()),
            nt: Some(GENA_NT_EVENT.into()),
            ..SubscribeRequest::default()
        };
        assert!(matches!(
            fx.host.subscribe(UUID, "SwitchPower", &mixed),
            Err(HostError::BadRequest(_))
        ));

        let unknown = SubscribeRequest {
            sid: Some("uuid:x".into()),
            ..SubscribeRequest::default()
        };
        assert!(matches!(
            fx.host.subscribe(UUID, "SwitchPower", &unknown),
            Err(HostError::PreconditionFailed(_))
        ));

        let no_callback = SubscribeRequest {
            nt: Some(GENA_NT_EVENT.into()),
            ..SubscribeRequest::default()
        };
        assert!(matches!(
            fx.host.subscribe(UUID, "SwitchPower", &no_callback),
            Err(HostError::PreconditionFailed(_))
        ));

        let wrong_nt = SubscribeRequest {
            nt: Some("upnp:other".into()),
            callback: Some("<http://10.0.0.2/cb>".into()),
            ..SubscribeRequest::default()
        };
        assert!(matches!(
            fx.host.subscribe(UUID, "SwitchPower", &wrong_nt),
            Err(HostError::PreconditionFailed(_))
        ));

        assert!(matches!(
            fx.host.unsubscribe(UUID, "SwitchPower", Some("uuid:x")),
            Err(HostError::PreconditionFailed(_))
        ));
    }

    #[tokio::test]
    async fn subscriber_gets_initial_event_then_changes() {
        let fx = host();
        let light = fx.host.publish(binary_light(Some(UUID), "Lamp")).await;
        let (callback, received) = event_sink().await;

        let grant = fx
            .host
            .subscribe(UUID, "SwitchPower", &new_subscription(&callback))
            .unwrap();
        assert_eq!(grant.timeout_header(), "Second-300");

        wait_for(&received, 1).await;
        {
            let events = received.lock();
            assert_eq!(events[0].0, "0");
            assert_eq!(
                parse_property_set(&events[0].1).unwrap(),
                vec![("Status".to_string(), "0".to_string())]
            );
        }

        let renewed = SubscribeRequest {
            sid: Some(grant.sid.clone()),
            timeout: Some("Second-600".into()),
            ..SubscribeRequest::default()
        };
        assert_eq!(
            fx.host.subscribe(UUID, "SwitchPower", &renewed).unwrap().timeout_secs,
            600
        );

        light.services()[0].service().set_variable(0, "Status", "1");
        wait_for(&received, 2).await;
        {
            let events = received.lock();
            assert_eq!(events.len(), 2);
            assert_eq!(events[1].0, "1");
            assert_eq!(
                parse_property_set(&events[1].1).unwrap(),
                vec![("Status".to_string(), "1".to_string())]
            );
        }

        // Target is not evented.
        light.services()[0].service().set_variable(0, "Target", "0");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(received.lock().len(), 2);

        fx.host
            .unsubscribe(UUID, "SwitchPower", Some(&grant.sid))
            .unwrap();
        assert!(light.services()[0].subscribers().is_empty());
    }

    #[tokio::test]
    async fn changes_right_after_subscribe_follow_initial_event() {
        let fx = host();
        let light = fx.host.publish(binary_light(Some(UUID), "Lamp")).await;
        let (callback, received) = event_sink().await;

        fx.host
            .subscribe(UUID, "SwitchPower", &new_subscription(&callback))
            .unwrap();
        let service = light.services()[0].service();
        service.set_variable(0, "Status", "1");
        service.set_variable(0, "Status", "0");

        wait_for(&received, 3).await;
        let events = received.lock();
        let seqs: Vec<&str> = events.iter().map(|(seq, _)| seq.as_str()).collect();
        assert_eq!(seqs, vec!["0", "1", "2"]);
        let statuses: Vec<String> = events
            .iter()
            .map(|(_, body)| parse_property_set(body).unwrap()[0].1.clone())
            .collect();
        assert_eq!(statuses, vec!["0", "1", "0"]);
    }

    #[tokio::test]
    async fn withdraw_closes_event_queues() {
        let fx = host();
        fx.host.publish(binary_light(Some(UUID), "Lamp")).await;
        assert!(fx.host.queues.contains_key("light-1/SwitchPower"));

        fx.host.withdraw("uuid:light-1").await;
        assert!(fx.host.queues.is_empty());
    }

    #[tokio::test]
    async fn expired_subscribers_are_swept() {
        let fx = host();
        let light = fx.host.publish(binary_light(Some(UUID), "Lamp")).await;
        light.services()[0]
            .subscribers()
            .add(vec!["http://127.0.0.1:9/cb".into()], 5);

        assert_eq!(fx.host.expire_subscribers(Instant::now()), 0);
        assert_eq!(
            fx.host
                .expire_subscribers(Instant::now() + Duration::from_secs(6)),
            1
        );
        assert!(light.services()[0].subscribers().is_empty());
    }
}
