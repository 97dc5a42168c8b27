//! GENA eventing.
//!
//! Client role: [`GenaSubscriptionManager`] subscribes to remote services,
//! renews subscriptions before they lapse and applies incoming property sets
//! to the services' state variables.
//!
//! Server role: [`publisher`] keeps the subscriber records of hosted services
//! and delivers their NOTIFYs.

mod client;
mod parser;
pub mod publisher;
mod store;

pub use client::{parse_timeout_header, GenaClient, SubscribeResponse};
pub use parser::{
    build_last_change, build_property_set, event_metadata_namespace, parse_last_change,
    parse_property_set, InstanceChanges,
};
pub use store::GenaSubscriptionStore;

use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::Client;
use thiserror::Error;

use crate::events::{EventEmitter, SubscriptionEvent};
use crate::protocol_constants::LAST_CHANGE;
use crate::state::GenaConfig;
use crate::upnp::model::{Service, ServiceSubscription};
use crate::upnp::xml::XmlError;
use crate::utils::now_millis;

/// Errors that can occur during GENA operations.
#[derive(Debug, Error)]
pub enum GenaError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Subscription failed with status {0}")]
    SubscriptionFailed(u16),

    #[error("Renewal failed with status {0}")]
    RenewalFailed(u16),

    #[error("Response carried no SID")]
    MissingSid,

    #[error("Invalid HTTP method {0}")]
    InvalidMethod(&'static str),

    #[error("Service {0} has no event URL")]
    NotEvented(String),

    #[error("Subscription to {0} already in progress")]
    AlreadyPending(String),

    #[error("Unknown subscription {0}")]
    UnknownSid(String),

    #[error("Malformed event body: {0}")]
    Parse(#[from] XmlError),
}

/// Convenient Result alias for GENA operations.
pub type GenaResult<T> = Result<T, GenaError>;

/// Applies a parsed property set to `service`.
///
/// Plain properties update instance 0. A `LastChange` property is stored as-is
/// and its per-instance changes are applied too, creating instances and
/// variables on demand. Returns the number of variables that changed.
pub fn apply_properties(service: &Service, properties: &[(String, String)]) -> usize {
    let mut changed = 0;
    for (name, value) in properties {
        if service.set_variable(0, name, value.as_str()) {
            changed += 1;
        }
        if name == LAST_CHANGE && !value.is_empty() {
            match parse_last_change(value) {
                Ok(instances) => {
                    for InstanceChanges { instance, changes } in instances {
                        for (var, val) in changes {
                            if service.set_variable(instance, &var, val) {
                                changed += 1;
                            }
                        }
                    }
                }
                Err(e) => log::debug!(
                    "[GENA] Unparseable LastChange from {}: {}",
                    service.service_id(),
                    e
                ),
            }
        }
    }
    changed
}

/// Client-role subscription state machine.
///
/// Per service: `Unsubscribed -> subscribe() -> Subscribed(sid, timeout_at)
/// -> renew() -> Subscribed(sid, timeout_at') -> unsubscribe() -> Unsubscribed`.
/// The SID and expiry live on the [`Service`]; the store indexes SIDs for
/// NOTIFY routing.
pub struct GenaSubscriptionManager {
    client: GenaClient,
    store: GenaSubscriptionStore,
    emitter: Arc<dyn EventEmitter>,
    config: GenaConfig,
}

impl GenaSubscriptionManager {
    pub fn new(http: Client, config: GenaConfig, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            client: GenaClient::new(http, config.subscription_timeout_secs),
            store: GenaSubscriptionStore::new(),
            emitter,
            config,
        }
    }

    pub fn store(&self) -> &GenaSubscriptionStore {
        &self.store
    }

    pub fn config(&self) -> &GenaConfig {
        &self.config
    }

    /// Subscribes to `service`, delivering events to `callback_url`.
    ///
    /// A service that is already subscribed keeps its subscription and its
    /// SID is returned.
    pub async fn subscribe(&self, service: &Arc<Service>, callback_url: &str) -> GenaResult<String> {
        if !service.is_evented() {
            return Err(GenaError::NotEvented(service.service_id().to_string()));
        }
        if let Some(sid) = service.sid() {
            return Ok(sid);
        }
        let url = service.event_sub_url();
        if !self.store.try_mark_pending(url) {
            return Err(GenaError::AlreadyPending(url.to_string()));
        }

        let response = match self.client.subscribe(url, callback_url).await {
            Ok(response) => response,
            Err(e) => {
                self.store.clear_pending(url);
                return Err(e);
            }
        };

        service.set_subscription(ServiceSubscription::new(
            response.sid.clone(),
            response.timeout_secs,
        ));
        self.store.insert(response.sid.clone(), service);

        log::info!(
            "[GENA] Subscribed to {} (SID {}, {}s)",
            service.service_id(),
            response.sid,
            response.timeout_secs
        );
        self.emitter.emit_subscription(SubscriptionEvent::Subscribed {
            service_id: service.service_id().to_string(),
            sid: response.sid.clone(),
            timeout_secs: response.timeout_secs,
            timestamp: now_millis(),
        });
        Ok(response.sid)
    }

    /// Renews the subscription of `service`.
    ///
    /// A failed renewal drops the SID and tries one fresh SUBSCRIBE; if that
    /// fails as well the subscription is reported lost.
    pub async fn renew(&self, service: &Arc<Service>, callback_url: &str) -> GenaResult<()> {
        let Some(sid) = service.sid() else {
            return self.subscribe(service, callback_url).await.map(|_| ());
        };

        match self.client.renew(service.event_sub_url(), &sid).await {
            Ok(timeout_secs) => {
                service.set_subscription(ServiceSubscription::new(sid.clone(), timeout_secs));
                log::debug!("[GENA] Renewed {} ({}s)", sid, timeout_secs);
                self.emitter.emit_subscription(SubscriptionEvent::Renewed {
                    service_id: service.service_id().to_string(),
                    sid,
                    timeout_secs,
                    timestamp: now_millis(),
                });
                Ok(())
            }
            Err(e) => {
                log::warn!(
                    "[GENA] Renewal of {} for {} failed: {}, resubscribing",
                    sid,
                    service.service_id(),
                    e
                );
                service.take_subscription();
                self.store.remove(&sid);

                match self.subscribe(service, callback_url).await {
                    Ok(_) => Ok(()),
                    Err(e) => {
                        log::warn!(
                            "[GENA] Subscription to {} lost: {}",
                            service.service_id(),
                            e
                        );
                        self.emitter.emit_subscription(SubscriptionEvent::Lost {
                            service_id: service.service_id().to_string(),
                            reason: e.to_string(),
                            timestamp: now_millis(),
                        });
                        Err(e)
                    }
                }
            }
        }
    }

    /// Cancels the subscription of `service`.
    ///
    /// The SID is cleared whatever the device answers. Returns whether the
    /// device acknowledged.
    pub async fn unsubscribe(&self, service: &Service) -> bool {
        let Some(subscription) = service.take_subscription() else {
            return false;
        };
        self.store.remove(&subscription.sid);
        let acknowledged = self
            .client
            .unsubscribe(service.event_sub_url(), &subscription.sid)
            .await;
        log::debug!(
            "[GENA] Unsubscribed {} from {} (acknowledged: {})",
            subscription.sid,
            service.service_id(),
            acknowledged
        );
        acknowledged
    }

    /// Renews every subscription expiring within the renewal buffer.
    ///
    /// Returns how many renewals were attempted.
    pub async fn renew_expiring(&self, callback_url: &str) -> usize {
        let now = Instant::now();
        let buffer = Duration::from_secs(self.config.renewal_buffer_secs);
        self.store.prune_dead();

        let due: Vec<Arc<Service>> = self
            .store
            .services()
            .into_iter()
            .filter(|s| {
                s.subscription()
                    .is_some_and(|sub| sub.expires_within(now, buffer))
            })
            .collect();

        for service in &due {
            if let Err(e) = self.renew(service, callback_url).await {
                log::debug!("[GENA] Renewal pass: {}: {}", service.service_id(), e);
            }
        }
        due.len()
    }

    /// Unsubscribes every live subscription (best-effort).
    pub async fn unsubscribe_all(&self) {
        let services = self.store.services();
        if !services.is_empty() {
            log::info!("[GENA] Unsubscribing {} services", services.len());
        }
        for service in services {
            self.unsubscribe(&service).await;
        }
    }

    /// Applies an incoming NOTIFY body to the service subscribed under `sid`.
    ///
    /// Returns the number of variables that changed.
    pub fn handle_notify(&self, sid: &str, body: &str) -> GenaResult<usize> {
        let service = self
            .store
            .get(sid)
            .ok_or_else(|| GenaError::UnknownSid(sid.to_string()))?;
        let properties = parse_property_set(body)?;
        log::debug!(
            "[GENA] NOTIFY {} for {}: {} properties",
            sid,
            service.service_id(),
            properties.len()
        );
        Ok(apply_properties(&service, &properties))
    }
}
