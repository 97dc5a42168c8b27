//! The service model shared by remote (detected) and local (hosted) devices.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use super::action::Action;
use super::variable::{ServiceDispatch, StateVariable, StateVariableSpec, VariableCallback};
use crate::protocol_constants::GENA_MAX_TIMEOUT_SECS;

/// An active client-role GENA subscription.
///
/// SID and expiry are only ever present together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSubscription {
    pub sid: String,
    pub timeout_at: Instant,
}

impl ServiceSubscription {
    pub fn new(sid: impl Into<String>, timeout_secs: u64) -> Self {
        Self {
            sid: sid.into(),
            timeout_at: Instant::now()
                + Duration::from_secs(timeout_secs.min(GENA_MAX_TIMEOUT_SECS)),
        }
    }

    /// Whether the subscription expires within `buffer` of `now`.
    pub fn expires_within(&self, now: Instant, buffer: Duration) -> bool {
        self.timeout_at < now + buffer
    }
}

/// A UPnP service: identity, endpoint URLs, schema, and per-instance state.
///
/// Instance 0 is created together with the schema; further instances appear
/// on demand (LastChange events, action calls with an `InstanceID`).
pub struct Service {
    device_udn: String,
    service_type: String,
    service_id: String,
    scpd_url: String,
    control_url: String,
    event_sub_url: String,
    actions: RwLock<Vec<Arc<Action>>>,
    specs: RwLock<Vec<StateVariableSpec>>,
    variables: RwLock<BTreeMap<u32, HashMap<String, Arc<StateVariable>>>>,
    subscription: RwLock<Option<ServiceSubscription>>,
    schema_loaded: AtomicBool,
    dispatch: Arc<ServiceDispatch>,
}

impl Service {
    pub fn new(
        device_udn: impl Into<String>,
        service_type: impl Into<String>,
        service_id: impl Into<String>,
        scpd_url: impl Into<String>,
        control_url: impl Into<String>,
        event_sub_url: impl Into<String>,
    ) -> Self {
        Self {
            device_udn: device_udn.into(),
            service_type: service_type.into(),
            service_id: service_id.into(),
            scpd_url: scpd_url.into(),
            control_url: control_url.into(),
            event_sub_url: event_sub_url.into(),
            actions: RwLock::new(Vec::new()),
            specs: RwLock::new(Vec::new()),
            variables: RwLock::new(BTreeMap::new()),
            subscription: RwLock::new(None),
            schema_loaded: AtomicBool::new(false),
            dispatch: Arc::new(ServiceDispatch::default()),
        }
    }

    pub fn device_udn(&self) -> &str {
        &self.device_udn
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    /// Last segment of the service ID (`urn:upnp-org:serviceId:SwitchPower` → `SwitchPower`).
    pub fn short_id(&self) -> &str {
        self.service_id
            .rsplit(':')
            .next()
            .unwrap_or(&self.service_id)
    }

    pub fn scpd_url(&self) -> &str {
        &self.scpd_url
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    pub fn event_sub_url(&self) -> &str {
        &self.event_sub_url
    }

    pub fn is_evented(&self) -> bool {
        !self.event_sub_url.is_empty()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Schema
    // ─────────────────────────────────────────────────────────────────────────

    /// Installs the parsed schema and creates instance 0 variables.
    pub fn install_schema(&self, actions: Vec<Action>, specs: Vec<StateVariableSpec>) {
        *self.actions.write() = actions.into_iter().map(Arc::new).collect();
        {
            let mut variables = self.variables.write();
            let instance = variables.entry(0).or_default();
            for spec in &specs {
                instance.entry(spec.name.clone()).or_insert_with(|| {
                    Arc::new(StateVariable::new(
                        self.service_id.clone(),
                        0,
                        spec.clone(),
                        Arc::clone(&self.dispatch),
                    ))
                });
            }
        }
        *self.specs.write() = specs;
        self.schema_loaded.store(true, Ordering::Release);
    }

    pub fn has_schema(&self) -> bool {
        self.schema_loaded.load(Ordering::Acquire)
    }

    pub fn action(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.read().iter().find(|a| a.name == name).cloned()
    }

    pub fn actions(&self) -> Vec<Arc<Action>> {
        self.actions.read().clone()
    }

    pub fn variable_specs(&self) -> Vec<StateVariableSpec> {
        self.specs.read().clone()
    }

    fn spec_for(&self, name: &str) -> StateVariableSpec {
        self.specs
            .read()
            .iter()
            .find(|s| s.name == name)
            .cloned()
            .unwrap_or_else(|| StateVariableSpec::new(name, "string"))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // State variables
    // ─────────────────────────────────────────────────────────────────────────

    pub fn variable(&self, instance: u32, name: &str) -> Option<Arc<StateVariable>> {
        self.variables
            .read()
            .get(&instance)
            .and_then(|vars| vars.get(name))
            .cloned()
    }

    /// Variables of one instance, in schema order followed by ad-hoc ones.
    pub fn variables(&self, instance: u32) -> Vec<Arc<StateVariable>> {
        let variables = self.variables.read();
        let Some(vars) = variables.get(&instance) else {
            return Vec::new();
        };
        let specs = self.specs.read();
        let mut ordered: Vec<Arc<StateVariable>> = specs
            .iter()
            .filter_map(|s| vars.get(&s.name).cloned())
            .collect();
        let mut extra: Vec<Arc<StateVariable>> = vars
            .values()
            .filter(|v| !specs.iter().any(|s| s.name == v.name()))
            .cloned()
            .collect();
        extra.sort_by(|a, b| a.name().cmp(b.name()));
        ordered.extend(extra);
        ordered
    }

    pub fn instances(&self) -> Vec<u32> {
        self.variables.read().keys().copied().collect()
    }

    /// Returns the variable, creating the instance and variable on demand.
    pub fn ensure_variable(&self, instance: u32, name: &str) -> Arc<StateVariable> {
        if let Some(var) = self.variable(instance, name) {
            return var;
        }
        let spec = self.spec_for(name);
        let mut variables = self.variables.write();
        Arc::clone(
            variables
                .entry(instance)
                .or_default()
                .entry(name.to_string())
                .or_insert_with(|| {
                    Arc::new(StateVariable::new(
                        self.service_id.clone(),
                        instance,
                        spec,
                        Arc::clone(&self.dispatch),
                    ))
                }),
        )
    }

    /// Updates a variable (created on demand). Returns `true` if it changed.
    pub fn set_variable(&self, instance: u32, name: &str, value: impl Into<String>) -> bool {
        self.ensure_variable(instance, name).update(value)
    }

    /// Installs a hook invoked after every variable change of this service.
    pub fn set_change_hook(&self, hook: VariableCallback) {
        self.dispatch.set_hook(Some(hook));
    }

    pub fn clear_change_hook(&self) {
        self.dispatch.set_hook(None);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Client-role subscription
    // ─────────────────────────────────────────────────────────────────────────

    pub fn subscription(&self) -> Option<ServiceSubscription> {
        self.subscription.read().clone()
    }

    pub fn sid(&self) -> Option<String> {
        self.subscription.read().as_ref().map(|s| s.sid.clone())
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.read().is_some()
    }

    pub fn set_subscription(&self, subscription: ServiceSubscription) {
        *self.subscription.write() = Some(subscription);
    }

    pub fn take_subscription(&self) -> Option<ServiceSubscription> {
        self.subscription.write().take()
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("service_id", &self.service_id)
            .field("service_type", &self.service_type)
            .field("control_url", &self.control_url)
            .field("event_sub_url", &self.event_sub_url)
            .field("subscribed", &self.is_subscribed())
            .finish()
    }
}
