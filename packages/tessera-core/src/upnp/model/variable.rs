//! State variables and their change subscribers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::Serialize;

/// Callback invoked with every change of a state variable.
pub type VariableCallback = Arc<dyn Fn(&StateVariableChange) + Send + Sync>;

/// Shared by every variable of one service: the service-wide change hook
/// and the lock that serializes change notifications across the service.
#[derive(Default)]
pub(crate) struct ServiceDispatch {
    hook: RwLock<Option<VariableCallback>>,
    order: ReentrantMutex<()>,
}

impl ServiceDispatch {
    pub(crate) fn set_hook(&self, hook: Option<VariableCallback>) {
        *self.hook.write() = hook;
    }
}

/// Identifies a subscriber registered with [`StateVariable::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// A change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariableChange {
    pub service_id: String,
    pub instance: u32,
    pub name: String,
    pub value: String,
    pub old_value: Option<String>,
}

/// `allowedValueRange` of a numeric state variable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AllowedValueRange {
    pub minimum: Option<String>,
    pub maximum: Option<String>,
    pub step: Option<String>,
}

/// Schema-level description of a state variable, as found in a
/// `serviceStateTable`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateVariableSpec {
    pub name: String,
    pub data_type: String,
    pub send_events: bool,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
    pub allowed_range: Option<AllowedValueRange>,
}

impl StateVariableSpec {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            send_events: true,
            default_value: None,
            allowed_values: Vec::new(),
            allowed_range: None,
        }
    }

    #[must_use]
    pub fn evented(mut self, send_events: bool) -> Self {
        self.send_events = send_events;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<String>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_allowed_values<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_values = values.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Default)]
struct ValueState {
    value: Option<String>,
    old_value: Option<String>,
}

/// A single state variable of one service instance.
///
/// [`update`](Self::update) notifies subscribers only when the value actually
/// changes, synchronously and in subscription order. Updates of all variables
/// of one service are serialized, so the notifications of two updates never
/// interleave. Callbacks may read and update variables of the same service.
/// A callback must not block on an update of another service's variables:
/// two threads doing that in opposite directions deadlock. Hand such work to
/// a task instead.
pub struct StateVariable {
    service_id: String,
    instance: u32,
    spec: StateVariableSpec,
    state: Mutex<ValueState>,
    subscribers: RwLock<Vec<(SubscriberId, VariableCallback)>>,
    next_subscriber: AtomicU64,
    dispatch: Arc<ServiceDispatch>,
}

impl StateVariable {
    pub(crate) fn new(
        service_id: impl Into<String>,
        instance: u32,
        spec: StateVariableSpec,
        dispatch: Arc<ServiceDispatch>,
    ) -> Self {
        let state = ValueState {
            value: spec.default_value.clone(),
            old_value: None,
        };
        Self {
            service_id: service_id.into(),
            instance,
            spec,
            state: Mutex::new(state),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber: AtomicU64::new(1),
            dispatch,
        }
    }

    /// Creates a variable that belongs to no service (tests, ad-hoc use).
    pub fn standalone(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self::new(
            "",
            0,
            StateVariableSpec::new(name, data_type),
            Arc::new(ServiceDispatch::default()),
        )
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn instance(&self) -> u32 {
        self.instance
    }

    pub fn spec(&self) -> &StateVariableSpec {
        &self.spec
    }

    pub fn send_events(&self) -> bool {
        self.spec.send_events
    }

    /// Current value, `None` until the first update (or without a default).
    pub fn value(&self) -> Option<String> {
        self.state.lock().value.clone()
    }

    /// Value before the most recent change.
    pub fn old_value(&self) -> Option<String> {
        self.state.lock().old_value.clone()
    }

    /// Sets a new value. Returns `true` (and notifies) only if it changed.
    pub fn update(&self, value: impl Into<String>) -> bool {
        let value = value.into();
        let _order = self.dispatch.order.lock();

        let change = {
            let mut state = self.state.lock();
            if state.value.as_deref() == Some(value.as_str()) {
                return false;
            }
            let old = state.value.replace(value.clone());
            state.old_value = old.clone();
            StateVariableChange {
                service_id: self.service_id.clone(),
                instance: self.instance,
                name: self.spec.name.clone(),
                value,
                old_value: old,
            }
        };

        let subscribers: Vec<VariableCallback> = self
            .subscribers
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();
        for callback in subscribers {
            callback(&change);
        }

        let hook = self.dispatch.hook.read().clone();
        if let Some(hook) = hook {
            hook(&change);
        }
        true
    }

    /// Registers a change callback.
    pub fn subscribe(&self, callback: VariableCallback) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, callback));
        id
    }

    /// Removes a change callback. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        subscribers.len() != before
    }
}

impl std::fmt::Debug for StateVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateVariable")
            .field("service_id", &self.service_id)
            .field("instance", &self.instance)
            .field("name", &self.spec.name)
            .field("value", &self.value())
            .finish()
    }
}
