//! Hosted (local) devices.
//!
//! A [`LocalDevice`] is defined in code: its services carry a schema built
//! programmatically and an [`ActionHandler`] answering control requests. The
//! device host publishes it over SSDP and serves the documents generated by
//! [`description`].

pub mod binary_light;
pub mod description;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::gena::publisher::SubscriberRegistry;
use super::invoker::target_instance;
use super::model::{Action, Service, StateVariableSpec};
use super::soap::UpnpFault;

pub use binary_light::{binary_light, SwitchPowerHandler};
pub use description::{build_device_description, build_event_body, build_scpd};

/// Path prefix under which hosted devices are served.
pub const DEVICES_PATH: &str = "/devices";

/// Relative URL of a hosted device's description.
pub fn description_path(uuid: &str) -> String {
    format!("{}/{}/description.xml", DEVICES_PATH, uuid)
}

fn service_path(uuid: &str, short_id: &str, leaf: &str) -> String {
    format!("{}/{}/{}/{}", DEVICES_PATH, uuid, short_id, leaf)
}

/// Answers control requests for one hosted service.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Runs `action` with in-arguments that already match its declaration.
    ///
    /// Returns the out-argument values; a fault is sent back to the caller
    /// as a SOAP fault.
    async fn handle(
        &self,
        service: &Service,
        action: &Action,
        args: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>, UpnpFault>;
}

/// Default handler: every out-argument gets the current value of its related
/// state variable.
pub struct StateActionHandler;

#[async_trait]
impl ActionHandler for StateActionHandler {
    async fn handle(
        &self,
        service: &Service,
        action: &Action,
        args: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>, UpnpFault> {
        let instance = target_instance(args);
        Ok(action
            .out_arguments()
            .map(|arg| {
                let value = service
                    .variable(instance, &arg.related_state_variable)
                    .and_then(|v| v.value())
                    .unwrap_or_default();
                (arg.name.clone(), value)
            })
            .collect())
    }
}

/// Definition of one service of a [`LocalDevice`].
pub struct ServiceDefinition {
    service_type: String,
    service_id: String,
    actions: Vec<Action>,
    variables: Vec<StateVariableSpec>,
    handler: Arc<dyn ActionHandler>,
}

impl ServiceDefinition {
    pub fn new(service_type: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            service_id: service_id.into(),
            actions: Vec::new(),
            variables: Vec::new(),
            handler: Arc::new(StateActionHandler),
        }
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    #[must_use]
    pub fn variable(mut self, spec: StateVariableSpec) -> Self {
        self.variables.push(spec);
        self
    }

    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn ActionHandler>) -> Self {
        self.handler = handler;
        self
    }
}

/// A hosted service: the model, its handler and its GENA subscribers.
pub struct LocalService {
    service: Arc<Service>,
    handler: Arc<dyn ActionHandler>,
    subscribers: SubscriberRegistry,
}

impl LocalService {
    fn new(udn: &str, uuid: &str, definition: ServiceDefinition) -> Self {
        let ServiceDefinition {
            service_type,
            service_id,
            actions,
            variables,
            handler,
        } = definition;
        let short_id = service_id
            .rsplit(':')
            .next()
            .unwrap_or(&service_id)
            .to_string();
        let service = Service::new(
            udn,
            service_type,
            service_id.clone(),
            service_path(uuid, &short_id, "scpd.xml"),
            service_path(uuid, &short_id, "control"),
            service_path(uuid, &short_id, "event"),
        );
        service.install_schema(actions, variables);
        Self {
            service: Arc::new(service),
            handler,
            subscribers: SubscriberRegistry::new(),
        }
    }

    pub fn service(&self) -> &Arc<Service> {
        &self.service
    }

    pub fn short_id(&self) -> &str {
        self.service.short_id()
    }

    pub fn subscribers(&self) -> &SubscriberRegistry {
        &self.subscribers
    }

    /// Runs a control request.
    ///
    /// Unknown actions fault with 401 and argument lists that do not match
    /// the declaration with 402. Out-arguments come back in declared order.
    pub async fn invoke(
        &self,
        action_name: &str,
        args: &[(String, String)],
    ) -> Result<Vec<(String, String)>, UpnpFault> {
        let action = self
            .service
            .action(action_name)
            .ok_or_else(UpnpFault::invalid_action)?;
        if let Err(mismatch) = action.check_in_arguments(args.iter().map(|(n, _)| n.as_str())) {
            log::debug!(
                "[DeviceHost] {}.{} rejected: {}",
                self.short_id(),
                action_name,
                mismatch
            );
            return Err(UpnpFault::invalid_args());
        }

        let args: HashMap<String, String> = args.iter().cloned().collect();
        let mut produced = self.handler.handle(&self.service, &action, &args).await?;

        action
            .out_arguments()
            .map(|arg| {
                let index = produced
                    .iter()
                    .position(|(name, _)| *name == arg.name)
                    .ok_or_else(|| {
                        UpnpFault::with_description(
                            501,
                            format!("handler produced no value for {}", arg.name),
                        )
                    })?;
                Ok(produced.swap_remove(index))
            })
            .collect()
    }
}

/// A device hosted by this process.
pub struct LocalDevice {
    udn: String,
    device_type: String,
    friendly_name: String,
    manufacturer: String,
    model_name: String,
    services: Vec<Arc<LocalService>>,
}

impl LocalDevice {
    pub fn builder(
        device_type: impl Into<String>,
        friendly_name: impl Into<String>,
    ) -> LocalDeviceBuilder {
        LocalDeviceBuilder {
            udn: None,
            device_type: device_type.into(),
            friendly_name: friendly_name.into(),
            manufacturer: String::new(),
            model_name: String::new(),
            services: Vec::new(),
        }
    }

    pub fn udn(&self) -> &str {
        &self.udn
    }

    /// The UDN without its `uuid:` prefix, as used in URL paths.
    pub fn uuid(&self) -> &str {
        self.udn.strip_prefix("uuid:").unwrap_or(&self.udn)
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn services(&self) -> &[Arc<LocalService>] {
        &self.services
    }

    /// Finds a service by short ID (as used in URL paths) or full service ID.
    pub fn service(&self, key: &str) -> Option<&Arc<LocalService>> {
        self.services
            .iter()
            .find(|s| s.short_id() == key || s.service.service_id() == key)
    }

    pub fn description_path(&self) -> String {
        description_path(self.uuid())
    }
}

impl std::fmt::Debug for LocalDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDevice")
            .field("udn", &self.udn)
            .field("device_type", &self.device_type)
            .field("services", &self.services.len())
            .finish()
    }
}

pub struct LocalDeviceBuilder {
    udn: Option<String>,
    device_type: String,
    friendly_name: String,
    manufacturer: String,
    model_name: String,
    services: Vec<ServiceDefinition>,
}

impl LocalDeviceBuilder {
    /// Uses a fixed UDN instead of a random one. The `uuid:` prefix is added
    /// when missing.
    #[must_use]
    pub fn udn(mut self, udn: impl Into<String>) -> Self {
        let udn = udn.into();
        self.udn = Some(if udn.starts_with("uuid:") {
            udn
        } else {
            format!("uuid:{}", udn)
        });
        self
    }

    #[must_use]
    pub fn manufacturer(mut self, manufacturer: impl Into<String>) -> Self {
        self.manufacturer = manufacturer.into();
        self
    }

    #[must_use]
    pub fn model_name(mut self, model_name: impl Into<String>) -> Self {
        self.model_name = model_name.into();
        self
    }

    #[must_use]
    pub fn service(mut self, definition: ServiceDefinition) -> Self {
        self.services.push(definition);
        self
    }

    pub fn build(self) -> LocalDevice {
        let udn = self
            .udn
            .unwrap_or_else(|| format!("uuid:{}", uuid::Uuid::new_v4()));
        let uuid = udn.strip_prefix("uuid:").unwrap_or(&udn).to_string();
        let services = self
            .services
            .into_iter()
            .map(|definition| Arc::new(LocalService::new(&udn, &uuid, definition)))
            .collect();
        LocalDevice {
            udn,
            device_type: self.device_type,
            friendly_name: self.friendly_name,
            manufacturer: self.manufacturer,
            model_name: self.model_name,
            services,
        }
    }
}
