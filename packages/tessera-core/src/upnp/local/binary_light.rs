//! The `BinaryLight:1` sample device.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ActionHandler, LocalDevice, ServiceDefinition, StateActionHandler};
use crate::protocol_constants::APP_NAME;
use crate::upnp::model::{Action, Argument, Service, StateVariableSpec};
use crate::upnp::soap::UpnpFault;

pub const BINARY_LIGHT_DEVICE_TYPE: &str = "urn:schemas-upnp-org:device:BinaryLight:1";
pub const SWITCH_POWER_SERVICE_TYPE: &str = "urn:schemas-upnp-org:service:SwitchPower:1";
pub const SWITCH_POWER_SERVICE_ID: &str = "urn:upnp-org:serviceId:SwitchPower";

/// Normalises a UPnP boolean to `"0"` / `"1"`.
fn parse_boolean(value: &str) -> Option<&'static str> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some("1"),
        "0" | "false" | "no" => Some("0"),
        _ => None,
    }
}

/// `SwitchPower:1`: `SetTarget` drives both `Target` and `Status`; the
/// getters read the variables.
pub struct SwitchPowerHandler;

#[async_trait]
impl ActionHandler for SwitchPowerHandler {
    async fn handle(
        &self,
        service: &Service,
        action: &Action,
        args: &HashMap<String, String>,
    ) -> Result<Vec<(String, String)>, UpnpFault> {
        if action.name != "SetTarget" {
            return StateActionHandler.handle(service, action, args).await;
        }
        let raw = args
            .get("NewTargetValue")
            .ok_or_else(UpnpFault::invalid_args)?;
        let value = parse_boolean(raw).ok_or_else(|| UpnpFault::new(600))?;
        service.set_variable(0, "Target", value);
        service.set_variable(0, "Status", value);
        log::info!("[DeviceHost] Light switched {}", if value == "1" { "on" } else { "off" });
        Ok(Vec::new())
    }
}

/// Builds a BinaryLight with its SwitchPower service, initially off.
pub fn binary_light(udn: Option<&str>, friendly_name: &str) -> LocalDevice {
    let switch_power = ServiceDefinition::new(SWITCH_POWER_SERVICE_TYPE, SWITCH_POWER_SERVICE_ID)
        .action(Action::new(
            "SetTarget",
            vec![Argument::input("NewTargetValue", "Target")],
        ))
        .action(Action::new(
            "GetTarget",
            vec![Argument::output("RetTargetValue", "Target")],
        ))
        .action(Action::new(
            "GetStatus",
            vec![Argument::output("ResultStatus", "Status")],
        ))
        .variable(
            StateVariableSpec::new("Target", "boolean")
                .evented(false)
                .with_default("0"),
        )
        .variable(StateVariableSpec::new("Status", "boolean").with_default("0"))
        .handler(Arc::new(SwitchPowerHandler));

    let mut builder = LocalDevice::builder(BINARY_LIGHT_DEVICE_TYPE, friendly_name)
        .manufacturer(APP_NAME)
        .model_name("BinaryLight")
        .service(switch_power);
    if let Some(udn) = udn {
        builder = builder.udn(udn);
    }
    builder.build()
}
