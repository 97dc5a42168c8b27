//! XML documents served for hosted devices: the device description, the SCPD
//! of each service, and GENA event bodies.

use crate::protocol_constants::{A_ARG_TYPE_PREFIX, LAST_CHANGE, UPNP_DEVICE_NS, UPNP_SERVICE_NS};
use crate::upnp::gena::{build_last_change, build_property_set, event_metadata_namespace};
use crate::upnp::model::Service;
use crate::upnp::xml::escape_xml;

use super::LocalDevice;

const SPEC_VERSION: &str = "<specVersion><major>1</major><minor>0</minor></specVersion>";

fn element(name: &str, value: &str) -> String {
    format!("<{name}>{}</{name}>", escape_xml(value))
}

/// Builds the device description. URLBase is omitted, so service URLs
/// resolve against the description's own location.
pub fn build_device_description(device: &LocalDevice) -> String {
    let mut services = String::new();
    for local in device.services() {
        let service = local.service();
        services.push_str("<service>");
        services.push_str(&element("serviceType", service.service_type()));
        services.push_str(&element("serviceId", service.service_id()));
        services.push_str(&element("SCPDURL", service.scpd_url()));
        services.push_str(&element("controlURL", service.control_url()));
        services.push_str(&element("eventSubURL", service.event_sub_url()));
        services.push_str("</service>");
    }

    let mut info = String::new();
    info.push_str(&element("deviceType", device.device_type()));
    info.push_str(&element("friendlyName", device.friendly_name()));
    if !device.manufacturer().is_empty() {
        info.push_str(&element("manufacturer", device.manufacturer()));
    }
    if !device.model_name().is_empty() {
        info.push_str(&element("modelName", device.model_name()));
    }
    info.push_str(&element("UDN", device.udn()));

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><root xmlns="{}">{}<device>{}<serviceList>{}</serviceList></device></root>"#,
        UPNP_DEVICE_NS, SPEC_VERSION, info, services
    )
}

/// Builds the SCPD of a hosted service from its installed schema.
pub fn build_scpd(service: &Service) -> String {
    let mut actions = String::new();
    for action in service.actions() {
        actions.push_str("<action>");
        actions.push_str(&element("name", &action.name));
        if !action.arguments.is_empty() {
            actions.push_str("<argumentList>");
            for arg in &action.arguments {
                actions.push_str("<argument>");
                actions.push_str(&element("name", &arg.name));
                actions.push_str(&element("direction", arg.direction.as_str()));
                actions.push_str(&element("relatedStateVariable", &arg.related_state_variable));
                actions.push_str("</argument>");
            }
            actions.push_str("</argumentList>");
        }
        actions.push_str("</action>");
    }

    let mut variables = String::new();
    for spec in service.variable_specs() {
        variables.push_str(&format!(
            r#"<stateVariable sendEvents="{}">"#,
            if spec.send_events { "yes" } else { "no" }
        ));
        variables.push_str(&element("name", &spec.name));
        variables.push_str(&element("dataType", &spec.data_type));
        if let Some(default) = &spec.default_value {
            variables.push_str(&element("defaultValue", default));
        }
        if !spec.allowed_values.is_empty() {
            variables.push_str("<allowedValueList>");
            for value in &spec.allowed_values {
                variables.push_str(&element("allowedValue", value));
            }
            variables.push_str("</allowedValueList>");
        }
        if let Some(range) = &spec.allowed_range {
            variables.push_str("<allowedValueRange>");
            for (name, value) in [
                ("minimum", &range.minimum),
                ("maximum", &range.maximum),
                ("step", &range.step),
            ] {
                if let Some(value) = value {
                    variables.push_str(&element(name, value));
                }
            }
            variables.push_str("</allowedValueRange>");
        }
        variables.push_str("</stateVariable>");
    }

    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><scpd xmlns="{}">{}<actionList>{}</actionList><serviceStateTable>{}</serviceStateTable></scpd>"#,
        UPNP_SERVICE_NS, SPEC_VERSION, actions, variables
    )
}

/// Renders `LastChange` for one instance: every variable of the instance
/// except `A_ARG_TYPE_` helpers and `LastChange` itself.
pub fn render_last_change(service: &Service, instance: u32) -> String {
    let values: Vec<(String, String)> = service
        .variables(instance)
        .iter()
        .filter(|v| v.name() != LAST_CHANGE && !v.name().starts_with(A_ARG_TYPE_PREFIX))
        .filter_map(|v| v.value().map(|value| (v.name().to_string(), value)))
        .collect();
    let pairs: Vec<(&str, &str)> = values
        .iter()
        .map(|(n, v)| (n.as_str(), v.as_str()))
        .collect();
    build_last_change(
        event_metadata_namespace(service.service_type()),
        instance,
        &pairs,
    )
}

/// Builds the property set announcing every evented variable of instance 0.
pub fn build_event_body(service: &Service) -> String {
    let values: Vec<(String, String)> = service
        .variables(0)
        .iter()
        .filter(|v| v.send_events())
        .map(|v| {
            let value = if v.name() == LAST_CHANGE {
                render_last_change(service, 0)
            } else {
                v.value().unwrap_or_default()
            };
            (v.name().to_string(), value)
        })
        .collect();
    let pairs: Vec<(&str, &str)> = values
        .iter()
        .map(|(n, v)| (n.as_str(), v.as_str()))
        .collect();
    build_property_set(&pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::description::{parse_device_description, parse_scpd};
    use crate::upnp::gena::{parse_last_change, parse_property_set};
    use crate::upnp::local::{binary_light, LocalDevice, ServiceDefinition};
    use crate::upnp::model::{Direction, StateVariableSpec};

    const LOCATION: &str = "http://10.0.0.5:49500/devices/light-1/description.xml";

    #[test]
    fn description_round_trips_through_the_parser() {
        let light = binary_light(Some("light-1"), "Desk Lamp");
        let xml = build_device_description(&light);

        let parsed = parse_device_description(&xml, LOCATION).unwrap();
        assert_eq!(parsed.info.udn, "uuid:light-1");
        assert_eq!(parsed.info.friendly_name, "Desk Lamp");
        assert_eq!(parsed.services.len(), 1);
        let service = &parsed.services[0];
        assert_eq!(service.service_id, "urn:upnp-org:serviceId:SwitchPower");
        assert_eq!(
            service.control_url,
            "http://10.0.0.5:49500/devices/light-1/SwitchPower/control"
        );
    }

    #[test]
    fn scpd_carries_directions_and_send_events() {
        let light = binary_light(Some("light-1"), "Desk Lamp");
        let xml = build_scpd(light.services()[0].service());

        let (actions, specs) = parse_scpd(&xml).unwrap();
        let names: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["SetTarget", "GetTarget", "GetStatus"]);
        assert_eq!(actions[0].arguments[0].direction, Direction::In);
        assert_eq!(actions[1].arguments[0].direction, Direction::Out);

        let target = specs.iter().find(|s| s.name == "Target").unwrap();
        assert!(!target.send_events);
        assert_eq!(target.default_value.as_deref(), Some("0"));
        assert!(specs.iter().find(|s| s.name == "Status").unwrap().send_events);
    }

    #[test]
    fn event_body_lists_evented_variables_only() {
        let light = binary_light(Some("light-1"), "Desk Lamp");
        let body = build_event_body(light.services()[0].service());
        assert_eq!(
            parse_property_set(&body).unwrap(),
            vec![("Status".to_string(), "0".to_string())]
        );
    }

    #[test]
    fn last_change_renders_instance_variables() {
        let device = LocalDevice::builder("urn:schemas-upnp-org:device:MediaRenderer:1", "TV")
            .service(
                ServiceDefinition::new(
                    "urn:schemas-upnp-org:service:RenderingControl:1",
                    "urn:upnp-org:serviceId:RenderingControl",
                )
                .variable(StateVariableSpec::new("LastChange", "string"))
                .variable(StateVariableSpec::new("Volume", "ui2").evented(false).with_default("30"))
                .variable(StateVariableSpec::new("Mute", "boolean").evented(false).with_default("0"))
                .variable(StateVariableSpec::new("A_ARG_TYPE_Channel", "string").evented(false).with_default("Master")),
            )
            .build();
        let service = device.services()[0].service();

        let body = build_event_body(service);
        let props = parse_property_set(&body).unwrap();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].0, "LastChange");

        let instances = parse_last_change(&props[0].1).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].instance, 0);
        assert_eq!(
            instances[0].changes,
            vec![
                ("Volume".to_string(), "30".to_string()),
                ("Mute".to_string(), "0".to_string())
            ]
        );
        assert!(props[0].1.contains("metadata-1-0/RCS/"));
    }
}
