//! GENA event XML.
//!
//! Pure functions for the NOTIFY property set (both directions) and for the
//! `LastChange` documents that AV services nest inside it.

use crate::protocol_constants::UPNP_EVENT_NS;
use crate::upnp::xml::{escape_xml, parse_document, XmlError, XmlResult};

/// Changes reported for one `<InstanceID>` of a LastChange document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceChanges {
    pub instance: u32,
    /// `(variable, value)` pairs in document order.
    pub changes: Vec<(String, String)>,
}

/// Extracts `(variable, value)` pairs from a `<e:propertyset>` body.
pub fn parse_property_set(body: &str) -> XmlResult<Vec<(String, String)>> {
    let root = parse_document(body)?;
    if root.name != "propertyset" {
        return Err(XmlError::Malformed(format!(
            "expected <propertyset>, got <{}>",
            root.name
        )));
    }
    Ok(root
        .children_named("property")
        .flat_map(|p| p.children.iter())
        .map(|var| (var.name.clone(), var.trimmed_text().to_string()))
        .collect())
}

/// Parses a LastChange `<Event>` document.
///
/// Instances with a non-numeric `val` and variables without a `val`
/// attribute are skipped.
pub fn parse_last_change(xml: &str) -> XmlResult<Vec<InstanceChanges>> {
    let root = parse_document(xml)?;
    if root.name != "Event" {
        return Err(XmlError::Malformed(format!(
            "expected <Event>, got <{}>",
            root.name
        )));
    }

    let mut out = Vec::new();
    for instance in root.children_named("InstanceID") {
        let Some(id) = instance.attr("val").and_then(|v| v.trim().parse::<u32>().ok()) else {
            log::debug!("[GENA] LastChange instance without numeric val skipped");
            continue;
        };
        let changes = instance
            .children
            .iter()
            .filter_map(|var| {
                var.attr("val")
                    .map(|val| (var.name.clone(), val.to_string()))
            })
            .collect();
        out.push(InstanceChanges {
            instance: id,
            changes,
        });
    }
    Ok(out)
}

/// Builds a NOTIFY property set. Values are escaped.
pub fn build_property_set(properties: &[(&str, &str)]) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="utf-8"?><e:propertyset xmlns:e="{}">"#,
        UPNP_EVENT_NS
    );
    for (name, value) in properties {
        xml.push_str(&format!(
            "<e:property><{name}>{}</{name}></e:property>",
            escape_xml(value)
        ));
    }
    xml.push_str("</e:propertyset>");
    xml
}

/// Metadata namespace of the LastChange document for a service type.
pub fn event_metadata_namespace(service_type: &str) -> &'static str {
    if service_type.contains(":service:AVTransport:") {
        "urn:schemas-upnp-org:metadata-1-0/AVT/"
    } else if service_type.contains(":service:RenderingControl:") {
        "urn:schemas-upnp-org:metadata-1-0/RCS/"
    } else if service_type.contains(":service:ScheduledRecording:") {
        "urn:schemas-upnp-org:av:srs-event"
    } else {
        ""
    }
}

/// Builds an (unescaped) LastChange document for one instance.
pub fn build_last_change(namespace: &str, instance: u32, variables: &[(&str, &str)]) -> String {
    let mut xml = if namespace.is_empty() {
        "<Event>".to_string()
    } else {
        format!(r#"<Event xmlns="{}">"#, namespace)
    };
    xml.push_str(&format!(r#"<InstanceID val="{}">"#, instance));
    for (name, value) in variables {
        xml.push_str(&format!(r#"<{name} val="{}"/>"#, escape_xml(value)));
    }
    xml.push_str("</InstanceID></Event>");
    xml
}
