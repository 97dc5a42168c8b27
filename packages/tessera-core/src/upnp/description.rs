//! Device and service description retrieval.
//!
//! [`DescriptionFetcher`] GETs a root device's description document, builds
//! the [`Device`] tree with one [`DetectionGate`] per device, and separately
//! fetches each service's SCPD. The XML parsers are pure functions so they
//! can be tested without a network.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use url::Url;

use super::detection::{DetectionGate, GateTransition};
use super::model::{
    Action, AllowedValueRange, Argument, Device, DeviceInfo, Direction, Service,
    StateVariableSpec,
};
use super::ssdp::RegistrationEntry;
use super::xml::{parse_document, XmlElement, XmlError};
use crate::protocol_constants::SOAP_TIMEOUT_SECS;

#[derive(Debug, Error)]
pub enum DescriptionError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("GET {url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("description is missing <{0}>")]
    MissingElement(&'static str),

    #[error("invalid URL {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

pub type DescriptionResult<T> = Result<T, DescriptionError>;

// ─────────────────────────────────────────────────────────────────────────────
// Parsed documents
// ─────────────────────────────────────────────────────────────────────────────

/// A `<service>` entry with URLs already resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedService {
    pub service_type: String,
    pub service_id: String,
    pub scpd_url: String,
    pub control_url: String,
    pub event_sub_url: String,
}

/// A `<device>` element and everything below it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDevice {
    pub info: DeviceInfo,
    pub services: Vec<ParsedService>,
    pub embedded: Vec<ParsedDevice>,
}

/// Resolves a URL from a description document.
///
/// Absolute URLs are kept. Anything else is treated as a path from the host
/// root of `base`: a leading `/` is added when missing.
pub fn resolve_url(base: &str, url: &str) -> DescriptionResult<String> {
    let url = url.trim();
    if let Ok(absolute) = Url::parse(url) {
        if absolute.has_host() {
            return Ok(absolute.to_string());
        }
    }
    let path = if url.starts_with('/') {
        url.to_string()
    } else {
        format!("/{}", url)
    };
    let base = Url::parse(base).map_err(|e| DescriptionError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    base.join(&path)
        .map(|u| u.to_string())
        .map_err(|e| DescriptionError::InvalidUrl {
            url: url.to_string(),
            reason: e.to_string(),
        })
}

/// Parses a device description fetched from `location`.
pub fn parse_device_description(xml: &str, location: &str) -> DescriptionResult<ParsedDevice> {
    let root = parse_document(xml)?;
    if root.name != "root" {
        return Err(DescriptionError::MissingElement("root"));
    }
    let base = root
        .child_text_non_empty("URLBase")
        .unwrap_or(location)
        .to_string();
    let device = root
        .child("device")
        .ok_or(DescriptionError::MissingElement("device"))?;
    parse_device_element(device, &base)
}

fn parse_device_element(device: &XmlElement, base: &str) -> DescriptionResult<ParsedDevice> {
    let udn = device
        .child_text_non_empty("UDN")
        .ok_or(DescriptionError::MissingElement("UDN"))?
        .to_string();
    let text = |name: &str| device.child_text(name).unwrap_or_default().to_string();

    let presentation_url = match device.child_text_non_empty("presentationURL") {
        Some(url) => Some(resolve_url(base, url)?),
        None => None,
    };

    let info = DeviceInfo {
        udn,
        device_type: text("deviceType"),
        friendly_name: text("friendlyName"),
        manufacturer: text("manufacturer"),
        model_name: text("modelName"),
        presentation_url,
    };

    let mut services = Vec::new();
    if let Some(list) = device.child("serviceList") {
        for service in list.children_named("service") {
            if let Some(parsed) = parse_service_element(service, base, &info.udn)? {
                services.push(parsed);
            }
        }
    }

    let mut embedded = Vec::new();
    if let Some(list) = device.child("deviceList") {
        for child in list.children_named("device") {
            embedded.push(parse_device_element(child, base)?);
        }
    }

    Ok(ParsedDevice {
        info,
        services,
        embedded,
    })
}

fn parse_service_element(
    service: &XmlElement,
    base: &str,
    udn: &str,
) -> DescriptionResult<Option<ParsedService>> {
    let service_type = service.child_text("serviceType").unwrap_or_default();
    let urls = (
        service.child_text_non_empty("SCPDURL"),
        service.child_text_non_empty("controlURL"),
        service.child_text_non_empty("eventSubURL"),
    );
    let (Some(scpd), Some(control), Some(event)) = urls else {
        log::warn!(
            "[Description] Skipping service {} of {}: SCPDURL, controlURL and eventSubURL are all required",
            service_type,
            udn
        );
        return Ok(None);
    };

    Ok(Some(ParsedService {
        service_type: service_type.to_string(),
        service_id: service
            .child_text("serviceId")
            .unwrap_or_default()
            .to_string(),
        scpd_url: resolve_url(base, scpd)?,
        control_url: resolve_url(base, control)?,
        event_sub_url: resolve_url(base, event)?,
    }))
}

/// Parses an SCPD into actions and state variable specs, both in
/// declaration order.
pub fn parse_scpd(xml: &str) -> DescriptionResult<(Vec<Action>, Vec<StateVariableSpec>)> {
    let root = parse_document(xml)?;
    if root.name != "scpd" {
        return Err(DescriptionError::MissingElement("scpd"));
    }

    let mut actions = Vec::new();
    if let Some(list) = root.child("actionList") {
        for action in list.children_named("action") {
            let Some(name) = action.child_text_non_empty("name") else {
                continue;
            };
            let mut arguments = Vec::new();
            if let Some(args) = action.child("argumentList") {
                for arg in args.children_named("argument") {
                    let arg_name = arg.child_text("name").unwrap_or_default();
                    let Some(direction) = arg.child_text("direction").and_then(Direction::parse)
                    else {
                        log::debug!(
                            "[Description] Argument {} of {} has no valid direction",
                            arg_name,
                            name
                        );
                        continue;
                    };
                    arguments.push(Argument::new(
                        arg_name,
                        direction,
                        arg.child_text("relatedStateVariable").unwrap_or_default(),
                    ));
                }
            }
            actions.push(Action::new(name, arguments));
        }
    }

    let mut specs = Vec::new();
    if let Some(table) = root.child("serviceStateTable") {
        for var in table.children_named("stateVariable") {
            let Some(name) = var.child_text_non_empty("name") else {
                continue;
            };
            let send_events = var
                .attr("sendEvents")
                .map(|v| !v.trim().eq_ignore_ascii_case("no"))
                .unwrap_or(true);
            let mut spec =
                StateVariableSpec::new(name, var.child_text("dataType").unwrap_or("string"))
                    .evented(send_events);
            if let Some(default) = var.child("defaultValue") {
                spec = spec.with_default(default.trimmed_text());
            }
            if let Some(list) = var.child("allowedValueList") {
                spec = spec.with_allowed_values(
                    list.children_named("allowedValue")
                        .map(|v| v.trimmed_text().to_string()),
                );
            }
            if let Some(range) = var.child("allowedValueRange") {
                let field = |n: &str| range.child_text_non_empty(n).map(str::to_string);
                spec.allowed_range = Some(AllowedValueRange {
                    minimum: field("minimum"),
                    maximum: field("maximum"),
                    step: field("step"),
                });
            }
            specs.push(spec);
        }
    }

    Ok((actions, specs))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tree construction
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the device tree for a parsed description.
///
/// Every device gets a gate waiting for its services plus its embedded
/// devices. Gates are not armed; see [`arm_detection`].
pub fn build_device(
    parsed: ParsedDevice,
    usn: &str,
    location: &str,
    parent: Option<Arc<DetectionGate>>,
) -> Arc<Device> {
    let ParsedDevice {
        info,
        services,
        embedded,
    } = parsed;
    let gate = Arc::new(DetectionGate::new(
        info.udn.clone(),
        services.len() + embedded.len(),
        parent,
    ));

    let services = services
        .into_iter()
        .map(|s| {
            Arc::new(Service::new(
                info.udn.clone(),
                s.service_type,
                s.service_id,
                s.scpd_url,
                s.control_url,
                s.event_sub_url,
            ))
        })
        .collect();

    let embedded = embedded
        .into_iter()
        .map(|child| {
            let udn = child.info.udn.clone();
            build_device(child, &udn, location, Some(Arc::clone(&gate)))
        })
        .collect();

    Arc::new(Device::new(usn, location, info, services, embedded, gate))
}

/// Arms every gate of the tree, embedded devices first.
///
/// Devices with nothing to wait for complete here.
pub fn arm_detection(device: &Arc<Device>) -> Vec<GateTransition> {
    let mut transitions = Vec::new();
    for child in device.embedded_devices() {
        transitions.extend(arm_detection(child));
    }
    transitions.extend(device.detection().arm());
    transitions
}

// ─────────────────────────────────────────────────────────────────────────────
// Fetcher
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP side of description retrieval.
#[derive(Clone)]
pub struct DescriptionFetcher {
    client: Client,
}

impl DescriptionFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn get_text(&self, url: &str) -> DescriptionResult<String> {
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(DescriptionError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.text().await?)
    }

    /// Fetches and parses the description at `entry.location`.
    ///
    /// Nothing is built when the fetch or the parse fails.
    pub async fn fetch_device(&self, entry: &RegistrationEntry) -> DescriptionResult<Arc<Device>> {
        log::debug!("[Description] GET {}", entry.location);
        let xml = self.get_text(&entry.location).await?;
        let parsed = parse_device_description(&xml, &entry.location)?;
        Ok(build_device(parsed, &entry.usn, &entry.location, None))
    }

    /// Fetches a service's SCPD and installs it on the service.
    pub async fn fetch_service_schema(&self, service: &Service) -> DescriptionResult<()> {
        log::debug!("[Description] GET {}", service.scpd_url());
        let xml = self.get_text(service.scpd_url()).await?;
        let (actions, specs) = parse_scpd(&xml)?;
        log::debug!(
            "[Description] {}: {} actions, {} state variables",
            service.service_id(),
            actions.len(),
            specs.len()
        );
        service.install_schema(actions, specs);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::detection::DetectionStatus;
    use crate::upnp::test_fixtures::{
        serve, MEDIA_RENDERER_DESCRIPTION, RENDERING_CONTROL_SCPD, SWITCH_POWER_SCPD,
    };
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    const LOCATION: &str = "http://192.168.1.20:1400/xml/device_description.xml";

    #[test]
    fn resolves_relative_urls_against_host_root() {
        assert_eq!(
            resolve_url(LOCATION, "cm/scpd.xml").unwrap(),
            "http://192.168.1.20:1400/cm/scpd.xml"
        );
        assert_eq!(
            resolve_url(LOCATION, "/cm/control").unwrap(),
            "http://192.168.1.20:1400/cm/control"
        );
        assert_eq!(
            resolve_url(LOCATION, "http://10.0.0.9:1400/x").unwrap(),
            "http://10.0.0.9:1400/x"
        );
        assert!(resolve_url("not a url", "/x").is_err());
    }

    #[test]
    fn parses_tree_and_skips_incomplete_services() {
        let parsed = parse_device_description(MEDIA_RENDERER_DESCRIPTION, LOCATION).unwrap();
        assert_eq!(parsed.info.udn, "uuid:root-1234");
        assert_eq!(parsed.info.friendly_name, "Living Room");
        assert_eq!(parsed.info.manufacturer, "Acme");
        assert_eq!(
            parsed.info.presentation_url.as_deref(),
            Some("http://192.168.1.20:1400/index.html")
        );

        // The service without an eventSubURL is dropped.
        assert_eq!(parsed.services.len(), 1);
        assert_eq!(
            parsed.services[0].scpd_url,
            "http://192.168.1.20:1400/cm/scpd.xml"
        );

        assert_eq!(parsed.embedded.len(), 1);
        let child = &parsed.embedded[0];
        assert_eq!(child.info.udn, "uuid:child-5678");
        assert_eq!(child.services.len(), 2);
        assert_eq!(child.services[1].control_url, "http://10.0.0.9:1400/avt/control");
    }

    #[test]
    fn url_base_overrides_location() {
        let xml = r#"<root><URLBase>http://10.1.1.1:8080/base/</URLBase><device>
            <UDN>uuid:x</UDN><serviceList><service>
              <serviceType>t</serviceType><serviceId>i</serviceId>
              <SCPDURL>s.xml</SCPDURL><controlURL>c</controlURL><eventSubURL>e</eventSubURL>
            </service></serviceList></device></root>"#;
        let parsed = parse_device_description(xml, LOCATION).unwrap();
        assert_eq!(parsed.services[0].scpd_url, "http://10.1.1.1:8080/s.xml");
    }

    #[test]
    fn description_without_udn_is_rejected() {
        let xml = "<root><device><friendlyName>x</friendlyName></device></root>";
        assert!(matches!(
            parse_device_description(xml, LOCATION),
            Err(DescriptionError::MissingElement("UDN"))
        ));
        assert!(parse_device_description("<html/>", LOCATION).is_err());
    }

    #[test]
    fn parses_scpd_actions_and_variables() {
        let (actions, specs) = parse_scpd(SWITCH_POWER_SCPD).unwrap();
        assert_eq!(
            actions.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
            vec!["SetTarget", "GetTarget", "GetStatus"]
        );
        assert_eq!(actions[0].arguments[0].direction, Direction::In);
        assert_eq!(actions[1].arguments[0].related_state_variable, "Target");

        assert_eq!(specs.len(), 2);
        assert!(!specs[0].send_events);
        assert!(specs[1].send_events);
        assert_eq!(specs[1].default_value.as_deref(), Some("0"));
    }

    #[test]
    fn scpd_captures_ranges_and_allowed_values() {
        let (actions, specs) = parse_scpd(RENDERING_CONTROL_SCPD).unwrap();
        assert_eq!(actions[0].arguments.len(), 3);
        let volume = &specs[0];
        assert!(volume.send_events, "sendEvents defaults to yes");
        assert_eq!(
            volume.allowed_range,
            Some(AllowedValueRange {
                minimum: Some("0".into()),
                maximum: Some("100".into()),
                step: Some("1".into()),
            })
        );
        assert_eq!(specs[1].allowed_values, vec!["Master", "LF"]);
    }

    #[test]
    fn built_tree_gates_count_services_and_children() {
        let parsed = parse_device_description(MEDIA_RENDERER_DESCRIPTION, LOCATION).unwrap();
        let root = build_device(parsed, "uuid:root-1234::upnp:rootdevice", LOCATION, None);

        assert_eq!(root.usn(), "uuid:root-1234::upnp:rootdevice");
        assert_eq!(root.detection().remaining(), 2);
        assert!(root.detection().is_root());

        let child = &root.embedded_devices()[0];
        assert_eq!(child.usn(), "uuid:child-5678");
        assert_eq!(child.detection().remaining(), 2);
        assert!(!child.detection().is_root());
        assert!(arm_detection(&root).is_empty());
    }

    #[test]
    fn arming_completes_service_less_trees() {
        let xml = r#"<root><device><UDN>uuid:a</UDN><deviceList>
            <device><UDN>uuid:b</UDN></device></deviceList></device></root>"#;
        let parsed = parse_device_description(xml, LOCATION).unwrap();
        let root = build_device(parsed, "uuid:a::upnp:rootdevice", LOCATION, None);

        let transitions = arm_detection(&root);
        assert_eq!(transitions.len(), 2);
        assert_eq!(root.detection_status(), DetectionStatus::Completed);
    }

    #[tokio::test]
    async fn fetches_description_and_schemas_over_http() {
        let router = Router::new()
            .route("/desc.xml", get(|| async { MEDIA_RENDERER_DESCRIPTION }))
            .route("/cm/scpd.xml", get(|| async { SWITCH_POWER_SCPD }))
            .route(
                "/rc/scpd.xml",
                get(|| async { (StatusCode::NOT_FOUND, "gone") }),
            );
        let addr = serve(router).await;
        let location = format!("http://{}/desc.xml", addr);
        let entry = RegistrationEntry::remote(
            "uuid:root-1234::upnp:rootdevice",
            "upnp:rootdevice",
            location,
            "test",
            1800,
        );

        let fetcher = DescriptionFetcher::new(Client::new());
        let device = fetcher.fetch_device(&entry).await.unwrap();
        assert_eq!(device.friendly_name(), "Living Room");

        let cm = device.find_service("ConnectionManager").unwrap();
        fetcher.fetch_service_schema(&cm).await.unwrap();
        assert!(cm.has_schema());
        assert!(cm.action("SetTarget").is_some());

        let rc = device.find_service("RenderingControl").unwrap();
        assert!(matches!(
            fetcher.fetch_service_schema(&rc).await,
            Err(DescriptionError::HttpStatus { status: 404, .. })
        ));
        assert!(!rc.has_schema());
    }

    #[tokio::test]
    async fn unreachable_description_builds_nothing() {
        let router = Router::new().route(
            "/desc.xml",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "") }),
        );
        let addr = serve(router).await;
        let entry = RegistrationEntry::remote(
            "uuid:x::upnp:rootdevice",
            "upnp:rootdevice",
            format!("http://{}/desc.xml", addr),
            "test",
            1800,
        );
        let fetcher = DescriptionFetcher::new(Client::new());
        assert!(fetcher.fetch_device(&entry).await.is_err());
    }
}
