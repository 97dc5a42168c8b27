//! SOAP 1.1 for UPnP control.
//!
//! Envelope building and parsing for both directions (control point calling
//! a remote action, hosted service answering one), the UPnP error table, and
//! the HTTP transport used by the action invoker.

use std::fmt;
use std::time::Duration;

use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use super::xml::{escape_xml, parse_document, XmlElement, XmlError};
use crate::protocol_constants::{
    SOAP_ENCODING_NS, SOAP_ENVELOPE_NS, SOAP_TIMEOUT_SECS, UPNP_CONTROL_NS, XML_CONTENT_TYPE,
};

// ─────────────────────────────────────────────────────────────────────────────
// UPnP Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Standard UPnP control error codes and their descriptions.
pub const UPNP_ERRORS: &[(u16, &str)] = &[
    (401, "Invalid Action"),
    (402, "Invalid Args"),
    (501, "Action Failed"),
    (600, "Argument Value Invalid"),
    (601, "Argument Value Out of Range"),
    (602, "Optional Action Not Implemented"),
    (603, "Out Of Memory"),
    (604, "Human Intervention Required"),
    (605, "String Argument Too Long"),
    (606, "Action Not Authorized"),
    (607, "Signature Failure"),
    (608, "Signature Missing"),
    (609, "Not Encrypted"),
    (610, "Invalid Sequence"),
    (611, "Invalid Control URL"),
    (612, "No Such Session"),
];

pub fn upnp_error_description(code: u16) -> Option<&'static str> {
    UPNP_ERRORS
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, d)| *d)
}

/// A UPnP error carried in a SOAP fault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpnpFault {
    pub code: u16,
    pub description: String,
}

impl UpnpFault {
    /// Fault with the standard description for `code`.
    pub fn new(code: u16) -> Self {
        Self {
            code,
            description: upnp_error_description(code)
                .unwrap_or("Unknown Error")
                .to_string(),
        }
    }

    pub fn with_description(code: u16, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn invalid_action() -> Self {
        Self::new(401)
    }

    pub fn invalid_args() -> Self {
        Self::new(402)
    }

    pub fn action_failed() -> Self {
        Self::new(501)
    }
}

impl fmt::Display for UpnpFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UPnP error {}: {}", self.code, self.description)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SoapError {
    /// HTTP request to the device failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Device returned a non-success HTTP status without a SOAP fault.
    #[error("HTTP error {0}: {1}")]
    HttpStatus(u16, String),

    /// Device returned a SOAP fault.
    #[error("SOAP fault: {0}")]
    Fault(UpnpFault),

    /// The envelope could not be parsed.
    #[error("failed to parse SOAP envelope: {0}")]
    Parse(String),
}

pub type SoapResult<T> = Result<T, SoapError>;

impl From<XmlError> for SoapError {
    fn from(e: XmlError) -> Self {
        SoapError::Parse(e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope Builders
// ─────────────────────────────────────────────────────────────────────────────

// Envelopes are built on a single line with no leading whitespace; some
// device SOAP parsers reject anything before the root element.

fn envelope(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="{}" s:encodingStyle="{}"><s:Body>{}</s:Body></s:Envelope>"#,
        SOAP_ENVELOPE_NS, SOAP_ENCODING_NS, body
    )
}

fn element_list(args: &[(&str, &str)]) -> String {
    let mut out = String::new();
    for (k, v) in args {
        out.push_str(&format!("<{k}>{}</{k}>", escape_xml(v)));
    }
    out
}

/// Builds a request envelope. Arguments keep the given order.
pub fn build_soap_envelope(action: &str, service_type: &str, args: &[(&str, &str)]) -> String {
    envelope(&format!(
        r#"<u:{action} xmlns:u="{service_type}">{}</u:{action}>"#,
        element_list(args)
    ))
}

/// Builds the `<u:ActionResponse>` envelope a hosted service answers with.
pub fn build_soap_action_response(
    action: &str,
    service_type: &str,
    out_args: &[(&str, &str)],
) -> String {
    envelope(&format!(
        r#"<u:{action}Response xmlns:u="{service_type}">{}</u:{action}Response>"#,
        element_list(out_args)
    ))
}

/// Builds a SOAP fault carrying a `UPnPError` detail.
pub fn build_soap_fault(fault: &UpnpFault) -> String {
    envelope(&format!(
        r#"<s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail><UPnPError xmlns="{}"><errorCode>{}</errorCode><errorDescription>{}</errorDescription></UPnPError></detail></s:Fault>"#,
        UPNP_CONTROL_NS,
        fault.code,
        escape_xml(&fault.description)
    ))
}

// ─────────────────────────────────────────────────────────────────────────────
// Envelope Parsers
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded incoming action request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    pub action: String,
    /// Arguments in document order.
    pub args: Vec<(String, String)>,
}

fn body_payload(doc: &XmlElement) -> SoapResult<&XmlElement> {
    if doc.name != "Envelope" {
        return Err(SoapError::Parse(format!("root element is <{}>", doc.name)));
    }
    doc.child("Body")
        .ok_or_else(|| SoapError::Parse("missing Body".to_string()))?
        .children
        .first()
        .ok_or_else(|| SoapError::Parse("empty Body".to_string()))
}

fn parse_fault(fault: &XmlElement) -> UpnpFault {
    if let Some(err) = fault.descendant("UPnPError") {
        if let Some(code) = err
            .child_text("errorCode")
            .and_then(|c| c.parse::<u16>().ok())
        {
            return match err.child_text_non_empty("errorDescription") {
                Some(desc) => UpnpFault::with_description(code, desc),
                None => UpnpFault::new(code),
            };
        }
    }
    match fault.child_text_non_empty("faultstring") {
        Some(s) => UpnpFault::with_description(501, s),
        None => UpnpFault::action_failed(),
    }
}

/// Extracts the fault of a response body, if it is one.
pub fn extract_fault(xml: &str) -> Option<UpnpFault> {
    let doc = parse_document(xml).ok()?;
    let payload = body_payload(&doc).ok()?;
    (payload.name == "Fault").then(|| parse_fault(payload))
}

/// Parses the response to `action`.
///
/// Returns the out-arguments in document order, or the UPnP fault.
pub fn parse_soap_response(xml: &str, action: &str) -> SoapResult<Vec<(String, String)>> {
    let doc = parse_document(xml)?;
    let payload = body_payload(&doc)?;
    if payload.name == "Fault" {
        return Err(SoapError::Fault(parse_fault(payload)));
    }
    if payload.name != format!("{action}Response") {
        return Err(SoapError::Parse(format!(
            "expected <{action}Response>, got <{}>",
            payload.name
        )));
    }
    Ok(payload
        .children
        .iter()
        .map(|c| (c.name.clone(), c.text.clone()))
        .collect())
}

/// Parses an incoming action request envelope.
pub fn parse_soap_request(xml: &str) -> SoapResult<SoapRequest> {
    let doc = parse_document(xml)?;
    let payload = body_payload(&doc)?;
    Ok(SoapRequest {
        action: payload.name.clone(),
        args: payload
            .children
            .iter()
            .map(|c| (c.name.clone(), c.text.clone()))
            .collect(),
    })
}

/// Splits a `SOAPACTION` header (`"<serviceType>#<action>"`) into its parts.
pub fn parse_soap_action_header(value: &str) -> Option<(String, String)> {
    let trimmed = value.trim().trim_matches('"');
    let (service_type, action) = trimmed.rsplit_once('#')?;
    if service_type.is_empty() || action.is_empty() {
        return None;
    }
    Some((service_type.to_string(), action.to_string()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────────────────────────

/// POSTs an action request to `control_url` and returns the response body.
///
/// A SOAP fault in the body wins over the HTTP status (faults normally come
/// with 500).
pub async fn send_soap_request(
    client: &Client,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[(&str, &str)],
) -> SoapResult<String> {
    let body = build_soap_envelope(action, service_type, args);

    log::debug!("[SOAP] {} -> {} (body: {} bytes)", action, control_url, body.len());
    log::trace!("[SOAP] Request body: {}", body);

    let start = std::time::Instant::now();
    let res = client
        .post(control_url)
        .header("Content-Type", XML_CONTENT_TYPE)
        .header("SOAPAction", format!("\"{}#{}\"", service_type, action))
        .body(body)
        .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
        .send()
        .await;

    log::debug!(
        "[SOAP] {} completed in {:?}: {:?}",
        action,
        start.elapsed(),
        res.as_ref().map(|r| r.status())
    );

    let res = res?;
    let status = res.status();
    let response_text = res.text().await?;

    if let Some(fault) = extract_fault(&response_text) {
        return Err(SoapError::Fault(fault));
    }

    if !status.is_success() {
        return Err(SoapError::HttpStatus(status.as_u16(), response_text));
    }

    Ok(response_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SWITCH_POWER: &str = "urn:schemas-upnp-org:service:SwitchPower:1";

    #[test]
    fn envelope_keeps_argument_order_and_escapes_values() {
        let xml = build_soap_envelope(
            "SetVolume",
            "urn:schemas-upnp-org:service:RenderingControl:1",
            &[("InstanceID", "0"), ("Channel", "Master"), ("Note", "a<b & c")],
        );
        assert!(xml.starts_with("<?xml"));
        let instance = xml.find("<InstanceID>").unwrap();
        let channel = xml.find("<Channel>").unwrap();
        assert!(instance < channel);
        assert!(xml.contains("<Note>a&lt;b &amp; c</Note>"));

        let request = parse_soap_request(&xml).unwrap();
        assert_eq!(request.action, "SetVolume");
        assert_eq!(request.args[2], ("Note".to_string(), "a<b & c".to_string()));
    }

    #[test]
    fn empty_success_response_yields_no_out_arguments() {
        let request = build_soap_envelope("SetTarget", SWITCH_POWER, &[("NewTargetValue", "1")]);
        assert!(request.contains("<NewTargetValue>1</NewTargetValue>"));

        let response = build_soap_action_response("SetTarget", SWITCH_POWER, &[]);
        assert_eq!(parse_soap_response(&response, "SetTarget").unwrap(), vec![]);
    }

    #[test]
    fn fault_402_round_trips() {
        let xml = build_soap_fault(&UpnpFault::invalid_args());
        match parse_soap_response(&xml, "SetTarget") {
            Err(SoapError::Fault(fault)) => {
                assert_eq!(fault, UpnpFault::with_description(402, "Invalid Args"));
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(extract_fault(&xml).map(|f| f.code), Some(402));
    }

    #[test]
    fn out_arguments_come_back_in_order() {
        let xml = r#"<?xml version="1.0"?>
<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/">
  <s:Body>
    <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
      <CurrentVolume>42</CurrentVolume>
      <Extra></Extra>
    </u:GetVolumeResponse>
  </s:Body>
</s:Envelope>"#;
        let out = parse_soap_response(xml, "GetVolume").unwrap();
        assert_eq!(
            out,
            vec![
                ("CurrentVolume".to_string(), "42".to_string()),
                ("Extra".to_string(), String::new())
            ]
        );
    }

    #[test]
    fn mismatched_response_element_is_a_parse_error() {
        let xml = build_soap_action_response("GetStatus", SWITCH_POWER, &[("ResultStatus", "1")]);
        assert!(matches!(
            parse_soap_response(&xml, "GetTarget"),
            Err(SoapError::Parse(_))
        ));
        assert!(matches!(
            parse_soap_response("not xml <", "GetTarget"),
            Err(SoapError::Parse(_))
        ));
    }

    #[test]
    fn fault_without_upnp_detail_uses_faultstring() {
        let xml = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body><s:Fault><faultcode>s:Server</faultcode><faultstring>boom</faultstring></s:Fault></s:Body></s:Envelope>"#;
        assert_eq!(extract_fault(xml), Some(UpnpFault::with_description(501, "boom")));
    }

    #[test]
    fn unknown_codes_get_a_generic_description() {
        assert_eq!(UpnpFault::new(718).description, "Unknown Error");
        assert_eq!(upnp_error_description(612), Some("No Such Session"));
    }

    #[test]
    fn soap_action_header_parsing() {
        assert_eq!(
            parse_soap_action_header(r#""urn:schemas-upnp-org:service:SwitchPower:1#SetTarget""#),
            Some((SWITCH_POWER.to_string(), "SetTarget".to_string()))
        );
        assert_eq!(parse_soap_action_header("no-hash"), None);
        assert_eq!(parse_soap_action_header("\"urn:x#\""), None);
    }
}
