//! HTTP route handlers.
//!
//! All handlers are thin - they delegate to services for business logic.

use std::collections::HashMap;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Router,
};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::api::response::{api_success, with_headers, xml};
use crate::api::ws::ws_handler;
use crate::api::AppState;
use crate::error::{TesseraError, TesseraResult};
use crate::protocol_constants::{
    GENA_NTS_PROPCHANGE, GENA_NT_EVENT, MAX_GENA_BODY_SIZE, MAX_SOAP_BODY_SIZE, SERVICE_ID,
};
use crate::services::{HostError, SubscribeRequest};
use crate::upnp::soap::build_soap_fault;

// ─────────────────────────────────────────────────────────────────────────────
// Header Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Validates required GENA headers of an incoming NOTIFY and extracts the
/// SID and SEQ values.
fn validate_gena_headers(headers: &HeaderMap) -> TesseraResult<(String, String)> {
    let nt = header_str(headers, "NT");
    if nt != Some(GENA_NT_EVENT) {
        log::warn!("[GENA] NOTIFY missing or invalid NT header: {:?}", nt);
        return Err(TesseraError::InvalidRequest(
            "Missing or invalid NT header".into(),
        ));
    }

    let nts = header_str(headers, "NTS");
    if nts != Some(GENA_NTS_PROPCHANGE) {
        log::warn!("[GENA] NOTIFY missing or invalid NTS header: {:?}", nts);
        return Err(TesseraError::InvalidRequest(
            "Missing or invalid NTS header".into(),
        ));
    }

    let Some(sid) = header_str(headers, "SID") else {
        log::warn!("[GENA] NOTIFY missing SID header");
        return Err(TesseraError::InvalidRequest("Missing SID header".into()));
    };

    // SEQ is logged only; gaps are not treated as errors.
    let seq = header_str(headers, "SEQ").unwrap_or("?").to_string();

    Ok((sid.to_string(), seq))
}

/// Reads a request body up to `limit` bytes as (lossy) UTF-8.
async fn read_body(body: Body, limit: usize) -> Result<String, Response> {
    axum::body::to_bytes(body, limit)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .map_err(|e| {
            log::debug!("[Server] Rejected request body: {}", e);
            StatusCode::PAYLOAD_TOO_LARGE.into_response()
        })
}

/// Stringifies a JSON argument value: strings as-is, other scalars through
/// their JSON text.
fn argument_value(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Bool(b) => if b { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Router
// ─────────────────────────────────────────────────────────────────────────────

/// Creates the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/events", any(handle_event_notify))
        .route("/devices/{uuid}/description.xml", get(device_description))
        .route("/devices/{uuid}/{service}/scpd.xml", get(service_scpd))
        .route("/devices/{uuid}/{service}/control", post(service_control))
        .route("/devices/{uuid}/{service}/event", any(service_event))
        .route("/api/devices", get(list_devices))
        .route(
            "/api/devices/{udn}/services/{service}/actions/{action}",
            post(invoke_action),
        )
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

/// Liveness probe: "Is the process running?"
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    api_success(json!({
        "status": "ok",
        "service": SERVICE_ID,
        "devices": state.control_point.devices().len(),
        "hosted": state.device_host.devices().len(),
    }))
}

/// Client-role event callback: applies a NOTIFY from a device we subscribed to.
async fn handle_event_notify(
    State(state): State<AppState>,
    req: Request<Body>,
) -> Result<Response, Response> {
    let (parts, body) = req.into_parts();

    if parts.method.as_str() != "NOTIFY" {
        return Err(StatusCode::METHOD_NOT_ALLOWED.into_response());
    }

    let (sid, seq) = validate_gena_headers(&parts.headers).map_err(IntoResponse::into_response)?;
    let body = read_body(body, MAX_GENA_BODY_SIZE).await?;

    let changed = state
        .control_point
        .handle_notify(&sid, &body)
        .map_err(|e| {
            log::debug!("[GENA] NOTIFY {} (SEQ: {}) rejected: {}", sid, seq, e);
            TesseraError::from(e).into_response()
        })?;

    log::debug!(
        "[GENA] NOTIFY from {} (SEQ: {}) - {} changes",
        sid,
        seq,
        changed
    );
    Ok(StatusCode::OK.into_response())
}

async fn device_description(
    State(state): State<AppState>,
    Path(uuid): Path<String>,
) -> TesseraResult<Response> {
    let body = state.device_host.description(&uuid)?;
    Ok(xml(StatusCode::OK, body))
}

async fn service_scpd(
    State(state): State<AppState>,
    Path((uuid, service)): Path<(String, String)>,
) -> TesseraResult<Response> {
    let body = state.device_host.scpd(&uuid, &service)?;
    Ok(xml(StatusCode::OK, body))
}

/// SOAP control endpoint of a hosted service. Faults are answered with
/// HTTP 500 and a `UPnPError` envelope.
async fn service_control(
    State(state): State<AppState>,
    Path((uuid, service)): Path<(String, String)>,
    req: Request<Body>,
) -> Result<Response, Response> {
    let (parts, body) = req.into_parts();
    let soap_action = header_str(&parts.headers, "SOAPACTION").map(str::to_string);
    let body = read_body(body, MAX_SOAP_BODY_SIZE).await?;

    match state
        .device_host
        .control(&uuid, &service, soap_action.as_deref(), &body)
        .await
    {
        Ok(envelope) => Ok(xml(StatusCode::OK, envelope)),
        Err(HostError::Fault(fault)) => Ok(xml(
            StatusCode::INTERNAL_SERVER_ERROR,
            build_soap_fault(&fault),
        )),
        Err(e) => Err(TesseraError::from(e).into_response()),
    }
}

/// GENA server role of a hosted service: SUBSCRIBE (new or renewal) and
/// UNSUBSCRIBE.
async fn service_event(
    State(state): State<AppState>,
    Path((uuid, service)): Path<(String, String)>,
    req: Request<Body>,
) -> TesseraResult<Response> {
    let headers = req.headers();
    let host = &state.device_host;
    match req.method().as_str() {
        "SUBSCRIBE" => {
            let request = SubscribeRequest {
                sid: header_str(headers, "SID").map(str::to_string),
                callback: header_str(headers, "CALLBACK").map(str::to_string),
                nt: header_str(headers, "NT").map(str::to_string),
                timeout: header_str(headers, "TIMEOUT").map(str::to_string),
            };
            let grant = host.subscribe(&uuid, &service, &request)?;
            Ok(with_headers(
                StatusCode::OK,
                &[
                    ("sid", grant.sid.clone()),
                    ("timeout", grant.timeout_header()),
                    ("server", host.server_banner().to_string()),
                ],
            ))
        }
        "UNSUBSCRIBE" => {
            host.unsubscribe(&uuid, &service, header_str(headers, "SID"))?;
            Ok(StatusCode::OK.into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

/// Detected remote devices (detection completed).
async fn list_devices(State(state): State<AppState>) -> impl IntoResponse {
    let devices: Vec<_> = state
        .control_point
        .devices()
        .iter()
        .map(|d| d.summary())
        .collect();
    api_success(json!({ "devices": devices }))
}

/// Invokes an action on a detected device with a JSON object of in-arguments.
async fn invoke_action(
    State(state): State<AppState>,
    Path((udn, service, action)): Path<(String, String, String)>,
    body: String,
) -> TesseraResult<impl IntoResponse> {
    let raw: HashMap<String, Value> = if body.trim().is_empty() {
        HashMap::new()
    } else {
        serde_json::from_str(&body)
            .map_err(|e| TesseraError::InvalidRequest(format!("arguments: {}", e)))?
    };
    let args: HashMap<String, String> = raw
        .into_iter()
        .map(|(name, value)| (name, argument_value(value)))
        .collect();

    let out = state
        .control_point
        .call_action(&udn, &service, &action, &args)
        .await?;

    let out: serde_json::Map<String, Value> = out
        .into_iter()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();
    Ok(api_success(json!({ "action": action, "out": out })))
}
