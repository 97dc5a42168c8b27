//! Centralized error types for the Tessera core library.
//!
//! This module provides a unified error handling system that:
//! - Gives every module error a machine-readable code through [`ErrorCode`]
//! - Maps errors to appropriate HTTP status codes
//! - Implements `IntoResponse` for automatic JSON error responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::api::ServerError;
use crate::context::NetworkError;
use crate::services::{ControlPointError, HostError};
use crate::upnp::codec::CodecError;
use crate::upnp::ssdp::SsdpError;
use crate::upnp::{DescriptionError, GenaError, InvokeError, SoapError};

/// Trait for error types that provide machine-readable error codes.
///
/// Implement this trait to provide consistent error codes across different
/// error conversion paths.
pub trait ErrorCode {
    /// Returns a machine-readable error code for API responses.
    fn code(&self) -> &'static str;
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Empty => "codec_empty_message",
            Self::StartLine(_) => "codec_bad_start_line",
            Self::HeaderLine(_) => "codec_bad_header_line",
            Self::Utf8 => "codec_not_utf8",
        }
    }
}

impl ErrorCode for SsdpError {
    fn code(&self) -> &'static str {
        match self {
            Self::SocketBind(_) => "socket_bind_failed",
            Self::MulticastJoin(_) => "multicast_join_failed",
            Self::Send(_) => "ssdp_send_failed",
        }
    }
}

impl ErrorCode for SoapError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus(_, _) => "http_error_status",
            Self::Fault(_) => "soap_fault",
            Self::Parse(_) => "soap_parse_error",
        }
    }
}

impl ErrorCode for DescriptionError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::HttpStatus { .. } => "http_error_status",
            Self::Xml(_) => "xml_parse_error",
            Self::MissingElement(_) => "description_incomplete",
            Self::InvalidUrl { .. } => "invalid_url",
        }
    }
}

impl ErrorCode for GenaError {
    fn code(&self) -> &'static str {
        match self {
            Self::Http(_) => "http_request_failed",
            Self::SubscriptionFailed(_) => "gena_subscription_failed",
            Self::RenewalFailed(_) => "gena_renewal_failed",
            Self::MissingSid => "gena_missing_sid",
            Self::InvalidMethod(_) => "gena_invalid_method",
            Self::NotEvented(_) => "gena_not_evented",
            Self::AlreadyPending(_) => "gena_subscription_pending",
            Self::UnknownSid(_) => "gena_unknown_sid",
            Self::Parse(_) => "gena_parse_error",
        }
    }
}

impl ErrorCode for InvokeError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownAction { .. } => "action_not_found",
            Self::InvalidArguments { .. } => "invalid_arguments",
            Self::Soap(e) => e.code(),
        }
    }
}

impl ErrorCode for NetworkError {
    fn code(&self) -> &'static str {
        match self {
            Self::Detection(_) => "ip_detection_failed",
            Self::NoDetector => "no_ip_detector",
            Self::NoFreePort(_) => "no_free_port",
        }
    }
}

impl ErrorCode for ControlPointError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) => "device_not_found",
            Self::UnknownService { .. } => "service_not_found",
            Self::Invoke(e) => e.code(),
        }
    }
}

impl ErrorCode for HostError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnknownDevice(_) => "device_not_found",
            Self::UnknownService { .. } => "service_not_found",
            Self::BadRequest(_) => "invalid_request",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Fault(_) => "upnp_fault",
        }
    }
}

impl ErrorCode for ServerError {
    fn code(&self) -> &'static str {
        match self {
            Self::Bind(_) => "bind_failed",
            Self::NoAvailablePort { .. } => "no_available_port",
        }
    }
}

/// Application-wide error type for the Tessera server.
#[derive(Debug, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum TesseraError {
    /// SSDP sockets could not be set up.
    #[error("Discovery failed: {0}")]
    Discovery(String),

    /// Fetching or parsing a description failed.
    #[error("Description failed: {0}")]
    Description(String),

    /// A GENA operation failed.
    #[error("Eventing failed: {0}")]
    Gena(String),

    /// A SOAP exchange with a remote device failed.
    #[error("SOAP request failed: {0}")]
    Soap(String),

    /// A remote device answered with a UPnP fault.
    #[error("Device fault: {0}")]
    Fault(String),

    /// No detected or hosted device with this UDN.
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The device has no such service.
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// The service has no such action.
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// Client sent an invalid or malformed request.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A GENA precondition (NT, CALLBACK, SID) did not hold.
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Network-related error (IP detection, port selection).
    #[error("Network error: {0}")]
    Network(String),

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TesseraError {
    /// Returns a machine-readable error code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Discovery(_) => "discovery_failed",
            Self::Description(_) => "description_failed",
            Self::Gena(_) => "gena_error",
            Self::Soap(_) => "soap_error",
            Self::Fault(_) => "upnp_fault",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::ServiceNotFound(_) => "service_not_found",
            Self::ActionNotFound(_) => "action_not_found",
            Self::InvalidRequest(_) => "invalid_request",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::Network(_) => "network_error",
            Self::Internal(_) => "internal_error",
            Self::Configuration(_) => "configuration_error",
        }
    }

    /// Maps the error to an appropriate HTTP status code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::DeviceNotFound(_) | Self::ServiceNotFound(_) | Self::ActionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::PreconditionFailed(_) => StatusCode::PRECONDITION_FAILED,
            Self::Soap(_) | Self::Fault(_) | Self::Description(_) => StatusCode::BAD_GATEWAY,
            Self::Configuration(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convenient Result alias for application-wide operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

/// JSON response body for error responses.
#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
    message: String,
    status: u16,
}

impl IntoResponse for TesseraError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SsdpError> for TesseraError {
    fn from(err: SsdpError) -> Self {
        Self::Discovery(err.to_string())
    }
}

impl From<CodecError> for TesseraError {
    fn from(err: CodecError) -> Self {
        Self::InvalidRequest(err.to_string())
    }
}

impl From<DescriptionError> for TesseraError {
    fn from(err: DescriptionError) -> Self {
        Self::Description(err.to_string())
    }
}

impl From<GenaError> for TesseraError {
    fn from(err: GenaError) -> Self {
        match err {
            GenaError::UnknownSid(sid) => Self::PreconditionFailed(format!("unknown SID {}", sid)),
            GenaError::Parse(e) => Self::InvalidRequest(e.to_string()),
            other => Self::Gena(other.to_string()),
        }
    }
}

impl From<SoapError> for TesseraError {
    fn from(err: SoapError) -> Self {
        match err {
            SoapError::Fault(fault) => Self::Fault(fault.to_string()),
            other => Self::Soap(other.to_string()),
        }
    }
}

impl From<InvokeError> for TesseraError {
    fn from(err: InvokeError) -> Self {
        match err {
            InvokeError::UnknownAction { .. } => Self::ActionNotFound(err.to_string()),
            InvokeError::InvalidArguments { .. } => Self::InvalidRequest(err.to_string()),
            InvokeError::Soap(e) => e.into(),
        }
    }
}

impl From<ControlPointError> for TesseraError {
    fn from(err: ControlPointError) -> Self {
        match err {
            ControlPointError::UnknownDevice(udn) => Self::DeviceNotFound(udn),
            ControlPointError::UnknownService { .. } => Self::ServiceNotFound(err.to_string()),
            ControlPointError::Invoke(e) => e.into(),
        }
    }
}

impl From<HostError> for TesseraError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::UnknownDevice(uuid) => Self::DeviceNotFound(uuid),
            HostError::UnknownService { .. } => Self::ServiceNotFound(err.to_string()),
            HostError::BadRequest(msg) => Self::InvalidRequest(msg),
            HostError::PreconditionFailed(msg) => Self::PreconditionFailed(msg),
            HostError::Fault(fault) => Self::Fault(fault.to_string()),
        }
    }
}

impl From<NetworkError> for TesseraError {
    fn from(err: NetworkError) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<ServerError> for TesseraError {
    fn from(err: ServerError) -> Self {
        Self::Network(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::UpnpFault;

    #[test]
    fn unknown_device_maps_to_not_found() {
        let err: TesseraError = ControlPointError::UnknownDevice("uuid:x".into()).into();
        assert_eq!(err.code(), "device_not_found");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn device_fault_maps_to_bad_gateway() {
        let err: TesseraError =
            InvokeError::Soap(SoapError::Fault(UpnpFault::new(501))).into();
        assert_eq!(err.code(), "upnp_fault");
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn unknown_sid_maps_to_precondition_failed() {
        let err: TesseraError = GenaError::UnknownSid("uuid:s".into()).into();
        assert_eq!(err.status_code(), StatusCode::PRECONDITION_FAILED);
    }

    #[test]
    fn module_codes_are_stable() {
        assert_eq!(
            HostError::PreconditionFailed("x".into()).code(),
            "precondition_failed"
        );
        assert_eq!(
            InvokeError::Soap(SoapError::Parse("x".into())).code(),
            "soap_parse_error"
        );
    }
}
