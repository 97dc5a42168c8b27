//! GENA HTTP client for subscription operations.
//!
//! Handles the HTTP protocol aspects of client-role subscriptions; state is
//! kept on the [`Service`](crate::upnp::model::Service) and in the
//! [`GenaSubscriptionStore`](super::GenaSubscriptionStore).

use std::time::Duration;

use reqwest::{Client, Method};

use super::{GenaError, GenaResult};
use crate::protocol_constants::{GENA_NT_EVENT, SOAP_TIMEOUT_SECS};
use crate::utils::strip_prefix_ignore_ascii_case;

/// Response from a successful SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeResponse {
    /// The subscription ID returned by the device.
    pub sid: String,
    /// The timeout granted by the device, in seconds.
    pub timeout_secs: u64,
}

/// Parses a `TIMEOUT` header value (`Second-N` or `infinite`).
///
/// `infinite` maps to `u64::MAX`; anything else unparseable is `None`.
pub fn parse_timeout_header(value: &str) -> Option<u64> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("infinite") {
        return Some(u64::MAX);
    }
    let secs = strip_prefix_ignore_ascii_case(value, "Second-")?;
    if secs.eq_ignore_ascii_case("infinite") {
        return Some(u64::MAX);
    }
    secs.trim().parse().ok()
}

/// HTTP client for GENA (UPnP eventing) operations.
pub struct GenaClient {
    client: Client,
    requested_timeout_secs: u64,
}

impl GenaClient {
    pub fn new(client: Client, requested_timeout_secs: u64) -> Self {
        Self {
            client,
            requested_timeout_secs,
        }
    }

    fn method(name: &'static str) -> GenaResult<Method> {
        Method::from_bytes(name.as_bytes()).map_err(|_| GenaError::InvalidMethod(name))
    }

    /// Timeout from the response, falling back to what we asked for.
    fn extract_timeout_secs(&self, response: &reqwest::Response) -> u64 {
        response
            .headers()
            .get("TIMEOUT")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_timeout_header)
            .unwrap_or(self.requested_timeout_secs)
    }

    fn timeout_header(&self) -> String {
        format!("Second-{}", self.requested_timeout_secs)
    }

    /// Sends a SUBSCRIBE request to create a new subscription.
    ///
    /// # Arguments
    /// * `event_url` - The service's eventSubURL
    /// * `callback_url` - URL where NOTIFY events should be sent
    pub async fn subscribe(
        &self,
        event_url: &str,
        callback_url: &str,
    ) -> GenaResult<SubscribeResponse> {
        let response = self
            .client
            .request(Self::method("SUBSCRIBE")?, event_url)
            .header("CALLBACK", format!("<{}>", callback_url))
            .header("NT", GENA_NT_EVENT)
            .header("TIMEOUT", self.timeout_header())
            .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::SubscriptionFailed(response.status().as_u16()));
        }

        let sid = response
            .headers()
            .get("SID")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(GenaError::MissingSid)?;

        let timeout_secs = self.extract_timeout_secs(&response);

        Ok(SubscribeResponse { sid, timeout_secs })
    }

    /// Sends a SUBSCRIBE request renewing `sid`. Returns the new timeout.
    pub async fn renew(&self, event_url: &str, sid: &str) -> GenaResult<u64> {
        let response = self
            .client
            .request(Self::method("SUBSCRIBE")?, event_url)
            .header("SID", sid)
            .header("TIMEOUT", self.timeout_header())
            .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(GenaError::RenewalFailed(response.status().as_u16()));
        }

        Ok(self.extract_timeout_secs(&response))
    }

    /// Sends an UNSUBSCRIBE request.
    ///
    /// Returns `true` if the device acknowledged it. The subscription should be
    /// dropped locally either way.
    pub async fn unsubscribe(&self, event_url: &str, sid: &str) -> bool {
        let Ok(method) = Self::method("UNSUBSCRIBE") else {
            return false;
        };
        match self
            .client
            .request(method, event_url)
            .header("SID", sid)
            .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}
