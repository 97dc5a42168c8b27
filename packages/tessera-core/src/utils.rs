//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

use crate::protocol_constants::APP_NAME;

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the `SERVER` header value: `<os>/<arch> UPnP/1.0 Tessera/<version>`.
#[must_use]
pub fn server_banner() -> String {
    format!(
        "{}/{} UPnP/1.0 {}/{}",
        std::env::consts::OS,
        std::env::consts::ARCH,
        APP_NAME,
        env!("CARGO_PKG_VERSION")
    )
}

/// Returns the local hostname, or `"localhost"` if it cannot be read.
#[must_use]
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Case-insensitive ASCII helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Case-insensitive ASCII prefix strip.
#[inline]
#[must_use]
pub fn strip_prefix_ignore_ascii_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}
