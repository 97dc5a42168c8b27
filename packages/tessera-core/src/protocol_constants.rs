//! Fixed protocol constants that should NOT be changed.
//!
//! These values are defined by the UPnP Device Architecture (SSDP, GENA, SOAP)
//! or are the fixed timings the stack uses on the wire. Tunable intervals are
//! mirrored in [`crate::state::Config`] with these values as defaults.

use std::net::Ipv4Addr;

// ─────────────────────────────────────────────────────────────────────────────
// SSDP (Simple Service Discovery Protocol)
// ─────────────────────────────────────────────────────────────────────────────

/// SSDP multicast group address.
pub const SSDP_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// SSDP well-known port.
pub const SSDP_PORT: u16 = 1900;

/// `HOST` header value used by every multicast SSDP message.
pub const SSDP_HOST: &str = "239.255.255.250:1900";

/// Grace period added to `max-age` before a remote entry is considered expired (seconds).
pub const SSDP_EXPIRY_GRACE_SECS: u64 = 30;

/// Interval between expiry sweeps of the registration table (seconds).
pub const SSDP_SWEEP_INTERVAL_SECS: u64 = 333;

/// Interval between re-announcements of local entries (seconds).
pub const SSDP_ALIVE_RESEND_INTERVAL_SECS: u64 = 777;

/// Interval between periodic M-SEARCH rounds (seconds).
pub const SSDP_MSEARCH_INTERVAL_SECS: u64 = 120;

/// `MX` value sent in our own M-SEARCH requests (seconds).
pub const SSDP_MSEARCH_MX: u64 = 5;

/// Upper bound applied to the `MX` of incoming M-SEARCH requests (seconds).
pub const SSDP_MAX_MX_SECS: u64 = 120;

/// How many times each alive NOTIFY is written to the wire.
///
/// UDP is lossy; announcing twice is the conventional compromise.
pub const SSDP_ALIVE_REPEAT: usize = 2;

/// How many M-SEARCH datagrams make up one search round.
pub const SSDP_MSEARCH_REPEAT: usize = 2;

/// Default `max-age` for local entries and for remote entries whose
/// `CACHE-CONTROL` header is missing or unparseable (seconds).
pub const SSDP_DEFAULT_MAX_AGE_SECS: u64 = 1800;

/// Multicast TTL for outgoing SSDP datagrams.
pub const SSDP_MULTICAST_TTL: u32 = 4;

/// Receive buffer size for SSDP datagrams (bytes).
pub const SSDP_MAX_DATAGRAM_SIZE: usize = 4096;

/// Search target matching every entry.
pub const SSDP_ALL: &str = "ssdp:all";

/// Search target / notification type of root devices.
pub const UPNP_ROOTDEVICE: &str = "upnp:rootdevice";

// ─────────────────────────────────────────────────────────────────────────────
// GENA (UPnP General Event Notification Architecture)
// ─────────────────────────────────────────────────────────────────────────────

/// GENA subscription timeout requested from remote devices (seconds).
pub const GENA_SUBSCRIPTION_TIMEOUT_SECS: u64 = 300;

/// Time before subscription expiry to trigger renewal (seconds).
pub const GENA_RENEWAL_BUFFER_SECS: u64 = 30;

/// Interval between subscription renewal checks (seconds).
pub const GENA_RENEWAL_CHECK_SECS: u64 = 20;

/// Interval between expiry sweeps of our own subscribers (seconds).
pub const GENA_SUBSCRIBER_CHECK_SECS: u64 = 120;

/// Timeout granted to subscribers that send no usable `TIMEOUT` header (seconds).
pub const GENA_DEFAULT_SUBSCRIBER_TIMEOUT_SECS: u64 = 1800;

/// Longest subscription timeout tracked; `infinite` is clamped to it (seconds).
pub const GENA_MAX_TIMEOUT_SECS: u64 = 365 * 24 * 3600;

/// Delay between answering a new SUBSCRIBE and sending its initial event (milliseconds).
///
/// The subscriber must learn its SID before the first NOTIFY reaches it.
pub const GENA_INITIAL_EVENT_DELAY_MS: u64 = 800;

/// Path of the event callback served for our own subscriptions.
pub const GENA_CALLBACK_PATH: &str = "/events";

/// `NT` header value of GENA requests.
pub const GENA_NT_EVENT: &str = "upnp:event";

/// `NTS` header value of GENA property change notifications.
pub const GENA_NTS_PROPCHANGE: &str = "upnp:propchange";

/// Maximum size of GENA notification body (bytes).
pub const MAX_GENA_BODY_SIZE: usize = 64 * 1024;

/// Name of the aggregated state variable used by AV services.
pub const LAST_CHANGE: &str = "LastChange";

/// Prefix of argument-only state variables that are never evented.
pub const A_ARG_TYPE_PREFIX: &str = "A_ARG_TYPE_";

// ─────────────────────────────────────────────────────────────────────────────
// HTTP/SOAP
// ─────────────────────────────────────────────────────────────────────────────

/// Timeout for SOAP and GENA HTTP requests (seconds).
///
/// 10 seconds is reasonable for LAN operations.
pub const SOAP_TIMEOUT_SECS: u64 = 10;

/// Maximum size of an incoming SOAP control request (bytes).
pub const MAX_SOAP_BODY_SIZE: usize = 64 * 1024;

/// `Content-Type` of SOAP and GENA bodies.
pub const XML_CONTENT_TYPE: &str = r#"text/xml; charset="utf-8""#;

// ─────────────────────────────────────────────────────────────────────────────
// XML Namespaces
// ─────────────────────────────────────────────────────────────────────────────

pub const SOAP_ENVELOPE_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_ENCODING_NS: &str = "http://schemas.xmlsoap.org/soap/encoding/";
pub const UPNP_CONTROL_NS: &str = "urn:schemas-upnp-org:control-1-0";
pub const UPNP_EVENT_NS: &str = "urn:schemas-upnp-org:event-1-0";
pub const UPNP_DEVICE_NS: &str = "urn:schemas-upnp-org:device-1-0";
pub const UPNP_SERVICE_NS: &str = "urn:schemas-upnp-org:service-1-0";

// ─────────────────────────────────────────────────────────────────────────────
// Event Channels
// ─────────────────────────────────────────────────────────────────────────────

/// Capacity of the broadcast channel carrying domain events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// WebSocket clients silent for this long are disconnected (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between WebSocket heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Product token used in `SERVER` headers.
pub const APP_NAME: &str = "Tessera";

/// Service identifier reported by the health endpoint.
pub const SERVICE_ID: &str = "tessera";

/// Range scanned when the preferred HTTP port is 0 or unavailable.
pub const HTTP_PORT_RANGE: std::ops::RangeInclusive<u16> = 49500..=49510;
