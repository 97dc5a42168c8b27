//! Wire codec for HTTP-shaped UDP messages.
//!
//! SSDP speaks HTTP/1.1 syntax over UDP. This module parses such datagrams
//! into a start line plus lower-cased headers and builds the three message
//! shapes we send: alive/byebye NOTIFY, M-SEARCH and the unicast search
//! response.

use std::collections::HashMap;

use thiserror::Error;

use super::ssdp::RegistrationEntry;
use crate::protocol_constants::{SSDP_ALL, SSDP_HOST};

/// Errors raised while parsing an HTTP-like message.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty message")]
    Empty,

    #[error("malformed start line: {0:?}")]
    StartLine(String),

    #[error("malformed header line: {0:?}")]
    HeaderLine(String),

    #[error("message is not valid UTF-8")]
    Utf8,
}

pub type CodecResult<T> = Result<T, CodecError>;

/// A parsed HTTP-like message.
///
/// `command_line` holds the three tokens of the start line: for a request
/// `[method, target, version]`, for a response `[version, status, reason]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpLikeMessage {
    pub command_line: [String; 3],
    /// Header names are lower-cased; when a header repeats, the last one wins.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpLikeMessage {
    pub fn method(&self) -> &str {
        &self.command_line[0]
    }

    pub fn is_response(&self) -> bool {
        self.command_line[0].starts_with("HTTP/")
    }

    /// Status code of a response, `None` for requests.
    pub fn status(&self) -> Option<u16> {
        if self.is_response() {
            self.command_line[1].parse().ok()
        } else {
            None
        }
    }

    /// Header lookup by (case-insensitive) name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// Parses a datagram into start line, headers and body.
///
/// The header block ends at the first `\r\n\r\n` (or `\n\n`); a message
/// without a blank line is all headers.
pub fn parse_http_like_message(raw: &[u8]) -> CodecResult<HttpLikeMessage> {
    let text = std::str::from_utf8(raw).map_err(|_| CodecError::Utf8)?;
    if text.trim().is_empty() {
        return Err(CodecError::Empty);
    }

    let (head, body) = split_head_body(text);
    let mut lines = head.lines().map(|l| l.trim_end_matches('\r'));

    let start = lines
        .by_ref()
        .find(|l| !l.trim().is_empty())
        .ok_or(CodecError::Empty)?;
    let command_line = parse_start_line(start)?;

    let mut headers = HashMap::new();
    for line in lines {
        if line.trim().is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::HeaderLine(line.to_string()))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(CodecError::HeaderLine(line.to_string()));
        }
        headers.insert(name.to_ascii_lowercase(), value.trim().to_string());
    }

    Ok(HttpLikeMessage {
        command_line,
        headers,
        body: body.to_string(),
    })
}

fn split_head_body(text: &str) -> (&str, &str) {
    if let Some(idx) = text.find("\r\n\r\n") {
        (&text[..idx], &text[idx + 4..])
    } else if let Some(idx) = text.find("\n\n") {
        (&text[..idx], &text[idx + 2..])
    } else {
        (text, "")
    }
}

fn parse_start_line(line: &str) -> CodecResult<[String; 3]> {
    let mut parts = line.trim().splitn(3, ' ');
    let first = parts.next().unwrap_or_default();
    let second = parts.next().unwrap_or_default();
    let third = parts.next().unwrap_or_default();

    if first.is_empty() || second.is_empty() {
        return Err(CodecError::StartLine(line.to_string()));
    }
    Ok([
        first.to_string(),
        second.to_string(),
        third.trim().to_string(),
    ])
}

/// Extracts `max-age` seconds from a `CACHE-CONTROL` value.
pub fn parse_max_age(cache_control: &str) -> Option<u64> {
    cache_control.split(',').find_map(|directive| {
        let (key, value) = directive.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("max-age") {
            value.trim().trim_matches('"').parse().ok()
        } else {
            None
        }
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Builders
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of NOTIFY announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyKind {
    Alive,
    Byebye,
}

impl NotifyKind {
    pub fn nts(self) -> &'static str {
        match self {
            Self::Alive => "ssdp:alive",
            Self::Byebye => "ssdp:byebye",
        }
    }
}

/// Builds a multicast NOTIFY for a local entry.
pub fn build_notify(kind: NotifyKind, entry: &RegistrationEntry) -> String {
    match kind {
        NotifyKind::Alive => format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: {}\r\n\
             CACHE-CONTROL: max-age={}\r\n\
             LOCATION: {}\r\n\
             NT: {}\r\n\
             NTS: {}\r\n\
             SERVER: {}\r\n\
             USN: {}\r\n\r\n",
            SSDP_HOST,
            entry.max_age_secs,
            entry.location,
            entry.st,
            kind.nts(),
            entry.server,
            entry.usn
        ),
        NotifyKind::Byebye => format!(
            "NOTIFY * HTTP/1.1\r\n\
             HOST: {}\r\n\
             NT: {}\r\n\
             NTS: {}\r\n\
             USN: {}\r\n\r\n",
            SSDP_HOST,
            entry.st,
            kind.nts(),
            entry.usn
        ),
    }
}

/// Builds the `ssdp:all` M-SEARCH this stack sends.
pub fn build_msearch(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\r\n",
        SSDP_HOST, mx, SSDP_ALL
    )
}

/// Builds the unicast `200 OK` answering an M-SEARCH for a local entry.
pub fn build_search_response(entry: &RegistrationEntry) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         CACHE-CONTROL: max-age={}\r\n\
         EXT: \r\n\
         LOCATION: {}\r\n\
         SERVER: {}\r\n\
         ST: {}\r\n\
         USN: {}\r\n\r\n",
        entry.max_age_secs, entry.location, entry.server, entry.st, entry.usn
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol_constants::SSDP_MSEARCH_MX;

    const ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age=1800\r\n\
LOCATION: http://192.168.1.20:1400/xml/device_description.xml\r\n\
NT: upnp:rootdevice\r\n\
NTS: ssdp:alive\r\n\
SERVER: Linux UPnP/1.0 Sonos/70.3-35220 (ZPS9)\r\n\
USN: uuid:RINCON_000E58A0123401400::upnp:rootdevice\r\n\r\n";

    #[test]
    fn parses_notify_request() {
        let msg = parse_http_like_message(ALIVE.as_bytes()).unwrap();
        assert_eq!(msg.command_line, ["NOTIFY", "*", "HTTP/1.1"]);
        assert_eq!(msg.method(), "NOTIFY");
        assert!(!msg.is_response());
        assert_eq!(msg.header("NTS"), Some("ssdp:alive"));
        assert_eq!(
            msg.header("usn"),
            Some("uuid:RINCON_000E58A0123401400::upnp:rootdevice")
        );
        assert_eq!(msg.body, "");
    }

    #[test]
    fn parses_search_response_with_spaced_reason() {
        let raw = "HTTP/1.1 200 OK\r\nST: ssdp:all\r\nEXT:\r\n\r\n";
        let msg = parse_http_like_message(raw.as_bytes()).unwrap();
        assert!(msg.is_response());
        assert_eq!(msg.status(), Some(200));
        assert_eq!(msg.command_line[2], "OK");
        assert_eq!(msg.header("ext"), Some(""));
    }

    #[test]
    fn header_names_are_lower_cased_and_last_duplicate_wins() {
        let raw = "NOTIFY * HTTP/1.1\r\nLocation: http://a/\r\nLOCATION: http://b/\r\n\r\n";
        let msg = parse_http_like_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.headers.get("location").map(String::as_str), Some("http://b/"));
        assert_eq!(msg.headers.len(), 1);
    }

    #[test]
    fn header_value_keeps_inner_colons() {
        let raw = "HTTP/1.1 200 OK\r\nLOCATION: http://10.0.0.1:8080/x\r\n\r\n";
        let msg = parse_http_like_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.header("location"), Some("http://10.0.0.1:8080/x"));
    }

    #[test]
    fn message_without_blank_line_is_all_headers() {
        let raw = "M-SEARCH * HTTP/1.1\r\nST: ssdp:all\r\nMX: 2";
        let msg = parse_http_like_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.header("mx"), Some("2"));
    }

    #[test]
    fn body_follows_blank_line() {
        let raw = "NOTIFY /events HTTP/1.1\nSID: uuid:1\n\n<propertyset/>";
        let msg = parse_http_like_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.body, "<propertyset/>");
    }

    #[test]
    fn malformed_inputs_are_parse_errors() {
        assert_eq!(parse_http_like_message(b""), Err(CodecError::Empty));
        assert_eq!(parse_http_like_message(b"\r\n\r\n"), Err(CodecError::Empty));
        assert!(matches!(
            parse_http_like_message(b"GARBAGE\r\n\r\n"),
            Err(CodecError::StartLine(_))
        ));
        assert!(matches!(
            parse_http_like_message(b"NOTIFY * HTTP/1.1\r\nno colon here\r\n\r\n"),
            Err(CodecError::HeaderLine(_))
        ));
        assert_eq!(
            parse_http_like_message(&[0xff, 0xfe, 0x00]),
            Err(CodecError::Utf8)
        );
    }

    #[test]
    fn parse_max_age_variants() {
        assert_eq!(parse_max_age("max-age=1800"), Some(1800));
        assert_eq!(parse_max_age("no-cache, MAX-AGE = 60"), Some(60));
        assert_eq!(parse_max_age("max-age=\"90\""), Some(90));
        assert_eq!(parse_max_age("no-cache"), None);
        assert_eq!(parse_max_age("max-age=abc"), None);
    }

    #[test]
    fn alive_notify_carries_every_header() {
        let entry = RegistrationEntry::local(
            "uuid:abc::upnp:rootdevice",
            "upnp:rootdevice",
            "http://10.0.0.1:49500/devices/abc/description.xml",
            "linux/x86_64 UPnP/1.0 Tessera/0.1.0",
        );
        let raw = build_notify(NotifyKind::Alive, &entry);
        assert!(raw.starts_with("NOTIFY * HTTP/1.1\r\n"));
        assert!(raw.ends_with("\r\n\r\n"));

        let msg = parse_http_like_message(raw.as_bytes()).unwrap();
        assert_eq!(msg.header("host"), Some("239.255.255.250:1900"));
        assert_eq!(msg.header("cache-control"), Some("max-age=1800"));
        assert_eq!(msg.header("nt"), Some("upnp:rootdevice"));
        assert_eq!(msg.header("nts"), Some("ssdp:alive"));
        assert_eq!(msg.header("usn"), Some("uuid:abc::upnp:rootdevice"));
        assert_eq!(
            msg.header("location"),
            Some("http://10.0.0.1:49500/devices/abc/description.xml")
        );
    }

    #[test]
    fn byebye_notify_omits_location() {
        let entry = RegistrationEntry::local("uuid:abc", "uuid:abc", "http://x/", "s");
        let raw = build_notify(NotifyKind::Byebye, &entry);
        assert!(raw.contains("NTS: ssdp:byebye\r\n"));
        assert!(!raw.contains("LOCATION"));
    }

    #[test]
    fn msearch_targets_all_with_mx_5() {
        let raw = build_msearch(SSDP_MSEARCH_MX);
        assert!(raw.starts_with("M-SEARCH * HTTP/1.1\r\n"));
        assert!(raw.contains("MAN: \"ssdp:discover\"\r\n"));
        assert!(raw.contains("MX: 5\r\n"));
        assert!(raw.contains("ST: ssdp:all\r\n"));
    }

    #[test]
    fn search_response_is_200_with_ext() {
        let entry = RegistrationEntry::local("uuid:abc", "uuid:abc", "http://x/d.xml", "s");
        let msg = parse_http_like_message(build_search_response(&entry).as_bytes()).unwrap();
        assert_eq!(msg.status(), Some(200));
        assert_eq!(msg.header("ext"), Some(""));
        assert_eq!(msg.header("st"), Some("uuid:abc"));
    }
}
