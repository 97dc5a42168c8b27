//! GENA server role.
//!
//! Keeps the subscriber records of one hosted service and delivers its
//! NOTIFY messages. Delivery failures are logged only: a subscriber that
//! stops listening disappears when its timeout runs out.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures::future::join_all;
use parking_lot::RwLock;
use reqwest::{Client, Method};

use crate::protocol_constants::{
    GENA_NTS_PROPCHANGE, GENA_NT_EVENT, SOAP_TIMEOUT_SECS, XML_CONTENT_TYPE,
};

/// Extracts the delivery URLs from a `CALLBACK` header.
///
/// The header lists one or more `<url>` entries; only HTTP URLs are kept.
pub fn parse_callback_header(value: &str) -> Vec<String> {
    value
        .split('<')
        .filter_map(|part| part.split_once('>').map(|(url, _)| url.trim()))
        .filter(|url| url.starts_with("http://"))
        .map(str::to_string)
        .collect()
}

/// One remote control point subscribed to a hosted service.
#[derive(Debug, Clone)]
pub struct SubscriberRecord {
    pub sid: String,
    pub callback_urls: Vec<String>,
    pub timeout_secs: u64,
    pub created_at: Instant,
    /// SEQ of the next NOTIFY. SEQ 0 belongs to the initial event.
    next_seq: u32,
}

impl SubscriberRecord {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > Duration::from_secs(self.timeout_secs)
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }
}

/// Where and how to deliver one NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyTarget {
    pub sid: String,
    pub callback_urls: Vec<String>,
    pub seq: u32,
}

/// Subscribers of one hosted service, keyed by SID.
#[derive(Default)]
pub struct SubscriberRegistry {
    records: RwLock<HashMap<String, SubscriberRecord>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a new subscriber under a fresh SID.
    pub fn add(&self, callback_urls: Vec<String>, timeout_secs: u64) -> SubscriberRecord {
        let record = SubscriberRecord {
            sid: format!("uuid:{}", uuid::Uuid::new_v4()),
            callback_urls,
            timeout_secs,
            created_at: Instant::now(),
            next_seq: 1,
        };
        self.records
            .write()
            .insert(record.sid.clone(), record.clone());
        record
    }

    /// Restarts the timeout of `sid`. Returns `false` for an unknown SID.
    pub fn renew(&self, sid: &str, timeout_secs: u64) -> bool {
        match self.records.write().get_mut(sid) {
            Some(record) => {
                record.created_at = Instant::now();
                record.timeout_secs = timeout_secs;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, sid: &str) -> bool {
        self.records.write().remove(sid).is_some()
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.records.read().contains_key(sid)
    }

    pub fn get(&self, sid: &str) -> Option<SubscriberRecord> {
        self.records.read().get(sid).cloned()
    }

    /// Removes subscribers whose timeout has run out. Returns their SIDs.
    pub fn expire(&self, now: Instant) -> Vec<String> {
        let mut records = self.records.write();
        let expired: Vec<String> = records
            .values()
            .filter(|r| r.is_expired(now))
            .map(|r| r.sid.clone())
            .collect();
        for sid in &expired {
            records.remove(sid);
        }
        expired
    }

    /// One target per subscriber, consuming a sequence number from each.
    pub fn targets(&self) -> Vec<NotifyTarget> {
        self.records
            .write()
            .values_mut()
            .map(|record| {
                let seq = record.next_seq;
                record.next_seq = record.next_seq.wrapping_add(1).max(1);
                NotifyTarget {
                    sid: record.sid.clone(),
                    callback_urls: record.callback_urls.clone(),
                    seq,
                }
            })
            .collect()
    }

    /// Target for the initial event of `sid` (SEQ 0).
    pub fn initial_target(&self, sid: &str) -> Option<NotifyTarget> {
        self.records.read().get(sid).map(|record| NotifyTarget {
            sid: record.sid.clone(),
            callback_urls: record.callback_urls.clone(),
            seq: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

/// Sends NOTIFY requests to subscribers.
#[derive(Clone)]
pub struct EventPublisher {
    client: Client,
}

impl EventPublisher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Delivers `body` to the first callback URL that accepts it.
    ///
    /// Returns whether any URL accepted.
    pub async fn send_notify(&self, target: &NotifyTarget, body: &str) -> bool {
        let Ok(method) = Method::from_bytes(b"NOTIFY") else {
            return false;
        };
        for url in &target.callback_urls {
            let result = self
                .client
                .request(method.clone(), url)
                .header("CONTENT-TYPE", XML_CONTENT_TYPE)
                .header("NT", GENA_NT_EVENT)
                .header("NTS", GENA_NTS_PROPCHANGE)
                .header("SID", &target.sid)
                .header("SEQ", target.seq.to_string())
                .body(body.to_string())
                .timeout(Duration::from_secs(SOAP_TIMEOUT_SECS))
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    log::debug!(
                        "[Publisher] NOTIFY {} seq {} -> {}",
                        target.sid,
                        target.seq,
                        url
                    );
                    return true;
                }
                Ok(response) => log::warn!(
                    "[Publisher] NOTIFY {} to {} rejected: HTTP {}",
                    target.sid,
                    url,
                    response.status()
                ),
                Err(e) => log::warn!(
                    "[Publisher] NOTIFY {} to {} failed: {}",
                    target.sid,
                    url,
                    e
                ),
            }
        }
        false
    }

    /// Delivers `body` to every target concurrently. Returns how many accepted it.
    pub async fn notify_targets(&self, targets: &[NotifyTarget], body: &str) -> usize {
        let results = join_all(targets.iter().map(|t| self.send_notify(t, body))).await;
        results.into_iter().filter(|ok| *ok).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upnp::test_fixtures::serve;
    use axum::http::{HeaderMap, Method as HttpMethod, StatusCode};
    use axum::routing::any;
    use axum::Router;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn callback_header_yields_every_http_url() {
        assert_eq!(
            parse_callback_header("<http://10.0.0.2:4000/events>"),
            vec!["http://10.0.0.2:4000/events"]
        );
        assert_eq!(
            parse_callback_header("<http://a/1><https://b/2> <http://c/3>"),
            vec!["http://a/1", "http://c/3"]
        );
        assert!(parse_callback_header("http://no-brackets/").is_empty());
        assert!(parse_callback_header("").is_empty());
    }

    #[test]
    fn sequence_numbers_start_after_initial_event() {
        let registry = SubscriberRegistry::new();
        let record = registry.add(vec!["http://a/".into()], 1800);
        assert!(record.sid.starts_with("uuid:"));

        assert_eq!(registry.initial_target(&record.sid).unwrap().seq, 0);
        assert_eq!(registry.targets()[0].seq, 1);
        assert_eq!(registry.targets()[0].seq, 2);
        assert_eq!(registry.get(&record.sid).unwrap().next_seq(), 3);
    }

    #[test]
    fn renew_remove_and_expire() {
        let registry = SubscriberRegistry::new();
        let a = registry.add(vec!["http://a/".into()], 60);
        let b = registry.add(vec!["http://b/".into()], 1800);

        assert!(registry.renew(&a.sid, 120));
        assert!(!registry.renew("uuid:unknown", 120));

        let later = Instant::now() + Duration::from_secs(121);
        assert_eq!(registry.expire(later), vec![a.sid.clone()]);
        assert!(registry.contains(&b.sid));

        assert!(registry.remove(&b.sid));
        assert!(!registry.remove(&b.sid));
        assert!(registry.is_empty());
    }

    #[test]
    fn infinite_timeout_never_expires() {
        let registry = SubscriberRegistry::new();
        registry.add(vec!["http://a/".into()], u64::MAX);
        assert!(registry
            .expire(Instant::now() + Duration::from_secs(86_400 * 365))
            .is_empty());
    }

    #[tokio::test]
    async fn notify_carries_gena_headers() {
        let seen: Arc<Mutex<Vec<(String, HeaderMap, String)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let router = Router::new().route(
            "/events",
            any(move |method: HttpMethod, headers: HeaderMap, body: String| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push((method.to_string(), headers, body));
                    StatusCode::OK
                }
            }),
        );
        let addr = serve(router).await;

        let registry = SubscriberRegistry::new();
        let record = registry.add(
            vec![
                "http://127.0.0.1:9/unreachable".into(),
                format!("http://{}/events", addr),
            ],
            1800,
        );
        let publisher = EventPublisher::new(Client::new());
        let targets = registry.targets();
        assert_eq!(
            publisher.notify_targets(&targets, "<e:propertyset/>").await,
            1
        );

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (method, headers, body) = &seen[0];
        assert_eq!(method, "NOTIFY");
        assert_eq!(headers["nt"], "upnp:event");
        assert_eq!(headers["nts"], "upnp:propchange");
        assert_eq!(headers["sid"], record.sid.as_str());
        assert_eq!(headers["seq"], "1");
        assert_eq!(body, "<e:propertyset/>");
    }
}
