//! SSDP engine.
//!
//! Owns the multicast listening socket and the ephemeral search socket, turns
//! incoming datagrams into registration table updates, answers M-SEARCH
//! requests for local entries after a random delay, and runs the periodic
//! sweep / re-announce / search timers.
//!
//! When the sockets cannot be bound the engine keeps working without them:
//! local entries are still tracked, nothing is sent, and the failure is
//! reported once as a warning.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::net::UdpSocket;
use tokio::time::{interval, interval_at, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::registry::{RegistrationEntry, RegistrationTable};
use super::socket::{create_multicast_socket, create_search_socket};
use crate::protocol_constants::{
    SSDP_ALIVE_REPEAT, SSDP_DEFAULT_MAX_AGE_SECS, SSDP_MAX_DATAGRAM_SIZE, SSDP_MAX_MX_SECS,
    SSDP_MSEARCH_REPEAT, SSDP_MULTICAST_ADDR, SSDP_PORT,
};
use crate::runtime::TokioSpawner;
use crate::state::SsdpConfig;
use crate::upnp::codec::{
    build_msearch, build_notify, build_search_response, parse_http_like_message, parse_max_age,
    HttpLikeMessage, NotifyKind,
};

/// What a received datagram did to the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatagramOutcome {
    /// Malformed, irrelevant, or refers to nothing we track.
    Ignored,
    /// An alive NOTIFY or search response registered or refreshed an entry.
    Registered { usn: String, new: bool },
    /// A byebye removed a remote entry.
    Unregistered { usn: String },
    /// An M-SEARCH that should be answered for matching local entries.
    Search { st: String, mx: u64 },
}

/// Returns a uniformly random delay in `[0, mx]` seconds.
pub fn search_reply_delay(mx: u64) -> Duration {
    if mx == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=mx * 1000))
}

/// The SSDP engine.
pub struct SsdpServer {
    table: Arc<RegistrationTable>,
    config: SsdpConfig,
    multicast: Option<Arc<UdpSocket>>,
    search: Option<Arc<UdpSocket>>,
    multicast_dest: SocketAddr,
}

impl SsdpServer {
    /// Creates an engine without sockets: nothing is sent or received.
    pub fn detached(table: Arc<RegistrationTable>, config: SsdpConfig) -> Self {
        Self {
            table,
            config,
            multicast: None,
            search: None,
            multicast_dest: SocketAddr::new(IpAddr::V4(SSDP_MULTICAST_ADDR), SSDP_PORT),
        }
    }

    /// Binds the SSDP sockets.
    ///
    /// Must be called inside a Tokio runtime. A bind failure disables the
    /// network side of SSDP and is logged once.
    pub fn bind(table: Arc<RegistrationTable>, config: SsdpConfig) -> Self {
        let mut server = Self::detached(table, config);
        if !server.config.enabled {
            log::info!("[SSDP] Disabled by configuration");
            return server;
        }

        match create_multicast_socket() {
            Ok(socket) => server.multicast = Some(Arc::new(socket)),
            Err(e) => {
                log::warn!("[SSDP] Multicast socket unavailable, SSDP disabled: {}", e);
                return server;
            }
        }

        match create_search_socket() {
            Ok(socket) => server.search = Some(Arc::new(socket)),
            Err(e) => log::warn!("[SSDP] Search socket unavailable, M-SEARCH disabled: {}", e),
        }

        log::info!(
            "[SSDP] Listening on {}:{}",
            SSDP_MULTICAST_ADDR,
            SSDP_PORT
        );
        server
    }

    pub fn table(&self) -> &Arc<RegistrationTable> {
        &self.table
    }

    pub fn config(&self) -> &SsdpConfig {
        &self.config
    }

    /// Whether the multicast socket is bound.
    pub fn is_active(&self) -> bool {
        self.multicast.is_some()
    }

    /// Spawns the receive loops and the timer loop.
    pub fn start(self: &Arc<Self>, spawner: &TokioSpawner, cancel: CancellationToken) {
        if let Some(socket) = &self.multicast {
            spawner.spawn(Arc::clone(self).receive_loop(Arc::clone(socket), cancel.clone()));
        }
        if let Some(socket) = &self.search {
            spawner.spawn(Arc::clone(self).receive_loop(Arc::clone(socket), cancel.clone()));
        }
        spawner.spawn(Arc::clone(self).timer_loop(cancel));
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Local entries
    // ─────────────────────────────────────────────────────────────────────────

    /// Registers a local entry and announces it with alive NOTIFYs.
    pub async fn announce(&self, entry: RegistrationEntry) {
        self.table.register(entry.clone());
        self.send_notify(NotifyKind::Alive, &entry).await;
    }

    /// Sends byebye for a local entry and unregisters it.
    pub async fn withdraw(&self, usn: &str) {
        let Some(entry) = self.table.get(usn).filter(RegistrationEntry::is_local) else {
            return;
        };
        self.send_notify(NotifyKind::Byebye, &entry).await;
        self.table.unregister(usn);
    }

    /// Withdraws every local entry.
    pub async fn shutdown(&self) {
        let entries = self.table.local_entries();
        log::info!("[SSDP] Sending byebye for {} local entries", entries.len());
        for entry in entries {
            self.send_notify(NotifyKind::Byebye, &entry).await;
            self.table.unregister(&entry.usn);
        }
    }

    /// Re-announces every local entry.
    pub async fn resend_alive(&self) {
        for entry in self.table.local_entries() {
            self.send_notify(NotifyKind::Alive, &entry).await;
        }
    }

    /// Sends one search round (`ssdp:all`).
    pub async fn search(&self) {
        let Some(socket) = &self.search else {
            return;
        };
        let payload = build_msearch(self.config.msearch_mx);
        for _ in 0..SSDP_MSEARCH_REPEAT {
            if let Err(e) = socket.send_to(payload.as_bytes(), self.multicast_dest).await {
                log::debug!("[SSDP] M-SEARCH send failed: {}", e);
            }
        }
        log::debug!("[SSDP] Sent M-SEARCH (MX {})", self.config.msearch_mx);
    }

    async fn send_notify(&self, kind: NotifyKind, entry: &RegistrationEntry) {
        let Some(socket) = &self.multicast else {
            log::trace!("[SSDP] Not sending {} for {}: no socket", kind.nts(), entry.usn);
            return;
        };
        let payload = build_notify(kind, entry);
        let repeat = match kind {
            NotifyKind::Alive => SSDP_ALIVE_REPEAT,
            NotifyKind::Byebye => 1,
        };
        for _ in 0..repeat {
            if let Err(e) = socket.send_to(payload.as_bytes(), self.multicast_dest).await {
                log::debug!("[SSDP] {} send failed for {}: {}", kind.nts(), entry.usn, e);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Incoming datagrams
    // ─────────────────────────────────────────────────────────────────────────

    /// Applies one datagram to the table. Never panics on network input.
    pub fn handle_datagram(&self, data: &[u8], now: Instant) -> DatagramOutcome {
        let msg = match parse_http_like_message(data) {
            Ok(msg) => msg,
            Err(e) => {
                log::trace!("[SSDP] Dropping malformed datagram: {}", e);
                return DatagramOutcome::Ignored;
            }
        };

        if msg.is_response() {
            if msg.status() != Some(200) {
                return DatagramOutcome::Ignored;
            }
            return self.register_remote(&msg, msg.header("st"), now);
        }

        let method = msg.method();
        if method.eq_ignore_ascii_case("NOTIFY") {
            self.handle_notify(&msg, now)
        } else if method.eq_ignore_ascii_case("M-SEARCH") {
            Self::parse_search(&msg)
        } else {
            log::trace!("[SSDP] Ignoring {} datagram", method);
            DatagramOutcome::Ignored
        }
    }

    fn handle_notify(&self, msg: &HttpLikeMessage, now: Instant) -> DatagramOutcome {
        match msg.header("nts") {
            Some(nts) if nts.eq_ignore_ascii_case("ssdp:alive") => {
                self.register_remote(msg, msg.header("nt"), now)
            }
            Some(nts) if nts.eq_ignore_ascii_case("ssdp:byebye") => {
                let Some(usn) = msg.header("usn") else {
                    return DatagramOutcome::Ignored;
                };
                // Only the network side can say goodbye for remote entries.
                match self.table.get(usn) {
                    Some(entry) if !entry.is_local() => {
                        self.table.unregister(usn);
                        log::debug!("[SSDP] byebye {}", usn);
                        DatagramOutcome::Unregistered {
                            usn: usn.to_string(),
                        }
                    }
                    _ => DatagramOutcome::Ignored,
                }
            }
            other => {
                log::trace!("[SSDP] Ignoring NOTIFY with NTS {:?}", other);
                DatagramOutcome::Ignored
            }
        }
    }

    fn register_remote(
        &self,
        msg: &HttpLikeMessage,
        st: Option<&str>,
        now: Instant,
    ) -> DatagramOutcome {
        let (Some(usn), Some(st), Some(location)) = (msg.header("usn"), st, msg.header("location"))
        else {
            log::trace!("[SSDP] Announcement without USN/ST/LOCATION dropped");
            return DatagramOutcome::Ignored;
        };
        let max_age = msg
            .header("cache-control")
            .and_then(parse_max_age)
            .unwrap_or(SSDP_DEFAULT_MAX_AGE_SECS);
        let server = msg.header("server").unwrap_or_default();

        let entry = RegistrationEntry::remote(usn, st, location, server, max_age).seen_at(now);
        let new = self.table.register(entry);
        DatagramOutcome::Registered {
            usn: usn.to_string(),
            new,
        }
    }

    fn parse_search(msg: &HttpLikeMessage) -> DatagramOutcome {
        let st = msg.header("st").filter(|st| !st.is_empty());
        let mx = msg.header("mx").and_then(|mx| mx.parse::<u64>().ok());
        match (st, mx) {
            (Some(st), Some(mx)) => DatagramOutcome::Search {
                st: st.to_string(),
                mx: mx.min(SSDP_MAX_MX_SECS),
            },
            _ => {
                log::trace!("[SSDP] M-SEARCH without ST/MX dropped");
                DatagramOutcome::Ignored
            }
        }
    }

    /// Schedules one delayed unicast response per matching local entry.
    fn schedule_search_responses(&self, st: &str, mx: u64, dest: SocketAddr) {
        let Some(socket) = &self.multicast else {
            return;
        };
        for entry in self.table.search_matches(st, self.config.silent_policy) {
            let delay = search_reply_delay(mx);
            let socket = Arc::clone(socket);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let payload = build_search_response(&entry);
                if let Err(e) = socket.send_to(payload.as_bytes(), dest).await {
                    log::debug!("[SSDP] Search response to {} failed: {}", dest, e);
                }
            });
        }
    }

    async fn receive_loop(self: Arc<Self>, socket: Arc<UdpSocket>, cancel: CancellationToken) {
        let mut buf = vec![0u8; SSDP_MAX_DATAGRAM_SIZE];
        loop {
            let (len, src) = tokio::select! {
                _ = cancel.cancelled() => break,
                res = socket.recv_from(&mut buf) => match res {
                    Ok(received) => received,
                    Err(e) => {
                        log::debug!("[SSDP] Receive error: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
            };

            if let DatagramOutcome::Search { st, mx } = self.handle_datagram(&buf[..len], Instant::now())
            {
                log::debug!("[SSDP] M-SEARCH from {} for {} (MX {})", src, st, mx);
                self.schedule_search_responses(&st, mx, src);
            }
        }
        log::debug!("[SSDP] Receive loop stopped");
    }

    async fn timer_loop(self: Arc<Self>, cancel: CancellationToken) {
        let sweep_period = Duration::from_secs(self.config.sweep_interval_secs);
        let resend_period = Duration::from_secs(self.config.alive_resend_interval_secs);
        let now = tokio::time::Instant::now();

        let mut sweep = interval_at(now + sweep_period, sweep_period);
        let mut resend = interval_at(now + resend_period, resend_period);
        // First tick fires immediately: search as soon as we start.
        let mut msearch = interval(Duration::from_secs(self.config.msearch_interval_secs));
        for timer in [&mut sweep, &mut resend, &mut msearch] {
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sweep.tick() => {
                    let expired = self.table.sweep_expired(Instant::now());
                    if !expired.is_empty() {
                        log::debug!("[SSDP] Sweep removed {} entries", expired.len());
                    }
                }
                _ = resend.tick() => self.resend_alive().await,
                _ = msearch.tick() => self.search().await,
            }
        }
        log::debug!("[SSDP] Timer loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::emitter::tests::RecordingEventEmitter;
    use crate::events::DiscoveryEvent;
    use crate::protocol_constants::UPNP_ROOTDEVICE;

    const ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
CACHE-CONTROL: max-age=900\r\n\
LOCATION: http://192.168.1.20:1400/xml/device_description.xml\r\n\
NT: upnp:rootdevice\r\n\
NTS: ssdp:alive\r\n\
SERVER: Linux UPnP/1.0 Test/1.0\r\n\
USN: uuid:RINCON_1::upnp:rootdevice\r\n\r\n";

    const BYEBYE: &str = "NOTIFY * HTTP/1.1\r\n\
HOST: 239.255.255.250:1900\r\n\
NT: upnp:rootdevice\r\n\
NTS: ssdp:byebye\r\n\
USN: uuid:RINCON_1::upnp:rootdevice\r\n\r\n";

    const SEARCH_RESPONSE: &str = "HTTP/1.1 200 OK\r\n\
CACHE-CONTROL: max-age = 1800\r\n\
EXT:\r\n\
LOCATION: http://192.168.1.30:49152/description.xml\r\n\
SERVER: Linux/3.14 UPnP/1.0 Renderer/2.0\r\n\
ST: upnp:rootdevice\r\n\
USN: uuid:renderer-1::upnp:rootdevice\r\n\r\n";

    fn server() -> (SsdpServer, Arc<RecordingEventEmitter>) {
        let emitter = Arc::new(RecordingEventEmitter::default());
        let table = Arc::new(RegistrationTable::new(emitter.clone()));
        (SsdpServer::detached(table, SsdpConfig::default()), emitter)
    }

    #[test]
    fn alive_registers_then_refreshes() {
        let (server, emitter) = server();
        let now = Instant::now();

        assert_eq!(
            server.handle_datagram(ALIVE.as_bytes(), now),
            DatagramOutcome::Registered {
                usn: "uuid:RINCON_1::upnp:rootdevice".into(),
                new: true
            }
        );
        assert_eq!(
            server.handle_datagram(ALIVE.as_bytes(), now + Duration::from_secs(5)),
            DatagramOutcome::Registered {
                usn: "uuid:RINCON_1::upnp:rootdevice".into(),
                new: false
            }
        );

        let entry = server.table().get("uuid:RINCON_1::upnp:rootdevice").unwrap();
        assert_eq!(entry.max_age_secs, 900);
        assert_eq!(entry.server, "Linux UPnP/1.0 Test/1.0");
        assert_eq!(entry.last_seen, now + Duration::from_secs(5));
        assert_eq!(emitter.discovery.lock().len(), 1);
    }

    #[test]
    fn byebye_unregisters_known_and_ignores_unknown() {
        let (server, emitter) = server();
        assert_eq!(
            server.handle_datagram(BYEBYE.as_bytes(), Instant::now()),
            DatagramOutcome::Ignored
        );

        server.handle_datagram(ALIVE.as_bytes(), Instant::now());
        assert_eq!(
            server.handle_datagram(BYEBYE.as_bytes(), Instant::now()),
            DatagramOutcome::Unregistered {
                usn: "uuid:RINCON_1::upnp:rootdevice".into()
            }
        );
        assert!(server.table().is_empty());

        let events = emitter.discovery.lock();
        assert!(matches!(events[1], DiscoveryEvent::RemovedDevice { .. }));
    }

    #[test]
    fn byebye_cannot_remove_local_entry() {
        let (server, _) = server();
        server.table().register(RegistrationEntry::local(
            "uuid:RINCON_1::upnp:rootdevice",
            UPNP_ROOTDEVICE,
            "http://me/desc.xml",
            "me",
        ));
        assert_eq!(
            server.handle_datagram(BYEBYE.as_bytes(), Instant::now()),
            DatagramOutcome::Ignored
        );
        assert!(server.table().is_known("uuid:RINCON_1::upnp:rootdevice"));
    }

    #[test]
    fn search_response_registers_remote_entry() {
        let (server, _) = server();
        let outcome = server.handle_datagram(SEARCH_RESPONSE.as_bytes(), Instant::now());
        assert!(matches!(outcome, DatagramOutcome::Registered { new: true, .. }));

        let entry = server.table().get("uuid:renderer-1::upnp:rootdevice").unwrap();
        assert_eq!(entry.st, UPNP_ROOTDEVICE);
        assert_eq!(entry.location, "http://192.168.1.30:49152/description.xml");
        assert_eq!(entry.max_age_secs, 1800);
    }

    #[test]
    fn msearch_is_returned_for_scheduling() {
        let (server, _) = server();
        let raw = "M-SEARCH * HTTP/1.1\r\nHOST: 239.255.255.250:1900\r\nMAN: \"ssdp:discover\"\r\nMX: 3\r\nST: ssdp:all\r\n\r\n";
        assert_eq!(
            server.handle_datagram(raw.as_bytes(), Instant::now()),
            DatagramOutcome::Search {
                st: "ssdp:all".into(),
                mx: 3
            }
        );
    }

    #[test]
    fn msearch_mx_is_clamped_and_required() {
        let (server, _) = server();
        let huge = "M-SEARCH * HTTP/1.1\r\nMX: 9999\r\nST: upnp:rootdevice\r\n\r\n";
        assert_eq!(
            server.handle_datagram(huge.as_bytes(), Instant::now()),
            DatagramOutcome::Search {
                st: "upnp:rootdevice".into(),
                mx: SSDP_MAX_MX_SECS
            }
        );

        let missing = "M-SEARCH * HTTP/1.1\r\nST: upnp:rootdevice\r\n\r\n";
        assert_eq!(
            server.handle_datagram(missing.as_bytes(), Instant::now()),
            DatagramOutcome::Ignored
        );
    }

    #[test]
    fn malformed_datagrams_leave_table_unchanged() {
        let (server, _) = server();
        server.handle_datagram(ALIVE.as_bytes(), Instant::now());

        let garbage: [&[u8]; 7] = [
            b"",
            b"\x00\x01\x02\xff",
            b"NOTIFY",
            b"NOTIFY * HTTP/1.1\r\nbroken header\r\n\r\n",
            b"NOTIFY * HTTP/1.1\r\nNTS: ssdp:alive\r\n\r\n",
            b"HTTP/1.1 500 Internal Server Error\r\nUSN: x\r\n\r\n",
            b"GET / HTTP/1.1\r\nHost: x\r\n\r\n",
        ];
        for datagram in garbage {
            assert_eq!(
                server.handle_datagram(datagram, Instant::now()),
                DatagramOutcome::Ignored
            );
        }
        assert_eq!(server.table().len(), 1);
    }

    #[test]
    fn search_reply_delay_stays_within_mx() {
        assert_eq!(search_reply_delay(0), Duration::ZERO);
        for _ in 0..200 {
            assert!(search_reply_delay(3) <= Duration::from_secs(3));
        }
    }

    #[tokio::test]
    async fn detached_announce_and_withdraw_update_table() {
        let (server, emitter) = server();
        server
            .announce(RegistrationEntry::local(
                "uuid:me::upnp:rootdevice",
                UPNP_ROOTDEVICE,
                "http://me/desc.xml",
                "me",
            ))
            .await;
        assert!(server.table().is_known("uuid:me::upnp:rootdevice"));

        server.withdraw("uuid:me::upnp:rootdevice").await;
        assert!(server.table().is_empty());
        assert_eq!(emitter.discovery.lock().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_withdraws_only_local_entries() {
        let (server, _) = server();
        server.handle_datagram(ALIVE.as_bytes(), Instant::now());
        server
            .announce(RegistrationEntry::local("uuid:me", "uuid:me", "http://me/", "me"))
            .await;

        server.shutdown().await;

        assert!(server.table().local_entries().is_empty());
        assert!(server.table().is_known("uuid:RINCON_1::upnp:rootdevice"));
    }
}
