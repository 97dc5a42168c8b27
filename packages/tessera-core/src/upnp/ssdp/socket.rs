//! UDP socket construction for SSDP.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use local_ip_address::list_afinet_netifas;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use super::SsdpError;
use crate::protocol_constants::{SSDP_MULTICAST_ADDR, SSDP_MULTICAST_TTL, SSDP_PORT};

/// Prefixes of virtual/container interfaces that never reach real devices.
const VIRTUAL_INTERFACE_PREFIXES: &[&str] = &[
    "lo", "docker", "veth", "br-", "virbr", "vmnet", "vbox", "tun", "tap",
];

fn is_virtual_interface(name: &str) -> bool {
    let name_lower = name.to_lowercase();
    VIRTUAL_INTERFACE_PREFIXES
        .iter()
        .any(|prefix| name_lower.starts_with(prefix))
}

/// Network interface information.
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    /// Interface name (e.g., "en0", "eth0").
    pub name: String,
    /// IPv4 address bound to this interface.
    pub ip: Ipv4Addr,
}

/// Gets all usable IPv4 interfaces.
///
/// Filters out virtual/container interfaces and loopback.
pub fn get_interfaces() -> Vec<InterfaceInfo> {
    list_afinet_netifas()
        .unwrap_or_else(|e| {
            log::warn!("[SSDP] Failed to list network interfaces: {}", e);
            Vec::new()
        })
        .into_iter()
        .filter_map(|(name, addr)| {
            if is_virtual_interface(&name) {
                log::debug!("[SSDP] Skipping virtual interface: {}", name);
                return None;
            }
            match addr {
                IpAddr::V4(ip) if !ip.is_loopback() => Some(InterfaceInfo { name, ip }),
                _ => None,
            }
        })
        .collect()
}

fn new_udp_socket(label: &str) -> Result<Socket, SsdpError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(SsdpError::SocketBind)?;

    if let Err(e) = socket.set_reuse_address(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEADDR on {} socket: {}", label, e);
    }

    #[cfg(unix)]
    if let Err(e) = socket.set_reuse_port(true) {
        log::warn!("[SSDP] Failed to set SO_REUSEPORT on {} socket: {}", label, e);
    }

    if let Err(e) = socket.set_multicast_ttl_v4(SSDP_MULTICAST_TTL) {
        log::warn!("[SSDP] Failed to set multicast TTL on {} socket: {}", label, e);
    }

    socket
        .set_nonblocking(true)
        .map_err(SsdpError::SocketBind)?;
    Ok(socket)
}

/// Creates the listening socket on `0.0.0.0:1900` joined to the SSDP group.
///
/// Joins the group on every usable interface; when none of those joins
/// succeeds, falls back to the system default interface.
pub fn create_multicast_socket() -> Result<UdpSocket, SsdpError> {
    let socket = new_udp_socket("multicast")?;

    if let Err(e) = socket.set_multicast_loop_v4(true) {
        log::debug!("[SSDP] Failed to enable multicast loopback: {}", e);
    }

    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), SSDP_PORT);
    socket
        .bind(&bind_addr.into())
        .map_err(SsdpError::SocketBind)?;

    let mut joined = 0usize;
    for iface in get_interfaces() {
        match socket.join_multicast_v4(&SSDP_MULTICAST_ADDR, &iface.ip) {
            Ok(()) => {
                log::debug!("[SSDP] Joined {} on {} ({})", SSDP_MULTICAST_ADDR, iface.name, iface.ip);
                joined += 1;
            }
            Err(e) => log::debug!("[SSDP] Join on {} failed: {}", iface.name, e),
        }
    }
    if joined == 0 {
        socket
            .join_multicast_v4(&SSDP_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED)
            .map_err(SsdpError::MulticastJoin)?;
    }

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(SsdpError::SocketBind)
}

/// Creates the ephemeral socket M-SEARCH requests are sent from.
///
/// Devices answer searches unicast to the sending port, so this socket is
/// also where search responses arrive.
pub fn create_search_socket() -> Result<UdpSocket, SsdpError> {
    let socket = new_udp_socket("search")?;
    let bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0);
    socket
        .bind(&bind_addr.into())
        .map_err(SsdpError::SocketBind)?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket).map_err(SsdpError::SocketBind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virtual_interfaces_are_skipped() {
        assert!(is_virtual_interface("lo"));
        assert!(is_virtual_interface("docker0"));
        assert!(is_virtual_interface("veth1234"));
        assert!(is_virtual_interface("br-abc"));
        assert!(!is_virtual_interface("eth0"));
        assert!(!is_virtual_interface("en0"));
        assert!(!is_virtual_interface("wlan0"));
    }

    #[tokio::test]
    async fn search_socket_binds_ephemeral_port() {
        let socket = create_search_socket().unwrap();
        assert_ne!(socket.local_addr().unwrap().port(), 0);
    }
}
