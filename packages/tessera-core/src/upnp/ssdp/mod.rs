//! SSDP: the registration table and the engine that keeps it in sync with
//! the network.

mod engine;
mod registry;
mod socket;

pub use engine::{search_reply_delay, DatagramOutcome, SsdpServer};
pub use registry::{
    Manifestation, RegistrationEntry, RegistrationTable, RegistryEvent, SilentEntryPolicy,
};
pub use socket::{get_interfaces, InterfaceInfo};

use thiserror::Error;

/// Errors raised while setting up SSDP sockets.
///
/// These are fatal to SSDP only; the rest of the stack keeps running.
#[derive(Debug, Error)]
pub enum SsdpError {
    /// Failed to create or bind a UDP socket.
    #[error("failed to bind UDP socket: {0}")]
    SocketBind(#[source] std::io::Error),

    /// Failed to join the SSDP multicast group.
    #[error("failed to join multicast group: {0}")]
    MulticastJoin(#[source] std::io::Error),

    /// Failed to send a datagram.
    #[error("failed to send datagram: {0}")]
    Send(#[source] std::io::Error),
}

/// Convenient Result alias for SSDP operations.
pub type SsdpResult<T> = Result<T, SsdpError>;
