//! Tessera Core - a UPnP Device Architecture stack.
//!
//! This crate implements both sides of UPnP: a control point that discovers,
//! describes, subscribes to and drives remote devices, and a device host that
//! publishes local devices over the same machinery. It is designed to be
//! embedded in other applications or run by the standalone server.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`upnp`]: The protocol stack (SSDP, descriptions, GENA, SOAP, device model)
//! - [`services`]: Control point and device host orchestration
//! - [`api`]: HTTP routes for hosted devices, GENA callbacks and the JSON/WebSocket API
//! - [`runtime`]: Spawner placing background tasks on the embedder's runtime
//! - [`events`]: Event system for real-time client communication
//! - [`context`]: Network configuration and URL building
//! - [`state`]: Configuration
//! - [`error`]: Centralized error types
//!
//! # Abstraction Traits
//!
//! The crate defines several traits to decouple core logic from the embedding
//! application:
//!
//! - [`EventEmitter`](events::EventEmitter): Emitting domain events
//! - [`IpDetector`](context::IpDetector): Local IP detection
//! - [`ActionHandler`](upnp::local::ActionHandler): Implementing hosted actions
//!
//! Each trait has a default implementation suitable for the standalone server.

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod context;
pub mod error;
pub mod events;
pub mod protocol_constants;
pub mod runtime;
pub mod services;
pub mod state;
pub mod upnp;
pub mod utils;

// Re-export commonly used types at the crate root
pub use context::{IpDetector, LocalIpDetector, NetworkContext, NetworkError, UrlBuilder};
pub use error::{ErrorCode, TesseraError, TesseraResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, DeviceEvent, DiscoveryEvent, EventEmitter,
    LoggingEventEmitter, NoopEventEmitter, StateEvent, SubscriptionEvent,
};
pub use runtime::TokioSpawner;
pub use state::{Config, GenaConfig, SsdpConfig};
pub use utils::now_millis;

// Re-export protocol types
pub use upnp::local::{binary_light, LocalDevice, LocalDeviceBuilder};
pub use upnp::model::{Device, Service, StateVariableChange};
pub use upnp::ssdp::{RegistrationEntry, RegistrationTable, SilentEntryPolicy, SsdpServer};
pub use upnp::UpnpFault;

// Re-export service types
pub use services::{ControlPoint, DeviceHost, HostError, SubscribeGrant, SubscribeRequest};

// Re-export bootstrap types
pub use bootstrap::{bootstrap_services, bootstrap_services_with_network, BootstrappedServices};

// Re-export API types
pub use api::{bind_listener, serve, start_server, AppState, ServerError};
