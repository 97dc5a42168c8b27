//! Application services layer.
//!
//! The services orchestrate the protocol machinery in [`crate::upnp`] for the
//! API layer: the control point drives remote devices, the device host
//! serves local ones.

pub mod control_point;
pub mod device_host;

pub use control_point::{ControlPoint, ControlPointError, ControlPointResult};
pub use device_host::{DeviceHost, HostError, HostResult, SubscribeGrant, SubscribeRequest};
