//! The UPnP Device Architecture protocol stack.
//!
//! Wire formats ([`codec`], [`soap`], [`xml`]), SSDP discovery ([`ssdp`]),
//! the device model ([`model`]), description retrieval ([`description`]) and
//! its detection barrier ([`detection`]), eventing ([`gena`]), remote action
//! calls ([`invoker`]) and hosted devices ([`local`]).

pub mod codec;
pub mod description;
pub mod detection;
pub mod gena;
pub mod invoker;
pub mod local;
pub mod model;
pub mod soap;
pub mod ssdp;
pub mod xml;

#[cfg(test)]
pub(crate) mod test_fixtures;

pub use description::{DescriptionError, DescriptionFetcher, DescriptionResult};
pub use detection::{DetectionGate, DetectionStatus, GateTransition};
pub use gena::{GenaError, GenaResult, GenaSubscriptionManager};
pub use invoker::{ActionInvoker, InvokeError, InvokeResult};
pub use soap::{SoapError, SoapResult, UpnpFault};
