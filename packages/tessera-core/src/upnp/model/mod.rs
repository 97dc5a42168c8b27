//! The UPnP device model: devices, services, actions, state variables.

mod action;
mod device;
mod service;
mod variable;

pub use action::{Action, Argument, ArgumentMismatch, Direction};
pub use device::{Device, DeviceInfo, DeviceSummary, ServiceSummary};
pub use service::{Service, ServiceSubscription};
pub use variable::{
    AllowedValueRange, StateVariable, StateVariableChange, StateVariableSpec, SubscriberId,
    VariableCallback,
};
