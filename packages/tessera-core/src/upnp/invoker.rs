//! Remote action invocation.
//!
//! [`ActionInvoker::call`] checks the supplied arguments against the action's
//! declaration, sends the SOAP request in declared argument order and, on
//! success, writes every out-argument into its related state variable. That
//! write is what turns an action result into a state change observers see.

use std::collections::HashMap;

use reqwest::Client;
use thiserror::Error;

use super::model::{Action, ArgumentMismatch, Service};
use super::soap::{parse_soap_response, send_soap_request, SoapError, UpnpFault};

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("service {service} has no action {action}")]
    UnknownAction { service: String, action: String },

    #[error("invalid arguments for {action}: {mismatch}")]
    InvalidArguments {
        action: String,
        mismatch: ArgumentMismatch,
    },

    #[error(transparent)]
    Soap(#[from] SoapError),
}

pub type InvokeResult<T> = Result<T, InvokeError>;

impl InvokeError {
    /// The UPnP fault returned by the device, if that is what this is.
    pub fn fault(&self) -> Option<&UpnpFault> {
        match self {
            InvokeError::Soap(SoapError::Fault(fault)) => Some(fault),
            _ => None,
        }
    }
}

/// Instance addressed by a call: its `InstanceID` argument, else 0.
pub fn target_instance(args: &HashMap<String, String>) -> u32 {
    args.get("InstanceID")
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

/// Writes out-argument values into their related state variables.
///
/// Returns the number of variables that changed.
pub fn apply_out_arguments(
    service: &Service,
    action: &Action,
    instance: u32,
    out: &[(String, String)],
) -> usize {
    let mut changed = 0;
    for arg in action.out_arguments() {
        if arg.related_state_variable.is_empty() {
            continue;
        }
        let Some((_, value)) = out.iter().find(|(name, _)| *name == arg.name) else {
            log::debug!(
                "[SOAP] {} response lacks out-argument {}",
                action.name,
                arg.name
            );
            continue;
        };
        if service.set_variable(instance, &arg.related_state_variable, value.as_str()) {
            changed += 1;
        }
    }
    changed
}

/// Invokes actions on remote services.
#[derive(Clone)]
pub struct ActionInvoker {
    client: Client,
}

impl ActionInvoker {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Calls `action_name` on `service` with `args`.
    ///
    /// `args` must name exactly the declared in-arguments; a mismatch is
    /// reported without contacting the device. Faults leave every state
    /// variable untouched.
    pub async fn call(
        &self,
        service: &Service,
        action_name: &str,
        args: &HashMap<String, String>,
    ) -> InvokeResult<Vec<(String, String)>> {
        let action = service
            .action(action_name)
            .ok_or_else(|| InvokeError::UnknownAction {
                service: service.service_id().to_string(),
                action: action_name.to_string(),
            })?;

        action
            .check_in_arguments(args.keys().map(String::as_str))
            .map_err(|mismatch| InvokeError::InvalidArguments {
                action: action_name.to_string(),
                mismatch,
            })?;

        let ordered: Vec<(&str, &str)> = action
            .in_arguments()
            .filter_map(|a| {
                args.get(&a.name)
                    .map(|v| (a.name.as_str(), v.as_str()))
            })
            .collect();

        let body = send_soap_request(
            &self.client,
            service.control_url(),
            service.service_type(),
            action_name,
            &ordered,
        )
        .await?;
        let out = parse_soap_response(&body, action_name)?;

        let changed = apply_out_arguments(service, &action, target_instance(args), &out);
        log::debug!(
            "[SOAP] {}.{} returned {} values, {} variables changed",
            service.short_id(),
            action_name,
            out.len(),
            changed
        );
        Ok(out)
    }
}
