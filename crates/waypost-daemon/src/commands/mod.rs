//! IPC command handlers.
//!
//! Each submodule implements the commands for one IPC category. Handlers
//! receive the raw `params` object and return a JSON result or an
//! [`RpcError`](crate::rpc::RpcError).

pub mod actions;
pub mod diagnostics;
pub mod invoices;
pub mod sponsors;

use serde_json::Value;
use waypost_types::Presence;

use crate::rpc::RpcError;

type Result<T> = std::result::Result<T, RpcError>;

/// Required string parameter.
fn str_param<'a>(params: &'a Value, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| RpcError::invalid_params(&format!("{key} required")))
}

/// Optional string parameter; `null` counts as absent.
fn opt_str_param<'a>(params: &'a Value, key: &str) -> Result<Option<&'a str>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(Some)
            .ok_or_else(|| RpcError::invalid_params(&format!("{key} must be a string"))),
    }
}

/// Verified presence pair forwarded by the presence service.
fn presence(params: &Value) -> Result<Presence> {
    Ok(Presence::new(
        str_param(params, "device_session_id")?,
        str_param(params, "location_id")?,
    ))
}
