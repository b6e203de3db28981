//! OCPP 1.6 action handlers
//!
//! Each handler parses its request with the `rust_ocpp` v1.6 types, consults
//! the backend and the session store, and returns the response payload.
//! Fallback behaviour on backend failure is decided here, per action.

mod follow_up;
mod handle_authorize;
mod handle_boot_notification;
mod handle_heartbeat;
mod handle_meter_values;
mod handle_start_transaction;
mod handle_status_notification;
mod handle_stop_transaction;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::support::ProtocolError;

pub use handle_authorize::handle_authorize;
pub use handle_boot_notification::handle_boot_notification;
pub use handle_heartbeat::handle_heartbeat;
pub use handle_meter_values::{handle_meter_values, latest_energy_reading};
pub use handle_start_transaction::handle_start_transaction;
pub use handle_status_notification::handle_status_notification;
pub use handle_stop_transaction::handle_stop_transaction;

/// Deserialize a request; a shape the types reject is a formation violation.
fn parse_request<T: DeserializeOwned>(action: &str, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| {
        ProtocolError::formation_violation(format!("Invalid {} payload: {}", action, e))
    })
}

fn to_payload<T: Serialize>(response: &T) -> Result<Value, ProtocolError> {
    serde_json::to_value(response)
        .map_err(|e| ProtocolError::internal(format!("Failed to serialize response: {}", e)))
}

/// The OCPP wire spelling of a `rust_ocpp` enum value.
fn wire_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(s)) => s,
        _ => String::new(),
    }
}
