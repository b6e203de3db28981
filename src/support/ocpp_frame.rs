//! OCPP-J message framing
//!
//! Every message on a charger connection is a JSON array whose first element
//! is the message type id:
//!
//! - **Call**       `[2, "<messageId>", "<action>", {<payload>}]`
//! - **CallResult** `[3, "<messageId>", {<payload>}]`
//! - **CallError**  `[4, "<messageId>", "<errorCode>", "<errorDescription>", {<errorDetails>}]`

use serde_json::Value;
use thiserror::Error;

use super::errors::{ProtocolError, RpcErrorCode};

// ── Message-type constants ─────────────────────────────────────

const MSG_TYPE_CALL: u64 = 2;
const MSG_TYPE_CALL_RESULT: u64 = 3;
const MSG_TYPE_CALL_ERROR: u64 = 4;

// ── OcppFrame ──────────────────────────────────────────────────

/// A parsed OCPP-J frame.
#[derive(Debug, Clone, PartialEq)]
pub enum OcppFrame {
    /// `[2, messageId, action, payload]`
    Call {
        message_id: String,
        action: String,
        payload: Value,
    },
    /// `[3, messageId, payload]`
    CallResult { message_id: String, payload: Value },
    /// `[4, messageId, errorCode, errorDescription, errorDetails]`
    CallError {
        message_id: String,
        error_code: String,
        error_description: String,
        error_details: Value,
    },
}

impl OcppFrame {
    // ── Parsing ────────────────────────────────────────────

    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, OcppFrameError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| OcppFrameError::InvalidJson(e.to_string()))?;
        let arr = value.as_array().ok_or(OcppFrameError::NotAnArray)?;

        let msg_type = arr
            .first()
            .ok_or(OcppFrameError::EmptyArray)?
            .as_u64()
            .ok_or(OcppFrameError::InvalidMessageType)?;

        match msg_type {
            MSG_TYPE_CALL => Self::parse_call(arr),
            MSG_TYPE_CALL_RESULT => Self::parse_call_result(arr),
            MSG_TYPE_CALL_ERROR => Self::parse_call_error(arr),
            _ => Err(OcppFrameError::UnknownMessageType(msg_type)),
        }
    }

    fn message_id_at(arr: &[Value]) -> Result<String, OcppFrameError> {
        let id = arr
            .get(1)
            .and_then(Value::as_str)
            .ok_or(OcppFrameError::FieldTypeMismatch("messageId must be a string"))?;
        if id.is_empty() || id.len() > 36 {
            return Err(OcppFrameError::FieldTypeMismatch(
                "messageId must be 1..=36 characters",
            ));
        }
        Ok(id.to_string())
    }

    fn parse_call(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 4 {
            return Err(OcppFrameError::MissingFields {
                expected: 4,
                got: arr.len(),
            });
        }

        let message_id = Self::message_id_at(arr)?;
        let action = arr[2]
            .as_str()
            .ok_or(OcppFrameError::FieldTypeMismatch("action must be a string"))?
            .to_string();

        Ok(Self::Call {
            message_id,
            action,
            payload: arr[3].clone(),
        })
    }

    fn parse_call_result(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 2 {
            return Err(OcppFrameError::MissingFields {
                expected: 3,
                got: arr.len(),
            });
        }

        let message_id = Self::message_id_at(arr)?;
        // Some firmwares send `null` or drop the payload of empty results.
        let payload = match arr.get(2) {
            Some(Value::Null) | None => Value::Object(Default::default()),
            Some(v) => v.clone(),
        };

        Ok(Self::CallResult {
            message_id,
            payload,
        })
    }

    fn parse_call_error(arr: &[Value]) -> Result<Self, OcppFrameError> {
        if arr.len() < 3 {
            return Err(OcppFrameError::MissingFields {
                expected: 5,
                got: arr.len(),
            });
        }

        let message_id = Self::message_id_at(arr)?;
        let error_code = arr[2]
            .as_str()
            .unwrap_or(RpcErrorCode::GenericError.as_str())
            .to_string();
        let error_description = arr
            .get(3)
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let error_details = arr
            .get(4)
            .cloned()
            .unwrap_or(Value::Object(Default::default()));

        Ok(Self::CallError {
            message_id,
            error_code,
            error_description,
            error_details,
        })
    }

    /// Best-effort recovery of the message id of a broken CALL so the peer
    /// can still be answered with a CALLERROR.
    pub fn recover_call_id(text: &str) -> Option<String> {
        let value: Value = serde_json::from_str(text).ok()?;
        let arr = value.as_array()?;
        if arr.first()?.as_u64()? != MSG_TYPE_CALL {
            return None;
        }
        arr.get(1)?.as_str().map(str::to_string)
    }

    // ── Serialization ──────────────────────────────────────

    /// Serialize this frame to its wire text.
    pub fn serialize(&self) -> String {
        let arr = match self {
            Self::Call {
                message_id,
                action,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL),
                Value::from(message_id.as_str()),
                Value::from(action.as_str()),
                payload.clone(),
            ]),

            Self::CallResult {
                message_id,
                payload,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_RESULT),
                Value::from(message_id.as_str()),
                payload.clone(),
            ]),

            Self::CallError {
                message_id,
                error_code,
                error_description,
                error_details,
            } => Value::Array(vec![
                Value::from(MSG_TYPE_CALL_ERROR),
                Value::from(message_id.as_str()),
                Value::from(error_code.as_str()),
                Value::from(error_description.as_str()),
                error_details.clone(),
            ]),
        };

        arr.to_string()
    }

    // ── Helpers ────────────────────────────────────────────

    pub fn message_id(&self) -> &str {
        match self {
            Self::Call { message_id, .. }
            | Self::CallResult { message_id, .. }
            | Self::CallError { message_id, .. } => message_id,
        }
    }

    /// Frame a handler failure as the CALLERROR answering `message_id`.
    pub fn error_response(message_id: impl Into<String>, error: &ProtocolError) -> Self {
        Self::CallError {
            message_id: message_id.into(),
            error_code: error.code.as_str().to_string(),
            error_description: error.description.clone(),
            error_details: error
                .details
                .clone()
                .unwrap_or(Value::Object(Default::default())),
        }
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Self::Call { .. })
    }
}

// ── Errors ─────────────────────────────────────────────────────

/// Errors that can occur when parsing an OCPP-J frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OcppFrameError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),
    #[error("OCPP message is not a JSON array")]
    NotAnArray,
    #[error("Empty OCPP message array")]
    EmptyArray,
    #[error("Message type is not a number")]
    InvalidMessageType,
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
    #[error("Expected at least {expected} fields, got {got}")]
    MissingFields { expected: usize, got: usize },
    #[error("Field type mismatch: {0}")]
    FieldTypeMismatch(&'static str),
}

impl OcppFrameError {
    /// CALLERROR code used when a broken CALL can still be answered.
    pub fn rpc_code(&self) -> RpcErrorCode {
        match self {
            Self::InvalidJson(_) | Self::NotAnArray | Self::EmptyArray => {
                RpcErrorCode::FormationViolation
            }
            _ => RpcErrorCode::ProtocolError,
        }
    }
}
