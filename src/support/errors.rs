use serde_json::Value;
use thiserror::Error;

// ── CALLERROR codes ────────────────────────────────────────────

/// Error codes allowed in an OCPP 1.6-J CALLERROR frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcErrorCode {
    NotImplemented,
    NotSupported,
    InternalError,
    ProtocolError,
    SecurityError,
    FormationViolation,
    PropertyConstraintViolation,
    OccurenceConstraintViolation,
    TypeConstraintViolation,
    GenericError,
}

impl RpcErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotImplemented => "NotImplemented",
            Self::NotSupported => "NotSupported",
            Self::InternalError => "InternalError",
            Self::ProtocolError => "ProtocolError",
            Self::SecurityError => "SecurityError",
            Self::FormationViolation => "FormationViolation",
            Self::PropertyConstraintViolation => "PropertyConstraintViolation",
            // OCPP 1.6 spells it with one "r".
            Self::OccurenceConstraintViolation => "OccurenceConstraintViolation",
            Self::TypeConstraintViolation => "TypeConstraintViolation",
            Self::GenericError => "GenericError",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "NotImplemented" => Self::NotImplemented,
            "NotSupported" => Self::NotSupported,
            "InternalError" => Self::InternalError,
            "ProtocolError" => Self::ProtocolError,
            "SecurityError" => Self::SecurityError,
            "FormationViolation" => Self::FormationViolation,
            "PropertyConstraintViolation" => Self::PropertyConstraintViolation,
            "OccurenceConstraintViolation" | "OccurrenceConstraintViolation" => {
                Self::OccurenceConstraintViolation
            }
            "TypeConstraintViolation" => Self::TypeConstraintViolation,
            _ => Self::GenericError,
        }
    }
}

impl std::fmt::Display for RpcErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── ProtocolError ──────────────────────────────────────────────

/// A failure that is reported back to the peer as a CALLERROR.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}: {description}")]
pub struct ProtocolError {
    pub code: RpcErrorCode,
    pub description: String,
    pub details: Option<Value>,
}

impl ProtocolError {
    pub fn new(code: RpcErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_implemented(action: &str) -> Self {
        Self::new(
            RpcErrorCode::NotImplemented,
            format!("Action {} not implemented", action),
        )
    }

    pub fn formation_violation(description: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::FormationViolation, description)
    }

    pub fn internal(description: impl Into<String>) -> Self {
        Self::new(RpcErrorCode::InternalError, description)
    }
}

// ── BackendError ───────────────────────────────────────────────

/// Failures talking to the backend business API.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// The backend explicitly refused (404 / 403).
    #[error("Rejected by backend (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Backend HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Backend request timed out")]
    Timeout,

    #[error("Backend unreachable: {0}")]
    Network(String),

    #[error("Unexpected backend response: {0}")]
    Decode(String),
}

impl BackendError {
    /// Everything except an explicit rejection means "could not get an answer".
    pub fn is_unavailable(&self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }

    /// Short label used for metrics and log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Rejected { .. } => "rejected",
            Self::Http { .. } => "http",
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
        }
    }
}

// ── CommandError ───────────────────────────────────────────────

/// Failures of a server-initiated call to a charger.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("Charge point not connected: {0}")]
    NotConnected(String),

    #[error("Failed to send: {0}")]
    SendFailed(String),

    #[error("Response timeout")]
    Timeout,

    #[error("Connection closed while awaiting response")]
    ConnectionClosed,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("CallError {code}: {description}")]
    CallError { code: String, description: String },
}

impl CommandError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotConnected(_) => "not_connected",
            Self::SendFailed(_) => "send_failed",
            Self::Timeout => "timeout",
            Self::ConnectionClosed => "connection_closed",
            Self::InvalidResponse(_) => "invalid_response",
            Self::CallError { .. } => "call_error",
        }
    }
}

// ── SessionError ───────────────────────────────────────────────

/// Error taxonomy of the charger-session engine.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Denied by backend: {0}")]
    AuthDenied(String),

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("{action} rejected by charger with status {status}")]
    HardwareRejected { action: &'static str, status: String },

    #[error(transparent)]
    Command(#[from] CommandError),
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Rejected { message, .. } => Self::AuthDenied(message),
            other => Self::BackendUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rpc_error_code_roundtrips_through_text() {
        for code in [
            RpcErrorCode::NotImplemented,
            RpcErrorCode::FormationViolation,
            RpcErrorCode::OccurenceConstraintViolation,
            RpcErrorCode::InternalError,
        ] {
            assert_eq!(RpcErrorCode::parse(code.as_str()), code);
        }
        assert_eq!(RpcErrorCode::parse("Whatever"), RpcErrorCode::GenericError);
    }

    #[test]
    fn only_rejection_is_not_unavailable() {
        assert!(!BackendError::Rejected {
            status: 404,
            message: "Charger not found".into()
        }
        .is_unavailable());
        assert!(BackendError::Timeout.is_unavailable());
        assert!(BackendError::Http {
            status: 503,
            message: String::new()
        }
        .is_unavailable());
    }

    #[test]
    fn backend_errors_map_onto_session_taxonomy() {
        let denied: SessionError = BackendError::Rejected {
            status: 403,
            message: "disabled".into(),
        }
        .into();
        assert!(matches!(denied, SessionError::AuthDenied(_)));

        let unavailable: SessionError = BackendError::Network("refused".into()).into();
        assert!(matches!(unavailable, SessionError::BackendUnavailable(_)));
    }
}
