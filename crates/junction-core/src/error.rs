//! Error types
//!
//! `RoutingError` is what the router reports to peers; every variant maps
//! to a protocol error URI. `ProtocolError` covers frames that could not be
//! decoded at all.

use serde_json::Value;
use thiserror::Error;

use crate::ids::Id;

/// Routing-level failures reported back to peers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Authentication denied: {0}")]
    AuthenticationDenied(String),

    #[error("Not authorized to {action} '{uri}'")]
    AuthorizationDenied { action: String, uri: String },

    #[error("No such realm: {0}")]
    NoSuchRealm(String),

    #[error("No such subscription: {0}")]
    NoSuchSubscription(Id),

    #[error("No such registration: {0}")]
    NoSuchRegistration(Id),

    #[error("No such procedure: {0}")]
    NoSuchProcedure(String),

    #[error("Procedure already exists: {0}")]
    ProcedureAlreadyExists(String),

    #[error("Procedure '{0}' is registered with a different invocation policy")]
    InvocationPolicyMismatch(String),

    #[error("Invalid URI: '{0}'")]
    InvalidUri(String),

    #[error("Call timed out")]
    Timeout,

    #[error("Call canceled: {0}")]
    Canceled(String),

    #[error("Callee unavailable")]
    Unavailable,

    #[error("No such session: {0}")]
    NoSuchSession(Id),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Realm already exists: {0}")]
    RealmExists(String),

    #[error("Realm '{realm}' still has {sessions} attached sessions")]
    RealmNotEmpty { realm: String, sessions: usize },
}

impl RoutingError {
    /// Protocol error URI carried in ERROR / ABORT messages
    pub fn uri(&self) -> &'static str {
        match self {
            RoutingError::ProtocolViolation(_) => "wamp.error.protocol_violation",
            RoutingError::AuthenticationDenied(_) => "wamp.error.authentication_failed",
            RoutingError::AuthorizationDenied { .. } => "wamp.error.not_authorized",
            RoutingError::NoSuchRealm(_) => "wamp.error.no_such_realm",
            RoutingError::NoSuchSubscription(_) => "wamp.error.no_such_subscription",
            RoutingError::NoSuchRegistration(_) => "wamp.error.no_such_registration",
            RoutingError::NoSuchProcedure(_) => "wamp.error.no_such_procedure",
            RoutingError::ProcedureAlreadyExists(_) => "wamp.error.procedure_already_exists",
            RoutingError::InvocationPolicyMismatch(_) => {
                "wamp.error.procedure_exists_with_different_invocation_policy"
            }
            RoutingError::InvalidUri(_) => "wamp.error.invalid_uri",
            RoutingError::Timeout => "wamp.error.timeout",
            RoutingError::Canceled(_) => "wamp.error.canceled",
            RoutingError::Unavailable => "wamp.error.unavailable",
            RoutingError::NoSuchSession(_) => "wamp.error.no_such_session",
            RoutingError::InvalidArgument(_) => "wamp.error.invalid_argument",
            RoutingError::RealmExists(_) => "wamp.error.realm_exists",
            RoutingError::RealmNotEmpty { .. } => "wamp.error.realm_not_empty",
        }
    }

    /// Human readable explanation as positional payload
    pub fn args(&self) -> Vec<Value> {
        vec![Value::String(self.to_string())]
    }

    /// Create an authorization failure
    pub fn not_authorized(action: impl Into<String>, uri: impl Into<String>) -> Self {
        Self::AuthorizationDenied {
            action: action.into(),
            uri: uri.into(),
        }
    }
}

/// Frame decoding failures
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Unknown message type: {0}")]
    UnknownMessageType(u64),
}

impl ProtocolError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }
}

impl From<ProtocolError> for RoutingError {
    fn from(err: ProtocolError) -> Self {
        RoutingError::ProtocolViolation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_uris() {
        assert_eq!(
            RoutingError::NoSuchProcedure("com.x".into()).uri(),
            "wamp.error.no_such_procedure"
        );
        assert_eq!(RoutingError::Timeout.uri(), "wamp.error.timeout");
        assert_eq!(
            RoutingError::not_authorized("publish", "com.x").uri(),
            "wamp.error.not_authorized"
        );
    }

    #[test]
    fn test_protocol_error_becomes_violation() {
        let err: RoutingError = ProtocolError::UnknownMessageType(99).into();
        assert!(matches!(err, RoutingError::ProtocolViolation(_)));
        assert_eq!(err.args().len(), 1);
    }
}
