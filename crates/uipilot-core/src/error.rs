//! Error types for UIPilot.

use crate::session::SessionStatus;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

/// How loudly a failure must be reported.
///
/// `Critical` is reserved for safety interlock halts so operators can audit
/// them separately from ordinary flakiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A shared error type for the entire UIPilot workspace.
///
/// Step-local failures (`MalformedInference`, `ExecutionFailure`,
/// `CaptureUnavailable`, `InferenceUnavailable`) are resolved inside the step
/// pipeline; the remaining variants surface to callers.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum PilotError {
    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound { entity_type: String, id: String },

    /// IO error (file system operations)
    #[error("IO error: {message}")]
    Io { message: String },

    /// Data access error (repository/storage layer)
    #[error("Data access error: {0}")]
    DataAccess(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The inference response could not be turned into a single well-formed candidate.
    #[error("Malformed inference: {0}")]
    MalformedInference(String),

    /// The execution driver reported a failed attempt.
    #[error("Execution failure: {0}")]
    ExecutionFailure(String),

    /// The perception source could not produce a screen context.
    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    /// The inference service could not be reached or answered with an error.
    #[error("Inference unavailable: {0}")]
    InferenceUnavailable(String),

    /// The safety interlock stopped a payment-intent step.
    #[error("Payment intent blocked: {reason}")]
    PaymentIntentBlocked { reason: String },

    /// A lifecycle request that the current session status does not allow.
    #[error("Invalid transition: cannot {request} a session that is {from}")]
    InvalidTransition {
        from: SessionStatus,
        request: String,
    },

    /// The owning user has not granted automation consent.
    #[error("Consent required for user '{user_id}'")]
    ConsentRequired { user_id: String },

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PilotError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.to_string(),
            id: id.into(),
        }
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn data_access(message: impl Into<String>) -> Self {
        Self::DataAccess(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedInference(message.into())
    }

    pub fn payment_blocked(reason: impl Into<String>) -> Self {
        Self::PaymentIntentBlocked {
            reason: reason.into(),
        }
    }

    pub fn invalid_transition(from: SessionStatus, request: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from,
            request: request.into(),
        }
    }

    // ============================================================================
    // Classification
    // ============================================================================

    /// Returns true for step-local failures the retry coordinator may absorb.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::MalformedInference(_)
                | Self::ExecutionFailure(_)
                | Self::CaptureUnavailable(_)
                | Self::InferenceUnavailable(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_invalid_transition(&self) -> bool {
        matches!(self, Self::InvalidTransition { .. })
    }

    pub fn is_payment_block(&self) -> bool {
        matches!(self, Self::PaymentIntentBlocked { .. })
    }

    /// Severity used when this error ends up in logs or on a halted session.
    pub fn severity(&self) -> Severity {
        match self {
            Self::PaymentIntentBlocked { .. } => Severity::Critical,
            Self::MalformedInference(_)
            | Self::ExecutionFailure(_)
            | Self::CaptureUnavailable(_)
            | Self::InferenceUnavailable(_) => Severity::Warning,
            Self::InvalidTransition { .. } | Self::ConsentRequired { .. } | Self::NotFound { .. } => {
                Severity::Info
            }
            _ => Severity::Error,
        }
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for PilotError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for PilotError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::de::Error> for PilotError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for PilotError {
    fn from(err: toml::ser::Error) -> Self {
        Self::Serialization {
            format: "TOML".to_string(),
            message: err.to_string(),
        }
    }
}

impl From<anyhow::Error> for PilotError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

/// A type alias for `Result<T, PilotError>`.
pub type Result<T> = std::result::Result<T, PilotError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_block_is_critical_and_not_retryable() {
        let err = PilotError::payment_blocked("target 'Confirm Payment'");
        assert_eq!(err.severity(), Severity::Critical);
        assert!(!err.is_retryable());
        assert!(err.is_payment_block());
    }

    #[test]
    fn step_local_failures_are_retryable() {
        assert!(PilotError::malformed("no candidates").is_retryable());
        assert!(PilotError::CaptureUnavailable("display asleep".into()).is_retryable());
        assert!(PilotError::InferenceUnavailable("503".into()).is_retryable());
        assert!(PilotError::ExecutionFailure("timeout".into()).is_retryable());
        assert!(!PilotError::config("bad").is_retryable());
    }

    #[test]
    fn invalid_transition_message_names_status_and_request() {
        let err = PilotError::invalid_transition(SessionStatus::Completed, "pause");
        assert_eq!(
            err.to_string(),
            "Invalid transition: cannot pause a session that is completed"
        );
    }
}
