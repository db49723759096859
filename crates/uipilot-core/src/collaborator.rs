//! Contracts for the external collaborators of the session engine.
//!
//! Perception, inference and execution are the only places a session step
//! waits on the outside world. Concrete capture and input-injection
//! mechanisms live outside this workspace and plug in through these traits.

use crate::action::ActionCandidate;
use crate::error::Result;
use crate::session::Session;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A perception snapshot: an opaque screenshot plus textual context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScreenContext {
    /// Encoded image bytes (PNG unless `mime_type` says otherwise).
    #[serde(default, skip_serializing)]
    pub image: Vec<u8>,
    #[serde(default = "default_mime")]
    pub mime_type: String,
    /// Textual description of what is on screen (window title, OCR, ...).
    #[serde(default)]
    pub description: String,
}

fn default_mime() -> String {
    "image/png".to_string()
}

impl ScreenContext {
    pub fn new(image: Vec<u8>, description: impl Into<String>) -> Self {
        Self {
            image,
            mime_type: default_mime(),
            description: description.into(),
        }
    }

    /// A context carrying only a textual description.
    pub fn describe(description: impl Into<String>) -> Self {
        Self::new(Vec::new(), description)
    }
}

/// Unvalidated text returned by the inference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawResponse(pub String);

impl RawResponse {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RawResponse {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RawResponse {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How a failed execution attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Worth another attempt.
    Transient,
    /// The driver gave up waiting; retried like a transient failure.
    Timeout,
    /// Retrying cannot help (e.g. the target window is gone).
    Fatal,
}

/// Result of a single execution attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    /// `None` on success.
    #[serde(default)]
    pub failure: Option<FailureClass>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    #[serde(default)]
    pub error: Option<String>,
}

impl ExecutionOutcome {
    pub fn success(duration: Duration) -> Self {
        Self {
            failure: None,
            duration,
            error: None,
        }
    }

    pub fn failure(class: FailureClass, duration: Duration, error: impl Into<String>) -> Self {
        Self {
            failure: Some(class),
            duration,
            error: Some(error.into()),
        }
    }

    pub fn transient(error: impl Into<String>) -> Self {
        Self::failure(FailureClass::Transient, Duration::ZERO, error)
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Produces screen snapshots for a session.
#[async_trait]
pub trait PerceptionSource: Send + Sync {
    /// Captures the current screen.
    ///
    /// # Errors
    ///
    /// `PilotError::CaptureUnavailable` when no snapshot can be taken.
    async fn capture(&self, session: &Session) -> Result<ScreenContext>;
}

/// Vision-capable model that proposes the next UI actions.
#[async_trait]
pub trait InferenceService: Send + Sync {
    /// Asks the model what to do next on `context` to make progress on `task`.
    ///
    /// # Errors
    ///
    /// `PilotError::InferenceUnavailable` when the service cannot answer.
    /// Malformed content is not an error here; it is rejected by the translator.
    async fn infer(&self, context: &ScreenContext, task: &str) -> Result<RawResponse>;

    /// Asks whether `context` shows a payment screen. Services without a
    /// dedicated check report `false` and leave the decision to the keyword
    /// guard.
    ///
    /// # Errors
    ///
    /// Any error is treated by the engine as a positive detection.
    async fn detect_payment_screen(&self, _context: &ScreenContext) -> Result<bool> {
        Ok(false)
    }
}

/// Injects input into the target application.
///
/// Timeouts are the driver's responsibility and must be reported as a
/// `FailureClass::Timeout` outcome rather than by hanging.
#[async_trait]
pub trait ExecutionDriver: Send + Sync {
    async fn execute(&self, candidate: &ActionCandidate) -> ExecutionOutcome;
}
