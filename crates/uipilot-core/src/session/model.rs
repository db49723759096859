//! Session domain model.
//!
//! A session is one end-to-end automation run against a target application.

use crate::error::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;
use uuid::Uuid;

/// Lifecycle status of a session.
///
/// `Completed`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        matches!(
            (self, next),
            (Running, Paused)
                | (Paused, Running)
                | (Running, Cancelled)
                | (Paused, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
        )
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
pub enum HaltCode {
    /// The safety interlock refused a payment-intent step.
    PaymentIntentBlocked,
    /// A step failed `max_retries` times and nobody intervened.
    RetriesExhausted,
    /// The execution driver reported a non-retryable failure.
    FatalExecution,
    /// An operator chose to abort after escalation.
    InterventionAborted,
    /// Session state or its route could not be persisted.
    StorageUnavailable,
}

impl HaltCode {
    pub fn severity(self) -> Severity {
        match self {
            Self::PaymentIntentBlocked => Severity::Critical,
            _ => Severity::Error,
        }
    }
}

/// Human-readable reason attached to a halted session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HaltReason {
    pub code: HaltCode,
    pub message: String,
    pub severity: Severity,
    /// Step number that was being attempted when the session halted.
    pub step: u32,
}

impl HaltReason {
    pub fn new(code: HaltCode, step: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity: code.severity(),
            step,
        }
    }
}

/// Represents an automation session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Owning user reference.
    pub user_id: String,
    /// Target application name.
    pub app_name: String,
    /// What the run is supposed to accomplish.
    pub task_description: String,
    pub status: SessionStatus,
    /// Number of steps that completed successfully. Never decreases.
    pub current_step: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Present only when `status` is `Failed`.
    #[serde(default)]
    pub halt: Option<HaltReason>,
}

impl Session {
    /// Creates a fresh running session with a generated identifier.
    pub fn new(
        user_id: impl Into<String>,
        app_name: impl Into<String>,
        task_description: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            app_name: app_name.into(),
            task_description: task_description.into(),
            status: SessionStatus::Running,
            current_step: 0,
            created_at: Utc::now(),
            ended_at: None,
            halt: None,
        }
    }

    /// The step number the next pipeline run will attempt.
    pub fn next_step(&self) -> u32 {
        self.current_step + 1
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_transition() {
        for terminal in [
            SessionStatus::Completed,
            SessionStatus::Failed,
            SessionStatus::Cancelled,
        ] {
            for next in [
                SessionStatus::Running,
                SessionStatus::Paused,
                SessionStatus::Completed,
                SessionStatus::Failed,
                SessionStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
            }
        }
    }

    #[test]
    fn paused_session_can_only_resume_or_cancel() {
        let paused = SessionStatus::Paused;
        assert!(paused.can_transition_to(SessionStatus::Running));
        assert!(paused.can_transition_to(SessionStatus::Cancelled));
        assert!(!paused.can_transition_to(SessionStatus::Completed));
        assert!(!paused.can_transition_to(SessionStatus::Failed));
    }

    #[test]
    fn new_session_starts_running_at_step_zero() {
        let session = Session::new("user-1", "Deliveroo", "order item X");
        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.current_step, 0);
        assert_eq!(session.next_step(), 1);
        assert!(session.ended_at.is_none());
    }

    #[test]
    fn payment_halt_is_critical() {
        let halt = HaltReason::new(HaltCode::PaymentIntentBlocked, 4, "Confirm Payment");
        assert_eq!(halt.severity, Severity::Critical);
        let exhausted = HaltReason::new(HaltCode::RetriesExhausted, 2, "3 failures");
        assert_eq!(exhausted.severity, Severity::Error);
    }
}
