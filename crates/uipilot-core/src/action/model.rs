//! Action domain model.
//!
//! `ActionCandidate` is the validated, typed form of one proposal from the
//! inference service. `ActionRecord` is the audit entry written for the
//! candidate that was actually selected at a step.

use crate::collaborator::ExecutionOutcome;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// The fixed set of UI actions the pilot can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Wait,
    DoubleClick,
    RightClick,
}

impl ActionKind {
    /// Pointer actions need coordinates to be executable.
    pub fn requires_coordinates(self) -> bool {
        matches!(self, Self::Click | Self::DoubleClick | Self::RightClick)
    }
}

/// Screen position in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coordinates {
    pub x: i32,
    pub y: i32,
}

/// What an action is aimed at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTarget {
    /// Visible label or description of the element.
    pub element: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
}

impl ActionTarget {
    pub fn new(element: impl Into<String>) -> Self {
        Self {
            element: element.into(),
            coordinates: None,
        }
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.coordinates = Some(Coordinates { x, y });
        self
    }
}

/// Kind-specific parameters, tagged by action kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionInput {
    Click,
    DoubleClick,
    RightClick,
    Type { text: String },
    Scroll { amount: i32 },
    Wait { duration_ms: u64 },
}

impl ActionInput {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Click => ActionKind::Click,
            Self::DoubleClick => ActionKind::DoubleClick,
            Self::RightClick => ActionKind::RightClick,
            Self::Type { .. } => ActionKind::Type,
            Self::Scroll { .. } => ActionKind::Scroll,
            Self::Wait { .. } => ActionKind::Wait,
        }
    }

    /// Text that would be typed, if any.
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Type { text } => Some(text),
            _ => None,
        }
    }
}

/// A confidence score guaranteed to lie in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Confidence(f64);

impl Confidence {
    /// Returns `None` for NaN or values outside `[0, 1]`.
    pub fn new(value: f64) -> Option<Self> {
        (0.0..=1.0).contains(&value).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Confidence {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("confidence {value} is outside [0, 1]"))
    }
}

impl From<Confidence> for f64 {
    fn from(confidence: Confidence) -> Self {
        confidence.0
    }
}

/// A proposed, not-yet-executed UI action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    #[serde(flatten)]
    pub input: ActionInput,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActionTarget>,
    pub confidence: Confidence,
    #[serde(default)]
    pub reasoning: String,
}

impl ActionCandidate {
    pub fn new(input: ActionInput, target: Option<ActionTarget>, confidence: Confidence) -> Self {
        Self {
            input,
            target,
            confidence,
            reasoning: String::new(),
        }
    }

    pub fn with_reasoning(mut self, reasoning: impl Into<String>) -> Self {
        self.reasoning = reasoning.into();
        self
    }

    pub fn kind(&self) -> ActionKind {
        self.input.kind()
    }

    /// Label of the targeted element, if the candidate has a target.
    pub fn label(&self) -> Option<&str> {
        self.target.as_ref().map(|t| t.element.as_str())
    }
}

/// Execution status of an action record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Success,
    Failed,
}

/// Append-only audit entry for the candidate selected at a step.
///
/// A record is created `Pending` and settled exactly once, either by an
/// execution outcome or by the safety interlock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    pub id: String,
    pub session_id: String,
    pub step: u32,
    pub kind: ActionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ActionTarget>,
    pub status: ExecutionStatus,
    /// Duration of the deciding execution attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_ms: Option<u64>,
    /// Number of execution attempts made for this step.
    #[serde(default)]
    pub attempts: u32,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Set when the safety interlock refused the candidate.
    #[serde(default)]
    pub safety_blocked: bool,
}

impl ActionRecord {
    /// Creates the pending record for a selected candidate.
    pub fn pending(session_id: impl Into<String>, step: u32, candidate: &ActionCandidate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            step,
            kind: candidate.kind(),
            target: candidate.target.clone(),
            status: ExecutionStatus::Pending,
            execution_ms: None,
            attempts: 0,
            timestamp: Utc::now(),
            error_message: None,
            safety_blocked: false,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.status != ExecutionStatus::Pending
    }

    /// Settles a pending record with the deciding execution outcome.
    pub fn settle(mut self, outcome: &ExecutionOutcome, attempts: u32) -> Self {
        debug_assert!(!self.is_settled(), "action record settled twice");
        self.status = if outcome.succeeded() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        };
        self.execution_ms = Some(outcome.duration.as_millis() as u64);
        self.error_message = outcome.error.clone();
        self.attempts = attempts;
        self
    }

    /// Settles a pending record as refused by the safety interlock.
    pub fn block(mut self, reason: impl Into<String>) -> Self {
        debug_assert!(!self.is_settled(), "action record settled twice");
        self.status = ExecutionStatus::Failed;
        self.error_message = Some(reason.into());
        self.safety_blocked = true;
        self
    }
}
