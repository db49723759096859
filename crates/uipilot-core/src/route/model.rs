//! Route domain model.
//!
//! A route is the audit trail of a session: what the model proposed at each
//! step (`planned`) and what was actually attempted (`actual`).

use crate::action::{ActionCandidate, ActionRecord, ExecutionStatus};
use crate::session::SessionStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Ranked candidates proposed for one step, including the ones not used.
///
/// An empty candidate list records the task-complete signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlannedStep {
    pub step: u32,
    pub candidates: Vec<ActionCandidate>,
    pub recorded_at: DateTime<Utc>,
}

impl PlannedStep {
    pub fn new(step: u32, candidates: Vec<ActionCandidate>) -> Self {
        Self {
            step,
            candidates,
            recorded_at: Utc::now(),
        }
    }

    pub fn signals_completion(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// Terminal marker for sessions that ended without a deciding action record
/// (cancellation, or perception/inference exhaustion).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteClosure {
    pub status: SessionStatus,
    pub reason: String,
    pub closed_at: DateTime<Utc>,
}

impl RouteClosure {
    pub fn new(status: SessionStatus, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            closed_at: Utc::now(),
        }
    }
}

/// Full planned/actual sequences recorded for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub session_id: String,
    #[serde(default)]
    pub planned: Vec<PlannedStep>,
    #[serde(default)]
    pub actual: Vec<ActionRecord>,
    #[serde(default)]
    pub closure: Option<RouteClosure>,
}

impl Route {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            planned: Vec::new(),
            actual: Vec::new(),
            closure: None,
        }
    }

    pub fn planned_for(&self, step: u32) -> Option<&PlannedStep> {
        self.planned.iter().find(|p| p.step == step)
    }

    pub fn action_for(&self, step: u32) -> Option<&ActionRecord> {
        self.actual.iter().find(|a| a.step == step)
    }

    pub fn last_planned_step(&self) -> Option<u32> {
        self.planned.last().map(|p| p.step)
    }

    pub fn stats(&self) -> RouteStats {
        let succeeded = self
            .actual
            .iter()
            .filter(|a| a.status == ExecutionStatus::Success)
            .count();
        let failed = self
            .actual
            .iter()
            .filter(|a| a.status == ExecutionStatus::Failed)
            .count();
        RouteStats {
            planned_steps: self.planned.len(),
            attempted: self.actual.len(),
            succeeded,
            failed,
            safety_blocks: self.actual.iter().filter(|a| a.safety_blocked).count(),
        }
    }
}

/// Success accounting over one or more routes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteStats {
    pub planned_steps: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub safety_blocks: usize,
}

impl RouteStats {
    /// Successful actions divided by attempted actions; `None` before any attempt.
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempted > 0).then(|| self.succeeded as f64 / self.attempted as f64)
    }

    pub fn merge(self, other: RouteStats) -> RouteStats {
        RouteStats {
            planned_steps: self.planned_steps + other.planned_steps,
            attempted: self.attempted + other.attempted,
            succeeded: self.succeeded + other.succeeded,
            failed: self.failed + other.failed,
            safety_blocks: self.safety_blocks + other.safety_blocks,
        }
    }
}
