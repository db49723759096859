//! Operator hand-over for escalated steps.

use async_trait::async_trait;
use uipilot_core::session::Session;

/// What an operator decided for a step that exhausted its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterventionDecision {
    /// Reset the failure counter and attempt the step again.
    Retry,
    /// Fail the session.
    Abort,
}

/// Receives steps that reached `max_retries`.
///
/// Only consulted when the engine is not running unattended.
#[async_trait]
pub trait InterventionHandler: Send + Sync {
    async fn intervene(&self, session: &Session, step: u32, reason: &str) -> InterventionDecision;
}
