//! Retry coordinator.
//!
//! Decides what happens after each attempt of a step. The coordinator is
//! pure: it receives the current per-step failure count and returns the new
//! count with a decision, leaving the count itself to the session registry.

use crate::collaborator::{ExecutionOutcome, FailureClass};
use crate::config::PilotConfig;
use crate::error::PilotError;
use std::time::Duration;

/// What the engine must do next with the current step.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryDecision {
    /// The attempt succeeded; advance `current_step`.
    Advance,
    /// Try the same step again after `delay`.
    Retry { attempt: u32, delay: Duration },
    /// `max_retries` reached; hand over to an operator or fail the session.
    Escalate { reason: String },
    /// The failure cannot be fixed by retrying.
    Fatal { reason: String },
}

/// The coordinator's answer: new failure count plus decision.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAssessment {
    pub failures: u32,
    pub decision: RetryDecision,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    pub fn from_config(config: &PilotConfig) -> Self {
        Self {
            max_retries: config.max_retries.max(1),
            backoff_base: Duration::from_millis(config.retry_backoff_ms),
            backoff_max: Duration::from_millis(config.retry_backoff_max_ms),
        }
    }

    /// Exponential backoff after `failures` consecutive failures, clamped.
    pub fn backoff(&self, failures: u32) -> Duration {
        if self.backoff_base.is_zero() || failures == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(failures - 1);
        self.backoff_base
            .saturating_mul(factor)
            .min(self.backoff_max.max(self.backoff_base))
    }
}

#[derive(Debug, Clone)]
pub struct RetryCoordinator {
    policy: RetryPolicy,
}

impl RetryCoordinator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Assesses an execution outcome for the current step.
    pub fn assess(&self, failures: u32, outcome: &ExecutionOutcome) -> RetryAssessment {
        match outcome.failure {
            None => RetryAssessment {
                failures: 0,
                decision: RetryDecision::Advance,
            },
            Some(FailureClass::Fatal) => RetryAssessment {
                failures: failures + 1,
                decision: RetryDecision::Fatal {
                    reason: outcome
                        .error
                        .clone()
                        .unwrap_or_else(|| "execution driver reported a fatal failure".into()),
                },
            },
            Some(class) => {
                let detail = outcome
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("{class:?} execution failure").to_lowercase());
                self.count_failure(failures, detail)
            }
        }
    }

    /// Assesses a step-local error raised before execution (capture,
    /// inference or translation). Such errors share the step's counter.
    pub fn assess_error(&self, failures: u32, error: &PilotError) -> RetryAssessment {
        if error.is_retryable() {
            self.count_failure(failures, error.to_string())
        } else {
            RetryAssessment {
                failures: failures + 1,
                decision: RetryDecision::Fatal {
                    reason: error.to_string(),
                },
            }
        }
    }

    fn count_failure(&self, failures: u32, detail: String) -> RetryAssessment {
        let failures = failures + 1;
        let decision = if failures < self.policy.max_retries {
            RetryDecision::Retry {
                attempt: failures + 1,
                delay: self.policy.backoff(failures),
            }
        } else {
            RetryDecision::Escalate {
                reason: format!(
                    "step failed {failures} time(s), last error: {detail}"
                ),
            }
        };
        RetryAssessment { failures, decision }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator(max: u32) -> RetryCoordinator {
        RetryCoordinator::new(RetryPolicy::new(max))
    }

    #[test]
    fn success_resets_the_counter() {
        let assessment = coordinator(3).assess(2, &ExecutionOutcome::success(Duration::from_millis(5)));
        assert_eq!(assessment.failures, 0);
        assert_eq!(assessment.decision, RetryDecision::Advance);
    }

    #[test]
    fn retries_until_max_then_escalates() {
        let coordinator = coordinator(3);
        let failure = ExecutionOutcome::transient("element not found");

        let first = coordinator.assess(0, &failure);
        assert_eq!(first.failures, 1);
        assert!(matches!(first.decision, RetryDecision::Retry { attempt: 2, .. }));

        let second = coordinator.assess(first.failures, &failure);
        assert_eq!(second.failures, 2);
        assert!(matches!(second.decision, RetryDecision::Retry { attempt: 3, .. }));

        let third = coordinator.assess(second.failures, &failure);
        assert_eq!(third.failures, 3);
        match third.decision {
            RetryDecision::Escalate { reason } => assert!(reason.contains("element not found")),
            other => panic!("expected escalation, got {other:?}"),
        }
    }

    #[test]
    fn fatal_failure_skips_retries() {
        let outcome = ExecutionOutcome::failure(FailureClass::Fatal, Duration::ZERO, "window closed");
        assert!(matches!(
            coordinator(3).assess(0, &outcome).decision,
            RetryDecision::Fatal { .. }
        ));
    }

    #[test]
    fn timeouts_are_retried_like_transient_failures() {
        let outcome = ExecutionOutcome::failure(FailureClass::Timeout, Duration::from_secs(10), "timed out");
        assert!(matches!(
            coordinator(2).assess(0, &outcome).decision,
            RetryDecision::Retry { .. }
        ));
    }

    #[test]
    fn pre_execution_errors_share_the_counter() {
        let coordinator = coordinator(2);
        let malformed = PilotError::malformed("no JSON");
        let first = coordinator.assess_error(0, &malformed);
        assert!(matches!(first.decision, RetryDecision::Retry { .. }));
        let second = coordinator.assess_error(first.failures, &malformed);
        assert!(matches!(second.decision, RetryDecision::Escalate { .. }));
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(350),
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(350));
    }
}
