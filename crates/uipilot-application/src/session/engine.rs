use super::registry::{PendingControl, SessionRegistry, SessionSlot};
use crate::consent_service::ConsentService;
use crate::intervention::{InterventionDecision, InterventionHandler};
use crate::route_tracker::RouteTracker;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::Instrument;
use uipilot_core::action::ActionRecord;
use uipilot_core::collaborator::{ExecutionDriver, InferenceService, PerceptionSource, ScreenContext};
use uipilot_core::config::PilotConfig;
use uipilot_core::error::{PilotError, Result};
use uipilot_core::retry::{RetryCoordinator, RetryDecision, RetryPolicy};
use uipilot_core::route::{PlannedStep, RouteClosure};
use uipilot_core::safety::{SafetyGuard, SafetyVerdict};
use uipilot_core::session::{HaltCode, HaltReason, Session, SessionRepository, SessionStatus};
use uipilot_core::translator::{ActionTranslator, Translation};
use uipilot_core::user::UserRepository;
use uipilot_infrastructure::{InMemorySessionRepository, InMemoryTrackingSink, InMemoryUserRepository};

/// The three external systems a step talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub perception: Arc<dyn PerceptionSource>,
    pub inference: Arc<dyn InferenceService>,
    pub driver: Arc<dyn ExecutionDriver>,
}

/// How a single step ended.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// The action succeeded and `current_step` advanced.
    Advanced { attempts: u32 },
    /// The model reported the task as done.
    Completed,
    /// The session failed at this step.
    Halted(HaltReason),
    /// A cancel request stopped the retries of this step.
    Interrupted,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    pub step: u32,
    pub outcome: StepOutcome,
    /// Session state after the step boundary was applied.
    pub session: Session,
}

struct StepRun {
    outcome: StepOutcome,
    /// An action record or completion entry settles the step on the route.
    decided: bool,
    failures: u32,
}

enum Continuation {
    Again,
    Stop(StepOutcome),
}

struct EngineInner {
    registry: SessionRegistry,
    sessions: Arc<dyn SessionRepository>,
    tracker: RouteTracker,
    collaborators: Collaborators,
    translator: ActionTranslator,
    guard: SafetyGuard,
    retry: RetryCoordinator,
    intervention: Option<Arc<dyn InterventionHandler>>,
    consent: ConsentService,
    require_consent: bool,
}

/// Owns every live session and drives them through the step pipeline.
///
/// Steps of one session never overlap. Pause and cancel requests that
/// arrive while a step is in flight are held until the step finishes.
#[derive(Clone)]
pub struct SessionEngine {
    inner: Arc<EngineInner>,
}

pub struct SessionEngineBuilder {
    collaborators: Collaborators,
    config: PilotConfig,
    tracker: Option<RouteTracker>,
    sessions: Option<Arc<dyn SessionRepository>>,
    users: Option<Arc<dyn UserRepository>>,
    intervention: Option<Arc<dyn InterventionHandler>>,
}

impl SessionEngineBuilder {
    pub fn config(mut self, config: PilotConfig) -> Self {
        self.config = config;
        self
    }

    pub fn tracker(mut self, tracker: RouteTracker) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn session_repository(mut self, sessions: Arc<dyn SessionRepository>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn user_repository(mut self, users: Arc<dyn UserRepository>) -> Self {
        self.users = Some(users);
        self
    }

    /// Operator consulted on escalation. Ignored when `config.unattended` is set.
    pub fn intervention(mut self, handler: Arc<dyn InterventionHandler>) -> Self {
        self.intervention = Some(handler);
        self
    }

    pub fn build(self) -> SessionEngine {
        let config = self.config;
        if config.unattended && self.intervention.is_some() {
            tracing::warn!("Intervention handler ignored: engine runs unattended");
        }
        let intervention = self.intervention.filter(|_| !config.unattended);
        let tracker = self
            .tracker
            .unwrap_or_else(|| RouteTracker::new(Arc::new(InMemoryTrackingSink::new())));
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(InMemorySessionRepository::new()));
        let users = self
            .users
            .unwrap_or_else(|| Arc::new(InMemoryUserRepository::new()));

        SessionEngine {
            inner: Arc::new(EngineInner {
                registry: SessionRegistry::default(),
                sessions,
                tracker,
                collaborators: self.collaborators,
                translator: ActionTranslator::new(),
                guard: SafetyGuard::new(&config.safety),
                retry: RetryCoordinator::new(RetryPolicy::from_config(&config)),
                intervention,
                consent: ConsentService::new(users),
                require_consent: config.require_consent,
            }),
        }
    }
}

impl SessionEngine {
    pub fn builder(collaborators: Collaborators) -> SessionEngineBuilder {
        SessionEngineBuilder {
            collaborators,
            config: PilotConfig::default(),
            tracker: None,
            sessions: None,
            users: None,
            intervention: None,
        }
    }

    pub fn tracker(&self) -> &RouteTracker {
        &self.inner.tracker
    }

    pub fn consent(&self) -> &ConsentService {
        &self.inner.consent
    }

    /// Registers a running session without driving it.
    ///
    /// # Errors
    ///
    /// Returns `ConsentRequired` when consent is enforced and the user has
    /// not granted it.
    pub async fn create(
        &self,
        user_id: &str,
        app_name: &str,
        task_description: &str,
    ) -> Result<Session> {
        if self.inner.require_consent {
            self.inner.consent.ensure_consent(user_id).await?;
        }
        let session = Session::new(user_id, app_name, task_description);
        let slot = self.inner.registry.insert(session.clone()).await;
        self.persist(&slot).await?;
        tracing::info!(session_id = %session.id, user_id, app_name, "Session created");
        Ok(session)
    }

    /// Creates a session and spawns a task that drives it to a terminal state.
    pub async fn start(
        &self,
        user_id: &str,
        app_name: &str,
        task_description: &str,
    ) -> Result<String> {
        let session = self.create(user_id, app_name, task_description).await?;
        let engine = self.clone();
        let session_id = session.id.clone();
        tokio::spawn(async move { engine.drive(&session_id).await });
        Ok(session.id)
    }

    pub async fn status(&self, session_id: &str) -> Result<Session> {
        match self.inner.registry.get(session_id).await {
            Ok(slot) => Ok(slot.snapshot()),
            Err(e) if e.is_not_found() => self
                .inner
                .sessions
                .find_by_id(session_id)
                .await?
                .ok_or(e),
            Err(e) => Err(e),
        }
    }

    pub async fn list(&self, user_id: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        self.inner.sessions.list(user_id, limit).await
    }

    /// Failures recorded against the step currently being attempted.
    /// Finished sessions report zero.
    pub async fn failure_count(&self, session_id: &str) -> Result<u32> {
        match self.inner.registry.get(session_id).await {
            Ok(slot) => Ok(slot.state().failures),
            Err(e) if e.is_not_found() => self.status(session_id).await.map(|_| 0),
            Err(e) => Err(e),
        }
    }

    /// Sessions the engine still holds in memory.
    pub async fn live_sessions(&self) -> usize {
        self.inner.registry.len().await
    }

    /// Resolves once the session reaches a terminal status.
    pub async fn wait(&self, session_id: &str) -> Result<Session> {
        let slot = match self.inner.registry.get(session_id).await {
            Ok(slot) => slot,
            // only finished sessions leave the registry
            Err(e) if e.is_not_found() => return self.status(session_id).await,
            Err(e) => return Err(e),
        };
        let mut status = slot.subscribe();
        status
            .wait_for(|s| s.is_terminal())
            .await
            .map_err(|_| PilotError::internal("session status channel closed"))?;
        Ok(slot.snapshot())
    }

    pub async fn pause(&self, session_id: &str) -> Result<Session> {
        let slot = self.live_slot(session_id, "pause").await?;
        {
            let mut state = slot.state();
            let status = state.session.status;
            if !status.can_transition_to(SessionStatus::Paused) {
                return Err(PilotError::invalid_transition(status, "pause"));
            }
            if state.in_flight {
                if state.pending.is_none() {
                    state.pending = Some(PendingControl::Pause);
                }
                tracing::info!(session_id, "Pause deferred until the current step finishes");
                return Ok(state.session.clone());
            }
            state.session.status = SessionStatus::Paused;
            slot.publish(SessionStatus::Paused);
        }
        tracing::info!(session_id, "Session paused");
        self.persist(&slot).await?;
        Ok(slot.snapshot())
    }

    /// Resumes a paused session at its current step, or withdraws a pause
    /// that has not taken effect yet.
    pub async fn resume(&self, session_id: &str) -> Result<Session> {
        let slot = self.live_slot(session_id, "resume").await?;
        {
            let mut state = slot.state();
            match (state.session.status, state.pending) {
                (SessionStatus::Paused, _) => {
                    state.session.status = SessionStatus::Running;
                    slot.publish(SessionStatus::Running);
                }
                (SessionStatus::Running, Some(PendingControl::Pause)) => {
                    state.pending = None;
                    tracing::info!(session_id, "Pending pause withdrawn");
                    return Ok(state.session.clone());
                }
                (status, _) => return Err(PilotError::invalid_transition(status, "resume")),
            }
        }
        tracing::info!(session_id, "Session resumed");
        self.persist(&slot).await?;
        Ok(slot.snapshot())
    }

    pub async fn cancel(&self, session_id: &str) -> Result<Session> {
        let slot = self.live_slot(session_id, "cancel").await?;
        {
            let mut state = slot.state();
            let status = state.session.status;
            if !status.can_transition_to(SessionStatus::Cancelled) {
                return Err(PilotError::invalid_transition(status, "cancel"));
            }
            slot.cancel.cancel();
            if state.in_flight {
                state.pending = Some(PendingControl::Cancel);
                tracing::info!(session_id, "Cancel deferred until the current step finishes");
                return Ok(state.session.clone());
            }
            end(&mut state.session, SessionStatus::Cancelled);
            slot.publish(SessionStatus::Cancelled);
        }
        tracing::info!(session_id, "Session cancelled");
        self.persist(&slot).await?;
        self.inner
            .tracker
            .record_closure(
                session_id,
                RouteClosure::new(SessionStatus::Cancelled, "cancelled by request"),
            )
            .await?;
        self.retire(&slot).await;
        Ok(slot.snapshot())
    }

    /// Runs exactly one step: perceive, infer, translate, guard, execute
    /// (with retries) and record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the session is not running, or a
    /// storage error if the step could not be recorded.
    pub async fn run_step(&self, session_id: &str) -> Result<StepReport> {
        let slot = self.live_slot(session_id, "run a step of").await?;
        let _step_guard = slot.step_lock.lock().await;

        let session = {
            let mut state = slot.state();
            if state.session.status != SessionStatus::Running {
                return Err(PilotError::invalid_transition(
                    state.session.status,
                    "run a step of",
                ));
            }
            state.in_flight = true;
            state.session.clone()
        };
        let step = session.next_step();

        let span = tracing::info_span!("step", session_id = %session.id, step);
        let run = self.execute_step(&slot, &session, step).instrument(span).await;

        let closure = finish_step(&slot, step, run.as_ref().ok());
        self.persist(&slot).await?;
        if let Some(closure) = closure {
            self.inner.tracker.record_closure(&session.id, closure).await?;
        }
        self.retire(&slot).await;

        let run = run?;
        Ok(StepReport {
            step,
            outcome: run.outcome,
            session: slot.snapshot(),
        })
    }

    async fn execute_step(&self, slot: &SessionSlot, session: &Session, step: u32) -> Result<StepRun> {
        let inner = &self.inner;
        let mut failures = slot.state().failures;

        // Capture, inference and translation failures share the step's counter
        // and restart from perception.
        let (context, translation) = loop {
            match self.perceive(session).await {
                Ok(perceived) => break perceived,
                Err(error) => {
                    let assessment = inner.retry.assess_error(failures, &error);
                    failures = assessment.failures;
                    slot.state().failures = failures;
                    tracing::warn!(error = %error, failures, "Step failed before execution");
                    let next = self
                        .after_failure(slot, session, step, assessment.decision, &mut failures)
                        .await;
                    if let Continuation::Stop(outcome) = next {
                        return Ok(StepRun {
                            outcome,
                            decided: false,
                            failures,
                        });
                    }
                }
            }
        };

        inner
            .tracker
            .record_planned(
                &session.id,
                PlannedStep::new(step, translation.candidates.clone()),
            )
            .await?;

        let Some(candidate) = translation.recommended().cloned() else {
            tracing::info!(summary = %translation.screen_summary, "Task reported complete");
            return Ok(StepRun {
                outcome: StepOutcome::Completed,
                decided: true,
                failures: 0,
            });
        };
        let pending = ActionRecord::pending(&session.id, step, &candidate);

        let verdict = match inner.guard.evaluate(&candidate, &context) {
            SafetyVerdict::Clear => {
                let detection = inner
                    .collaborators
                    .inference
                    .detect_payment_screen(&context)
                    .await;
                inner.guard.screen_verdict(detection)
            }
            blocked => blocked,
        };
        if let SafetyVerdict::Blocked {
            signal,
            matched,
            reason,
        } = verdict
        {
            tracing::error!(
                severity = "CRITICAL",
                signal = %signal,
                matched = %matched,
                "Payment intent blocked, execution refused"
            );
            inner.tracker.record_action(pending.block(reason.clone())).await?;
            return Ok(StepRun {
                outcome: StepOutcome::Halted(HaltReason::new(
                    HaltCode::PaymentIntentBlocked,
                    step,
                    reason,
                )),
                decided: true,
                failures,
            });
        }

        let mut attempts = 0;
        loop {
            attempts += 1;
            let outcome = inner.collaborators.driver.execute(&candidate).await;
            let assessment = inner.retry.assess(failures, &outcome);
            failures = assessment.failures;
            slot.state().failures = failures;

            let next = match assessment.decision {
                RetryDecision::Advance => {
                    tracing::info!(
                        action = %candidate.kind(),
                        target = candidate.label().unwrap_or("-"),
                        attempts,
                        duration_ms = outcome.duration.as_millis() as u64,
                        "Step succeeded"
                    );
                    inner
                        .tracker
                        .record_action(pending.settle(&outcome, attempts))
                        .await?;
                    return Ok(StepRun {
                        outcome: StepOutcome::Advanced { attempts },
                        decided: true,
                        failures: 0,
                    });
                }
                decision => {
                    tracing::warn!(
                        attempt = attempts,
                        failures,
                        error = outcome.error.as_deref().unwrap_or("unknown"),
                        "Execution failed"
                    );
                    self.after_failure(slot, session, step, decision, &mut failures)
                        .await
                }
            };

            if let Continuation::Stop(stop) = next {
                inner
                    .tracker
                    .record_action(pending.settle(&outcome, attempts))
                    .await?;
                return Ok(StepRun {
                    outcome: stop,
                    decided: true,
                    failures,
                });
            }
        }
    }

    async fn perceive(&self, session: &Session) -> Result<(ScreenContext, Translation)> {
        let collaborators = &self.inner.collaborators;
        let context = collaborators.perception.capture(session).await?;
        let raw = collaborators
            .inference
            .infer(&context, &session.task_description)
            .await?;
        let translation = self.inner.translator.translate(&raw, &context)?;
        Ok((context, translation))
    }

    async fn after_failure(
        &self,
        slot: &SessionSlot,
        session: &Session,
        step: u32,
        decision: RetryDecision,
        failures: &mut u32,
    ) -> Continuation {
        match decision {
            // only execution outcomes advance
            RetryDecision::Advance => Continuation::Again,
            RetryDecision::Retry { attempt, delay } => {
                tracing::debug!(attempt, delay_ms = delay.as_millis() as u64, "Retrying step");
                if backoff(slot, delay).await {
                    Continuation::Again
                } else {
                    Continuation::Stop(StepOutcome::Interrupted)
                }
            }
            RetryDecision::Escalate { reason } => {
                match self.escalate(session, step, &reason).await {
                    Some(halt) => Continuation::Stop(StepOutcome::Halted(halt)),
                    None if slot.cancel.is_cancelled() => {
                        Continuation::Stop(StepOutcome::Interrupted)
                    }
                    None => {
                        *failures = 0;
                        slot.state().failures = 0;
                        Continuation::Again
                    }
                }
            }
            RetryDecision::Fatal { reason } => Continuation::Stop(StepOutcome::Halted(
                HaltReason::new(HaltCode::FatalExecution, step, reason),
            )),
        }
    }

    /// Hands an exhausted step to the operator. `None` means try again.
    async fn escalate(&self, session: &Session, step: u32, reason: &str) -> Option<HaltReason> {
        let Some(handler) = &self.inner.intervention else {
            tracing::warn!(reason, "Retries exhausted and no operator available");
            return Some(HaltReason::new(HaltCode::RetriesExhausted, step, reason));
        };
        match handler.intervene(session, step, reason).await {
            InterventionDecision::Retry => {
                tracing::info!("Operator requested another attempt");
                None
            }
            InterventionDecision::Abort => {
                tracing::warn!(reason, "Operator aborted the session");
                Some(HaltReason::new(
                    HaltCode::InterventionAborted,
                    step,
                    format!("aborted after escalation: {reason}"),
                ))
            }
        }
    }

    /// Runs steps until the session is terminal, parking while paused.
    async fn drive(&self, session_id: &str) {
        let slot = match self.inner.registry.get(session_id).await {
            Ok(slot) => slot,
            Err(e) => {
                tracing::error!(session_id, error = %e, "Cannot drive unknown session");
                return;
            }
        };
        let mut status = slot.subscribe();

        loop {
            let current = *status.borrow_and_update();
            if current.is_terminal() {
                break;
            }
            if current == SessionStatus::Paused {
                if status.changed().await.is_err() {
                    break;
                }
                continue;
            }
            match self.run_step(session_id).await {
                Ok(report) => {
                    tracing::debug!(session_id, step = report.step, outcome = ?report.outcome, "Step finished");
                }
                // paused or cancelled between the status check and the step
                Err(e) if e.is_invalid_transition() => {}
                Err(e) => {
                    tracing::error!(session_id, error = %e, "Step could not be recorded, failing session");
                    self.halt(&slot, HaltCode::StorageUnavailable, e.to_string())
                        .await;
                    break;
                }
            }
        }
        tracing::info!(session_id, status = %slot.snapshot().status, "Session driver finished");
    }

    async fn halt(&self, slot: &SessionSlot, code: HaltCode, message: String) {
        let session_id = {
            let mut state = slot.state();
            if state.session.is_terminal() {
                return;
            }
            let step = state.session.next_step();
            state.session.halt = Some(HaltReason::new(code, step, message.clone()));
            state.pending = None;
            end(&mut state.session, SessionStatus::Failed);
            slot.publish(SessionStatus::Failed);
            state.session.id.clone()
        };
        let persisted = match self.persist(slot).await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Failed to persist halted session");
                false
            }
        };
        let closure = RouteClosure::new(SessionStatus::Failed, message);
        if let Err(e) = self.inner.tracker.record_closure(&session_id, closure).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to record route closure");
        }
        // keep the slot as the only record of the outcome
        if persisted {
            self.retire(slot).await;
        }
    }

    /// Looks up a session the engine still drives. A session that already
    /// finished is answered from the repository with `InvalidTransition`.
    async fn live_slot(&self, session_id: &str, request: &str) -> Result<Arc<SessionSlot>> {
        match self.inner.registry.get(session_id).await {
            Err(e) if e.is_not_found() => match self.inner.sessions.find_by_id(session_id).await? {
                Some(session) => Err(PilotError::invalid_transition(session.status, request)),
                None => Err(e),
            },
            found => found,
        }
    }

    /// Drops a finished session from memory once its final state is stored.
    async fn retire(&self, slot: &SessionSlot) {
        let session = slot.snapshot();
        if !session.is_terminal() {
            return;
        }
        self.inner.registry.remove(&session.id).await;
        self.inner.tracker.release(&session.id).await;
        tracing::debug!(session_id = %session.id, status = %session.status, "Session retired");
    }

    /// Saves the latest snapshot of a slot.
    async fn persist(&self, slot: &SessionSlot) -> Result<()> {
        let _guard = slot.persist_lock.lock().await;
        let snapshot = slot.snapshot();
        self.inner.sessions.save(&snapshot).await
    }
}

fn end(session: &mut Session, status: SessionStatus) {
    session.status = status;
    session.ended_at = Some(Utc::now());
}

/// Applies a finished step and any deferred control request to the slot.
///
/// Returns the closure to record when the session ended without a
/// deciding route entry.
fn finish_step(slot: &SessionSlot, step: u32, run: Option<&StepRun>) -> Option<RouteClosure> {
    let mut state = slot.state();
    state.in_flight = false;
    let mut closure = None;

    if let Some(run) = run {
        state.failures = run.failures;
        match &run.outcome {
            StepOutcome::Advanced { .. } => {
                state.session.current_step = state.session.current_step.max(step);
                state.failures = 0;
            }
            StepOutcome::Completed => end(&mut state.session, SessionStatus::Completed),
            StepOutcome::Halted(halt) => {
                if !run.decided {
                    closure = Some(RouteClosure::new(SessionStatus::Failed, halt.message.clone()));
                }
                state.session.halt = Some(halt.clone());
                end(&mut state.session, SessionStatus::Failed);
            }
            StepOutcome::Interrupted => {}
        }
    }

    if state.session.status == SessionStatus::Running {
        match state.pending.take() {
            Some(PendingControl::Cancel) => {
                end(&mut state.session, SessionStatus::Cancelled);
                closure = Some(RouteClosure::new(
                    SessionStatus::Cancelled,
                    "cancelled by request",
                ));
            }
            Some(PendingControl::Pause) => state.session.status = SessionStatus::Paused,
            None => {}
        }
    } else {
        state.pending = None;
    }

    slot.publish(state.session.status);
    closure
}

/// Sleeps before a retry. Returns `false` if a cancel arrived meanwhile.
async fn backoff(slot: &SessionSlot, delay: Duration) -> bool {
    if !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = slot.cancel.cancelled() => {}
        }
    }
    !slot.cancel.is_cancelled()
}
