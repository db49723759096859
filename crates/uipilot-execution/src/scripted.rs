//! Scripted collaborators.
//!
//! A `Scenario` file lists what the screen shows at each capture, what the
//! model answers at each inference call and how each execution attempt ends.
//! Replaying it through the engine exercises the full pipeline without a
//! display, a model or an input driver.
//!
//! ```json
//! {
//!   "app_name": "Deliveroo",
//!   "task": "order item X",
//!   "screens": [{"description": "Item X detail page"}],
//!   "responses": [{"candidates": [{"action_type": "click", "target": "Order", "confidence": 0.95}]}],
//!   "outcomes": [{"failure": "transient", "error": "not found"}, {"duration_ms": 800}]
//! }
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uipilot_application::Collaborators;
use uipilot_core::action::ActionCandidate;
use uipilot_core::collaborator::{
    ExecutionDriver, ExecutionOutcome, FailureClass, InferenceService, PerceptionSource,
    RawResponse, ScreenContext,
};
use uipilot_core::error::{PilotError, Result};
use uipilot_core::session::Session;

const COMPLETE: &str = r#"{"task_complete": true, "candidates": []}"#;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_user")]
    pub user_id: String,
    pub app_name: String,
    pub task: String,
    /// Whether the scenario user has granted consent.
    #[serde(default = "default_true")]
    pub consent_given: bool,
    #[serde(default)]
    pub screens: Vec<ScriptedScreen>,
    #[serde(default)]
    pub responses: Vec<ScriptedResponse>,
    #[serde(default)]
    pub outcomes: Vec<ScriptedOutcome>,
}

fn default_user() -> String {
    "local".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptedScreen {
    #[serde(default)]
    pub description: String,
    /// Capture fails with `CaptureUnavailable`.
    #[serde(default)]
    pub unavailable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScriptedInferenceError {
    pub error: String,
}

/// One inference answer: an error, raw text, or a JSON document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScriptedResponse {
    Unavailable(ScriptedInferenceError),
    Text(String),
    Json(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScriptedOutcome {
    #[serde(default)]
    pub failure: Option<FailureClass>,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl From<&ScriptedOutcome> for ExecutionOutcome {
    fn from(scripted: &ScriptedOutcome) -> Self {
        let duration = Duration::from_millis(scripted.duration_ms);
        match scripted.failure {
            None => ExecutionOutcome::success(duration),
            Some(class) => ExecutionOutcome::failure(
                class,
                duration,
                scripted
                    .error
                    .clone()
                    .unwrap_or_else(|| "scripted failure".to_string()),
            ),
        }
    }
}

impl Scenario {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| PilotError::io(format!("Failed to read {}: {e}", path.display())))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Builds fresh collaborators that replay this scenario.
    pub fn collaborators(&self, realtime: bool) -> Collaborators {
        Collaborators {
            perception: Arc::new(ScriptedPerception::new(self.screens.clone())),
            inference: Arc::new(ScriptedInference::new(self.responses.clone())),
            driver: Arc::new(ScriptedDriver::new(self.outcomes.clone()).with_latency(realtime)),
        }
    }
}

/// Plays screens in order and keeps showing the last one.
pub struct ScriptedPerception {
    screens: Mutex<VecDeque<ScriptedScreen>>,
    last: Mutex<Option<ScriptedScreen>>,
}

impl ScriptedPerception {
    pub fn new(screens: Vec<ScriptedScreen>) -> Self {
        Self {
            screens: Mutex::new(screens.into()),
            last: Mutex::new(None),
        }
    }
}

#[async_trait]
impl PerceptionSource for ScriptedPerception {
    async fn capture(&self, session: &Session) -> Result<ScreenContext> {
        let next = self
            .screens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        let screen = match next {
            Some(screen) => {
                *last = Some(screen.clone());
                screen
            }
            None => last.clone().unwrap_or_else(|| ScriptedScreen {
                description: format!("{} window", session.app_name),
                unavailable: false,
            }),
        };

        if screen.unavailable {
            return Err(PilotError::CaptureUnavailable(
                "scripted capture unavailable".to_string(),
            ));
        }
        Ok(ScreenContext::describe(screen.description))
    }
}

/// Plays responses in order, then reports completion.
pub struct ScriptedInference {
    responses: Mutex<VecDeque<ScriptedResponse>>,
}

impl ScriptedInference {
    pub fn new(responses: Vec<ScriptedResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl InferenceService for ScriptedInference {
    async fn infer(&self, _context: &ScreenContext, _task: &str) -> Result<RawResponse> {
        let next = self
            .responses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            None => Ok(RawResponse::from(COMPLETE)),
            Some(ScriptedResponse::Unavailable(e)) => Err(PilotError::InferenceUnavailable(e.error)),
            Some(ScriptedResponse::Text(text)) => Ok(RawResponse(text)),
            Some(ScriptedResponse::Json(value)) => Ok(RawResponse(value.to_string())),
        }
    }
}

/// Plays outcomes in order, then succeeds.
pub struct ScriptedDriver {
    outcomes: Mutex<VecDeque<ScriptedOutcome>>,
    executed: Mutex<Vec<ActionCandidate>>,
    latency: bool,
}

impl ScriptedDriver {
    pub fn new(outcomes: Vec<ScriptedOutcome>) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into()),
            executed: Mutex::new(Vec::new()),
            latency: false,
        }
    }

    /// Sleeps for each scripted duration instead of returning immediately.
    pub fn with_latency(mut self, latency: bool) -> Self {
        self.latency = latency;
        self
    }

    pub fn executed(&self) -> Vec<ActionCandidate> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ExecutionDriver for ScriptedDriver {
    async fn execute(&self, candidate: &ActionCandidate) -> ExecutionOutcome {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(candidate.clone());
        let scripted = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_default();
        if self.latency && scripted.duration_ms > 0 {
            tokio::time::sleep(Duration::from_millis(scripted.duration_ms)).await;
        }
        tracing::debug!(action = %candidate.kind(), failure = ?scripted.failure, "Scripted execution");
        ExecutionOutcome::from(&scripted)
    }
}
