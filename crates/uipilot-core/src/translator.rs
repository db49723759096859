//! Action inference translator.
//!
//! Turns the free-form text returned by the inference service into ranked,
//! validated `ActionCandidate`s. Nothing downstream of this module sees
//! unvalidated model output.

use crate::action::{ActionCandidate, ActionInput, ActionKind, ActionTarget, Confidence, Coordinates};
use crate::collaborator::{RawResponse, ScreenContext};
use crate::error::{PilotError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::str::FromStr;

static FENCED_JSON: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid fence regex"));

/// Outcome of translating one inference response.
#[derive(Debug, Clone, PartialEq)]
pub struct Translation {
    /// The model's description of the current screen, or the perception text.
    pub screen_summary: String,
    /// Candidates ranked by confidence, highest first.
    pub candidates: Vec<ActionCandidate>,
    /// Candidates dropped because they failed validation.
    pub discarded: usize,
}

impl Translation {
    /// The top-ranked candidate.
    pub fn recommended(&self) -> Option<&ActionCandidate> {
        self.candidates.first()
    }

    /// True when the model signalled task completion with nothing left to do.
    pub fn is_complete(&self) -> bool {
        self.candidates.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    current_screen: Option<String>,
    #[serde(default)]
    task_complete: bool,
    #[serde(default)]
    candidates: Option<Vec<Value>>,
    #[serde(default)]
    recommended_action: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(alias = "kind", alias = "type")]
    action_type: String,
    #[serde(default)]
    target: Option<Value>,
    #[serde(default)]
    coordinates: Option<Coordinates>,
    confidence: f64,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    amount: Option<i32>,
    #[serde(default)]
    duration_ms: Option<u64>,
    /// Seconds, as emitted by older prompts.
    #[serde(default)]
    duration: Option<f64>,
}

/// Parse-and-reject boundary between the inference service and the engine.
#[derive(Debug, Clone, Default)]
pub struct ActionTranslator;

impl ActionTranslator {
    pub fn new() -> Self {
        Self
    }

    /// Translates a raw response into ranked candidates.
    ///
    /// Ties in confidence keep the order in which the model declared them.
    ///
    /// # Errors
    ///
    /// `PilotError::MalformedInference` when the response is not JSON, or
    /// yields no well-formed candidate without signalling completion.
    pub fn translate(&self, raw: &RawResponse, context: &ScreenContext) -> Result<Translation> {
        let body = extract_json(raw.as_str())
            .ok_or_else(|| PilotError::malformed("response contains no JSON object"))?;
        let wire: WireResponse = serde_json::from_str(body)
            .map_err(|e| PilotError::malformed(format!("response is not valid JSON: {e}")))?;

        let screen_summary = wire
            .current_screen
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| context.description.clone());

        let declared: Vec<Value> = match (wire.candidates, wire.recommended_action) {
            (Some(list), _) => list,
            (None, Some(Value::Null)) | (None, None) => Vec::new(),
            (None, Some(single)) => vec![single],
        };

        if declared.is_empty() {
            if wire.task_complete {
                return Ok(Translation {
                    screen_summary,
                    candidates: Vec::new(),
                    discarded: 0,
                });
            }
            return Err(PilotError::malformed(
                "response has no candidates and does not signal completion",
            ));
        }

        let total = declared.len();
        let mut candidates = Vec::with_capacity(total);
        let mut rejections = Vec::new();
        for (index, value) in declared.into_iter().enumerate() {
            match parse_candidate(value) {
                Ok(candidate) => candidates.push(candidate),
                Err(reason) => {
                    tracing::warn!(index, %reason, "Dropping malformed action candidate");
                    rejections.push(format!("#{index}: {reason}"));
                }
            }
        }

        if candidates.is_empty() {
            return Err(PilotError::malformed(format!(
                "none of {total} candidates is well-formed ({})",
                rejections.join("; ")
            )));
        }

        // Stable sort: equal confidence keeps declaration order.
        candidates.sort_by(|a, b| b.confidence.value().total_cmp(&a.confidence.value()));

        Ok(Translation {
            screen_summary,
            candidates,
            discarded: rejections.len(),
        })
    }
}

/// Locates the JSON object inside a model reply that may wrap it in a
/// markdown fence or surrounding prose.
fn extract_json(text: &str) -> Option<&str> {
    let text = text.trim();
    if let Some(captures) = FENCED_JSON.captures(text) {
        if let Some(inner) = captures.get(1) {
            return Some(inner.as_str());
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_candidate(value: Value) -> std::result::Result<ActionCandidate, String> {
    let wire: WireCandidate = serde_json::from_value(value).map_err(|e| e.to_string())?;

    let kind = ActionKind::from_str(wire.action_type.trim())
        .map_err(|_| format!("unknown action kind '{}'", wire.action_type))?;
    let confidence = Confidence::new(wire.confidence)
        .ok_or_else(|| format!("confidence {} is outside [0, 1]", wire.confidence))?;

    let input = match kind {
        ActionKind::Click => ActionInput::Click,
        ActionKind::DoubleClick => ActionInput::DoubleClick,
        ActionKind::RightClick => ActionInput::RightClick,
        ActionKind::Type => ActionInput::Type {
            text: wire
                .text
                .filter(|t| !t.is_empty())
                .ok_or("type action requires 'text'")?,
        },
        ActionKind::Scroll => ActionInput::Scroll {
            amount: wire.amount.ok_or("scroll action requires 'amount'")?,
        },
        ActionKind::Wait => {
            let duration_ms = match (wire.duration_ms, wire.duration) {
                (Some(ms), _) => ms,
                (None, Some(secs)) if secs.is_finite() && secs >= 0.0 => (secs * 1000.0) as u64,
                _ => return Err("wait action requires 'duration_ms'".to_string()),
            };
            ActionInput::Wait { duration_ms }
        }
    };

    let target = parse_target(wire.target, wire.coordinates)?;

    Ok(ActionCandidate::new(input, target, confidence)
        .with_reasoning(wire.reasoning.unwrap_or_default()))
}

fn parse_target(
    target: Option<Value>,
    loose_coordinates: Option<Coordinates>,
) -> std::result::Result<Option<ActionTarget>, String> {
    #[derive(Deserialize)]
    struct WireTarget {
        #[serde(alias = "label")]
        element: String,
        #[serde(default)]
        coordinates: Option<Coordinates>,
    }

    let parsed = match target {
        None | Some(Value::Null) => None,
        Some(Value::String(element)) => Some(ActionTarget {
            element,
            coordinates: None,
        }),
        Some(object @ Value::Object(_)) => {
            let wire: WireTarget =
                serde_json::from_value(object).map_err(|e| format!("invalid target: {e}"))?;
            Some(ActionTarget {
                element: wire.element,
                coordinates: wire.coordinates,
            })
        }
        Some(other) => return Err(format!("invalid target: {other}")),
    };

    Ok(match (parsed, loose_coordinates) {
        (Some(mut target), Some(coords)) if target.coordinates.is_none() => {
            target.coordinates = Some(coords);
            Some(target)
        }
        (None, Some(coords)) => Some(ActionTarget {
            element: String::new(),
            coordinates: Some(coords),
        }),
        (target, _) => target,
    })
}
