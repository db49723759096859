//! OpenRouterVisionClient - vision inference over an OpenAI-compatible
//! Chat Completions endpoint (OpenRouter by default).
//!
//! The assistant text is returned verbatim; parsing it is the translator's job.

use crate::prompt::{build_detection_prompt, build_prompt};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uipilot_core::collaborator::{InferenceService, RawResponse, ScreenContext};
use uipilot_core::config::PilotConfig;
use uipilot_core::error::{PilotError, Result};

/// Inference service that talks to a vision-language model over HTTP.
#[derive(Clone)]
pub struct OpenRouterVisionClient {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl std::fmt::Debug for OpenRouterVisionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenRouterVisionClient")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish_non_exhaustive()
    }
}

impl OpenRouterVisionClient {
    pub fn new(
        base_url: impl AsRef<str>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PilotError::config(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: completions_endpoint(base_url.as_ref()),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens: 2000,
            temperature: 0.3,
        })
    }

    /// Builds a client from the `inference` section and the collaborator timeout.
    ///
    /// # Errors
    ///
    /// Returns `PilotError::Config` when no API key is configured.
    pub fn from_config(config: &PilotConfig) -> Result<Self> {
        let inference = &config.inference;
        let api_key = inference
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                PilotError::config("OPENROUTER_API_KEY not set in environment or config file")
            })?;
        Ok(
            Self::new(&inference.base_url, api_key, &inference.model, config.timeout())?
                .with_max_tokens(inference.max_tokens)
                .with_temperature(inference.temperature),
        )
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn build_request(&self, context: &ScreenContext, task: &str) -> ChatCompletionRequest {
        self.request_with(
            build_prompt(task, &context.description),
            context,
            self.max_tokens,
            self.temperature,
        )
    }

    fn detection_request(&self, context: &ScreenContext) -> ChatCompletionRequest {
        self.request_with(
            build_detection_prompt(&context.description),
            context,
            DETECTION_MAX_TOKENS,
            0.0,
        )
    }

    fn request_with(
        &self,
        prompt: String,
        context: &ScreenContext,
        max_tokens: u32,
        temperature: f32,
    ) -> ChatCompletionRequest {
        let mut content = vec![MessageContent::Text { text: prompt }];
        if !context.image.is_empty() {
            content.push(MessageContent::ImageUrl {
                image_url: ImageUrl {
                    url: data_url(&context.mime_type, &context.image),
                },
            });
        }

        ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content,
            }],
            max_tokens,
            temperature,
        }
    }

    async fn send_request(&self, body: &ChatCompletionRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|err| {
                let kind = if err.is_timeout() { "timed out" } else { "failed" };
                PilotError::InferenceUnavailable(format!("Inference request {kind}: {err}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error body".to_string());
            return Err(map_http_error(status, &body_text));
        }

        let parsed: ChatCompletionResponse = response.json().await.map_err(|err| {
            PilotError::InferenceUnavailable(format!("Failed to parse inference response: {err}"))
        })?;

        extract_text_response(parsed)
    }
}

#[async_trait]
impl InferenceService for OpenRouterVisionClient {
    async fn infer(&self, context: &ScreenContext, task: &str) -> Result<RawResponse> {
        let request = self.build_request(context, task);
        let text = self.send_request(&request).await?;
        tracing::debug!(model = %self.model, chars = text.len(), "Inference response received");
        Ok(RawResponse(text))
    }

    async fn detect_payment_screen(&self, context: &ScreenContext) -> Result<bool> {
        let request = self.detection_request(context);
        let answer = self.send_request(&request).await?;
        let detected = is_affirmative(&answer);
        if detected {
            tracing::warn!(model = %self.model, "Payment screen detected");
        }
        Ok(detected)
    }
}

const DETECTION_MAX_TOKENS: u32 = 10;

/// Reads a `true`/`false` answer; anything mentioning `true` counts as yes.
fn is_affirmative(answer: &str) -> bool {
    answer.trim().to_lowercase().contains("true")
}

fn completions_endpoint(base_url: &str) -> String {
    let base = base_url.trim_end_matches('/');
    if base.ends_with("/chat/completions") {
        base.to_string()
    } else {
        format!("{base}/chat/completions")
    }
}

fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, BASE64_STANDARD.encode(bytes))
}

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: Vec<MessageContent>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum MessageContent {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

fn extract_text_response(response: ChatCompletionResponse) -> Result<String> {
    response
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .filter(|content| !content.trim().is_empty())
        .ok_or_else(|| PilotError::InferenceUnavailable("Inference returned no content".into()))
}

fn map_http_error(status: StatusCode, body: &str) -> PilotError {
    let message = serde_json::from_str::<ErrorResponse>(body)
        .map(|wrapper| wrapper.error.message)
        .unwrap_or_else(|_| body.to_string());
    PilotError::InferenceUnavailable(format!("HTTP {}: {message}", status.as_u16()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OpenRouterVisionClient {
        OpenRouterVisionClient::new(
            "https://openrouter.ai/api/v1/",
            "sk-test",
            "anthropic/claude-3-5-sonnet",
            Duration::from_secs(10),
        )
        .unwrap()
    }

    #[test]
    fn endpoint_is_derived_from_base_url() {
        assert_eq!(
            client().endpoint,
            "https://openrouter.ai/api/v1/chat/completions"
        );
        assert_eq!(
            completions_endpoint("http://localhost:8080/v1/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn request_carries_prompt_and_data_url_image() {
        let context = ScreenContext::new(vec![0x89, 0x50, 0x4e, 0x47], "Checkout page");
        let body = serde_json::to_value(client().build_request(&context, "order item X")).unwrap();

        assert_eq!(body["model"], "anthropic/claude-3-5-sonnet");
        assert_eq!(body["max_tokens"], 2000);
        let content = &body["messages"][0]["content"];
        assert_eq!(content[0]["type"], "text");
        assert!(content[0]["text"].as_str().unwrap().contains("order item X"));
        assert_eq!(content[1]["type"], "image_url");
        assert_eq!(content[1]["image_url"]["url"], "data:image/png;base64,iVBORw==");
    }

    #[test]
    fn detection_request_is_short_and_deterministic() {
        let context = ScreenContext::new(vec![0x89, 0x50, 0x4e, 0x47], "Checkout page");
        let body = serde_json::to_value(client().detection_request(&context)).unwrap();

        assert_eq!(body["max_tokens"], DETECTION_MAX_TOKENS);
        assert_eq!(body["temperature"], 0.0);
        let content = &body["messages"][0]["content"];
        assert!(content[0]["text"].as_str().unwrap().contains("payment screen"));
        assert_eq!(content[1]["type"], "image_url");
    }

    #[test]
    fn detection_answer_parsing() {
        assert!(is_affirmative("True"));
        assert!(is_affirmative(" true.\n"));
        assert!(!is_affirmative("false"));
        assert!(!is_affirmative(""));
    }

    #[test]
    fn text_only_context_sends_no_image() {
        let body = serde_json::to_value(
            client().build_request(&ScreenContext::describe("Home"), "open settings"),
        )
        .unwrap();
        assert_eq!(body["messages"][0]["content"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn http_errors_map_to_inference_unavailable() {
        let err = map_http_error(
            StatusCode::TOO_MANY_REQUESTS,
            r#"{"error": {"message": "Rate limit exceeded"}}"#,
        );
        assert!(err.is_retryable());
        assert_eq!(
            err.to_string(),
            PilotError::InferenceUnavailable("HTTP 429: Rate limit exceeded".into()).to_string()
        );
    }

    #[test]
    fn empty_choice_is_an_error() {
        let parsed: ChatCompletionResponse =
            serde_json::from_str(r#"{"choices": [{"message": {"content": null}}]}"#).unwrap();
        assert!(matches!(
            extract_text_response(parsed),
            Err(PilotError::InferenceUnavailable(_))
        ));
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        let err = OpenRouterVisionClient::from_config(&PilotConfig::default()).unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }
}
