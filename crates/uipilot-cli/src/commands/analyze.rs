use super::utils::print_json;
use anyhow::{Context, Result, bail};
use std::path::Path;
use uipilot_core::collaborator::{InferenceService, ScreenContext};
use uipilot_core::config::PilotConfig;
use uipilot_core::safety::{SafetyGuard, SafetyVerdict};
use uipilot_core::translator::ActionTranslator;
use uipilot_interaction::OpenRouterVisionClient;

/// Runs perception input through inference, translation and the safety
/// guard. Nothing is executed.
pub async fn run(config: &PilotConfig, image: &Path, task: &str, describe: &str) -> Result<()> {
    let mime = mime_guess::from_path(image).first_or_octet_stream();
    if mime.type_() != mime_guess::mime::IMAGE {
        bail!("{} is not an image ({mime})", image.display());
    }
    let bytes = tokio::fs::read(image)
        .await
        .with_context(|| format!("Failed to read {}", image.display()))?;

    let mut context = ScreenContext::new(bytes, describe);
    context.mime_type = mime.essence_str().to_string();

    let client = OpenRouterVisionClient::from_config(config)?;
    tracing::info!(model = client.model(), image = %image.display(), "Analyzing screenshot");
    let raw = client.infer(&context, task).await?;
    let translation = ActionTranslator::new()
        .translate(&raw, &context)
        .context("Model response could not be translated into actions")?;

    let guard = SafetyGuard::new(&config.safety);
    let verdict = match translation.recommended() {
        Some(candidate) => Some(match guard.evaluate(candidate, &context) {
            SafetyVerdict::Clear => guard.screen_verdict(client.detect_payment_screen(&context).await),
            blocked => blocked,
        }),
        None => None,
    };

    print_json(&serde_json::json!({
        "screen_summary": translation.screen_summary,
        "task_complete": translation.is_complete(),
        "candidates": translation.candidates,
        "discarded": translation.discarded,
        "recommended_verdict": verdict,
    }))
}
