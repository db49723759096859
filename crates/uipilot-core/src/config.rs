//! Runtime configuration.
//!
//! Every field has a default so a partial `config.toml` is always valid.
//! Loading from disk and the environment lives in the infrastructure crate.

use crate::error::{PilotError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_VLM_MODEL: &str = "anthropic/claude-3-5-sonnet";

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PilotConfig {
    /// Failures allowed per step before escalation.
    pub max_retries: u32,
    /// Base delay before a retry; doubled per consecutive failure.
    pub retry_backoff_ms: u64,
    pub retry_backoff_max_ms: u64,
    /// Timeout collaborators apply to their external calls.
    pub timeout_seconds: u64,
    /// Refuse to start sessions for users without recorded consent.
    pub require_consent: bool,
    /// No operator is available to take over escalated steps.
    pub unattended: bool,
    pub inference: InferenceConfig,
    pub safety: SafetyConfig,
    pub logging: LoggingConfig,
    pub storage: StorageConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: 0,
            retry_backoff_max_ms: 5_000,
            timeout_seconds: 10,
            require_consent: true,
            unattended: true,
            inference: InferenceConfig::default(),
            safety: SafetyConfig::default(),
            logging: LoggingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Rejects values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(PilotError::config("max_retries must be at least 1"));
        }
        if !(0.0..=2.0).contains(&self.inference.temperature) {
            return Err(PilotError::config(format!(
                "inference.temperature {} is outside [0, 2]",
                self.inference.temperature
            )));
        }
        if self.inference.model.trim().is_empty() {
            return Err(PilotError::config("inference.model must not be empty"));
        }
        Ok(())
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct InferenceConfig {
    pub base_url: String,
    pub model: String,
    /// Usually supplied through `OPENROUTER_API_KEY` rather than the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_VLM_MODEL.to_string(),
            api_key: None,
            max_tokens: 2000,
            temperature: 0.3,
        }
    }
}

/// Additional denylist terms. The built-in terms always apply.
#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct SafetyConfig {
    pub extra_terms: Vec<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Write a daily-rolling log file here in addition to stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            json: false,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory of the durable route store; platform data dir when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_fills_defaults() {
        let config: PilotConfig = toml::from_str(
            r#"
            max_retries = 5

            [safety]
            extra_terms = ["top up wallet"]
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.timeout_seconds, 10);
        assert_eq!(config.inference.model, DEFAULT_VLM_MODEL);
        assert_eq!(config.safety.extra_terms, vec!["top up wallet".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_retries_is_rejected() {
        let config = PilotConfig {
            max_retries: 0,
            ..PilotConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
