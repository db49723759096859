//! Configuration service implementation.
//!
//! Loads `PilotConfig` from `config.toml` (platform config dir unless a path
//! is given), applies environment overrides and caches the result.

use crate::paths::PilotPaths;
use std::fs::{self, File};
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use uipilot_core::config::PilotConfig;
use uipilot_core::error::{PilotError, Result};

/// Environment variables that override file values.
pub const ENV_MAX_RETRIES: &str = "UIPILOT_MAX_RETRIES";
pub const ENV_TIMEOUT_SECONDS: &str = "UIPILOT_TIMEOUT_SECONDS";
pub const ENV_LOG_LEVEL: &str = "UIPILOT_LOG_LEVEL";
pub const ENV_VLM_MODEL: &str = "UIPILOT_VLM_MODEL";
pub const ENV_API_KEY: &str = "OPENROUTER_API_KEY";
pub const ENV_BASE_URL: &str = "OPENROUTER_BASE_URL";

/// Configuration service that loads and caches the root configuration.
#[derive(Debug, Clone)]
pub struct ConfigService {
    path: PathBuf,
    config: Arc<RwLock<Option<PilotConfig>>>,
}

impl ConfigService {
    /// Uses `~/.config/uipilot/config.toml`.
    pub fn new() -> Result<Self> {
        let path = PilotPaths::config_file().map_err(|e| PilotError::config(e.to_string()))?;
        Ok(Self::with_path(path))
    }

    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            config: Arc::new(RwLock::new(None)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets the configuration, loading it on first access.
    ///
    /// A missing file yields the defaults; environment overrides always apply.
    pub fn get_config(&self) -> Result<PilotConfig> {
        {
            let cached = self.config.read().unwrap_or_else(|e| e.into_inner());
            if let Some(config) = cached.as_ref() {
                return Ok(config.clone());
            }
        }

        let mut config = Self::load_file(&self.path)?;
        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate()?;

        let mut cached = self.config.write().unwrap_or_else(|e| e.into_inner());
        *cached = Some(config.clone());
        Ok(config)
    }

    /// Invalidates the cache, forcing a reload on next access.
    pub fn invalidate_cache(&self) {
        let mut cached = self.config.write().unwrap_or_else(|e| e.into_inner());
        *cached = None;
    }

    /// Writes the default configuration if no file exists yet.
    ///
    /// Returns `true` when a file was created.
    pub fn write_default_if_missing(&self) -> Result<bool> {
        if self.path.exists() {
            return Ok(false);
        }
        save_atomic(&self.path, &PilotConfig::default())?;
        tracing::info!(path = %self.path.display(), "Wrote default configuration");
        Ok(true)
    }

    fn load_file(path: &Path) -> Result<PilotConfig> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(PilotConfig::default());
        }
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(PilotConfig::default());
        }
        Ok(toml::from_str(&content)?)
    }
}

/// Applies environment overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut PilotConfig, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(ENV_MAX_RETRIES) {
        config.max_retries = parse_env(ENV_MAX_RETRIES, &value)?;
    }
    if let Some(value) = lookup(ENV_TIMEOUT_SECONDS) {
        config.timeout_seconds = parse_env(ENV_TIMEOUT_SECONDS, &value)?;
    }
    if let Some(value) = lookup(ENV_LOG_LEVEL) {
        config.logging.level = value;
    }
    if let Some(value) = lookup(ENV_VLM_MODEL) {
        config.inference.model = value;
    }
    if let Some(value) = lookup(ENV_BASE_URL) {
        config.inference.base_url = value;
    }
    if let Some(value) = lookup(ENV_API_KEY).filter(|v| !v.trim().is_empty()) {
        config.inference.api_key = Some(value);
    }
    Ok(())
}

fn parse_env<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| PilotError::config(format!("{key}={value:?} is not a valid number")))
}

/// Serializes to TOML and replaces `path` via temp file + rename.
fn save_atomic(path: &Path, config: &PilotConfig) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = PathBuf::from(tmp_path);

    let mut tmp_file = File::create(&tmp_path)?;
    tmp_file.write_all(content.as_bytes())?;
    tmp_file.sync_all()?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigService::load_file(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, PilotConfig::default());
    }

    #[test]
    fn default_file_round_trips() {
        let dir = TempDir::new().unwrap();
        let service = ConfigService::with_path(dir.path().join("nested").join("config.toml"));

        assert!(service.write_default_if_missing().unwrap());
        assert!(!service.write_default_if_missing().unwrap());

        let loaded = ConfigService::load_file(service.path()).unwrap();
        assert_eq!(loaded.max_retries, PilotConfig::default().max_retries);
    }

    #[test]
    fn env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_RETRIES, "5"),
            (ENV_API_KEY, "sk-test"),
            (ENV_VLM_MODEL, "openai/gpt-4o"),
        ]);
        let mut config = PilotConfig::default();
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(config.max_retries, 5);
        assert_eq!(config.inference.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.inference.model, "openai/gpt-4o");
    }

    #[test]
    fn invalid_numeric_override_is_a_config_error() {
        let mut config = PilotConfig::default();
        let err = apply_env_overrides(&mut config, |k| {
            (k == ENV_TIMEOUT_SECONDS).then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, PilotError::Config(_)));
    }
}
