use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use uipilot_application::RouteTracker;
use uipilot_core::config::PilotConfig;
use uipilot_infrastructure::{ConfigService, JsonLinesTrackingSink};

pub fn config_service(path: Option<&Path>) -> Result<ConfigService> {
    match path {
        Some(path) => Ok(ConfigService::with_path(path)),
        None => ConfigService::new().context("Failed to locate the configuration directory"),
    }
}

/// Opens the durable route store at `storage.route_dir` or the platform data dir.
pub async fn open_sink(config: &PilotConfig) -> Result<JsonLinesTrackingSink> {
    let sink = match &config.storage.route_dir {
        Some(dir) => JsonLinesTrackingSink::new(dir).await,
        None => JsonLinesTrackingSink::default_location().await,
    };
    sink.context("Failed to open the route store")
}

pub async fn route_tracker(config: &PilotConfig) -> Result<RouteTracker> {
    Ok(RouteTracker::new(Arc::new(open_sink(config).await?)))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
