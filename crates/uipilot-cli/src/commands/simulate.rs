use super::utils::{open_sink, print_json};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use uipilot_application::{RouteTracker, SessionEngine};
use uipilot_core::config::PilotConfig;
use uipilot_core::session::Session;
use uipilot_execution::{Scenario, SessionEvent};

pub async fn run(
    config: &PilotConfig,
    scenario_path: &Path,
    realtime: bool,
    feed: Option<UnboundedReceiver<SessionEvent>>,
) -> Result<()> {
    let scenario = Scenario::load(scenario_path)
        .with_context(|| format!("Failed to load scenario {}", scenario_path.display()))?;

    let sink = open_sink(config).await?;
    tracing::info!(route_dir = %sink.dir().display(), "Recording routes");
    let engine = SessionEngine::builder(scenario.collaborators(realtime))
        .config(config.clone())
        .tracker(RouteTracker::new(Arc::new(sink)))
        .build();

    engine
        .consent()
        .record_consent(&scenario.user_id, scenario.consent_given)
        .await?;
    let session_id = engine
        .start(&scenario.user_id, &scenario.app_name, &scenario.task)
        .await
        .context("Failed to start session")?;

    let session = match feed {
        Some(feed) => follow(&engine, &session_id, feed).await?,
        None => engine.wait(&session_id).await?,
    };

    let stats = engine.tracker().stats(&session_id).await?;
    print_json(&serde_json::json!({
        "session": session,
        "stats": stats,
    }))
}

/// Waits for the session while printing its events as JSON lines.
async fn follow(
    engine: &SessionEngine,
    session_id: &str,
    mut feed: UnboundedReceiver<SessionEvent>,
) -> Result<Session> {
    let wait = engine.wait(session_id);
    tokio::pin!(wait);

    let session = loop {
        tokio::select! {
            session = &mut wait => break session?,
            Some(event) = feed.recv() => print_event(&event)?,
        }
    };
    while let Ok(event) = feed.try_recv() {
        print_event(&event)?;
    }
    Ok(session)
}

fn print_event(event: &SessionEvent) -> Result<()> {
    println!("{}", serde_json::to_string(event)?);
    Ok(())
}
