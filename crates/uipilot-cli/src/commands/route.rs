use super::utils::print_json;
use anyhow::{Context, Result};
use uipilot_application::RouteTracker;

pub async fn list(tracker: &RouteTracker) -> Result<()> {
    for id in tracker.session_ids().await? {
        println!("{id}");
    }
    Ok(())
}

pub async fn show(tracker: &RouteTracker, session_id: &str) -> Result<()> {
    let route = tracker
        .route(session_id)
        .await
        .with_context(|| format!("No route recorded for session {session_id}"))?;
    print_json(&route)
}

pub async fn stats(tracker: &RouteTracker, session_ids: Vec<String>) -> Result<()> {
    let ids = if session_ids.is_empty() {
        tracker.session_ids().await?
    } else {
        session_ids
    };
    let stats = tracker.aggregate(&ids).await?;
    print_json(&serde_json::json!({
        "sessions": ids.len(),
        "stats": stats,
        "step_success_rate": stats.success_rate(),
    }))
}

pub async fn replay(tracker: &RouteTracker, session_id: &str) -> Result<()> {
    let replay = tracker
        .replay_session(session_id)
        .await
        .with_context(|| format!("Failed to replay session {session_id}"))?;
    print_json(&replay)
}
