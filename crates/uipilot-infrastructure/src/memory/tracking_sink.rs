use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uipilot_core::action::ActionRecord;
use uipilot_core::error::Result;
use uipilot_core::route::{PlannedStep, Route, RouteClosure, TrackingSink};

/// Tracking sink that keeps every route in a map keyed by session id.
#[derive(Default)]
pub struct InMemoryTrackingSink {
    routes: RwLock<HashMap<String, Route>>,
}

impl InMemoryTrackingSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TrackingSink for InMemoryTrackingSink {
    async fn append_planned(&self, session_id: &str, planned: PlannedStep) -> Result<()> {
        let mut routes = self.routes.write().await;
        routes
            .entry(session_id.to_string())
            .or_insert_with(|| Route::new(session_id))
            .planned
            .push(planned);
        Ok(())
    }

    async fn append_action(&self, record: ActionRecord) -> Result<()> {
        let mut routes = self.routes.write().await;
        routes
            .entry(record.session_id.clone())
            .or_insert_with(|| Route::new(record.session_id.clone()))
            .actual
            .push(record);
        Ok(())
    }

    async fn append_closure(&self, session_id: &str, closure: RouteClosure) -> Result<()> {
        let mut routes = self.routes.write().await;
        routes
            .entry(session_id.to_string())
            .or_insert_with(|| Route::new(session_id))
            .closure = Some(closure);
        Ok(())
    }

    async fn load(&self, session_id: &str) -> Result<Option<Route>> {
        Ok(self.routes.read().await.get(session_id).cloned())
    }

    async fn session_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.routes.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use uipilot_core::action::{ActionCandidate, ActionInput, Confidence};

    fn planned(step: u32) -> PlannedStep {
        PlannedStep::new(
            step,
            vec![ActionCandidate::new(
                ActionInput::Wait { duration_ms: 1 },
                None,
                Confidence::new(0.5).unwrap(),
            )],
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sessions_keep_their_own_order() {
        let sink = Arc::new(InMemoryTrackingSink::new());
        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let sink = sink.clone();
                tokio::spawn(async move {
                    let id = format!("session-{n}");
                    for step in 1..=25 {
                        sink.append_planned(&id, planned(step)).await.unwrap();
                    }
                })
            })
            .collect();
        futures::future::join_all(tasks).await;

        for n in 0..8 {
            let route = sink.load(&format!("session-{n}")).await.unwrap().unwrap();
            let steps: Vec<u32> = route.planned.iter().map(|p| p.step).collect();
            assert_eq!(steps, (1..=25).collect::<Vec<_>>());
        }
        assert_eq!(sink.session_ids().await.unwrap().len(), 8);
    }
}
