//! Route tracker.
//!
//! Sits in front of a `TrackingSink` and enforces the ordering rules of a
//! route: planned steps are strictly increasing, an action record follows
//! the planned step it executes, each step gets at most one record and
//! nothing is appended after a closure.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uipilot_core::action::{ActionRecord, ExecutionStatus};
use uipilot_core::error::{PilotError, Result};
use uipilot_core::route::{PlannedStep, Route, RouteClosure, RouteStats, TrackingSink};
use uipilot_core::session::SessionStatus;

/// Append position of one session's route.
#[derive(Debug, Default)]
struct RouteCursor {
    loaded: bool,
    /// Last planned step and whether it carried any candidates.
    last_planned: Option<(u32, bool)>,
    last_action: Option<u32>,
    closed: bool,
}

impl RouteCursor {
    fn from_route(route: &Route) -> Self {
        Self {
            loaded: true,
            last_planned: route
                .planned
                .last()
                .map(|p| (p.step, !p.signals_completion())),
            last_action: route.actual.last().map(|a| a.step),
            closed: route.closure.is_some(),
        }
    }

    fn is_complete(&self) -> bool {
        matches!(self.last_planned, Some((_, false)))
    }
}

/// Final status derived from a recorded route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Replay {
    pub status: SessionStatus,
    /// Steps that ended in a successful action.
    pub completed_steps: u32,
}

#[derive(Clone)]
pub struct RouteTracker {
    sink: Arc<dyn TrackingSink>,
    cursors: Arc<Mutex<HashMap<String, Arc<Mutex<RouteCursor>>>>>,
}

impl RouteTracker {
    pub fn new(sink: Arc<dyn TrackingSink>) -> Self {
        Self {
            sink,
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    async fn cursor(&self, session_id: &str) -> Result<Arc<Mutex<RouteCursor>>> {
        let cursor = {
            let mut cursors = self.cursors.lock().await;
            cursors
                .entry(session_id.to_string())
                .or_default()
                .clone()
        };

        {
            let mut guard = cursor.lock().await;
            if !guard.loaded {
                *guard = match self.sink.load(session_id).await? {
                    Some(route) => RouteCursor::from_route(&route),
                    None => RouteCursor {
                        loaded: true,
                        ..RouteCursor::default()
                    },
                };
            }
        }
        Ok(cursor)
    }

    /// Records the ranked candidates proposed for a step.
    pub async fn record_planned(&self, session_id: &str, planned: PlannedStep) -> Result<()> {
        let cursor = self.cursor(session_id).await?;
        let mut cursor = cursor.lock().await;

        if cursor.closed || cursor.is_complete() {
            return Err(rejected(session_id, "route is already closed"));
        }
        if let Some((last, _)) = cursor.last_planned {
            if planned.step <= last {
                return Err(rejected(
                    session_id,
                    format!("planned step {} does not follow step {last}", planned.step),
                ));
            }
        }

        let step = planned.step;
        let has_candidates = !planned.signals_completion();
        self.sink.append_planned(session_id, planned).await?;
        cursor.last_planned = Some((step, has_candidates));
        drop(cursor);
        tracing::debug!(session_id, step, has_candidates, "Planned step recorded");
        if !has_candidates {
            self.release(session_id).await;
        }
        Ok(())
    }

    /// Records the settled action record of the latest planned step.
    pub async fn record_action(&self, record: ActionRecord) -> Result<()> {
        let session_id = record.session_id.clone();
        let cursor = self.cursor(&session_id).await?;
        let mut cursor = cursor.lock().await;

        if !record.is_settled() {
            return Err(rejected(&session_id, "action record is still pending"));
        }
        if cursor.closed {
            return Err(rejected(&session_id, "route is already closed"));
        }
        if cursor.last_planned != Some((record.step, true)) {
            return Err(rejected(
                &session_id,
                format!("step {} has no planned candidates to act on", record.step),
            ));
        }
        if cursor.last_action == Some(record.step) {
            return Err(rejected(
                &session_id,
                format!("step {} already has an action record", record.step),
            ));
        }

        let step = record.step;
        tracing::debug!(
            session_id = %session_id,
            step,
            status = %record.status,
            safety_blocked = record.safety_blocked,
            "Action recorded"
        );
        self.sink.append_action(record).await?;
        cursor.last_action = Some(step);
        Ok(())
    }

    /// Records the terminal marker of a session that ended without a
    /// deciding action record.
    pub async fn record_closure(&self, session_id: &str, closure: RouteClosure) -> Result<()> {
        let cursor = self.cursor(session_id).await?;
        let mut cursor = cursor.lock().await;
        if cursor.closed {
            return Err(rejected(session_id, "route is already closed"));
        }
        self.sink.append_closure(session_id, closure).await?;
        cursor.closed = true;
        drop(cursor);
        self.release(session_id).await;
        Ok(())
    }

    /// Forgets the in-memory cursor of a finished route. A later write
    /// reloads it from the sink.
    pub async fn release(&self, session_id: &str) {
        self.cursors.lock().await.remove(session_id);
    }

    /// Routes with a cursor held in memory.
    pub async fn open_cursors(&self) -> usize {
        self.cursors.lock().await.len()
    }

    pub async fn route(&self, session_id: &str) -> Result<Route> {
        self.sink
            .load(session_id)
            .await?
            .ok_or_else(|| PilotError::not_found("Route", session_id))
    }

    pub async fn session_ids(&self) -> Result<Vec<String>> {
        self.sink.session_ids().await
    }

    pub async fn stats(&self, session_id: &str) -> Result<RouteStats> {
        Ok(self.route(session_id).await?.stats())
    }

    /// Session-level accounting over several routes. Unknown ids are skipped.
    pub async fn aggregate(&self, session_ids: &[String]) -> Result<RouteStats> {
        let mut total = RouteStats::default();
        for id in session_ids {
            if let Some(route) = self.sink.load(id).await? {
                total = total.merge(route.stats());
            }
        }
        Ok(total)
    }

    pub async fn replay_session(&self, session_id: &str) -> Result<Replay> {
        Ok(Self::replay(&self.route(session_id).await?))
    }

    /// Walks the recorded planned/actual sequences and derives the status
    /// they imply. A route that has not reached an end replays as running.
    pub fn replay(route: &Route) -> Replay {
        let mut completed_steps = 0;
        let mut status = SessionStatus::Running;

        for planned in &route.planned {
            if planned.signals_completion() {
                status = SessionStatus::Completed;
                break;
            }
            match route.action_for(planned.step).map(|a| a.status) {
                Some(ExecutionStatus::Success) => completed_steps += 1,
                Some(_) => {
                    status = SessionStatus::Failed;
                    break;
                }
                None => break,
            }
        }

        if let Some(closure) = &route.closure {
            status = closure.status;
        }

        Replay {
            status,
            completed_steps,
        }
    }
}

fn rejected(session_id: &str, reason: impl std::fmt::Display) -> PilotError {
    PilotError::data_access(format!("Route append rejected for session {session_id}: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uipilot_core::action::{ActionCandidate, ActionInput, ActionTarget, Confidence};
    use uipilot_core::collaborator::ExecutionOutcome;
    use uipilot_infrastructure::InMemoryTrackingSink;

    fn candidate(label: &str) -> ActionCandidate {
        ActionCandidate::new(
            ActionInput::Click,
            Some(ActionTarget::new(label)),
            Confidence::new(0.9).unwrap(),
        )
    }

    fn tracker() -> RouteTracker {
        RouteTracker::new(Arc::new(InMemoryTrackingSink::new()))
    }

    fn success(step: u32, c: &ActionCandidate) -> ActionRecord {
        ActionRecord::pending("s1", step, c).settle(&ExecutionOutcome::success(Duration::ZERO), 1)
    }

    #[tokio::test]
    async fn action_requires_a_planned_step() {
        let tracker = tracker();
        let c = candidate("Order");
        let err = tracker.record_action(success(1, &c)).await.unwrap_err();
        assert!(matches!(err, PilotError::DataAccess(_)));
    }

    #[tokio::test]
    async fn at_most_one_record_per_step() {
        let tracker = tracker();
        let c = candidate("Order");
        tracker
            .record_planned("s1", PlannedStep::new(1, vec![c.clone()]))
            .await
            .unwrap();
        tracker.record_action(success(1, &c)).await.unwrap();
        assert!(tracker.record_action(success(1, &c)).await.is_err());

        let route = tracker.route("s1").await.unwrap();
        assert_eq!(route.actual.len(), 1);
        assert!(route.actual.len() <= route.planned.len());
    }

    #[tokio::test]
    async fn planned_steps_must_increase() {
        let tracker = tracker();
        tracker
            .record_planned("s1", PlannedStep::new(2, vec![candidate("Next")]))
            .await
            .unwrap();
        assert!(
            tracker
                .record_planned("s1", PlannedStep::new(2, vec![candidate("Next")]))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn nothing_is_appended_after_completion_or_closure() {
        let tracker = tracker();
        tracker
            .record_planned("s1", PlannedStep::new(1, Vec::new()))
            .await
            .unwrap();
        assert!(
            tracker
                .record_planned("s1", PlannedStep::new(2, vec![candidate("Next")]))
                .await
                .is_err()
        );

        tracker
            .record_closure("s2", RouteClosure::new(SessionStatus::Cancelled, "cancelled"))
            .await
            .unwrap();
        assert!(
            tracker
                .record_closure("s2", RouteClosure::new(SessionStatus::Cancelled, "again"))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn cursor_resumes_from_existing_sink_contents() {
        let sink: Arc<dyn TrackingSink> = Arc::new(InMemoryTrackingSink::new());
        let c = candidate("Order");
        RouteTracker::new(sink.clone())
            .record_planned("s1", PlannedStep::new(1, vec![c.clone()]))
            .await
            .unwrap();

        let reopened = RouteTracker::new(sink);
        reopened.record_action(success(1, &c)).await.unwrap();
        assert!(
            reopened
                .record_planned("s1", PlannedStep::new(1, vec![c]))
                .await
                .is_err()
        );
    }

    #[test]
    fn replay_derives_completed_failed_and_closed_routes() {
        let c = candidate("Order");
        let mut route = Route::new("s1");
        route.planned.push(PlannedStep::new(1, vec![c.clone()]));
        route.actual.push(success(1, &c));
        route.planned.push(PlannedStep::new(2, Vec::new()));
        assert_eq!(
            RouteTracker::replay(&route),
            Replay {
                status: SessionStatus::Completed,
                completed_steps: 1
            }
        );

        let mut blocked = Route::new("s2");
        let pay = candidate("Confirm Payment");
        blocked.planned.push(PlannedStep::new(1, vec![pay.clone()]));
        blocked
            .actual
            .push(ActionRecord::pending("s2", 1, &pay).block("payment intent"));
        assert_eq!(RouteTracker::replay(&blocked).status, SessionStatus::Failed);

        let mut cancelled = Route::new("s3");
        cancelled.planned.push(PlannedStep::new(1, vec![c.clone()]));
        cancelled.actual.push(success(1, &c));
        cancelled.closure = Some(RouteClosure::new(SessionStatus::Cancelled, "cancelled"));
        let replay = RouteTracker::replay(&cancelled);
        assert_eq!(replay.status, SessionStatus::Cancelled);
        assert_eq!(replay.completed_steps, 1);

        assert_eq!(
            RouteTracker::replay(&Route::new("s4")).status,
            SessionStatus::Running
        );
    }

    #[tokio::test]
    async fn aggregate_merges_known_routes() {
        let tracker = tracker();
        let c = candidate("Order");
        for id in ["a", "b"] {
            tracker
                .record_planned(id, PlannedStep::new(1, vec![c.clone()]))
                .await
                .unwrap();
            let record = ActionRecord::pending(id, 1, &c)
                .settle(&ExecutionOutcome::success(Duration::ZERO), 1);
            tracker.record_action(record).await.unwrap();
        }
        let stats = tracker
            .aggregate(&["a".into(), "b".into(), "missing".into()])
            .await
            .unwrap();
        assert_eq!(stats.attempted, 2);
        assert_eq!(stats.success_rate(), Some(1.0));
    }

    #[tokio::test]
    async fn finished_route_releases_its_cursor() {
        let tracker = tracker();
        let c = candidate("Order");
        tracker
            .record_planned("s1", PlannedStep::new(1, vec![c.clone()]))
            .await
            .unwrap();
        tracker.record_action(success(1, &c)).await.unwrap();
        assert_eq!(tracker.open_cursors().await, 1);

        tracker
            .record_planned("s1", PlannedStep::new(2, Vec::new()))
            .await
            .unwrap();
        assert_eq!(tracker.open_cursors().await, 0);

        // the reloaded cursor still knows the route is finished
        assert!(tracker
            .record_planned("s1", PlannedStep::new(3, vec![c]))
            .await
            .is_err());
    }
}
