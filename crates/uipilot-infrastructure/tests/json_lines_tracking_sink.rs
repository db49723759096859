use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uipilot_core::action::{ActionCandidate, ActionInput, ActionRecord, ActionTarget, Confidence};
use uipilot_core::collaborator::ExecutionOutcome;
use uipilot_core::route::{PlannedStep, RouteClosure, TrackingSink};
use uipilot_core::session::SessionStatus;
use uipilot_infrastructure::JsonLinesTrackingSink;

fn click(label: &str, confidence: f64) -> ActionCandidate {
    ActionCandidate::new(
        ActionInput::Click,
        Some(ActionTarget::new(label).at(10, 20)),
        Confidence::new(confidence).unwrap(),
    )
}

#[tokio::test]
async fn route_survives_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let candidate = click("Order", 0.95);
    {
        let sink = JsonLinesTrackingSink::new(dir.path()).await.unwrap();
        sink.append_planned("s1", PlannedStep::new(1, vec![candidate.clone(), click("Menu", 0.4)]))
            .await
            .unwrap();
        let record = ActionRecord::pending("s1", 1, &candidate)
            .settle(&ExecutionOutcome::success(Duration::from_millis(800)), 1);
        sink.append_action(record).await.unwrap();
        sink.append_planned("s1", PlannedStep::new(2, Vec::new()))
            .await
            .unwrap();
    }

    let sink = JsonLinesTrackingSink::new(dir.path()).await.unwrap();
    let route = sink.load("s1").await.unwrap().unwrap();
    assert_eq!(route.planned.len(), 2);
    assert_eq!(route.planned[0].candidates.len(), 2);
    assert!(route.planned[1].signals_completion());
    assert_eq!(route.actual.len(), 1);
    assert_eq!(route.actual[0].execution_ms, Some(800));
    assert!(route.closure.is_none());
    assert_eq!(sink.session_ids().await.unwrap(), vec!["s1".to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sessions_do_not_interleave() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(JsonLinesTrackingSink::new(dir.path()).await.unwrap());

    let writers = (0..6).map(|n| {
        let sink = sink.clone();
        async move {
            let id = format!("session-{n}");
            for step in 1..=20 {
                sink.append_planned(&id, PlannedStep::new(step, vec![click("Next", 0.8)]))
                    .await
                    .unwrap();
            }
            sink.append_closure(&id, RouteClosure::new(SessionStatus::Cancelled, "cancelled"))
                .await
                .unwrap();
        }
    });
    futures::future::join_all(writers).await;

    for n in 0..6 {
        let route = sink.load(&format!("session-{n}")).await.unwrap().unwrap();
        let steps: Vec<u32> = route.planned.iter().map(|p| p.step).collect();
        assert_eq!(steps, (1..=20).collect::<Vec<_>>());
        assert_eq!(route.closure.unwrap().status, SessionStatus::Cancelled);
    }
    assert_eq!(sink.session_ids().await.unwrap().len(), 6);
}

#[tokio::test]
async fn append_after_torn_tail_keeps_the_route_readable() {
    let dir = TempDir::new().unwrap();
    let sink = JsonLinesTrackingSink::new(dir.path()).await.unwrap();
    sink.append_planned("s1", PlannedStep::new(1, vec![click("Order", 0.9)]))
        .await
        .unwrap();

    // crash in the middle of writing step 2
    let path = dir.path().join("s1.jsonl");
    let mut content = std::fs::read_to_string(&path).unwrap();
    content.push_str(r#"{"entry":"planned","step":2,"cand"#);
    std::fs::write(&path, content).unwrap();
    assert_eq!(sink.load("s1").await.unwrap().unwrap().planned.len(), 1);

    sink.append_planned("s1", PlannedStep::new(2, vec![click("Basket", 0.8)]))
        .await
        .unwrap();
    sink.append_planned("s1", PlannedStep::new(3, Vec::new()))
        .await
        .unwrap();

    let route = sink.load("s1").await.unwrap().unwrap();
    let steps: Vec<u32> = route.planned.iter().map(|p| p.step).collect();
    assert_eq!(steps, vec![1, 2, 3]);
    assert!(std::fs::read_to_string(&path).unwrap().ends_with('\n'));
}

#[tokio::test]
async fn unterminated_complete_entry_is_kept() {
    let dir = TempDir::new().unwrap();
    let sink = JsonLinesTrackingSink::new(dir.path()).await.unwrap();
    sink.append_planned("s1", PlannedStep::new(1, vec![click("Order", 0.9)]))
        .await
        .unwrap();

    let path = dir.path().join("s1.jsonl");
    let content = std::fs::read_to_string(&path).unwrap();
    std::fs::write(&path, content.trim_end()).unwrap();

    sink.append_planned("s1", PlannedStep::new(2, Vec::new()))
        .await
        .unwrap();
    assert_eq!(sink.load("s1").await.unwrap().unwrap().planned.len(), 2);
}
