use std::io::Write;
use uipilot_application::SessionEngine;
use uipilot_core::action::ExecutionStatus;
use uipilot_core::config::PilotConfig;
use uipilot_core::session::{HaltCode, SessionStatus};
use uipilot_execution::Scenario;

const ORDER_SCENARIO: &str = r#"{
    "user_id": "u-1",
    "app_name": "Deliveroo",
    "task": "order item X",
    "screens": [{"description": "Item X detail page"}, {"description": "Basket"}],
    "responses": [
        {"current_screen": "Item X", "task_complete": false, "candidates": [
            {"action_type": "click", "target": "Add to basket", "coordinates": {"x": 640, "y": 520}, "confidence": 0.93}
        ]},
        {"candidates": [
            {"action_type": "click", "target": "Place order", "coordinates": {"x": 700, "y": 900}, "confidence": 0.97}
        ]}
    ],
    "outcomes": [{"failure": "transient", "error": "element not found"}, {"duration_ms": 800}]
}"#;

fn load(json: &str) -> Scenario {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    Scenario::load(file.path()).unwrap()
}

#[tokio::test]
async fn order_scenario_stops_at_the_payment_commit() {
    let scenario = load(ORDER_SCENARIO);
    let engine = SessionEngine::builder(scenario.collaborators(false))
        .config(PilotConfig::default())
        .build();
    engine
        .consent()
        .record_consent(&scenario.user_id, scenario.consent_given)
        .await
        .unwrap();

    let id = engine
        .start(&scenario.user_id, &scenario.app_name, &scenario.task)
        .await
        .unwrap();
    let session = engine.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Failed);
    assert_eq!(session.current_step, 1);
    assert_eq!(session.halt.unwrap().code, HaltCode::PaymentIntentBlocked);

    let route = engine.tracker().route(&id).await.unwrap();
    assert_eq!(route.planned.len(), 2);
    assert_eq!(route.actual[0].status, ExecutionStatus::Success);
    assert_eq!(route.actual[0].attempts, 2);
    assert!(route.actual[1].safety_blocked);
    assert_eq!(route.actual[1].status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn exhausted_script_completes_the_session() {
    let scenario = load(r#"{"app_name": "Notes", "task": "open notes", "consent_given": true}"#);
    let engine = SessionEngine::builder(scenario.collaborators(false))
        .config(PilotConfig {
            require_consent: false,
            ..PilotConfig::default()
        })
        .build();

    let id = engine
        .start(&scenario.user_id, &scenario.app_name, &scenario.task)
        .await
        .unwrap();
    let session = engine.wait(&id).await.unwrap();

    assert_eq!(session.status, SessionStatus::Completed);
    assert_eq!(session.current_step, 0);
    let replay = engine.tracker().replay_session(&id).await.unwrap();
    assert_eq!(replay.status, SessionStatus::Completed);
}
