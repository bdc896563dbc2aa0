//! End-to-end pipeline tests: captured records in, presentation messages and
//! verification results out, with every collaborator mocked.

mod common;

use common::*;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use verity_engine::Runtime;
use verity_engine::protocol::{
    ActionStatus, ExpectedAction, Parameters, PresentationMessage, PrimarySource, VerifiedAction,
};

fn verified_actions(sink: &RecordingSink) -> Vec<VerifiedAction> {
    sink.messages
        .lock()
        .unwrap()
        .iter()
        .filter_map(|m| match m {
            PresentationMessage::VerifiedAction { action, .. } => Some(action.clone()),
            _ => None,
        })
        .collect()
}

fn cell_state() -> Arc<ScriptedState> {
    ScriptedState::new(vec![
        json!({"sheets": {"Sheet1": {"A1": {"value": ""}}}}),
        json!({"sheets": {"Sheet1": {"A1": {"value": "x"}}}}),
    ])
}

#[tokio::test]
async fn cell_commit_is_verified_from_backend_state() {
    init_tracing();
    let factory = Arc::new(MockFactory::new(READY_HTML).with_state(cell_state()));
    let sink = Arc::new(RecordingSink::default());
    let runtime = Runtime::new(fast_config(), factory.clone(), sink.clone()).unwrap();

    assert!(runtime.start_session("u1", "sheet-123").await.success);
    factory.page("u1").push(cell_keydown("Enter", "A1", 1, 1));

    assert!(eventually(2000, || verified_actions(&sink).len() == 1).await);
    let action = &verified_actions(&sink)[0];
    assert_eq!(action.tool_name, "write_cell");
    assert_eq!(action.parameters["cell"], "A1");
    assert_eq!(action.parameters["value"], "x");
    assert_eq!(action.parameters["synthesis_method"], "backend");
    assert_eq!(action.status, ActionStatus::Success);
    assert!((action.confidence - 0.95).abs() < 1e-9);
    assert_eq!(
        action.evidence_summary.as_ref().unwrap().primary_source,
        PrimarySource::Backend
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn every_pipeline_event_yields_exactly_one_action() {
    init_tracing();
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = Runtime::new(fast_config(), factory.clone(), sink.clone()).unwrap();
    assert!(runtime.start_session("u1", "sheet-123").await.success);

    let page = factory.page("u1");
    page.push(toolbar_click("Insert menu"));
    page.push(hover("div#a"));
    page.push(hover("div#a"));
    page.push(hover("div#b"));
    page.push(cell_keydown("Enter", "B2", 2, 2));
    page.push(json!({
        "type": "input",
        "timestamp": 1_700_000_000_001u64,
        "target": {"tagName": "INPUT", "value": "hello"}
    }));
    page.push(json!({
        "type": "dblclick",
        "timestamp": 1_700_000_000_002u64,
        "target": {"tagName": "DIV", "ariaLabel": "C3"},
        "domainContext": {"type": "cell", "ariaLabel": "C3", "row": 3, "col": 3}
    }));

    assert!(eventually(2000, || verified_actions(&sink).len() == 3).await);
    // Nothing extra arrives afterwards.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let actions = verified_actions(&sink);
    assert_eq!(actions.len(), 3);
    for action in &actions {
        assert!((0.0..=1.0).contains(&action.confidence));
    }
    assert_eq!(sink.count("HOVER_ANNOTATION"), 2);
    assert_eq!(sink.count("RAW_EVENT"), 1);

    // No backend source is configured, so the commit keystroke degrades.
    assert_eq!(actions[1].status, ActionStatus::Partial);
    assert_eq!(actions[1].parameters["synthesis_method"], "raw-event");
    assert_eq!(actions[2].tool_name, "click_cell");

    let status = runtime.get_session_status("u1").unwrap();
    assert_eq!(status.events_captured, 7);
    assert_eq!(status.events_processed, 3);
    assert_eq!(status.actions_published, 3);
    assert_eq!(status.annotations_sent, 3);

    runtime.shutdown().await;
}

#[tokio::test]
async fn action_arriving_while_waiting_is_matched() {
    let factory = Arc::new(MockFactory::new(READY_HTML).with_state(cell_state()));
    let sink = Arc::new(RecordingSink::default());
    let runtime = Arc::new(Runtime::new(fast_config(), factory.clone(), sink.clone()).unwrap());
    assert!(runtime.start_session("u1", "sheet-123").await.success);

    let mut parameters = Parameters::new();
    parameters.insert("cell".into(), json!("A1"));
    parameters.insert("value".into(), json!("x"));
    let expected = ExpectedAction::new("write_cell", parameters);

    let waiter = {
        let runtime = runtime.clone();
        tokio::spawn(async move { runtime.await_and_verify("u1", expected, 5.0).await })
    };
    assert!(eventually(1000, || runtime.bus().has_subscriber("u1")).await);

    factory.page("u1").push(cell_keydown("Enter", "A1", 1, 1));

    let result = waiter.await.unwrap();
    assert!(result.matched, "{:?}", result.feedback_suggestion);
    assert!(!result.timeout);
    assert!(result.confidence > 0.8);
    assert!(!runtime.bus().has_subscriber("u1"));
    assert_eq!(runtime.get_session_status("u1").unwrap().actions_delivered, 1);

    runtime.shutdown().await;
}

#[tokio::test]
async fn visual_evidence_drives_toolbar_formatting() {
    let vision = FixedVision(
        "```json\n{\"tool_name\": \"format_cell\", \"parameters\": {\"bold\": true}, \
         \"description\": \"Applied bold\", \"confidence\": 0.85, \"category\": \"formatting\"}\n```"
            .to_string(),
    );
    let factory = Arc::new(MockFactory::new(READY_HTML).with_visual(Arc::new(vision)));
    let sink = Arc::new(RecordingSink::default());
    let runtime = Runtime::new(fast_config(), factory.clone(), sink.clone()).unwrap();
    assert!(runtime.start_session("u1", "sheet-123").await.success);

    factory.page("u1").push(toolbar_click("Bold (Ctrl+B)"));

    assert!(eventually(2000, || verified_actions(&sink).len() == 1).await);
    let action = &verified_actions(&sink)[0];
    assert_eq!(action.tool_name, "format_cell");
    assert_eq!(action.parameters["synthesis_method"], "visual");
    assert!((action.confidence - 0.85).abs() < 1e-9);

    runtime.shutdown().await;
}
