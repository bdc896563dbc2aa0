mod common;

use common::*;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use verity_engine::Runtime;
use verity_engine::protocol::PresentationMessage;
use verity_engine::session::SessionState;

fn runtime_with(factory: &Arc<MockFactory>, sink: &Arc<RecordingSink>) -> Runtime {
    Runtime::new(fast_config(), factory.clone(), sink.clone()).unwrap()
}

#[tokio::test]
async fn stop_is_idempotent() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);

    let started = runtime.start_session("u1", "sheet-123").await;
    assert!(started.success, "{}", started.message);
    assert_eq!(
        runtime.get_session_status("u1").unwrap().state,
        SessionState::Active
    );

    assert!(runtime.stop_session("u1").await);
    assert!(runtime.stop_session("u1").await);
    assert!(!runtime.stop_session("nobody").await);

    let status = runtime.get_session_status("u1").unwrap();
    assert_eq!(status.state, SessionState::Closed);
    assert!(factory.page("u1").is_closed());
    assert!(!factory.page("u1").installed.load(Ordering::SeqCst));
    assert_eq!(sink.count("SESSION_STARTED"), 1);
    assert_eq!(sink.count("SESSION_STOPPED"), 1);

    let messages = sink.messages.lock().unwrap();
    match messages.last().unwrap() {
        PresentationMessage::SessionStopped { user_id, reason } => {
            assert_eq!(user_id, "u1");
            assert_eq!(reason, "stopped");
        }
        other => panic!("unexpected last message: {:?}", other),
    }
}

#[tokio::test]
async fn second_start_supersedes_first() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);

    assert!(runtime.start_session("u1", "first-sheet").await.success);
    assert!(runtime.start_session("u1", "second-sheet").await.success);

    let pages = factory.pages_for("u1");
    assert_eq!(pages.len(), 2);
    assert!(pages[0].is_closed());
    assert!(!pages[1].is_closed());

    let status = runtime.get_session_status("u1").unwrap();
    assert_eq!(status.state, SessionState::Active);
    assert_eq!(status.resource_id.as_deref(), Some("second-sheet"));
    assert!(status.target_url.contains("/d/second-sheet/edit"));

    runtime.shutdown().await;
    assert!(pages[1].is_closed());
}

#[tokio::test]
async fn sign_in_page_rejects_start() {
    let factory = Arc::new(MockFactory::new(SIGN_IN_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);

    let result = runtime.start_session("u1", "sheet-123").await;
    assert!(!result.success);
    assert!(result.message.contains("interstitial"), "{}", result.message);
    assert!(factory.page("u1").is_closed());
    assert!(runtime.get_session_status("u1").is_none());
    assert_eq!(sink.count("SESSION_STARTED"), 0);
}

#[tokio::test]
async fn unconfirmed_load_still_starts() {
    let factory = Arc::new(MockFactory::new("<html><body>loading</body></html>"));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);

    let result = runtime.start_session("u1", "sheet-123").await;
    assert!(result.success, "{}", result.message);
    runtime.shutdown().await;
}

#[tokio::test]
async fn malformed_target_is_rejected_before_any_page_opens() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);

    let result = runtime.start_session("u1", "not a url").await;
    assert!(!result.success);
    assert!(factory.pages_for("u1").is_empty());
}

#[tokio::test]
async fn lost_page_deactivates_session() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);
    assert!(runtime.start_session("u1", "sheet-123").await.success);

    factory.page("u1").fail_drain.store(true, Ordering::SeqCst);

    assert!(
        eventually(2000, || {
            runtime.get_session_status("u1").map(|s| s.state) == Some(SessionState::Closed)
        })
        .await
    );
    assert!(factory.page("u1").is_closed());
    // Stopping after the loop already exited is still fine.
    assert!(runtime.stop_session("u1").await);
    assert_eq!(sink.count("SESSION_STOPPED"), 1);
}

#[tokio::test]
async fn failed_presentation_channel_deactivates_session() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);
    assert!(runtime.start_session("u1", "sheet-123").await.success);

    sink.fail.store(true, Ordering::SeqCst);
    factory.page("u1").push(toolbar_click("File menu"));

    assert!(
        eventually(2000, || {
            runtime.get_session_status("u1").map(|s| s.state) == Some(SessionState::Closed)
        })
        .await
    );
    assert_eq!(runtime.get_session_status("u1").unwrap().events_processed, 1);
}

#[tokio::test]
async fn lost_instrumentation_is_reinstalled() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);
    assert!(runtime.start_session("u1", "sheet-123").await.success);

    let page = factory.page("u1");
    page.installed.store(false, Ordering::SeqCst);
    assert!(eventually(1000, || page.installed.load(Ordering::SeqCst)).await);

    page.push(toolbar_click("File menu"));
    assert!(eventually(2000, || sink.count("VERIFIED_ACTION") == 1).await);
    assert_eq!(
        runtime.get_session_status("u1").unwrap().state,
        SessionState::Active
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn shutdown_closes_everything_and_refuses_new_work() {
    let factory = Arc::new(MockFactory::new(READY_HTML));
    let sink = Arc::new(RecordingSink::default());
    let runtime = runtime_with(&factory, &sink);
    assert!(runtime.start_session("u1", "sheet-1").await.success);
    assert!(runtime.start_session("u2", "sheet-2").await.success);

    runtime.shutdown().await;
    assert!(factory.page("u1").is_closed());
    assert!(factory.page("u2").is_closed());

    let refused = runtime.start_session("u3", "sheet-3").await;
    assert!(!refused.success);
    assert!(refused.message.contains("Cannot start session"));
}
