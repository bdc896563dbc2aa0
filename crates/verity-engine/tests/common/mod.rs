//! Mock collaborators shared by the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use verity_engine::backend::{BackendError, NavigationResult, PageDriver};
use verity_engine::collaborators::{StateSource, VisualAnalyzer};
use verity_engine::config::VerityConfig;
use verity_engine::presentation::PresentationSink;
use verity_engine::protocol::PresentationMessage;
use verity_engine::session::{ResolvedTarget, SessionFactory, SessionParts};
use verity_scanner::{CAPTURE_DRAIN_JS, CAPTURE_JS, CAPTURE_STATUS_JS, CAPTURE_STOP_JS};

pub const READY_HTML: &str = "<html><div id=\"waffle-grid-container\"></div></html>";
pub const SIGN_IN_HTML: &str = "<html><div>Choose an account</div></html>";

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();
}

/// Config with every delay shortened for tests.
pub fn fast_config() -> VerityConfig {
    let mut config = VerityConfig::default();
    config.capture.activation_retry_ms = 5;
    config.triage.settle_delay_ms = 0;
    config.triage.snapshot_timeout_ms = 500;
    config.synthesis.analysis_timeout_ms = 500;
    config.session.poll_interval_ms = 20;
    config.session.error_backoff_ms = 20;
    config.session.load_poll_ms = 10;
    config.session.load_timeout_ms = 100;
    config.session.stop_grace_ms = 1000;
    config.verifier.poll_slice_ms = 50;
    config
}

/// Shared, inspectable state behind a `MockPage`.
#[derive(Default)]
pub struct PageState {
    pub queue: Mutex<Vec<Value>>,
    pub installed: AtomicBool,
    pub launched: AtomicBool,
    pub closed: AtomicBool,
    pub content: Mutex<String>,
    pub url: Mutex<String>,
    pub screenshots: AtomicUsize,
    pub fail_drain: AtomicBool,
}

impl PageState {
    pub fn new(content: &str) -> Arc<Self> {
        let state = Self::default();
        *state.content.lock().unwrap() = content.to_string();
        Arc::new(state)
    }

    pub fn push(&self, record: Value) {
        self.queue.lock().unwrap().push(record);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockPage {
    pub state: Arc<PageState>,
}

#[async_trait]
impl PageDriver for MockPage {
    async fn launch(&mut self) -> Result<(), BackendError> {
        self.state.launched.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.state.launched.load(Ordering::SeqCst) && !self.state.closed.load(Ordering::SeqCst)
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        *self.state.url.lock().unwrap() = url.to_string();
        Ok(NavigationResult {
            url: url.to_string(),
            title: "Sheet".to_string(),
            status: 200,
        })
    }

    async fn evaluate(&mut self, script: &str) -> Result<Value, BackendError> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(BackendError::ConnectionLost);
        }
        let installed = self.state.installed.load(Ordering::SeqCst);
        if script == CAPTURE_JS {
            self.state.installed.store(true, Ordering::SeqCst);
            return Ok(json!({"installed": true, "active": true, "reinstalled": installed}));
        }
        if script == CAPTURE_STATUS_JS {
            return Ok(json!(installed));
        }
        if script == CAPTURE_DRAIN_JS {
            if self.state.fail_drain.load(Ordering::SeqCst) {
                return Err(BackendError::ConnectionLost);
            }
            if !installed {
                return Ok(Value::Null);
            }
            let records: Vec<Value> = self.state.queue.lock().unwrap().drain(..).collect();
            return Ok(Value::Array(records));
        }
        if script == CAPTURE_STOP_JS {
            self.state.installed.store(false, Ordering::SeqCst);
            return Ok(json!(installed));
        }
        if script.contains("location.href") {
            return Ok(json!({"url": *self.state.url.lock().unwrap(), "title": "Sheet"}));
        }
        if script.contains("outerHTML") {
            return Ok(json!(*self.state.content.lock().unwrap()));
        }
        Ok(Value::Null)
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        let n = self.state.screenshots.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0x89, 0x50, 0x4E, 0x47, n as u8])
    }
}

/// Returns queued snapshots in order, repeating the last one.
pub struct ScriptedState {
    snapshots: Mutex<VecDeque<Value>>,
}

impl ScriptedState {
    pub fn new(snapshots: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            snapshots: Mutex::new(snapshots.into()),
        })
    }
}

#[async_trait]
impl StateSource for ScriptedState {
    async fn get_snapshot(&self) -> Result<Value, BackendError> {
        let mut snapshots = self.snapshots.lock().unwrap();
        if snapshots.len() > 1 {
            Ok(snapshots.pop_front().unwrap_or_default())
        } else {
            snapshots
                .front()
                .cloned()
                .ok_or_else(|| BackendError::Http("no snapshot".into()))
        }
    }
}

pub struct FixedVision(pub String);

#[async_trait]
impl VisualAnalyzer for FixedVision {
    async fn analyze(&self, _before: &[u8], _after: &[u8]) -> Result<String, BackendError> {
        Ok(self.0.clone())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<PresentationMessage>>,
    pub fail: AtomicBool,
}

impl RecordingSink {
    pub fn types(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .map(|m| serde_json::to_value(m).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.types().iter().filter(|t| t.as_str() == kind).count()
    }
}

#[async_trait]
impl PresentationSink for RecordingSink {
    async fn send(&self, message: PresentationMessage) -> Result<(), BackendError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(BackendError::ConnectionLost);
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}

/// Hands out a fresh `MockPage` per session and remembers each page's state.
pub struct MockFactory {
    pub content: String,
    pub state_source: Option<Arc<dyn StateSource>>,
    pub visual: Option<Arc<dyn VisualAnalyzer>>,
    pub pages: Mutex<Vec<(String, Arc<PageState>)>>,
}

impl MockFactory {
    pub fn new(content: &str) -> Self {
        Self {
            content: content.to_string(),
            state_source: None,
            visual: None,
            pages: Mutex::new(Vec::new()),
        }
    }

    pub fn with_state(mut self, source: Arc<dyn StateSource>) -> Self {
        self.state_source = Some(source);
        self
    }

    pub fn with_visual(mut self, visual: Arc<dyn VisualAnalyzer>) -> Self {
        self.visual = Some(visual);
        self
    }

    /// Most recent page created for `user_id`.
    pub fn page(&self, user_id: &str) -> Arc<PageState> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(user, _)| user == user_id)
            .map(|(_, page)| page.clone())
            .expect("no page for user")
    }

    pub fn pages_for(&self, user_id: &str) -> Vec<Arc<PageState>> {
        self.pages
            .lock()
            .unwrap()
            .iter()
            .filter(|(user, _)| user == user_id)
            .map(|(_, page)| page.clone())
            .collect()
    }
}

#[async_trait]
impl SessionFactory for MockFactory {
    async fn create(
        &self,
        user_id: &str,
        _target: &ResolvedTarget,
    ) -> Result<SessionParts, BackendError> {
        let state = PageState::new(&self.content);
        self.pages
            .lock()
            .unwrap()
            .push((user_id.to_string(), state.clone()));
        Ok(SessionParts {
            driver: Box::new(MockPage { state }),
            state_source: self.state_source.clone(),
            visual: self.visual.clone(),
        })
    }
}

pub fn cell_keydown(key: &str, label: &str, row: u32, col: u32) -> Value {
    json!({
        "eventId": 1,
        "type": "keydown",
        "key": key,
        "timestamp": 1_700_000_000_000u64,
        "target": {"tagName": "DIV", "ariaLabel": label},
        "domainContext": {"type": "cell", "ariaLabel": label, "row": row, "col": col},
        "domPath": "div#grid > div.cell"
    })
}

pub fn toolbar_click(label: &str) -> Value {
    json!({
        "eventId": 2,
        "type": "click",
        "timestamp": 1_700_000_000_000u64,
        "target": {"tagName": "DIV", "ariaLabel": label},
        "domainContext": {"type": "toolbar", "toolbarId": "docs-toolbar", "ariaLabel": label},
        "domPath": "div#docs-toolbar > div"
    })
}

pub fn hover(path: &str) -> Value {
    json!({
        "type": "mouseover",
        "timestamp": 1_700_000_000_000u64,
        "target": {"tagName": "SPAN", "textExcerpt": "Revenue"},
        "domPath": path
    })
}

/// Poll `check` every 10ms until it holds or `ms` elapses.
pub async fn eventually(ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_millis(ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
