//! Per-user session lifecycle.
//!
//! A session owns one browser page, instruments it, and runs a single polling
//! task that drains captured events through triage and synthesis. The
//! `SessionHandle` is the only way to observe or stop that task from outside.

mod load;
mod target;
mod worker;

pub use load::{LoadOutcome, PageCheck, classify_page, wait_for_load};
pub use target::{ResolvedTarget, TargetResolver};
pub use worker::{Route, route};

use crate::backend::PageDriver;
use crate::capture::CaptureSensor;
use crate::collaborators::{StateSource, VisualAnalyzer};
use crate::config::VerityConfig;
use crate::presentation::PresentationSink;
use crate::synthesis::Synthesizer;
use crate::triage::{Classifier, TriageEngine};
use crate::verifier::SubscriptionBus;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use verity_common::error::{BackendError, PipelineError};
use verity_common::protocol::{PresentationMessage, now_millis};
use worker::{HoverTracker, Worker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Starting,
    Active,
    Stopping,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Starting => "starting",
            SessionState::Active => "active",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        };
        write!(f, "{}", s)
    }
}

/// Collaborators for one session, produced by a `SessionFactory`.
pub struct SessionParts {
    pub driver: Box<dyn PageDriver>,
    pub state_source: Option<Arc<dyn StateSource>>,
    pub visual: Option<Arc<dyn VisualAnalyzer>>,
}

/// Builds the per-session collaborators for a user and target.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        target: &ResolvedTarget,
    ) -> Result<SessionParts, BackendError>;
}

/// Process-wide pieces every session is wired with.
#[derive(Clone)]
pub struct SessionWiring {
    pub config: Arc<VerityConfig>,
    pub classifier: Arc<dyn Classifier>,
    pub bus: Arc<SubscriptionBus>,
    pub sink: Arc<dyn PresentationSink>,
}

#[derive(Debug, Default)]
pub struct SessionCounters {
    pub events_captured: AtomicU64,
    pub events_processed: AtomicU64,
    pub actions_published: AtomicU64,
    pub actions_delivered: AtomicU64,
    pub annotations_sent: AtomicU64,
}

impl SessionCounters {
    pub(crate) fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub user_id: String,
    pub state: SessionState,
    pub target_url: String,
    pub resource_id: Option<String>,
    pub started_at: u64,
    pub events_captured: u64,
    pub events_processed: u64,
    pub actions_published: u64,
    pub actions_delivered: u64,
    pub annotations_sent: u64,
}

pub struct SessionHandle {
    user_id: String,
    target: ResolvedTarget,
    started_at: u64,
    state: Arc<watch::Sender<SessionState>>,
    counters: Arc<SessionCounters>,
    task: Mutex<Option<JoinHandle<()>>>,
    grace: Duration,
    sink: Arc<dyn PresentationSink>,
}

impl SessionHandle {
    /// Launch, navigate, wait for load and instrument the page, then spawn
    /// the polling task. On failure the driver is closed before returning.
    pub async fn start(
        user_id: &str,
        target: ResolvedTarget,
        parts: SessionParts,
        wiring: &SessionWiring,
    ) -> Result<Self, PipelineError> {
        let config = &wiring.config;
        let SessionParts {
            mut driver,
            state_source,
            visual,
        } = parts;

        let (state, _) = watch::channel(SessionState::Starting);
        let state = Arc::new(state);
        let mut capture = CaptureSensor::new(config.capture.clone());
        let mut triage = TriageEngine::new(
            wiring.classifier.clone(),
            state_source,
            config.triage.clone(),
        );

        info!(user_id, url = %target.url, "Starting session");
        let outcome =
            match prepare(driver.as_mut(), &target, config, &mut capture, &mut triage).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(user_id, "Session start failed: {}", e);
                    capture.stop_capture(driver.as_mut()).await;
                    if let Err(close_err) = driver.close().await {
                        warn!(user_id, "Failed to close page after start failure: {}", close_err);
                    }
                    return Err(PipelineError::Transport(format!(
                        "failed to start session for '{}': {}",
                        user_id, e
                    )));
                }
            };

        let counters = Arc::new(SessionCounters::default());
        state.send_replace(SessionState::Active);

        let message = match outcome {
            LoadOutcome::Loaded => format!("Watching {}", target.url),
            LoadOutcome::Unconfirmed => {
                format!("Watching {} (page load not confirmed)", target.url)
            }
        };
        if let Err(e) = wiring
            .sink
            .send(PresentationMessage::SessionStarted {
                user_id: user_id.to_string(),
                target_url: target.url.clone(),
                message,
            })
            .await
        {
            warn!(user_id, "Failed to announce session start: {}", e);
        }

        let worker = Worker {
            user_id: user_id.to_string(),
            driver,
            capture,
            triage,
            synthesizer: Synthesizer::new(visual, config.synthesis.clone()),
            bus: wiring.bus.clone(),
            sink: wiring.sink.clone(),
            counters: counters.clone(),
            state: state.clone(),
            poll_interval: config.session.poll_interval(),
            error_backoff: config.session.error_backoff(),
            hover: HoverTracker::default(),
        };
        let task = tokio::spawn(worker.run());
        info!(user_id, "Session active");

        Ok(Self {
            user_id: user_id.to_string(),
            target,
            started_at: now_millis(),
            state,
            counters,
            task: Mutex::new(Some(task)),
            grace: config.session.stop_grace(),
            sink: wiring.sink.clone(),
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn status(&self) -> SessionStatus {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        SessionStatus {
            user_id: self.user_id.clone(),
            state: self.state(),
            target_url: self.target.url.clone(),
            resource_id: self.target.resource_id.clone(),
            started_at: self.started_at,
            events_captured: load(&self.counters.events_captured),
            events_processed: load(&self.counters.events_processed),
            actions_published: load(&self.counters.actions_published),
            actions_delivered: load(&self.counters.actions_delivered),
            annotations_sent: load(&self.counters.annotations_sent),
        }
    }

    /// Resolves once the session reaches `closed`, whoever closed it.
    pub async fn closed(&self) {
        let mut rx = self.state.subscribe();
        let _ = rx.wait_for(|s| *s == SessionState::Closed).await;
    }

    /// Signal the polling task, wait up to the stop grace for it to tear the
    /// page down, abort it otherwise. Safe to call any number of times.
    pub async fn stop(&self) {
        let mut task = self.task.lock().await;
        let Some(mut handle) = task.take() else {
            return;
        };

        self.state.send_if_modified(|state| match state {
            SessionState::Starting | SessionState::Active => {
                *state = SessionState::Stopping;
                true
            }
            _ => false,
        });

        match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(user_id = %self.user_id, "Session task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    user_id = %self.user_id,
                    "Session task did not stop within {:?}, aborting", self.grace
                );
                handle.abort();
            }
        }

        if self.state() != SessionState::Closed {
            if let Err(e) = self
                .sink
                .send(PresentationMessage::SessionStopped {
                    user_id: self.user_id.clone(),
                    reason: "aborted".to_string(),
                })
                .await
            {
                warn!(user_id = %self.user_id, "Failed to announce session stop: {}", e);
            }
            self.state.send_replace(SessionState::Closed);
        }
        info!(user_id = %self.user_id, "Session closed");
    }
}

async fn prepare(
    driver: &mut dyn PageDriver,
    target: &ResolvedTarget,
    config: &VerityConfig,
    capture: &mut CaptureSensor,
    triage: &mut TriageEngine,
) -> Result<LoadOutcome, BackendError> {
    if !driver.is_ready().await {
        driver.launch().await?;
    }
    driver.navigate(&target.url).await?;
    let outcome = wait_for_load(driver, &config.session).await?;
    capture.start_capture(driver).await?;
    triage.take_baseline(driver).await;
    Ok(outcome)
}
