//! Process-wide entry point for calling workflows.
//!
//! Owns the session registry and the subscription bus. Every public operation
//! returns a well-formed record; lifecycle errors become rejected results.

use crate::config::VerityConfig;
use crate::presentation::PresentationSink;
use crate::session::{
    SessionFactory, SessionHandle, SessionState, SessionStatus, SessionWiring, TargetResolver,
};
use crate::triage::{Classifier, RuleClassifier};
use crate::verifier::{ActionVerifier, SubscriptionBus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{info, warn};
use verity_common::error::PipelineError;
use verity_common::protocol::{ComparisonResult, ExpectedAction};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartResult {
    pub success: bool,
    pub message: String,
}

impl StartResult {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn rejected(error: &PipelineError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
        }
    }
}

type Registry = HashMap<String, Arc<SessionHandle>>;

pub struct Runtime {
    wiring: SessionWiring,
    factory: Arc<dyn SessionFactory>,
    resolver: TargetResolver,
    verifier: ActionVerifier,
    sessions: Mutex<Registry>,
    shut_down: AtomicBool,
}

impl Runtime {
    pub fn new(
        config: VerityConfig,
        factory: Arc<dyn SessionFactory>,
        sink: Arc<dyn PresentationSink>,
    ) -> Result<Self, PipelineError> {
        Self::with_classifier(config, factory, sink, Arc::new(RuleClassifier))
    }

    pub fn with_classifier(
        config: VerityConfig,
        factory: Arc<dyn SessionFactory>,
        sink: Arc<dyn PresentationSink>,
        classifier: Arc<dyn Classifier>,
    ) -> Result<Self, PipelineError> {
        let resolver = TargetResolver::from_config(&config.target)?;
        let bus = Arc::new(SubscriptionBus::new());
        let verifier = ActionVerifier::new(bus.clone(), &config.verifier);
        Ok(Self {
            wiring: SessionWiring {
                config: Arc::new(config),
                classifier,
                bus,
                sink,
            },
            factory,
            resolver,
            verifier,
            sessions: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    pub fn bus(&self) -> Arc<SubscriptionBus> {
        self.wiring.bus.clone()
    }

    pub fn config(&self) -> &VerityConfig {
        &self.wiring.config
    }

    fn sessions(&self) -> MutexGuard<'_, Registry> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn session(&self, user_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions().get(user_id).cloned()
    }

    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Start watching `target` for `user_id`, superseding any session the
    /// user already has.
    pub async fn start_session(&self, user_id: &str, target: &str) -> StartResult {
        match self.try_start_session(user_id, target).await {
            Ok(result) => result,
            Err(e) => {
                warn!(user_id, "Start rejected: {}", e);
                StartResult::rejected(&e)
            }
        }
    }

    async fn try_start_session(
        &self,
        user_id: &str,
        target: &str,
    ) -> Result<StartResult, PipelineError> {
        if self.is_shut_down() {
            return Err(PipelineError::SessionState {
                user_id: user_id.to_string(),
                state: "shut down".to_string(),
                operation: "start".to_string(),
            });
        }
        let target = self.resolver.resolve(target)?;

        if let Some(existing) = self.session(user_id)
            && existing.state() != SessionState::Closed
        {
            info!(user_id, "Superseding existing session");
            existing.stop().await;
        }

        let parts = self
            .factory
            .create(user_id, &target)
            .await
            .map_err(|e| PipelineError::Transport(format!("failed to create page: {}", e)))?;
        let handle = Arc::new(SessionHandle::start(user_id, target, parts, &self.wiring).await?);
        let url = handle.target().url.clone();

        let displaced = self
            .sessions()
            .insert(user_id.to_string(), handle.clone());
        if let Some(displaced) = displaced
            && !Arc::ptr_eq(&displaced, &handle)
            && displaced.state() != SessionState::Closed
        {
            warn!(user_id, "Concurrent start for the same user, stopping the older session");
            displaced.stop().await;
        }

        if self.is_shut_down() {
            handle.stop().await;
            return Err(PipelineError::SessionState {
                user_id: user_id.to_string(),
                state: "shut down".to_string(),
                operation: "start".to_string(),
            });
        }

        Ok(StartResult::ok(format!("Session started for {}", url)))
    }

    /// Stop the user's session. Returns whether a session existed. Stopping a
    /// closed session is a no-op.
    pub async fn stop_session(&self, user_id: &str) -> bool {
        match self.session(user_id) {
            Some(handle) => {
                handle.stop().await;
                true
            }
            None => false,
        }
    }

    /// Wait up to `timeout_seconds` for the user's next verified action and
    /// compare it to `expected`.
    pub async fn await_and_verify(
        &self,
        user_id: &str,
        expected: ExpectedAction,
        timeout_seconds: f64,
    ) -> ComparisonResult {
        if self.is_shut_down() {
            return ComparisonResult::failed(expected, "runtime is shut down");
        }
        let timeout = match Duration::try_from_secs_f64(timeout_seconds) {
            Ok(timeout) => timeout,
            Err(e) => {
                return ComparisonResult::failed(
                    expected,
                    format!("invalid timeout {}: {}", timeout_seconds, e),
                );
            }
        };
        self.verifier.await_and_verify(user_id, expected, timeout).await
    }

    pub fn get_session_status(&self, user_id: &str) -> Option<SessionStatus> {
        self.session(user_id).map(|handle| handle.status())
    }

    /// Stop every session and release pending verifications.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let handles: Vec<_> = self.sessions().values().cloned().collect();
        info!("Shutting down {} session(s)", handles.len());
        futures::future::join_all(handles.iter().map(|h| h.stop())).await;
        self.wiring.bus.clear();
    }
}
