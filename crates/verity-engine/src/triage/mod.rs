mod classifier;

pub use classifier::{
    Classifier, RuleClassifier, is_data_modification, is_simple_ui_interaction,
    requires_visual_analysis,
};

use crate::backend::PageDriver;
use crate::collaborators::StateSource;
use crate::config::schema::TriageConfig;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use verity_common::error::{BackendError, PipelineError};
use verity_common::protocol::{
    DomEvidence, Evidence, EvidenceBundle, RawInteractionEvent, TriageDecision, now_millis,
};

/// Classifies events and collects the evidence each decision asks for.
///
/// Holds the rolling "before" captures; owned by one session loop.
pub struct TriageEngine {
    classifier: Arc<dyn Classifier>,
    state_source: Option<Arc<dyn StateSource>>,
    config: TriageConfig,
    last_screenshot: Option<Vec<u8>>,
    last_backend_state: Option<serde_json::Value>,
}

impl TriageEngine {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        state_source: Option<Arc<dyn StateSource>>,
        config: TriageConfig,
    ) -> Self {
        Self {
            classifier,
            state_source,
            config,
            last_screenshot: None,
            last_backend_state: None,
        }
    }

    pub fn classify(&self, event: &RawInteractionEvent) -> TriageDecision {
        self.classifier.classify(event)
    }

    pub fn has_baseline_screenshot(&self) -> bool {
        self.last_screenshot.is_some()
    }

    pub fn has_baseline_state(&self) -> bool {
        self.last_backend_state.is_some()
    }

    /// Seed the rolling captures so the first event has a "before".
    pub async fn take_baseline(&mut self, driver: &mut dyn PageDriver) {
        let limit = self.config.snapshot_timeout();
        let source = self.state_source.clone();

        let (shot, state) = tokio::join!(
            bounded(limit, driver.screenshot(), "baseline screenshot"),
            async {
                match &source {
                    Some(source) => Some(bounded(limit, source.get_snapshot(), "baseline backend snapshot").await),
                    None => None,
                }
            }
        );

        match shot {
            Ok(bytes) => self.last_screenshot = Some(bytes),
            Err(e) => warn!("{}", e),
        }
        match state {
            Some(Ok(value)) => self.last_backend_state = Some(value),
            Some(Err(e)) => warn!("{}", e),
            None => debug!("No backend state source, skipping baseline snapshot"),
        }
    }

    /// Classify `event` and gather its evidence bundle.
    ///
    /// Never fails: a capture that errors or times out marks its channel as
    /// failed and the bundle is still produced.
    pub async fn collect(
        &mut self,
        driver: &mut dyn PageDriver,
        event: RawInteractionEvent,
    ) -> EvidenceBundle {
        let triaged_at = now_millis();
        let decision = self.classifier.classify(&event);
        debug!(
            sequence = event.sequence,
            method = %decision.primary_method,
            "{}",
            decision.reasoning
        );

        if decision.requires_screenshot || decision.requires_backend_snapshot {
            tokio::time::sleep(self.config.settle_delay()).await;
        }

        let limit = self.config.snapshot_timeout();
        let dom = match bounded(limit, driver.page_info(), "page info").await {
            Ok(info) => Some(DomEvidence {
                url: info.url,
                title: info.title,
                dom_path: event.dom_path.clone(),
                domain_context: event.domain_context.clone(),
            }),
            Err(e) => {
                debug!(sequence = event.sequence, "{}", e);
                None
            }
        };

        let source = self.state_source.clone();
        let want_shot = decision.requires_screenshot;
        let want_state = decision.requires_backend_snapshot;

        let (shot, state) = tokio::join!(
            async {
                if want_shot {
                    Some(bounded(limit, driver.screenshot(), "screenshot").await)
                } else {
                    None
                }
            },
            async {
                if !want_state {
                    return None;
                }
                Some(match &source {
                    Some(source) => bounded(limit, source.get_snapshot(), "backend snapshot").await,
                    None => Err(PipelineError::Snapshot(
                        "no backend state source configured".to_string(),
                    )),
                })
            }
        );

        let screenshots = match shot {
            None => Evidence::NotRequested,
            Some(Ok(after)) => Evidence::Captured {
                before: self.last_screenshot.replace(after.clone()),
                after,
            },
            Some(Err(e)) => {
                warn!(sequence = event.sequence, "{}", e);
                Evidence::Failed(e.to_string())
            }
        };

        let backend_state = match state {
            None => Evidence::NotRequested,
            Some(Ok(after)) => Evidence::Captured {
                before: self.last_backend_state.replace(after.clone()),
                after,
            },
            Some(Err(e)) => {
                warn!(sequence = event.sequence, "{}", e);
                Evidence::Failed(e.to_string())
            }
        };

        EvidenceBundle {
            event,
            decision,
            dom,
            screenshots,
            backend_state,
            triaged_at,
            collected_at: now_millis(),
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, BackendError>>,
    what: &str,
) -> Result<T, PipelineError> {
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(PipelineError::Snapshot(format!("{} failed: {}", what, e))),
        Err(_) => Err(PipelineError::Snapshot(format!(
            "{} timed out after {:?}",
            what, limit
        ))),
    }
}
