//! Evidence fusion.
//!
//! Runs the visual and backend-state analyses concurrently and reconciles
//! them with the raw event into exactly one `VerifiedAction`.

pub mod state_diff;
pub mod visual;

use crate::collaborators::VisualAnalyzer;
use crate::config::schema::SynthesisConfig;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use verity_common::error::PipelineError;
use verity_common::protocol::{
    ActionStatus, EventKind, EvidenceBundle, EvidenceSummary, Parameters, PrimarySource,
    RawEventSummary, RawInteractionEvent, StateDiff, TriageDecision, VerifiedAction,
    VisualAnalysis, clamp_confidence, now_millis,
};

pub struct Synthesizer {
    visual: Option<Arc<dyn VisualAnalyzer>>,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(visual: Option<Arc<dyn VisualAnalyzer>>, config: SynthesisConfig) -> Self {
        Self { visual, config }
    }

    /// Produce the verified action for one bundle. Never fails: internal
    /// errors become a `VerifiedAction` with status `ERROR`.
    pub async fn synthesize(&self, bundle: EvidenceBundle) -> VerifiedAction {
        let sequence = bundle.event.sequence;
        match self.try_synthesize(bundle).await {
            Ok(action) => {
                info!(
                    sequence,
                    tool = %action.tool_name,
                    confidence = action.confidence,
                    "Verified action"
                );
                action
            }
            Err(e) => {
                error!(sequence, "Synthesis failed: {}", e);
                VerifiedAction::error(e.to_string())
            }
        }
    }

    async fn try_synthesize(&self, bundle: EvidenceBundle) -> Result<VerifiedAction, PipelineError> {
        let EvidenceBundle {
            event,
            decision,
            screenshots,
            backend_state,
            ..
        } = bundle;

        if event.event_type.trim().is_empty() {
            return Err(PipelineError::Synthesis("event carries no type".into()));
        }

        let channel_failed = screenshots.is_failed() || backend_state.is_failed();
        let limit = self.config.analysis_timeout();
        let trust = self.config.backend_trust_confidence;

        let visual_task = tokio::spawn(tokio::time::timeout(
            limit,
            visual::analyze(self.visual.clone(), screenshots),
        ));
        let backend_task = tokio::spawn(tokio::time::timeout(limit, async move {
            state_diff::compare(&backend_state, trust)
        }));

        let (visual, backend) = tokio::join!(
            settle(visual_task, limit, "visual analysis", |reason| {
                VisualAnalysis::unavailable("Visual analysis did not complete", Some(reason))
            }),
            settle(backend_task, limit, "backend analysis", |reason| {
                StateDiff::unavailable("Backend analysis did not complete", Some(reason))
            })
        );

        debug!(
            sequence = event.sequence,
            visual = visual.confidence,
            backend = backend.confidence,
            "Analyses complete"
        );

        Ok(reconcile(&self.config, &event, &decision, visual, backend, channel_failed))
    }
}

/// Await a spawned, time-bounded analysis, turning a timeout or panic into
/// a zero-confidence stand-in.
async fn settle<T>(
    task: impl Future<Output = Result<Result<T, tokio::time::error::Elapsed>, tokio::task::JoinError>>,
    limit: Duration,
    what: &str,
    stand_in: impl FnOnce(String) -> T,
) -> T {
    match task.await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => {
            let err = PipelineError::Timeout(limit);
            error!("{}: {}", what, err);
            stand_in(err.to_string())
        }
        Err(join_err) => {
            let err = PipelineError::Analysis(format!("{} panicked: {}", what, join_err));
            error!("{}", err);
            stand_in(err.to_string())
        }
    }
}

/// Deterministic choice between the three evidence sources.
pub fn reconcile(
    config: &SynthesisConfig,
    event: &RawInteractionEvent,
    decision: &TriageDecision,
    visual: VisualAnalysis,
    backend: StateDiff,
    channel_failed: bool,
) -> VerifiedAction {
    let (source, interpretation, tool_name, mut parameters, confidence, status) =
        if backend.has_changes && backend.confidence >= config.high_threshold {
            (
                PrimarySource::Backend,
                backend.description.clone(),
                backend.tool_name.clone(),
                backend.parameters.clone(),
                backend.confidence,
                ActionStatus::Success,
            )
        } else if visual.confidence >= config.medium_threshold {
            (
                PrimarySource::Visual,
                visual.description.clone(),
                visual.tool_name.clone(),
                visual.parameters.clone(),
                visual.confidence,
                ActionStatus::Success,
            )
        } else {
            let (tool_name, parameters, interpretation) = from_raw_event(event);
            let status = if channel_failed {
                ActionStatus::Partial
            } else {
                ActionStatus::Success
            };
            (
                PrimarySource::RawEvent,
                interpretation,
                tool_name,
                parameters,
                config.raw_event_confidence,
                status,
            )
        };

    let confidence = clamp_confidence(confidence);
    parameters.insert("synthesis_method".into(), json!(source.to_string()));

    VerifiedAction {
        interpretation,
        verification: format!(
            "Synthesized from {} evidence via {} triage (confidence: {:.2})",
            source, decision.primary_method, confidence
        ),
        status,
        tool_name,
        parameters,
        confidence,
        timestamp: now_millis(),
        evidence_summary: Some(EvidenceSummary {
            primary_source: source,
            method: decision.primary_method,
            raw_event: RawEventSummary::from(event),
            visual,
            backend,
        }),
    }
}

/// Tool call implied by the raw event alone.
fn from_raw_event(event: &RawInteractionEvent) -> (String, Parameters, String) {
    let mut params = Parameters::new();
    let target = event.target.describe();

    match (event.kind(), event.cell_reference()) {
        (EventKind::Click | EventKind::DoubleClick, Some(cell)) => {
            params.insert("cell".into(), json!(cell));
            let verb = if event.kind() == EventKind::DoubleClick {
                "Double-clicked"
            } else {
                "Clicked"
            };
            ("click_cell".into(), params, format!("{} cell {}", verb, cell))
        }
        (EventKind::KeyDown, cell) => {
            let key = event.key.clone().unwrap_or_default();
            let mods = event.modifiers.names();
            params.insert("key".into(), json!(key));
            params.insert("modifiers".into(), json!(mods));
            let chord = if mods.is_empty() {
                key
            } else {
                format!("{}+{}", mods.join("+"), key)
            };
            let description = match cell {
                Some(cell) => format!("Pressed {} in cell {}", chord, cell),
                None => format!("Pressed {}", chord),
            };
            ("press_key".into(), params, description)
        }
        _ => {
            let (x, y) = event
                .coordinates
                .map(|c| (c.client_x, c.client_y))
                .unwrap_or_default();
            params.insert("event_type".into(), json!(event.event_type));
            params.insert("target".into(), json!(target));
            params.insert(
                "aria_label".into(),
                json!(event.target.aria_label.clone().unwrap_or_default()),
            );
            params.insert("coordinates".into(), json!({ "x": x, "y": y }));
            (
                "ui_interaction".into(),
                params,
                format!("UI interaction: {} on {}", event.event_type, target),
            )
        }
    }
}
