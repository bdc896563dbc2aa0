use super::{SessionCounters, SessionState};
use crate::backend::PageDriver;
use crate::capture::CaptureSensor;
use crate::presentation::PresentationSink;
use crate::synthesis::Synthesizer;
use crate::triage::{TriageEngine, is_data_modification};
use crate::verifier::SubscriptionBus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use verity_common::error::BackendError;
use verity_common::protocol::{EventKind, PresentationMessage, RawInteractionEvent};

/// How the polling loop handles one captured event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Full triage and synthesis, then publish.
    Pipeline,
    Hover,
    RawEvent,
    Ignore,
}

pub fn route(event: &RawInteractionEvent) -> Route {
    match event.kind() {
        EventKind::Click
        | EventKind::DoubleClick
        | EventKind::ContextMenu
        | EventKind::Drop
        | EventKind::DragEnd => Route::Pipeline,
        EventKind::KeyDown if is_data_modification(event) => Route::Pipeline,
        EventKind::MouseMove | EventKind::MouseOver => Route::Hover,
        EventKind::Input | EventKind::Change => Route::RawEvent,
        _ => Route::Ignore,
    }
}

/// Remembers the last hovered DOM path, including "no path".
#[derive(Debug, Default)]
pub(super) struct HoverTracker {
    last: Option<Option<String>>,
}

impl HoverTracker {
    /// Records `path` and returns whether it differs from the previous hover.
    pub fn changed(&mut self, path: Option<&str>) -> bool {
        if self.last.as_ref().is_some_and(|last| last.as_deref() == path) {
            return false;
        }
        self.last = Some(path.map(str::to_string));
        true
    }
}

pub(super) struct Worker {
    pub user_id: String,
    pub driver: Box<dyn PageDriver>,
    pub capture: CaptureSensor,
    pub triage: TriageEngine,
    pub synthesizer: Synthesizer,
    pub bus: Arc<SubscriptionBus>,
    pub sink: Arc<dyn PresentationSink>,
    pub counters: Arc<SessionCounters>,
    pub state: Arc<watch::Sender<SessionState>>,
    pub poll_interval: Duration,
    pub error_backoff: Duration,
    pub hover: HoverTracker,
}

impl Worker {
    fn is_active(&self) -> bool {
        *self.state.borrow() == SessionState::Active
    }

    pub async fn run(mut self) {
        let mut state_rx = self.state.subscribe();

        let reason = loop {
            if !self.is_active() {
                break "stopped".to_string();
            }

            let pause = match self.tick().await {
                Ok(()) => self.poll_interval,
                Err(e) if e.is_transport_failure() => {
                    error!(user_id = %self.user_id, "Transport failure, deactivating session: {}", e);
                    self.state.send_if_modified(|state| {
                        if *state == SessionState::Active {
                            *state = SessionState::Stopping;
                            true
                        } else {
                            false
                        }
                    });
                    break format!("transport failure: {}", e);
                }
                Err(e) => {
                    error!(user_id = %self.user_id, "Error in polling loop: {}", e);
                    self.error_backoff
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = state_rx.changed() => {}
            }
        };

        self.teardown(reason).await;
    }

    async fn tick(&mut self) -> Result<(), BackendError> {
        let events = self.capture.drain(self.driver.as_mut()).await?;
        if events.is_empty() {
            return Ok(());
        }
        SessionCounters::bump(&self.counters.events_captured, events.len() as u64);
        debug!(user_id = %self.user_id, count = events.len(), "Drained events");

        for event in events {
            if !self.is_active() {
                debug!(user_id = %self.user_id, "Stop requested, dropping remaining events");
                break;
            }
            self.process(event).await?;
        }
        Ok(())
    }

    async fn process(&mut self, event: RawInteractionEvent) -> Result<(), BackendError> {
        match route(&event) {
            Route::Pipeline => {
                let sequence = event.sequence;
                let bundle = self.triage.collect(self.driver.as_mut(), event).await;
                let action = self.synthesizer.synthesize(bundle).await;
                SessionCounters::bump(&self.counters.events_processed, 1);

                if self.bus.publish(&self.user_id, action.clone()) {
                    SessionCounters::bump(&self.counters.actions_delivered, 1);
                    debug!(user_id = %self.user_id, sequence, "Delivered to waiting verifier");
                }

                self.deliver(PresentationMessage::VerifiedAction {
                    user_id: self.user_id.clone(),
                    action,
                })
                .await?;
                SessionCounters::bump(&self.counters.actions_published, 1);
            }
            Route::Hover => {
                if !self.hover.changed(event.dom_path.as_deref()) {
                    return Ok(());
                }
                self.deliver(PresentationMessage::HoverAnnotation {
                    user_id: self.user_id.clone(),
                    element_description: event.target.describe(),
                    sequence: event.sequence,
                })
                .await?;
                SessionCounters::bump(&self.counters.annotations_sent, 1);
            }
            Route::RawEvent => {
                self.deliver(PresentationMessage::RawEvent {
                    user_id: self.user_id.clone(),
                    event,
                })
                .await?;
                SessionCounters::bump(&self.counters.annotations_sent, 1);
            }
            Route::Ignore => {
                debug!(
                    user_id = %self.user_id,
                    sequence = event.sequence,
                    "Ignoring {} event", event.event_type
                );
            }
        }
        Ok(())
    }

    /// Transport failures propagate; anything else is logged.
    async fn deliver(&self, message: PresentationMessage) -> Result<(), BackendError> {
        match self.sink.send(message).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transport_failure() => Err(e),
            Err(e) => {
                warn!(user_id = %self.user_id, "Presentation send failed: {}", e);
                Ok(())
            }
        }
    }

    async fn teardown(mut self, reason: String) {
        self.capture.stop_capture(self.driver.as_mut()).await;
        if let Err(e) = self.driver.close().await {
            warn!(user_id = %self.user_id, "Failed to close page: {}", e);
        }

        if let Err(e) = self
            .sink
            .send(PresentationMessage::SessionStopped {
                user_id: self.user_id.clone(),
                reason: reason.clone(),
            })
            .await
        {
            debug!(user_id = %self.user_id, "Could not announce session stop: {}", e);
        }
        self.state.send_replace(SessionState::Closed);
        info!(user_id = %self.user_id, "Session loop exited: {}", reason);
    }
}
