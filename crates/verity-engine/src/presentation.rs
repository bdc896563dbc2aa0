use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use verity_common::error::BackendError;
use verity_common::protocol::PresentationMessage;

/// Dashboard-facing channel for verified actions and annotations.
///
/// A `BackendError` whose `is_transport_failure()` is true tells the session
/// the channel is gone for good.
#[async_trait]
pub trait PresentationSink: Send + Sync {
    async fn send(&self, message: PresentationMessage) -> Result<(), BackendError>;
}

/// In-process sink backed by an unbounded mpsc channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PresentationMessage>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PresentationMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl PresentationSink for ChannelSink {
    async fn send(&self, message: PresentationMessage) -> Result<(), BackendError> {
        self.tx
            .send(message)
            .map_err(|_| BackendError::ConnectionLost)
    }
}

/// Forwards every message to each inner sink; the first error wins.
pub struct FanoutSink {
    sinks: Vec<Arc<dyn PresentationSink>>,
}

impl FanoutSink {
    pub fn new(sinks: Vec<Arc<dyn PresentationSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl PresentationSink for FanoutSink {
    async fn send(&self, message: PresentationMessage) -> Result<(), BackendError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.send(message.clone()).await
                && first_error.is_none()
            {
                first_error = Some(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
