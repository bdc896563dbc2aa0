use std::time::Duration;
use thiserror::Error;

/// Failures reported by the collaborators the pipeline drives: the browser
/// page, the backend-state source and the visual analyzer.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Backend not ready")]
    NotReady,

    #[error("Navigation error: {0}")]
    Navigation(String),

    #[error("Script error: {0}")]
    Script(String),

    #[error("Timeout during {operation}")]
    Timeout { operation: String },

    #[error("Connection lost")]
    ConnectionLost,

    #[error("Operation not supported: {0}")]
    NotSupported(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// Whether the page or channel behind this error is gone for good.
    ///
    /// The session loop treats these as transport failures and winds down
    /// instead of retrying on the next tick.
    pub fn is_transport_failure(&self) -> bool {
        match self {
            BackendError::NotReady | BackendError::ConnectionLost => true,
            BackendError::Other(msg) | BackendError::Script(msg) => is_closed_target(msg),
            _ => false,
        }
    }
}

fn is_closed_target(msg: &str) -> bool {
    msg.contains("has been closed")
        || msg.contains("Target closed")
        || msg.contains("ChannelSendError")
        || msg.contains("connection closed")
}

/// Failure taxonomy of the capture -> triage -> synthesis -> verification
/// pipeline. None of these cross the pipeline boundary as raw errors: each
/// is converted into a degraded `VerifiedAction` or `ComparisonResult`.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Analysis error: {0}")]
    Analysis(String),

    #[error("Synthesis error: {0}")]
    Synthesis(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Cannot {operation} session for '{user_id}' while {state}")]
    SessionState {
        user_id: String,
        state: String,
        operation: String,
    },
}
