//! External collaborators the pipeline calls out to.
//!
//! Neither the backend-state reader nor the image-understanding model lives in
//! this workspace; sessions get them through these traits.

mod http;

pub use http::{HttpStateSource, HttpVisualAnalyzer};

use async_trait::async_trait;
use verity_common::error::BackendError;

/// Reads an opaque, structured snapshot of the application's backend state.
#[async_trait]
pub trait StateSource: Send + Sync {
    async fn get_snapshot(&self) -> Result<serde_json::Value, BackendError>;
}

/// Interprets a before/after screenshot pair.
///
/// Returns raw model text; callers validate and repair it before use.
#[async_trait]
pub trait VisualAnalyzer: Send + Sync {
    async fn analyze(&self, before: &[u8], after: &[u8]) -> Result<String, BackendError>;
}
