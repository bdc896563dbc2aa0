use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use verity_engine::backend::BackendError;
use verity_engine::collaborators::{
    HttpStateSource, HttpVisualAnalyzer, StateSource, VisualAnalyzer,
};
use verity_engine::config::schema::CollaboratorsConfig;
use verity_engine::session::{ResolvedTarget, SessionFactory, SessionParts};
use verity_h::HeadlessDriver;

/// Gives every session its own Chromium page plus the configured HTTP
/// collaborators.
pub struct CliFactory {
    collaborators: CollaboratorsConfig,
}

impl CliFactory {
    pub fn new(collaborators: CollaboratorsConfig) -> Self {
        Self { collaborators }
    }
}

#[async_trait]
impl SessionFactory for CliFactory {
    async fn create(
        &self,
        user_id: &str,
        target: &ResolvedTarget,
    ) -> Result<SessionParts, BackendError> {
        let timeout = self.collaborators.http_timeout();

        let state_source: Option<Arc<dyn StateSource>> =
            match (&self.collaborators.state_endpoint, &target.resource_id) {
                (Some(endpoint), Some(resource_id)) => {
                    let source = HttpStateSource::new(endpoint, resource_id, timeout)?;
                    info!(user_id, endpoint = source.endpoint(), "Backend state source ready");
                    Some(Arc::new(source))
                }
                (Some(_), None) => {
                    warn!(user_id, "Target has no resource id, backend state disabled");
                    None
                }
                (None, _) => None,
            };

        let visual: Option<Arc<dyn VisualAnalyzer>> = match &self.collaborators.vision_endpoint {
            Some(endpoint) => Some(Arc::new(HttpVisualAnalyzer::new(endpoint, timeout)?)),
            None => None,
        };

        Ok(SessionParts {
            driver: Box::new(HeadlessDriver::new_with_visibility(self.collaborators.visible)),
            state_source,
            visual,
        })
    }
}
