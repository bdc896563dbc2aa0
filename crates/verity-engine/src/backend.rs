use async_trait::async_trait;
pub use verity_common::error::BackendError;

#[derive(Debug, Clone)]
pub struct NavigationResult {
    pub url: String,
    pub title: String,
    pub status: u16, // generic status code (e.g. 200)
}

/// Location and title of the page currently loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageInfo {
    pub url: String,
    pub title: String,
}

/// The browser-page collaborator every session drives.
///
/// A driver is owned by exactly one session task at a time, hence `&mut self`.
#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Launch the page (start browser, connect to remote, etc.)
    async fn launch(&mut self) -> Result<(), BackendError>;

    /// Close the page and cleanup resources.
    async fn close(&mut self) -> Result<(), BackendError>;

    /// Check if the page is ready to accept commands.
    async fn is_ready(&self) -> bool;

    /// Navigate to a specific URL.
    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError>;

    /// Evaluate a script expression in the page and return its JSON value.
    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, BackendError>;

    /// Capture a PNG screenshot of the current viewport.
    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError>;

    /// Current URL and title.
    async fn page_info(&mut self) -> Result<PageInfo, BackendError> {
        let value = self
            .evaluate("({ url: window.location.href, title: document.title })")
            .await?;
        Ok(PageInfo {
            url: value["url"].as_str().unwrap_or_default().to_string(),
            title: value["title"].as_str().unwrap_or_default().to_string(),
        })
    }

    /// Serialized document markup.
    async fn content(&mut self) -> Result<String, BackendError> {
        let value = self
            .evaluate("document.documentElement ? document.documentElement.outerHTML : ''")
            .await?;
        match value {
            serde_json::Value::String(s) => Ok(s),
            other => Err(BackendError::Script(format!(
                "expected page content string, got {}",
                other
            ))),
        }
    }
}
