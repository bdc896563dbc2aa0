use crate::cdp::CdpClient;
use crate::inject::evaluate;
use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::ScreenshotParams;
use tracing::info;
use verity_engine::backend::{BackendError, NavigationResult, PageDriver, PageInfo};

/// Chromium page driven over CDP.
pub struct HeadlessDriver {
    client: Option<CdpClient>,
    visible: bool,
}

impl HeadlessDriver {
    pub fn new() -> Self {
        Self {
            client: None,
            visible: false,
        }
    }

    pub fn new_with_visibility(visible: bool) -> Self {
        Self {
            client: None,
            visible,
        }
    }

    pub fn get_client(&self) -> Option<&CdpClient> {
        self.client.as_ref()
    }

    fn page(&self) -> Result<&chromiumoxide::Page, BackendError> {
        self.client
            .as_ref()
            .map(|c| &c.page)
            .ok_or(BackendError::NotReady)
    }

    async fn current_page_info(page: &chromiumoxide::Page) -> Result<PageInfo, BackendError> {
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Script(e.to_string()))?
            .unwrap_or_default();
        Ok(PageInfo { url, title })
    }
}

impl Default for HeadlessDriver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageDriver for HeadlessDriver {
    async fn launch(&mut self) -> Result<(), BackendError> {
        info!("Launching headless driver (Chromium)...");
        self.client = Some(CdpClient::launch(self.visible).await?);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        match self.client.take() {
            Some(client) => client.close().await,
            None => Ok(()),
        }
    }

    async fn is_ready(&self) -> bool {
        self.client.is_some()
    }

    async fn navigate(&mut self, url: &str) -> Result<NavigationResult, BackendError> {
        let page = self.page()?;

        info!("Navigating to: {}", url);
        page.goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;

        let PageInfo { url, title } = Self::current_page_info(page).await?;
        Ok(NavigationResult {
            url,
            title,
            status: 200,
        })
    }

    async fn evaluate(&mut self, script: &str) -> Result<serde_json::Value, BackendError> {
        evaluate(self.page()?, script).await
    }

    async fn screenshot(&mut self) -> Result<Vec<u8>, BackendError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.page()?
            .screenshot(params)
            .await
            .map_err(|e| BackendError::Other(format!("Screenshot failed: {}", e)))
    }

    async fn page_info(&mut self) -> Result<PageInfo, BackendError> {
        Self::current_page_info(self.page()?).await
    }

    async fn content(&mut self) -> Result<String, BackendError> {
        self.page()?
            .content()
            .await
            .map_err(|e| BackendError::Script(format!("Failed to read page content: {}", e)))
    }
}
