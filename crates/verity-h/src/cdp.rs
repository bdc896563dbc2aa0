use chromiumoxide::cdp::browser_protocol::page::{
    EventJavascriptDialogOpening, HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::EventConsoleApiCalled;
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::task::JoinHandle;
use verity_engine::backend::BackendError;

/// Fixed window so before/after screenshots line up pixel for pixel.
const WINDOW_SIZE: (u32, u32) = (1440, 900);

/// Browser profile location and whether it is ours to delete.
struct Profile {
    dir: PathBuf,
    ephemeral: bool,
}

impl Profile {
    /// `VERITY_USER_DATA_DIR` keeps a persistent profile (and its sign-in)
    /// across runs; otherwise each launch gets a throwaway profile.
    fn resolve() -> Result<Self, BackendError> {
        if let Ok(dir) = std::env::var("VERITY_USER_DATA_DIR") {
            let dir = PathBuf::from(dir);
            std::fs::create_dir_all(&dir)
                .map_err(|e| BackendError::Other(format!("user data dir: {}", e)))?;
            tracing::info!("Using user data dir from VERITY_USER_DATA_DIR: {}", dir.display());
            return Ok(Self {
                dir,
                ephemeral: false,
            });
        }

        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let dir = std::env::temp_dir().join(format!(
            "verity-chromium-profile-{}-{}",
            std::process::id(),
            nanos
        ));
        std::fs::create_dir_all(&dir)
            .map_err(|e| BackendError::Other(format!("user data dir: {}", e)))?;
        tracing::info!("Using isolated user data dir: {}", dir.display());
        Ok(Self {
            dir,
            ephemeral: true,
        })
    }

    fn cleanup(&self) {
        if self.ephemeral
            && let Err(e) = std::fs::remove_dir_all(&self.dir)
        {
            tracing::debug!("Failed to clean up user-data-dir {}: {}", self.dir.display(), e);
        }
    }
}

/// One Chromium process with a single page, plus the tasks pumping its events.
pub struct CdpClient {
    pub browser: Browser,
    pub page: Page,
    handler_task: JoinHandle<()>,
    profile: Profile,
}

impl CdpClient {
    pub async fn launch(visible: bool) -> Result<Self, BackendError> {
        let profile = Profile::resolve()?;

        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .user_data_dir(&profile.dir)
            .window_size(WINDOW_SIZE.0, WINDOW_SIZE.1);
        if visible {
            tracing::info!("Launching browser in visible mode");
            builder = builder.with_head();
        } else {
            tracing::info!("Launching browser in headless mode");
        }
        if let Ok(chrome_bin) = std::env::var("CHROME_BIN") {
            tracing::info!("Using custom Chrome binary: {}", chrome_bin);
            builder = builder.chrome_executable(chrome_bin);
        }
        let config = builder
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to build browser config: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BackendError::Other(format!("Failed to launch browser: {}", e)))?;

        let handler_task = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if let Err(e) = h {
                    tracing::error!("Browser handler error (ignoring): {}", e);
                }
            }
            tracing::info!("Browser handler task ended");
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BackendError::Other(format!("Failed to create page: {}", e)))?;

        forward_console(&page).await?;
        accept_dialogs(&page).await?;

        Ok(Self {
            browser,
            page,
            handler_task,
            profile,
        })
    }

    pub async fn close(mut self) -> Result<(), BackendError> {
        let closed = self
            .browser
            .close()
            .await
            .map_err(|e| BackendError::Other(format!("Error closing browser: {}", e)));
        if let Err(e) = self.handler_task.await {
            tracing::debug!("Browser handler task ended abnormally: {}", e);
        }
        self.profile.cleanup();
        closed.map(|_| ())
    }
}

/// Page console output lands in our logs at debug level.
async fn forward_console(page: &Page) -> Result<(), BackendError> {
    let mut events = page
        .event_listener::<EventConsoleApiCalled>()
        .await
        .map_err(|e| BackendError::Other(format!("Failed to subscribe to console events: {}", e)))?;

    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let args: Vec<String> = event
                .args
                .iter()
                .map(|arg| {
                    arg.description
                        .clone()
                        .or_else(|| arg.value.as_ref().map(|v| v.to_string()))
                        .unwrap_or_else(|| "unknown".to_string())
                })
                .collect();
            tracing::debug!("Page console [{:?}]: {}", event.r#type, args.join(" "));
        }
    });
    Ok(())
}

/// Dialogs block script evaluation, which would stall the capture drain.
async fn accept_dialogs(page: &Page) -> Result<(), BackendError> {
    let mut events = page
        .event_listener::<EventJavascriptDialogOpening>()
        .await
        .map_err(|e| BackendError::Other(format!("Failed to subscribe to dialog events: {}", e)))?;

    let page = page.clone();
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            tracing::info!("Accepting JavaScript dialog: {} ({:?})", event.message, event.r#type);
            if let Err(e) = page.execute(HandleJavaScriptDialogParams::new(true)).await {
                tracing::error!("Failed to accept dialog: {}", e);
            }
        }
    });
    Ok(())
}
