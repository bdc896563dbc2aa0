use crate::backend::PageDriver;
use crate::config::schema::SessionConfig;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use verity_common::error::BackendError;

/// What the page looks like right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCheck {
    /// Sign-in, account chooser or similar; not the target resource.
    Interstitial,
    Ready,
    Loading,
}

/// Result of waiting for the target to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// The bound elapsed without confirmation, but the page was never
    /// interstitial on the last check.
    Unconfirmed,
}

pub fn classify_page(config: &SessionConfig, url: &str, title: &str, content: &str) -> PageCheck {
    let interstitial = config
        .interstitial_markers
        .iter()
        .any(|m| content.contains(m.as_str()) || title.contains(m.as_str()) || url.contains(m.as_str()));
    if interstitial {
        return PageCheck::Interstitial;
    }

    let url_ok = config.ready_url_contains.iter().all(|s| url.contains(s.as_str()));
    let marker_ok = config.ready_markers.is_empty()
        || config.ready_markers.iter().any(|m| content.contains(m.as_str()));

    if url_ok && marker_ok {
        PageCheck::Ready
    } else {
        PageCheck::Loading
    }
}

async fn check(driver: &mut dyn PageDriver, config: &SessionConfig) -> Result<PageCheck, BackendError> {
    let info = driver.page_info().await?;
    let content = driver.content().await?;
    Ok(classify_page(config, &info.url, &info.title, &content))
}

/// Poll until the target resource is confirmed loaded.
///
/// A page still interstitial when the bound elapses is an error; a page that
/// is merely unconfirmed is reported as such and the caller proceeds.
pub async fn wait_for_load(
    driver: &mut dyn PageDriver,
    config: &SessionConfig,
) -> Result<LoadOutcome, BackendError> {
    let deadline = Instant::now() + config.load_timeout();
    let mut last = PageCheck::Loading;

    loop {
        match check(driver, config).await {
            Ok(PageCheck::Ready) => {
                info!("Target loaded");
                return Ok(LoadOutcome::Loaded);
            }
            Ok(state) => {
                debug!("Target not ready yet: {:?}", state);
                last = state;
            }
            Err(e) if e.is_transport_failure() => return Err(e),
            Err(e) => warn!("Error checking load status: {}", e),
        }

        if Instant::now() + config.load_poll() > deadline {
            break;
        }
        tokio::time::sleep(config.load_poll()).await;
    }

    if last == PageCheck::Interstitial {
        return Err(BackendError::Navigation(format!(
            "still on a sign-in or interstitial page after {:?}",
            config.load_timeout()
        )));
    }
    warn!("Timeout waiting for target to load, proceeding anyway");
    Ok(LoadOutcome::Unconfirmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_in_page_is_interstitial() {
        let config = SessionConfig::default();
        let check = classify_page(
            &config,
            "https://accounts.google.com/ServiceLogin",
            "Sign in - Google Accounts",
            "<div>Choose an account</div>",
        );
        assert_eq!(check, PageCheck::Interstitial);
    }

    #[test]
    fn grid_on_edit_url_is_ready() {
        let config = SessionConfig::default();
        let ready = classify_page(
            &config,
            "https://docs.google.com/spreadsheets/d/abc/edit",
            "Budget",
            "<div id=\"waffle-grid-container\"></div>",
        );
        assert_eq!(ready, PageCheck::Ready);

        let loading = classify_page(
            &config,
            "https://docs.google.com/spreadsheets/d/abc/edit",
            "Budget",
            "<div>spinner</div>",
        );
        assert_eq!(loading, PageCheck::Loading);
    }

    #[test]
    fn empty_markers_accept_any_page() {
        let config = SessionConfig {
            interstitial_markers: vec![],
            ready_markers: vec![],
            ready_url_contains: vec![],
            ..SessionConfig::default()
        };
        assert_eq!(classify_page(&config, "about:blank", "", ""), PageCheck::Ready);
    }
}
