use super::{StateSource, VisualAnalyzer};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;
use tracing::warn;
use verity_common::error::BackendError;

const MAX_ATTEMPTS: u32 = 3;

/// Categories the visual endpoint is asked to choose from.
const VISUAL_CATEGORIES: &[&str] = &["cell_edit", "formatting", "navigation", "chart", "menu"];

/// Send with exponential backoff on 429, 5xx and network errors.
async fn send_with_retry<F>(client: &Client, build: F, context: &str) -> Result<Response, BackendError>
where
    F: Fn(&Client) -> RequestBuilder,
{
    let mut last_error = String::new();
    for attempt in 0..MAX_ATTEMPTS {
        match build(client).send().await {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    return Ok(resp);
                }
                last_error = format!("{} returned {}", context, status);
                if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    let delay = Duration::from_millis(250 * 2u64.pow(attempt));
                    warn!("{}: {}, retrying in {:?}", context, status, delay);
                    tokio::time::sleep(delay).await;
                } else {
                    return Err(BackendError::Http(last_error));
                }
            }
            Err(e) if e.is_timeout() => {
                last_error = format!("{} timed out", context);
                warn!("{}: request timed out (attempt {})", context, attempt + 1);
            }
            Err(e) if e.is_connect() => {
                last_error = format!("{}: {}", context, e);
                let delay = Duration::from_millis(250 * 2u64.pow(attempt));
                warn!("{}: connect error, retrying in {:?}", context, delay);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(BackendError::Http(format!("{}: {}", context, e))),
        }
    }
    Err(BackendError::Http(last_error))
}

fn build_client(timeout: Duration) -> Result<Client, BackendError> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| BackendError::Http(format!("Failed to build HTTP client: {}", e)))
}

/// GETs a JSON document describing the backend state.
pub struct HttpStateSource {
    client: Client,
    endpoint: String,
}

impl HttpStateSource {
    /// `endpoint` may contain `{resource_id}`, substituted here.
    pub fn new(endpoint: &str, resource_id: &str, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.replace("{resource_id}", resource_id),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StateSource for HttpStateSource {
    async fn get_snapshot(&self) -> Result<serde_json::Value, BackendError> {
        let resp = send_with_retry(&self.client, |c| c.get(&self.endpoint), "state snapshot").await?;
        resp.json::<serde_json::Value>()
            .await
            .map_err(|e| BackendError::Http(format!("Invalid state snapshot body: {}", e)))
    }
}

/// POSTs base64 PNGs to an image-understanding endpoint.
///
/// The endpoint answers either with a JSON object carrying a `text` field or
/// with the raw model text as the body.
pub struct HttpVisualAnalyzer {
    client: Client,
    endpoint: String,
}

impl HttpVisualAnalyzer {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, BackendError> {
        Ok(Self {
            client: build_client(timeout)?,
            endpoint: endpoint.to_string(),
        })
    }
}

pub(crate) fn vision_request(before: &[u8], after: &[u8]) -> serde_json::Value {
    let b64 = |data: &[u8]| base64::engine::general_purpose::STANDARD.encode(data);
    serde_json::json!({
        "before_png": b64(before),
        "after_png": b64(after),
        "categories": VISUAL_CATEGORIES,
        "instructions": "Compare the two screenshots and answer with one JSON object \
            {tool_name, parameters, description, confidence, category}.",
    })
}

#[async_trait]
impl VisualAnalyzer for HttpVisualAnalyzer {
    async fn analyze(&self, before: &[u8], after: &[u8]) -> Result<String, BackendError> {
        let body = vision_request(before, after);
        let resp = send_with_retry(
            &self.client,
            |c| c.post(&self.endpoint).json(&body),
            "visual analysis",
        )
        .await?;

        let text = resp
            .text()
            .await
            .map_err(|e| BackendError::Http(format!("Invalid visual analysis body: {}", e)))?;

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => match map.get("text") {
                Some(serde_json::Value::String(inner)) => Ok(inner.clone()),
                _ => Ok(text),
            },
            _ => Ok(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_endpoint_substitutes_resource_id() {
        let source = HttpStateSource::new(
            "http://localhost:9000/sheets/{resource_id}/values",
            "abc123",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(source.endpoint(), "http://localhost:9000/sheets/abc123/values");
    }

    #[test]
    fn vision_request_encodes_both_images() {
        let body = vision_request(b"before", b"after");
        assert_eq!(body["before_png"], "YmVmb3Jl");
        assert_eq!(body["after_png"], "YWZ0ZXI=");
        assert_eq!(body["categories"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn unreachable_state_endpoint_is_http_error() {
        let source =
            HttpStateSource::new("http://127.0.0.1:9/state", "x", Duration::from_millis(200)).unwrap();
        let err = source.get_snapshot().await.unwrap_err();
        assert!(matches!(err, BackendError::Http(_)));
    }
}
