use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerityConfig {
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub triage: TriageConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub verifier: VerifierConfig,
    #[serde(default)]
    pub target: TargetConfig,
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_activation_attempts")]
    pub activation_attempts: u32,
    #[serde(default = "default_activation_retry_ms")]
    pub activation_retry_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            activation_attempts: default_activation_attempts(),
            activation_retry_ms: default_activation_retry_ms(),
        }
    }
}

fn default_activation_attempts() -> u32 {
    10
}

fn default_activation_retry_ms() -> u64 {
    200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_snapshot_timeout_ms")]
    pub snapshot_timeout_ms: u64,
}

impl Default for TriageConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            snapshot_timeout_ms: default_snapshot_timeout_ms(),
        }
    }
}

impl TriageConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

fn default_settle_delay_ms() -> u64 {
    300
}

fn default_snapshot_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
    #[serde(default = "default_raw_event_confidence")]
    pub raw_event_confidence: f64,
    #[serde(default = "default_backend_trust_confidence")]
    pub backend_trust_confidence: f64,
    #[serde(default = "default_analysis_timeout_ms")]
    pub analysis_timeout_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
            raw_event_confidence: default_raw_event_confidence(),
            backend_trust_confidence: default_backend_trust_confidence(),
            analysis_timeout_ms: default_analysis_timeout_ms(),
        }
    }
}

impl SynthesisConfig {
    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_millis(self.analysis_timeout_ms)
    }
}

fn default_high_threshold() -> f64 {
    0.8
}

fn default_medium_threshold() -> f64 {
    0.7
}

fn default_raw_event_confidence() -> f64 {
    0.6
}

fn default_backend_trust_confidence() -> f64 {
    0.95
}

fn default_analysis_timeout_ms() -> u64 {
    8000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
    #[serde(default = "default_load_timeout_ms")]
    pub load_timeout_ms: u64,
    #[serde(default = "default_load_poll_ms")]
    pub load_poll_ms: u64,
    #[serde(default = "default_interstitial_markers")]
    pub interstitial_markers: Vec<String>,
    #[serde(default = "default_ready_markers")]
    pub ready_markers: Vec<String>,
    #[serde(default = "default_ready_url_contains")]
    pub ready_url_contains: Vec<String>,
    #[serde(default = "default_stop_grace_ms")]
    pub stop_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            error_backoff_ms: default_error_backoff_ms(),
            load_timeout_ms: default_load_timeout_ms(),
            load_poll_ms: default_load_poll_ms(),
            interstitial_markers: default_interstitial_markers(),
            ready_markers: default_ready_markers(),
            ready_url_contains: default_ready_url_contains(),
            stop_grace_ms: default_stop_grace_ms(),
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn load_timeout(&self) -> Duration {
        Duration::from_millis(self.load_timeout_ms)
    }

    pub fn load_poll(&self) -> Duration {
        Duration::from_millis(self.load_poll_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_error_backoff_ms() -> u64 {
    2000
}

fn default_load_timeout_ms() -> u64 {
    30000
}

fn default_load_poll_ms() -> u64 {
    2000
}

fn default_interstitial_markers() -> Vec<String> {
    vec![
        "Choose an account".to_string(),
        "Use another account".to_string(),
        "accounts.google.com".to_string(),
        "Sign in to continue".to_string(),
    ]
}

fn default_ready_markers() -> Vec<String> {
    vec![
        "waffle-grid".to_string(),
        "cell-input".to_string(),
        "docs-sheet".to_string(),
        "grid-container".to_string(),
        "name-box".to_string(),
    ]
}

fn default_ready_url_contains() -> Vec<String> {
    vec!["/edit".to_string()]
}

fn default_stop_grace_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifierConfig {
    #[serde(default = "default_poll_slice_ms")]
    pub poll_slice_ms: u64,
    #[serde(default = "default_verify_timeout_secs")]
    pub default_timeout_secs: f64,
    #[serde(default = "default_parameter_match_threshold")]
    pub parameter_match_threshold: f64,
    #[serde(default = "default_numeric_epsilon")]
    pub numeric_epsilon: f64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            poll_slice_ms: default_poll_slice_ms(),
            default_timeout_secs: default_verify_timeout_secs(),
            parameter_match_threshold: default_parameter_match_threshold(),
            numeric_epsilon: default_numeric_epsilon(),
        }
    }
}

impl VerifierConfig {
    pub fn poll_slice(&self) -> Duration {
        Duration::from_millis(self.poll_slice_ms.max(1))
    }
}

fn default_poll_slice_ms() -> u64 {
    500
}

fn default_verify_timeout_secs() -> f64 {
    30.0
}

fn default_parameter_match_threshold() -> f64 {
    0.8
}

fn default_numeric_epsilon() -> f64 {
    0.01
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Expansion for bare resource ids; `{id}` is substituted.
    #[serde(default = "default_url_template")]
    pub url_template: Option<String>,
    /// Regex with one capture group extracting the resource id from a URL.
    #[serde(default = "default_resource_id_pattern")]
    pub resource_id_pattern: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            url_template: default_url_template(),
            resource_id_pattern: default_resource_id_pattern(),
        }
    }
}

fn default_url_template() -> Option<String> {
    Some("https://docs.google.com/spreadsheets/d/{id}/edit".to_string())
}

fn default_resource_id_pattern() -> String {
    r"/d/([A-Za-z0-9_-]+)".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollaboratorsConfig {
    /// GET endpoint returning the backend state; `{resource_id}` is substituted.
    #[serde(default)]
    pub state_endpoint: Option<String>,
    /// POST endpoint receiving base64 before/after screenshots.
    #[serde(default)]
    pub vision_endpoint: Option<String>,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default)]
    pub visible: bool,
}

impl Default for CollaboratorsConfig {
    fn default() -> Self {
        Self {
            state_endpoint: None,
            vision_endpoint: None,
            http_timeout_ms: default_http_timeout_ms(),
            visible: false,
        }
    }
}

impl CollaboratorsConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }
}

fn default_http_timeout_ms() -> u64 {
    10000
}
