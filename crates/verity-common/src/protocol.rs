use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

/// Tool parameters, as produced by the analyzers and expected by lessons.
pub type Parameters = Map<String, Value>;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Clamp a confidence into `[0, 1]`. NaN counts as no confidence at all.
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

// ============================================================================
// Raw interaction events (produced by the in-page capture script)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// What the event landed on.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptor {
    #[serde(default)]
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aria_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rect: Option<Rect>,
}

impl TargetDescriptor {
    /// Lowercased aria-label, empty when absent.
    pub fn aria_label_lower(&self) -> String {
        self.aria_label
            .as_deref()
            .map(str::to_lowercase)
            .unwrap_or_default()
    }

    /// Best human-readable handle for this element.
    pub fn describe(&self) -> String {
        if let Some(label) = self.aria_label.as_deref().filter(|l| !l.trim().is_empty()) {
            return label.trim().to_string();
        }
        if let Some(text) = self.text_excerpt.as_deref().filter(|t| !t.trim().is_empty()) {
            return format!("{} \"{}\"", self.tag_name.to_lowercase(), text.trim());
        }
        if let Some(id) = self.id.as_deref().filter(|i| !i.is_empty()) {
            return format!("{}#{}", self.tag_name.to_lowercase(), id);
        }
        self.tag_name.to_lowercase()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub client_x: f64,
    pub client_y: f64,
    #[serde(default)]
    pub page_x: f64,
    #[serde(default)]
    pub page_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modifiers {
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub shift: bool,
    #[serde(default)]
    pub alt: bool,
    #[serde(default)]
    pub meta: bool,
}

impl Modifiers {
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.ctrl {
            names.push("ctrl");
        }
        if self.shift {
            names.push("shift");
        }
        if self.alt {
            names.push("alt");
        }
        if self.meta {
            names.push("meta");
        }
        names
    }
}

/// Application-specific context around the event target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum DomainContext {
    /// The target sits inside a grid cell (`role="gridcell"`).
    Cell {
        #[serde(default)]
        cell_id: Option<String>,
        #[serde(default)]
        aria_label: Option<String>,
        #[serde(default)]
        row: Option<u32>,
        #[serde(default)]
        col: Option<u32>,
    },
    /// The target sits inside a toolbar or menubar.
    Toolbar {
        #[serde(default)]
        toolbar_id: Option<String>,
        #[serde(default)]
        aria_label: Option<String>,
    },
}

impl DomainContext {
    pub fn is_cell(&self) -> bool {
        matches!(self, DomainContext::Cell { .. })
    }

    /// A1-style reference for a cell context.
    ///
    /// Derived from the 1-based row/column indices when both are known,
    /// otherwise taken from a leading `B7`-like token of the aria-label.
    pub fn cell_reference(&self) -> Option<String> {
        let DomainContext::Cell {
            aria_label,
            row,
            col,
            ..
        } = self
        else {
            return None;
        };

        if let (Some(row), Some(col)) = (row, col)
            && *row > 0
            && *col > 0
        {
            return Some(format!("{}{}", column_letters(*col), row));
        }

        aria_label
            .as_deref()
            .and_then(|label| label.split_whitespace().next())
            .map(|token| token.trim_end_matches([',', ':']))
            .filter(|token| is_cell_reference(token))
            .map(str::to_uppercase)
    }
}

/// Spreadsheet column name for a 1-based index (1 -> A, 27 -> AA).
pub fn column_letters(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = ((col - 1) % 26) as u8;
        letters.push((b'A' + rem) as char);
        col = (col - 1) / 26;
    }
    letters.iter().rev().collect()
}

/// Whether `token` looks like an A1-style reference (`A1`, `ab12`).
pub fn is_cell_reference(token: &str) -> bool {
    let letters = token.chars().take_while(|c| c.is_ascii_alphabetic()).count();
    let digits = token.len() - letters;
    (1..=3).contains(&letters)
        && (1..=7).contains(&digits)
        && token[letters..].chars().all(|c| c.is_ascii_digit())
        && !token[letters..].starts_with('0')
}

/// DOM event families the sensor listens for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Click,
    DoubleClick,
    ContextMenu,
    KeyDown,
    KeyUp,
    Input,
    Focus,
    Blur,
    Change,
    MouseMove,
    MouseOver,
    MouseDown,
    MouseUp,
    DragStart,
    DragEnd,
    Drop,
    Other,
}

impl EventKind {
    pub fn parse(event_type: &str) -> Self {
        match event_type {
            "click" => EventKind::Click,
            "dblclick" => EventKind::DoubleClick,
            "contextmenu" => EventKind::ContextMenu,
            "keydown" => EventKind::KeyDown,
            "keyup" => EventKind::KeyUp,
            "input" => EventKind::Input,
            "focus" | "focusin" => EventKind::Focus,
            "blur" | "focusout" => EventKind::Blur,
            "change" => EventKind::Change,
            "mousemove" => EventKind::MouseMove,
            "mouseover" => EventKind::MouseOver,
            "mousedown" => EventKind::MouseDown,
            "mouseup" => EventKind::MouseUp,
            "dragstart" => EventKind::DragStart,
            "dragend" => EventKind::DragEnd,
            "drop" => EventKind::Drop,
            _ => EventKind::Other,
        }
    }
}

/// One normalized DOM interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInteractionEvent {
    /// Per-session sequence number, assigned by the capture sensor.
    #[serde(default)]
    pub sequence: u64,
    /// Counter value assigned by the in-page script.
    #[serde(default, alias = "eventId", skip_serializing_if = "Option::is_none")]
    pub page_event_id: Option<u64>,
    #[serde(rename = "type")]
    pub event_type: String,
    pub target: TargetDescriptor,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Coordinates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub modifiers: Modifiers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_context: Option<DomainContext>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_path: Option<String>,
}

impl RawInteractionEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event_type)
    }

    pub fn in_cell(&self) -> bool {
        self.domain_context
            .as_ref()
            .is_some_and(DomainContext::is_cell)
    }

    pub fn cell_reference(&self) -> Option<String> {
        self.domain_context
            .as_ref()
            .and_then(DomainContext::cell_reference)
    }
}

// ============================================================================
// Triage
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMethod {
    /// DOM evidence only.
    Fast,
    /// Backend state before/after is the primary evidence.
    Backend,
    /// Screenshot before/after is the primary evidence.
    Visual,
    /// Collect everything.
    Hybrid,
}

impl std::fmt::Display for VerificationMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            VerificationMethod::Fast => "fast",
            VerificationMethod::Backend => "backend",
            VerificationMethod::Visual => "visual",
            VerificationMethod::Hybrid => "hybrid",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageDecision {
    pub primary_method: VerificationMethod,
    pub secondary_methods: Vec<VerificationMethod>,
    pub requires_screenshot: bool,
    pub requires_backend_snapshot: bool,
    pub confidence_threshold: f64,
    pub reasoning: String,
}

/// One conditional evidence channel of a bundle.
#[derive(Debug, Clone, PartialEq)]
pub enum Evidence<T> {
    /// The triage decision did not ask for this channel.
    NotRequested,
    /// Fresh "after" capture, paired with the rolling "before" if one existed.
    Captured { before: Option<T>, after: T },
    /// Capture was requested but failed or timed out.
    Failed(String),
}

impl<T> Evidence<T> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Evidence::Failed(_))
    }

    /// Both sides, when a before/after pair is available.
    pub fn pair(&self) -> Option<(&T, &T)> {
        match self {
            Evidence::Captured {
                before: Some(before),
                after,
            } => Some((before, after)),
            _ => None,
        }
    }

    pub fn into_pair(self) -> Option<(T, T)> {
        match self {
            Evidence::Captured {
                before: Some(before),
                after,
            } => Some((before, after)),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match self {
            Evidence::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Page-level context gathered for every triaged event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomEvidence {
    pub url: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_context: Option<DomainContext>,
}

/// Everything synthesis needs to interpret one event.
#[derive(Debug, Clone)]
pub struct EvidenceBundle {
    pub event: RawInteractionEvent,
    pub decision: TriageDecision,
    pub dom: Option<DomEvidence>,
    pub screenshots: Evidence<Vec<u8>>,
    pub backend_state: Evidence<Value>,
    pub triaged_at: u64,
    pub collected_at: u64,
}

// ============================================================================
// Analysis results
// ============================================================================

/// Closed vocabulary for visual analysis results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    CellEdit,
    Formatting,
    Navigation,
    Chart,
    Menu,
}

impl ActionCategory {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "cell_edit" => Some(ActionCategory::CellEdit),
            "formatting" => Some(ActionCategory::Formatting),
            "navigation" => Some(ActionCategory::Navigation),
            "chart" => Some(ActionCategory::Chart),
            "menu" => Some(ActionCategory::Menu),
            _ => None,
        }
    }
}

/// Interpretation of a before/after screenshot pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualAnalysis {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub description: String,
    pub confidence: f64,
    pub category: ActionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VisualAnalysis {
    /// Zero-confidence stand-in used whenever no usable answer exists.
    pub fn unavailable(description: impl Into<String>, error: Option<String>) -> Self {
        Self {
            tool_name: "visual_unavailable".to_string(),
            parameters: Parameters::new(),
            description: description.into(),
            confidence: 0.0,
            category: ActionCategory::Menu,
            error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// One leaf-level difference between two backend snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChange {
    pub path: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    /// Whether the path addresses formatting rather than data.
    #[serde(default)]
    pub formatting: bool,
}

/// Structural comparison of two backend snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateDiff {
    pub has_changes: bool,
    pub description: String,
    pub confidence: f64,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default)]
    pub changes: Vec<StateChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StateDiff {
    pub fn unavailable(description: impl Into<String>, error: Option<String>) -> Self {
        Self {
            has_changes: false,
            description: description.into(),
            confidence: 0.0,
            tool_name: "backend_unavailable".to_string(),
            parameters: Parameters::new(),
            changes: Vec::new(),
            error,
        }
    }
}

// ============================================================================
// Verified actions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Success,
    /// Fell back to the raw event because evidence channels failed.
    Partial,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrimarySource {
    #[serde(rename = "backend")]
    Backend,
    #[serde(rename = "visual")]
    Visual,
    #[serde(rename = "raw-event")]
    RawEvent,
}

impl std::fmt::Display for PrimarySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PrimarySource::Backend => "backend",
            PrimarySource::Visual => "visual",
            PrimarySource::RawEvent => "raw-event",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEventSummary {
    pub event_type: String,
    pub sequence: u64,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dom_path: Option<String>,
}

impl From<&RawInteractionEvent> for RawEventSummary {
    fn from(event: &RawInteractionEvent) -> Self {
        Self {
            event_type: event.event_type.clone(),
            sequence: event.sequence,
            target: event.target.describe(),
            dom_path: event.dom_path.clone(),
        }
    }
}

/// Audit trail: every sub-result, whichever one won.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub primary_source: PrimarySource,
    pub method: VerificationMethod,
    pub raw_event: RawEventSummary,
    pub visual: VisualAnalysis,
    pub backend: StateDiff,
}

/// Final, confidence-scored interpretation of one user action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedAction {
    pub interpretation: String,
    pub verification: String,
    pub status: ActionStatus,
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    pub confidence: f64,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_summary: Option<EvidenceSummary>,
}

impl VerifiedAction {
    /// Degraded record for a synthesis that could not complete.
    pub fn error(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        let mut parameters = Parameters::new();
        parameters.insert("error".to_string(), Value::String(reason.clone()));
        Self {
            interpretation: "Analysis error occurred".to_string(),
            verification: format!("Synthesis failed: {}", reason),
            status: ActionStatus::Error,
            tool_name: "synthesis_error".to_string(),
            parameters,
            confidence: 0.0,
            timestamp: now_millis(),
            evidence_summary: None,
        }
    }
}

// ============================================================================
// Verification against an expectation
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedAction {
    pub tool_name: String,
    #[serde(default)]
    pub parameters: Parameters,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ExpectedAction {
    pub fn new(tool_name: impl Into<String>, parameters: Parameters) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
            description: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchReason {
    Missing,
    ValueMismatch,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterMismatch {
    pub key: String,
    pub expected: Value,
    #[serde(default)]
    pub actual: Option<Value>,
    pub reason: MismatchReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    #[serde(rename = "match")]
    pub matched: bool,
    pub confidence: f64,
    pub tool_match: bool,
    pub parameter_match: bool,
    pub parameter_match_ratio: f64,
    #[serde(default)]
    pub matched_parameters: Vec<String>,
    #[serde(default)]
    pub mismatches: Vec<ParameterMismatch>,
    pub feedback_suggestion: String,
    #[serde(default)]
    pub timeout: bool,
    pub expected: ExpectedAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_action: Option<VerifiedAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: u64,
}

impl ComparisonResult {
    fn unresolved(expected: ExpectedAction, feedback: String) -> Self {
        Self {
            matched: false,
            confidence: 0.0,
            tool_match: false,
            parameter_match: false,
            parameter_match_ratio: 0.0,
            matched_parameters: Vec::new(),
            mismatches: Vec::new(),
            feedback_suggestion: feedback,
            timeout: false,
            expected,
            actual_action: None,
            error: None,
            timestamp: now_millis(),
        }
    }

    /// No action arrived within the verification budget.
    pub fn timed_out(expected: ExpectedAction) -> Self {
        let hint = expected
            .description
            .clone()
            .unwrap_or_else(|| "the expected action".to_string());
        let mut result = Self::unresolved(
            expected,
            format!(
                "I'm waiting for you to perform the action. Take your time and try: {}",
                hint
            ),
        );
        result.timeout = true;
        result
    }

    /// Verification could not run to completion.
    pub fn failed(expected: ExpectedAction, error: impl Into<String>) -> Self {
        let mut result = Self::unresolved(
            expected,
            "There was an issue with the verification system. Let me try to help you in a different way."
                .to_string(),
        );
        result.error = Some(error.into());
        result
    }
}

// ============================================================================
// Presentation channel
// ============================================================================

/// Messages sent to the dashboard channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresentationMessage {
    VerifiedAction {
        user_id: String,
        #[serde(flatten)]
        action: VerifiedAction,
    },
    HoverAnnotation {
        user_id: String,
        element_description: String,
        sequence: u64,
    },
    RawEvent {
        user_id: String,
        event: RawInteractionEvent,
    },
    SessionStarted {
        user_id: String,
        target_url: String,
        message: String,
    },
    SessionStopped {
        user_id: String,
        reason: String,
    },
}

impl PresentationMessage {
    pub fn user_id(&self) -> &str {
        match self {
            PresentationMessage::VerifiedAction { user_id, .. }
            | PresentationMessage::HoverAnnotation { user_id, .. }
            | PresentationMessage::RawEvent { user_id, .. }
            | PresentationMessage::SessionStarted { user_id, .. }
            | PresentationMessage::SessionStopped { user_id, .. } => user_id,
        }
    }
}
