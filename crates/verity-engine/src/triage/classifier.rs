use verity_common::protocol::{
    EventKind, RawInteractionEvent, TriageDecision, VerificationMethod,
};

/// Labels that mark a click as chrome rather than data.
const CHROME_KEYWORDS: &[&str] = &["menu", "toolbar", "button"];

/// Labels of controls whose effect is only observable visually.
const VISUAL_KEYWORDS: &[&str] = &[
    "bold",
    "italic",
    "underline",
    "color",
    "format",
    "border",
    "chart",
    "image",
    "drawing",
];

/// Keys that commit an in-cell edit.
const COMMIT_KEYS: &[&str] = &["Enter", "Tab", "Escape"];

/// Decides how an event is verified.
///
/// Implementations must be pure: the same event always yields the same
/// decision.
pub trait Classifier: Send + Sync {
    fn classify(&self, event: &RawInteractionEvent) -> TriageDecision;
}

/// Deterministic rule table; the default classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleClassifier;

impl Classifier for RuleClassifier {
    fn classify(&self, event: &RawInteractionEvent) -> TriageDecision {
        if is_simple_ui_interaction(event) {
            return decision(
                VerificationMethod::Fast,
                vec![],
                false,
                false,
                0.90,
                "Simple UI interaction - DOM evidence is sufficient",
            );
        }

        if is_data_modification(event) {
            return decision(
                VerificationMethod::Backend,
                vec![VerificationMethod::Fast],
                false,
                true,
                0.95,
                "Data modification - backend state is the most reliable evidence",
            );
        }

        if requires_visual_analysis(event) {
            return decision(
                VerificationMethod::Visual,
                vec![VerificationMethod::Backend],
                true,
                true,
                0.80,
                "Visually observable change - compare screenshots, check backend",
            );
        }

        decision(
            VerificationMethod::Hybrid,
            vec![VerificationMethod::Fast, VerificationMethod::Backend],
            true,
            true,
            0.70,
            "Unclassified interaction - collect all evidence",
        )
    }
}

fn decision(
    primary_method: VerificationMethod,
    secondary_methods: Vec<VerificationMethod>,
    requires_screenshot: bool,
    requires_backend_snapshot: bool,
    confidence_threshold: f64,
    reasoning: &str,
) -> TriageDecision {
    TriageDecision {
        primary_method,
        secondary_methods,
        requires_screenshot,
        requires_backend_snapshot,
        confidence_threshold,
        reasoning: reasoning.to_string(),
    }
}

fn mentions_any(label: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| label.contains(k))
}

/// Focus changes, hovers and clicks on non-data chrome.
pub fn is_simple_ui_interaction(event: &RawInteractionEvent) -> bool {
    match event.kind() {
        EventKind::Focus | EventKind::Blur => true,
        EventKind::MouseMove | EventKind::MouseOver => true,
        EventKind::Click => {
            let label = event.target.aria_label_lower();
            if mentions_any(&label, VISUAL_KEYWORDS) {
                return false;
            }
            if mentions_any(&label, CHROME_KEYWORDS) {
                return true;
            }
            let tag = event.target.tag_name.to_lowercase();
            matches!(tag.as_str(), "button" | "div" | "span")
                && !event.in_cell()
                && !label.contains("cell")
        }
        _ => false,
    }
}

/// Text commits and pastes inside a data cell.
pub fn is_data_modification(event: &RawInteractionEvent) -> bool {
    if !event.in_cell() {
        return false;
    }
    match event.kind() {
        EventKind::Input => true,
        EventKind::KeyDown | EventKind::KeyUp => {
            let key = event.key.as_deref().unwrap_or_default();
            if COMMIT_KEYS.contains(&key) {
                return true;
            }
            event.kind() == EventKind::KeyDown
                && (event.modifiers.ctrl || event.modifiers.meta)
                && key.eq_ignore_ascii_case("v")
        }
        _ => false,
    }
}

/// Formatting controls, context menus, drag/drop and chart/image operations.
pub fn requires_visual_analysis(event: &RawInteractionEvent) -> bool {
    match event.kind() {
        EventKind::Click => mentions_any(&event.target.aria_label_lower(), VISUAL_KEYWORDS),
        EventKind::ContextMenu => true,
        EventKind::DragStart | EventKind::DragEnd | EventKind::Drop => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verity_common::protocol::{DomainContext, Modifiers, TargetDescriptor};

    fn event(event_type: &str, tag: &str, label: Option<&str>) -> RawInteractionEvent {
        RawInteractionEvent {
            sequence: 1,
            page_event_id: None,
            event_type: event_type.to_string(),
            target: TargetDescriptor {
                tag_name: tag.to_string(),
                aria_label: label.map(str::to_string),
                ..Default::default()
            },
            timestamp: 0,
            coordinates: None,
            key: None,
            code: None,
            modifiers: Modifiers::default(),
            domain_context: None,
            dom_path: None,
        }
    }

    fn in_cell(mut e: RawInteractionEvent) -> RawInteractionEvent {
        e.domain_context = Some(DomainContext::Cell {
            cell_id: None,
            aria_label: Some("A1".into()),
            row: Some(1),
            col: Some(1),
        });
        e
    }

    #[test]
    fn toolbar_click_is_fast() {
        let d = RuleClassifier.classify(&event("click", "DIV", Some("Main menu")));
        assert_eq!(d.primary_method, VerificationMethod::Fast);
        assert!(!d.requires_screenshot);
        assert!(!d.requires_backend_snapshot);
        assert_eq!(d.confidence_threshold, 0.90);
    }

    #[test]
    fn commit_key_in_cell_is_backend() {
        let mut e = in_cell(event("keydown", "DIV", None));
        e.key = Some("Enter".into());
        let d = RuleClassifier.classify(&e);
        assert_eq!(d.primary_method, VerificationMethod::Backend);
        assert_eq!(d.secondary_methods, vec![VerificationMethod::Fast]);
        assert!(d.requires_backend_snapshot);
        assert!(!d.requires_screenshot);
    }

    #[test]
    fn paste_requires_cell_context() {
        let mut e = event("keydown", "DIV", None);
        e.key = Some("v".into());
        e.modifiers.meta = true;
        assert!(!is_data_modification(&e));
        assert!(is_data_modification(&in_cell(e)));
    }

    #[test]
    fn formatting_button_is_visual_not_chrome() {
        let d = RuleClassifier.classify(&event("click", "DIV", Some("Bold (Ctrl+B) button")));
        assert_eq!(d.primary_method, VerificationMethod::Visual);
        assert_eq!(d.secondary_methods, vec![VerificationMethod::Backend]);
        assert!(d.requires_screenshot && d.requires_backend_snapshot);
    }

    #[test]
    fn cell_click_falls_through_to_hybrid() {
        let d = RuleClassifier.classify(&in_cell(event("click", "DIV", None)));
        assert_eq!(d.primary_method, VerificationMethod::Hybrid);
        assert_eq!(d.confidence_threshold, 0.70);
    }

    #[test]
    fn classification_is_deterministic() {
        let samples = [
            event("focus", "INPUT", None),
            in_cell(event("input", "DIV", None)),
            event("contextmenu", "DIV", None),
            event("dblclick", "CANVAS", None),
        ];
        for sample in &samples {
            assert_eq!(RuleClassifier.classify(sample), RuleClassifier.classify(sample));
        }
    }
}
