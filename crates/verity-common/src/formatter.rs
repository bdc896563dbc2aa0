use crate::protocol::{
    ActionStatus, ComparisonResult, MismatchReason, Parameters, PresentationMessage,
    RawInteractionEvent, VerifiedAction,
};
use serde_json::Value;

/// Parameter names whose values are never printed.
const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "cvv",
    "ssn",
    "card_number",
    "credit_card",
];

pub fn mask_sensitive(value: &str, field_name: &str) -> String {
    let lower_field = field_name.to_lowercase();
    if SENSITIVE_FIELDS.iter().any(|f| lower_field.contains(*f)) {
        "••••••••".to_string()
    } else {
        value.to_string()
    }
}

/// `{cell: "A1", value: "42"}` style rendering, masked.
pub fn format_parameters(parameters: &Parameters) -> String {
    let parts: Vec<String> = parameters
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => format!("{:?}", s),
                other => other.to_string(),
            };
            format!("{}: {}", key, mask_sensitive(&rendered, key))
        })
        .collect();
    format!("{{{}}}", parts.join(", "))
}

pub fn format_event(event: &RawInteractionEvent) -> String {
    let mut output = format!("#{} {} {}", event.sequence, event.event_type, event.target.describe());

    if let Some(cell) = event.cell_reference() {
        output.push_str(&format!(" [{}]", cell));
    }

    if let Some(key) = &event.key {
        let mods = event.modifiers.names();
        if mods.is_empty() {
            output.push_str(&format!(" key={}", key));
        } else {
            output.push_str(&format!(" key={}+{}", mods.join("+"), key));
        }
    }
    output
}

pub fn format_action(action: &VerifiedAction) -> String {
    let marker = match action.status {
        ActionStatus::Success => "ok",
        ActionStatus::Partial => "partial",
        ActionStatus::Error => "error",
    };
    let mut output = format!(
        "{} {} {} ({:.0}%)\n  {}",
        marker,
        action.tool_name,
        format_parameters(&action.parameters),
        action.confidence * 100.0,
        action.interpretation
    );

    if let Some(summary) = &action.evidence_summary {
        output.push_str(&format!(
            "\n  # {} via {} evidence",
            summary.method, summary.primary_source
        ));
    }
    output
}

pub fn format_comparison(result: &ComparisonResult) -> String {
    if result.timeout {
        return format!("timeout\n  {}", result.feedback_suggestion);
    }
    if let Some(error) = &result.error {
        return format!("error: {}\n  {}", error, result.feedback_suggestion);
    }

    let verdict = if result.matched { "match" } else { "mismatch" };
    let mut output = format!(
        "{} ({:.0}%) tool={} params={:.0}%\n",
        verdict,
        result.confidence * 100.0,
        if result.tool_match { "yes" } else { "no" },
        result.parameter_match_ratio * 100.0
    );

    for mismatch in &result.mismatches {
        match mismatch.reason {
            MismatchReason::Missing => {
                output.push_str(&format!("- {} missing\n", mismatch.key));
            }
            MismatchReason::ValueMismatch => {
                let actual = mismatch
                    .actual
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_default();
                output.push_str(&format!(
                    "~ {}: expected {} got {}\n",
                    mismatch.key,
                    mask_sensitive(&mismatch.expected.to_string(), &mismatch.key),
                    mask_sensitive(&actual, &mismatch.key)
                ));
            }
        }
    }

    output.push_str(&format!("  {}", result.feedback_suggestion));
    output
}

pub fn format_message(message: &PresentationMessage) -> String {
    match message {
        PresentationMessage::VerifiedAction { user_id, action } => {
            format!("[{}] {}", user_id, format_action(action))
        }
        PresentationMessage::HoverAnnotation {
            user_id,
            element_description,
            ..
        } => format!("[{}] hover {}", user_id, element_description),
        PresentationMessage::RawEvent { user_id, event } => {
            format!("[{}] {}", user_id, format_event(event))
        }
        PresentationMessage::SessionStarted {
            user_id, target_url, ..
        } => format!("[{}] session started @ {}", user_id, target_url),
        PresentationMessage::SessionStopped { user_id, reason } => {
            format!("[{}] session stopped: {}", user_id, reason)
        }
    }
}
