use crate::config::schema::VerifierConfig;
use serde_json::Value;
use verity_common::protocol::{
    ComparisonResult, ExpectedAction, MismatchReason, ParameterMismatch, VerifiedAction,
    clamp_confidence, now_millis,
};

/// Scores a verified action against what the lesson expected.
#[derive(Debug, Clone)]
pub struct Comparator {
    parameter_match_threshold: f64,
    numeric_epsilon: f64,
}

impl Default for Comparator {
    fn default() -> Self {
        Self::from_config(&VerifierConfig::default())
    }
}

impl Comparator {
    pub fn from_config(config: &VerifierConfig) -> Self {
        Self {
            parameter_match_threshold: config.parameter_match_threshold,
            numeric_epsilon: config.numeric_epsilon,
        }
    }

    pub fn compare(&self, expected: &ExpectedAction, actual: &VerifiedAction) -> ComparisonResult {
        let tool_match = normalize_tool(&expected.tool_name) == normalize_tool(&actual.tool_name);

        let mut matched_parameters = Vec::new();
        let mut mismatches = Vec::new();
        for (key, want) in &expected.parameters {
            match actual.parameters.get(key) {
                Some(got) if self.values_match(want, got) => matched_parameters.push(key.clone()),
                Some(got) => mismatches.push(ParameterMismatch {
                    key: key.clone(),
                    expected: want.clone(),
                    actual: Some(got.clone()),
                    reason: MismatchReason::ValueMismatch,
                }),
                None => mismatches.push(ParameterMismatch {
                    key: key.clone(),
                    expected: want.clone(),
                    actual: None,
                    reason: MismatchReason::Missing,
                }),
            }
        }

        let ratio = if expected.parameters.is_empty() {
            1.0
        } else {
            matched_parameters.len() as f64 / expected.parameters.len() as f64
        };
        let parameter_match = ratio >= self.parameter_match_threshold;
        let matched = tool_match && parameter_match;

        let tool_score = if tool_match { 1.0 } else { 0.0 };
        let confidence = clamp_confidence(
            0.5 * tool_score + 0.3 * ratio + 0.2 * clamp_confidence(actual.confidence),
        );

        let feedback_suggestion =
            feedback(expected, actual, matched, tool_match, mismatches.first());

        ComparisonResult {
            matched,
            confidence,
            tool_match,
            parameter_match,
            parameter_match_ratio: ratio,
            matched_parameters,
            mismatches,
            feedback_suggestion,
            timeout: false,
            expected: expected.clone(),
            actual_action: Some(actual.clone()),
            error: None,
            timestamp: now_millis(),
        }
    }

    /// Exact, then case-insensitive string, then numeric within epsilon, then
    /// element-wise list equality.
    pub fn values_match(&self, expected: &Value, actual: &Value) -> bool {
        if expected == actual {
            return true;
        }
        if let (Value::String(a), Value::String(b)) = (expected, actual)
            && a.trim().to_lowercase() == b.trim().to_lowercase()
        {
            return true;
        }
        if let (Some(a), Some(b)) = (as_number(expected), as_number(actual))
            && (a - b).abs() <= self.numeric_epsilon
        {
            return true;
        }
        if let (Value::Array(a), Value::Array(b)) = (expected, actual) {
            return a.len() == b.len() && a.iter().zip(b).all(|(x, y)| self.values_match(x, y));
        }
        false
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

fn normalize_tool(name: &str) -> String {
    name.split_whitespace().collect::<String>().to_lowercase()
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s),
        other => other.to_string(),
    }
}

fn feedback(
    expected: &ExpectedAction,
    actual: &VerifiedAction,
    matched: bool,
    tool_match: bool,
    first_mismatch: Option<&ParameterMismatch>,
) -> String {
    if matched {
        return match &expected.description {
            Some(description) => format!("Great job! You completed: {}", description),
            None => "Great job! That's exactly the expected action.".to_string(),
        };
    }

    if !tool_match {
        return format!(
            "It looks like you performed '{}' but the step expects '{}'. Please try again.",
            actual.tool_name, expected.tool_name
        );
    }

    if let Some(mismatch) = first_mismatch {
        return match &mismatch.actual {
            Some(got) => format!(
                "Almost there! For '{}' I expected {} but saw {}.",
                mismatch.key,
                render(&mismatch.expected),
                render(got)
            ),
            None => format!(
                "Almost there! For '{}' I expected {} but didn't see it.",
                mismatch.key,
                render(&mismatch.expected)
            ),
        };
    }

    "That wasn't quite the expected action. Please try again.".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use verity_common::protocol::{ActionStatus, Parameters};

    fn params(value: Value) -> Parameters {
        value.as_object().cloned().unwrap_or_default()
    }

    fn actual(tool: &str, parameters: Value, confidence: f64) -> VerifiedAction {
        VerifiedAction {
            interpretation: String::new(),
            verification: String::new(),
            status: ActionStatus::Success,
            tool_name: tool.to_string(),
            parameters: params(parameters),
            confidence,
            timestamp: 0,
            evidence_summary: None,
        }
    }

    #[test]
    fn four_of_five_parameters_match() {
        let expected = ExpectedAction::new("t", params(json!({"a":1,"b":2,"c":3,"d":4,"e":5})));
        let c = Comparator::default();

        let four = c.compare(&expected, &actual("t", json!({"a":1,"b":2,"c":3,"d":4}), 0.9));
        assert!(four.parameter_match);
        assert!(four.matched);

        let three = c.compare(&expected, &actual("t", json!({"a":1,"b":2,"c":3}), 0.9));
        assert!(!three.parameter_match);
        assert!(!three.matched);
        assert_eq!(three.mismatches.len(), 2);
    }

    #[test]
    fn lenient_value_matching() {
        let c = Comparator::default();
        assert!(c.values_match(&json!("Hello"), &json!(" hello ")));
        assert!(c.values_match(&json!(1.0), &json!(1.005)));
        assert!(c.values_match(&json!("42"), &json!(42)));
        assert!(c.values_match(&json!(["A1", 2]), &json!(["a1", 2.0])));
        assert!(!c.values_match(&json!([1, 2]), &json!([1, 2, 3])));
        assert!(!c.values_match(&json!(1.0), &json!(1.1)));
    }

    #[test]
    fn tool_name_ignores_case_and_whitespace() {
        let expected = ExpectedAction::new(" Write_Cell ", Parameters::new());
        let result = Comparator::default().compare(&expected, &actual("write_cell", json!({}), 1.0));
        assert!(result.tool_match);
        assert_eq!(result.parameter_match_ratio, 1.0);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn feedback_names_mismatch() {
        let c = Comparator::default();
        let expected = ExpectedAction::new("write_cell", params(json!({"cell":"A1","value":"x"})));

        let wrong_tool = c.compare(&expected, &actual("format_cell", json!({"cell":"A1","value":"x"}), 0.9));
        assert!(wrong_tool.feedback_suggestion.contains("'format_cell'"));

        let wrong_value = c.compare(&expected, &actual("write_cell", json!({"cell":"A1","value":"y"}), 0.9));
        assert!(wrong_value.feedback_suggestion.contains("'value'"));
        assert!(wrong_value.feedback_suggestion.contains("'y'"));
        assert!((wrong_value.confidence - (0.5 + 0.15 + 0.18)).abs() < 1e-9);
    }

    #[test]
    fn feedback_names_first_expected_key_in_given_order() {
        let c = Comparator::default();
        let expected = ExpectedAction::new("write_cell", params(json!({"value": "x", "cell": "A1"})));

        let result = c.compare(&expected, &actual("write_cell", json!({"value": "y", "cell": "B2"}), 0.9));

        let keys: Vec<&str> = result.mismatches.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["value", "cell"]);
        assert!(result.feedback_suggestion.contains("'value'"));
    }
}
