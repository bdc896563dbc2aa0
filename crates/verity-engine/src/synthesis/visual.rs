use crate::collaborators::VisualAnalyzer;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};
use tracing::{debug, warn};
use verity_common::error::PipelineError;
use verity_common::protocol::{
    ActionCategory, Evidence, Parameters, VisualAnalysis, clamp_confidence,
};

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*```[A-Za-z]*\s*$").unwrap());

/// Strip code fences and any prose around the outermost JSON object.
pub fn clean_response(raw: &str) -> &str {
    let start = raw.find('{');
    let end = raw.rfind('}');
    match (start, end) {
        (Some(start), Some(end)) if end > start => &raw[start..=end],
        _ => raw.trim(),
    }
}

/// Parse and repair raw model output into a `VisualAnalysis`.
///
/// Required fields are `tool_name`, `parameters`, `description`,
/// `confidence` and a category (`category` or `action_category`).
pub fn parse_response(raw: &str) -> Result<VisualAnalysis, PipelineError> {
    let unfenced = FENCE_RE.replace_all(raw, "");
    let cleaned = clean_response(&unfenced);

    let value: Value = serde_json::from_str(cleaned)
        .map_err(|e| PipelineError::Analysis(format!("visual response is not JSON: {}", e)))?;
    let obj = value
        .as_object()
        .ok_or_else(|| PipelineError::Analysis("visual response is not an object".into()))?;

    let tool_name = obj
        .get("tool_name")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| missing("tool_name"))?;

    let parameters: Parameters = match obj.get("parameters") {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Null) | None => return Err(missing("parameters")),
        Some(_) => return Err(PipelineError::Analysis("parameters is not an object".into())),
    };

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .ok_or_else(|| missing("description"))?;

    let confidence = obj
        .get("confidence")
        .and_then(Value::as_f64)
        .ok_or_else(|| missing("confidence"))?;

    let category = obj
        .get("category")
        .or_else(|| obj.get("action_category"))
        .ok_or_else(|| missing("category"))?;
    let category = category
        .as_str()
        .and_then(ActionCategory::parse)
        .unwrap_or(ActionCategory::Menu);

    Ok(VisualAnalysis {
        tool_name: tool_name.to_string(),
        parameters,
        description: description.to_string(),
        confidence: clamp_confidence(confidence),
        category,
        error: None,
    })
}

fn missing(field: &str) -> PipelineError {
    PipelineError::Analysis(format!("visual response missing '{}'", field))
}

/// Run the visual analysis for one bundle. Never fails.
pub async fn analyze(
    analyzer: Option<Arc<dyn VisualAnalyzer>>,
    screenshots: Evidence<Vec<u8>>,
) -> VisualAnalysis {
    if let Some(reason) = screenshots.failure() {
        return VisualAnalysis::unavailable(
            "Screenshot capture failed",
            Some(reason.to_string()),
        );
    }

    let Some((before, after)) = screenshots.into_pair() else {
        return VisualAnalysis::unavailable("No screenshots available for visual analysis", None);
    };

    let Some(analyzer) = analyzer else {
        return VisualAnalysis::unavailable("No visual analyzer configured", None);
    };

    let raw = match analyzer.analyze(&before, &after).await {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Visual analysis failed: {}", e);
            let err = PipelineError::Analysis(e.to_string());
            return VisualAnalysis::unavailable("Visual analysis failed", Some(err.to_string()));
        }
    };

    match parse_response(&raw) {
        Ok(result) => {
            debug!(tool = %result.tool_name, confidence = result.confidence, "Visual analysis");
            result
        }
        Err(e) => {
            warn!("Discarding unusable visual response: {}", e);
            VisualAnalysis::unavailable("Visual response could not be repaired", Some(e.to_string()))
        }
    }
}
