use chromiumoxide::Page;
use std::time::Duration;
use verity_engine::backend::BackendError;

/// Upper bound for one script evaluation.
/// A dialog (alert/confirm/prompt) blocks the JS thread until it is handled.
const EVAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for context errors during page navigation.
const MAX_CONTEXT_RETRIES: u32 = 10;

/// Delay between retries when context is not found (page navigating).
const CONTEXT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Check if an error indicates the page context is unavailable (e.g., during navigation).
fn is_context_error(err: &str) -> bool {
    err.contains("Cannot find context")
        || err.contains("Execution context was destroyed")
        || err.contains("-32000")
}

enum EvalError {
    Timeout,
    Context(String),
    Other(String),
}

async fn evaluate_with_timeout(
    page: &Page,
    expression: &str,
) -> Result<serde_json::Value, EvalError> {
    let eval_result = tokio::time::timeout(EVAL_TIMEOUT, page.evaluate(expression)).await;

    match eval_result {
        Err(_) => Err(EvalError::Timeout),
        Ok(Err(e)) => {
            let err_str = e.to_string();
            if is_context_error(&err_str) {
                Err(EvalError::Context(err_str))
            } else {
                Err(EvalError::Other(err_str))
            }
        }
        // `undefined` carries no value; treat it as null.
        Ok(Ok(result)) => Ok(result.value().cloned().unwrap_or(serde_json::Value::Null)),
    }
}

/// Evaluate `expression` in the page, retrying while a navigation has torn
/// down the execution context. A closed target surfaces as a `Script` error
/// whose message `BackendError::is_transport_failure` recognizes.
pub async fn evaluate(page: &Page, expression: &str) -> Result<serde_json::Value, BackendError> {
    let mut last_error = None;

    for attempt in 0..MAX_CONTEXT_RETRIES {
        match evaluate_with_timeout(page, expression).await {
            Ok(value) => return Ok(value),
            Err(EvalError::Timeout) => {
                return Err(BackendError::Timeout {
                    operation: "script evaluation (possibly blocked by a dialog)".to_string(),
                });
            }
            Err(EvalError::Context(err_str)) => {
                tracing::debug!(
                    "Context error during evaluation (attempt {}/{}), retrying...",
                    attempt + 1,
                    MAX_CONTEXT_RETRIES
                );
                last_error = Some(err_str);
                tokio::time::sleep(CONTEXT_RETRY_DELAY).await;
            }
            Err(EvalError::Other(err_str)) => {
                return Err(BackendError::Script(format!("Evaluation failed: {}", err_str)));
            }
        }
    }

    Err(BackendError::Script(last_error.unwrap_or_else(|| {
        "Failed to evaluate script after retries".to_string()
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_cdp_errors() {
        assert!(is_context_error("Execution context was destroyed."));
        assert!(is_context_error("{\"code\":-32000,\"message\":\"Cannot find context\"}"));
        assert!(!is_context_error("ReferenceError: foo is not defined"));
    }
}
