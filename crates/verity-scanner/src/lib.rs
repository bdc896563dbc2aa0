/// The in-page capture script.
/// Evaluated by page drivers to instrument a document for event capture.
pub const CAPTURE_JS: &str = include_str!("capture.js");

/// Reports whether the capture script is installed and listening.
pub const CAPTURE_STATUS_JS: &str =
    "!!(window.__verityCapture && window.__verityCapture.active)";

/// Returns and clears the buffered records, or `null` when the script is gone
/// (for example after a full page navigation).
pub const CAPTURE_DRAIN_JS: &str =
    "window.__verityCapture ? window.__verityCapture.drain() : null";

/// Removes every listener. Safe to evaluate when nothing is installed.
pub const CAPTURE_STOP_JS: &str =
    "window.__verityCapture ? window.__verityCapture.stop() : false";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(clippy::const_is_empty)]
    fn capture_script_is_bundled() {
        assert!(!CAPTURE_JS.is_empty());
        assert!(CAPTURE_JS.contains("__verityCapture"));
        assert!(CAPTURE_JS.contains("addEventListener(type, onEvent, true)"));
    }

    #[test]
    fn helper_scripts_target_same_global() {
        for script in [CAPTURE_STATUS_JS, CAPTURE_DRAIN_JS, CAPTURE_STOP_JS] {
            assert!(script.contains("window.__verityCapture"));
        }
    }
}
