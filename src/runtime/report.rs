//! Exception reports captured from failed script execution.
//!
//! Whatever the failure point (compile, top-level run, entry invocation),
//! the binding reduces it to one [`ExceptionReport`]: the exception message
//! (truncated to a fixed cap), the originating filename and line when the
//! engine provides them, and the stack trace when one exists. This is the
//! machine-readable artifact surfaced to callers and recorded on the ledger
//! context for failed invocations.

use deno_core::error::JsError;
use deno_core::v8;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Cap on the exception message carried in a report.
pub const MAX_EXCEPTION_BYTES: usize = 256;

/// The structured outcome of a script failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionReport {
    pub exception: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linenum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ExceptionReport {
    pub fn new(message: impl Into<String>) -> Self {
        ExceptionReport {
            exception: truncate_utf8(message.into(), MAX_EXCEPTION_BYTES),
            ..Default::default()
        }
    }

    /// Drain a pending exception out of a `TryCatch` scope.
    pub(crate) fn from_try_catch(scope: &mut v8::TryCatch<v8::HandleScope>) -> Self {
        let exception = scope
            .exception()
            .map(|exc| exc.to_rust_string_lossy(scope))
            .unwrap_or_else(|| "unknown exception".to_string());
        let mut report = ExceptionReport::new(exception);

        if let Some(message) = scope.message() {
            report.filename = message
                .get_script_resource_name(scope)
                .map(|name| name.to_rust_string_lossy(scope));
            report.linenum = message.get_line_number(scope).map(|line| line as i64);
        }

        report.stack = scope
            .stack_trace()
            .filter(|trace| trace.is_string())
            .map(|trace| trace.to_rust_string_lossy(scope))
            .filter(|trace| !trace.is_empty());

        report
    }

    /// Convert the error deno_core produced for a failed script evaluation.
    pub(crate) fn from_js_error(error: &JsError) -> Self {
        let mut report = ExceptionReport::new(error.exception_message.clone());
        if let Some(frame) = error.frames.first() {
            report.filename = frame.file_name.clone();
            report.linenum = frame.line_number;
        }
        report.stack = error.stack.clone();
        report
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            serde_json::json!({ "exception": self.exception })
        })
    }
}

impl fmt::Display for ExceptionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str(&self.exception),
        }
    }
}

/// Truncate to at most `max` bytes without splitting a UTF-8 sequence.
fn truncate_utf8(mut text: String, max: usize) -> String {
    if text.len() > max {
        let mut end = max;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = "é".repeat(200);
        let report = ExceptionReport::new(long);
        assert!(report.exception.len() <= MAX_EXCEPTION_BYTES);
        assert!(report.exception.chars().all(|c| c == 'é'));
    }

    #[test]
    fn short_messages_are_kept_verbatim() {
        let report = ExceptionReport::new("ReferenceError: x is not defined");
        assert_eq!(report.exception, "ReferenceError: x is not defined");
        assert_eq!(report.filename, None);
    }

    #[test]
    fn json_omits_absent_fields() {
        let report = ExceptionReport::new("boom");
        let json = report.to_json();
        assert_eq!(json["exception"], "boom");
        assert!(json.get("filename").is_none());
        assert!(json.get("stack").is_none());
    }
}
