//! Status indicators for findings and operation outcomes
//!
//! Shared by the `check` and `sweep` renderers so every command marks severities the same way.

use crate::infrastructure::mysql::diagnostics::Severity;

pub const STATUS_SUCCESS: &str = "✓";
pub const STATUS_WARNING: &str = "⚠️";
/// Also marks critical findings and failed checks
pub const STATUS_ERROR: &str = "✗";
pub const STATUS_INFO: &str = "ℹ";

pub fn severity_symbol(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => STATUS_ERROR,
        Severity::Warning => STATUS_WARNING,
        Severity::Info => STATUS_INFO,
    }
}

/// `✓ checkMGRStatus: no findings`
pub fn format_success(item: &str, message: &str) -> String {
    format!("{} {}: {}", STATUS_SUCCESS, item, message)
}

/// Severity column text, e.g. `✗ critical (严重级)`
pub fn format_severity(severity: Severity) -> String {
    format!(
        "{} {} ({})",
        severity_symbol(severity),
        severity,
        severity.advisory_grade()
    )
}
