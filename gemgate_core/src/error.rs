use std::fmt;

use thiserror::Error;

use crate::redaction::redact_sensitive_text;

/// Reason codes for `InvokeError::PathSecurity`. These are the only detail
/// a collaborator ever sees about a rejected path; the raw input is logged
/// server-side only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathDenyReason {
    EmptyPath,
    NotFound,
    OutsideRoot,
    NotAFile,
    NotADirectory,
    ExtensionNotAllowed,
    FileTooLarge,
    TooManyLines,
}

impl PathDenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PathDenyReason::EmptyPath => "empty_path",
            PathDenyReason::NotFound => "not_found",
            PathDenyReason::OutsideRoot => "outside_root",
            PathDenyReason::NotAFile => "not_a_file",
            PathDenyReason::NotADirectory => "not_a_directory",
            PathDenyReason::ExtensionNotAllowed => "extension_not_allowed",
            PathDenyReason::FileTooLarge => "file_too_large",
            PathDenyReason::TooManyLines => "too_many_lines",
        }
    }
}

impl fmt::Display for PathDenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum InvokeError {
    /// Malformed request shape or limits, rejected before any I/O.
    #[error("invalid request: {0}")]
    Validation(String),

    /// Path traversal, disallowed type/extension, or size limits, rejected
    /// before any file content is read.
    #[error("path rejected: {reason}")]
    PathSecurity { reason: PathDenyReason },

    /// Both the API and CLI strategies failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// Watchdog expiry.
    #[error("execution timed out after {0}s")]
    Timeout(u64),

    /// Unexpected failure inside the subsystem itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl InvokeError {
    /// Scrubs credential-shaped substrings from any message the error
    /// carries. Every error crossing the subsystem boundary goes through
    /// this, including validation failures.
    pub fn redacted(self) -> Self {
        match self {
            InvokeError::Validation(msg) => InvokeError::Validation(redact_sensitive_text(&msg)),
            InvokeError::Execution(msg) => InvokeError::Execution(redact_sensitive_text(&msg)),
            InvokeError::Internal(msg) => InvokeError::Internal(redact_sensitive_text(&msg)),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redacted_scrubs_carried_messages() {
        let key = format!("AIza{}", "A".repeat(35));
        let err = InvokeError::Execution(format!("status 403 for key {}", key));
        let msg = err.redacted().to_string();
        assert!(!msg.contains(&key));
        assert!(msg.contains("[REDACTED]"));
    }

    #[test]
    fn path_reasons_render_snake_case() {
        let err = InvokeError::PathSecurity {
            reason: PathDenyReason::OutsideRoot,
        };
        assert_eq!(err.to_string(), "path rejected: outside_root");
    }
}
