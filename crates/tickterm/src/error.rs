use std::path::Path;
use std::path::PathBuf;

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tickterm_common::error_codes::{self, ErrorCategory};
use tickterm_daemon::TerminalError;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Ticking is paused: {} exists.", .0.display())]
    Paused(PathBuf),
    #[error("Persistence error during {operation}: {reason}")]
    Persistence { operation: String, reason: String },
    #[error(transparent)]
    Terminal(#[from] TerminalError),
}

impl HarnessError {
    pub(crate) fn persistence(operation: &str, path: &Path, err: impl std::fmt::Display) -> Self {
        HarnessError::Persistence {
            operation: operation.to_string(),
            reason: format!("{}: {}", path.display(), err),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            HarnessError::Paused(_) => error_codes::HARNESS_ERROR,
            HarnessError::Persistence { .. } => error_codes::PERSISTENCE_ERROR,
            HarnessError::Terminal(e) => e.code(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HarnessError::Paused(_) => ErrorCategory::Precondition,
            other => error_codes::category_for_code(other.code()),
        }
    }

    pub fn context(&self) -> Value {
        match self {
            HarnessError::Paused(path) => json!({ "paused_file": path.display().to_string() }),
            HarnessError::Persistence { operation, reason } => {
                json!({ "operation": operation, "reason": reason })
            }
            HarnessError::Terminal(e) => e.context(),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            HarnessError::Paused(path) => format!(
                "Read {} for the reason, then delete it to resume ticking.",
                path.display()
            ),
            HarnessError::Persistence { .. } => {
                "Check that the data directory exists and is writable.".to_string()
            }
            HarnessError::Terminal(e) => e.suggestion(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            HarnessError::Paused(_) => false,
            HarnessError::Persistence { .. } => true,
            HarnessError::Terminal(e) => e.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tickterm_backend::BackendError;

    #[test]
    fn test_paused_is_a_precondition() {
        let err = HarnessError::Paused(PathBuf::from("/data/system/paused"));
        assert_eq!(err.to_string(), "Ticking is paused: /data/system/paused exists.");
        assert_eq!(err.category(), ErrorCategory::Precondition);
        assert!(!err.is_retryable());
        assert!(err.suggestion().contains("delete it"));
    }

    #[test]
    fn test_terminal_errors_pass_through() {
        let err = HarnessError::from(TerminalError::Backend(BackendError::Unavailable(
            "no such container".into(),
        )));
        assert_eq!(err.code(), error_codes::BACKEND_UNAVAILABLE);
        assert_eq!(err.category(), ErrorCategory::External);
        assert!(err.is_retryable());
    }
}
