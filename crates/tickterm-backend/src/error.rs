//! Backend errors with structured context for the tool layer.

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tickterm_common::error_codes::{self, ErrorCategory};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Container unavailable: {0}")]
    Unavailable(String),
    #[error("Session '{0}' no longer exists")]
    SessionGone(String),
    #[error("`{command}` failed (exit {code}): {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },
}

impl BackendError {
    pub fn code(&self) -> i32 {
        match self {
            BackendError::Unavailable(_) => error_codes::BACKEND_UNAVAILABLE,
            BackendError::SessionGone(_) => error_codes::SESSION_GONE,
            BackendError::CommandFailed { .. } => error_codes::BACKEND_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    pub fn context(&self) -> Value {
        match self {
            BackendError::Unavailable(reason) => json!({ "reason": reason }),
            BackendError::SessionGone(name) => json!({ "session": name }),
            BackendError::CommandFailed {
                command,
                code,
                stderr,
            } => json!({ "command": command, "exit_code": code, "stderr": stderr }),
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            BackendError::Unavailable(_) => {
                "The container is not running. Wait for the next tick or ask the operator to restart it."
                    .to_string()
            }
            BackendError::SessionGone(_) => {
                "The terminal's session ended. Call wait() to see its final output.".to_string()
            }
            BackendError::CommandFailed { .. } => {
                "The terminal backend rejected the request. Retry once, then close and reopen the terminal."
                    .to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        error_codes::is_retryable(self.code())
    }

    /// True only when tmux reported the session itself gone. An unreachable
    /// container or a failed tmux command says nothing about the process.
    pub fn is_liveness_loss(&self) -> bool {
        matches!(self, BackendError::SessionGone(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_retryable() {
        let err = BackendError::Unavailable("no such container".into());
        assert!(err.is_retryable());
        assert_eq!(err.category(), ErrorCategory::External);
        assert!(!err.is_liveness_loss());
    }

    #[test]
    fn test_session_gone_is_liveness_loss() {
        let err = BackendError::SessionGone("term_3".into());
        assert!(!err.is_retryable());
        assert!(err.is_liveness_loss());
        assert_eq!(err.context()["session"], "term_3");
    }

    #[test]
    fn test_command_failed_context() {
        let err = BackendError::CommandFailed {
            command: "send-keys".into(),
            code: 1,
            stderr: "bad key".into(),
        };
        assert_eq!(err.to_string(), "`send-keys` failed (exit 1): bad key");
        assert_eq!(err.context()["exit_code"], 1);
        assert!(!err.is_liveness_loss());
    }
}
