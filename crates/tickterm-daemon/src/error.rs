//! Manager and tool-surface errors.
//!
//! Every variant renders as text the actor can act on; the structured
//! accessors mirror [`tickterm_backend::BackendError`].

use serde_json::Value;
use serde_json::json;
use thiserror::Error;
use tickterm_backend::BackendError;
use tickterm_common::error_codes::{self, ErrorCategory};

use crate::TerminalId;

#[derive(Error, Debug)]
pub enum TerminalError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("Terminal limit reached ({0}).")]
    LimitReached(usize),
    #[error("Terminal id {id} is out of range (0..{max}).")]
    InvalidId { id: TerminalId, max: usize },
    #[error("Terminal {0} not found.")]
    NotFound(TerminalId),
    #[error("Persistence error during {operation}: {reason}")]
    Persistence { operation: String, reason: String },
}

impl TerminalError {
    pub fn code(&self) -> i32 {
        match self {
            TerminalError::Backend(e) => e.code(),
            TerminalError::LimitReached(_) => error_codes::TERMINAL_LIMIT,
            TerminalError::InvalidId { .. } => error_codes::INVALID_TERMINAL_ID,
            TerminalError::NotFound(_) => error_codes::TERMINAL_NOT_FOUND,
            TerminalError::Persistence { .. } => error_codes::PERSISTENCE_ERROR,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    pub fn context(&self) -> Value {
        match self {
            TerminalError::Backend(e) => e.context(),
            TerminalError::LimitReached(max) => json!({ "max_terminals": max }),
            TerminalError::InvalidId { id, max } => json!({ "terminal": id, "max_terminals": max }),
            TerminalError::NotFound(id) => json!({ "terminal": id }),
            TerminalError::Persistence { operation, reason } => {
                json!({ "operation": operation, "reason": reason })
            }
        }
    }

    pub fn suggestion(&self) -> String {
        match self {
            TerminalError::Backend(e) => e.suggestion(),
            TerminalError::LimitReached(_) => {
                "Close a terminal you no longer need with close(terminal=N).".to_string()
            }
            TerminalError::InvalidId { max, .. } => {
                format!("Use a terminal id between 0 and {}.", max.saturating_sub(1))
            }
            TerminalError::NotFound(_) => "Use open() to create a new terminal.".to_string(),
            TerminalError::Persistence { .. } => {
                "Persistence errors are non-fatal; terminals keep running.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            TerminalError::Backend(e) => e.is_retryable(),
            TerminalError::Persistence { .. } => true,
            _ => false,
        }
    }
}

/// Tool precondition failures, plus manager errors surfaced through a tool.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("You must call login() first before using terminal tools.")]
    NotLoggedIn,
    #[error("text is required")]
    MissingText,
    #[error("expect is required: state what command you think is running in this terminal")]
    MissingExpect,
    #[error(
        "Terminals have unseen output. Call wait() first to observe output before sending more input."
    )]
    UnseenOutput,
    #[error("Terminal {0} does not exist. Use open() to create a new terminal.")]
    NoSuchTerminal(TerminalId),
    #[error("Terminal {0} has exited. Call wait() to see its last output, then open() a new terminal.")]
    TerminalExited(TerminalId),
    #[error(
        "Point-and-call mismatch: you expected '{expected}' but terminal {terminal} is running '{actual}'. Check which terminal you meant to use."
    )]
    ExpectMismatch {
        terminal: TerminalId,
        expected: String,
        actual: String,
    },
    #[error("Unknown tool '{0}'. Available tools: login, open, type, wait, close.")]
    UnknownTool(String),
    #[error("Invalid arguments for {tool}(): {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error(transparent)]
    Terminal(#[from] TerminalError),
}

impl ToolError {
    pub fn code(&self) -> i32 {
        match self {
            ToolError::NotLoggedIn => error_codes::NOT_LOGGED_IN,
            ToolError::MissingText | ToolError::MissingExpect => error_codes::MISSING_ARGUMENT,
            ToolError::UnseenOutput => error_codes::UNSEEN_OUTPUT,
            ToolError::NoSuchTerminal(_) => error_codes::TERMINAL_NOT_FOUND,
            ToolError::TerminalExited(_) => error_codes::SESSION_GONE,
            ToolError::ExpectMismatch { .. } => error_codes::EXPECT_MISMATCH,
            ToolError::UnknownTool(_) => error_codes::METHOD_NOT_FOUND,
            ToolError::InvalidArguments { .. } => error_codes::INVALID_PARAMS,
            ToolError::Terminal(e) => e.code(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        error_codes::category_for_code(self.code())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ToolError::Terminal(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<BackendError> for ToolError {
    fn from(e: BackendError) -> Self {
        ToolError::Terminal(TerminalError::Backend(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_names_the_limit() {
        let err = TerminalError::LimitReached(20);
        assert_eq!(err.to_string(), "Terminal limit reached (20).");
        assert_eq!(err.category(), ErrorCategory::Busy);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_backend_unavailable_surfaces_verbatim() {
        let err = ToolError::from(BackendError::Unavailable("container 'box' is not running".into()));
        assert_eq!(
            err.to_string(),
            "Container unavailable: container 'box' is not running"
        );
        assert!(err.is_retryable());
    }

    #[test]
    fn test_expect_mismatch_names_both_commands() {
        let err = ToolError::ExpectMismatch {
            terminal: 1,
            expected: "bash".into(),
            actual: "chat".into(),
        };
        let text = err.to_string();
        assert!(text.contains("'bash'"));
        assert!(text.contains("'chat'"));
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
    }

    #[test]
    fn test_preconditions_are_not_retryable() {
        assert!(!ToolError::UnseenOutput.is_retryable());
        assert_eq!(ToolError::NotLoggedIn.category(), ErrorCategory::Precondition);
    }
}
