//! Semantic error codes shared by the backend, the manager and the tool surface.
//!
//! Codes follow the JSON-RPC 2.0 layout:
//! - -32700 to -32600: reserved protocol errors
//! - -32000 to -32099: server errors (tickterm uses -32001 to -32020)

// Protocol errors
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;

// Terminal errors
pub const TERMINAL_NOT_FOUND: i32 = -32001;
pub const TERMINAL_LIMIT: i32 = -32006;
pub const INVALID_TERMINAL_ID: i32 = -32010;

// Tool preconditions
pub const NOT_LOGGED_IN: i32 = -32002;
pub const UNSEEN_OUTPUT: i32 = -32003;
pub const EXPECT_MISMATCH: i32 = -32004;
pub const MISSING_ARGUMENT: i32 = -32005;

// Backend errors
pub const BACKEND_UNAVAILABLE: i32 = -32007;
pub const BACKEND_ERROR: i32 = -32008;
pub const SESSION_GONE: i32 = -32009;

// Harness errors
pub const HARNESS_ERROR: i32 = -32016;
pub const PERSISTENCE_ERROR: i32 = -32017;

pub const GENERIC_ERROR: i32 = -32000;

/// Error category for programmatic handling by the actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Terminal or backend session does not exist
    NotFound,
    /// Invalid input parameters
    InvalidInput,
    /// Actor must do something else first (login, wait)
    Precondition,
    /// Capacity exhausted
    Busy,
    /// Internal error
    Internal,
    /// Container or filesystem failure
    External,
    /// Operation timed out
    Timeout,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::InvalidInput => "invalid_input",
            ErrorCategory::Precondition => "precondition",
            ErrorCategory::Busy => "busy",
            ErrorCategory::Internal => "internal",
            ErrorCategory::External => "external",
            ErrorCategory::Timeout => "timeout",
        }
    }
}

impl std::str::FromStr for ErrorCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "not_found" => Ok(ErrorCategory::NotFound),
            "invalid_input" => Ok(ErrorCategory::InvalidInput),
            "precondition" => Ok(ErrorCategory::Precondition),
            "busy" => Ok(ErrorCategory::Busy),
            "internal" => Ok(ErrorCategory::Internal),
            "external" => Ok(ErrorCategory::External),
            "timeout" => Ok(ErrorCategory::Timeout),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Returns whether an error code represents a transient condition.
///
/// Only an unreachable container qualifies: restarting it may make the
/// same call succeed. Capacity and precondition failures never do.
pub fn is_retryable(code: i32) -> bool {
    matches!(code, BACKEND_UNAVAILABLE | GENERIC_ERROR)
}

/// Returns the error category for a given error code.
pub fn category_for_code(code: i32) -> ErrorCategory {
    match code {
        TERMINAL_NOT_FOUND | SESSION_GONE | METHOD_NOT_FOUND => ErrorCategory::NotFound,
        INVALID_TERMINAL_ID | MISSING_ARGUMENT | EXPECT_MISMATCH | INVALID_PARAMS
        | INVALID_REQUEST | PARSE_ERROR => ErrorCategory::InvalidInput,
        NOT_LOGGED_IN | UNSEEN_OUTPUT => ErrorCategory::Precondition,
        TERMINAL_LIMIT => ErrorCategory::Busy,
        BACKEND_UNAVAILABLE | BACKEND_ERROR | PERSISTENCE_ERROR | HARNESS_ERROR => {
            ErrorCategory::External
        }
        _ => ErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_retryable_backend_unavailable() {
        assert!(is_retryable(BACKEND_UNAVAILABLE));
    }

    #[test]
    fn test_not_retryable_limit() {
        assert!(!is_retryable(TERMINAL_LIMIT));
        assert!(!is_retryable(UNSEEN_OUTPUT));
    }

    #[test]
    fn test_category_for_code() {
        assert_eq!(category_for_code(TERMINAL_NOT_FOUND), ErrorCategory::NotFound);
        assert_eq!(category_for_code(EXPECT_MISMATCH), ErrorCategory::InvalidInput);
        assert_eq!(category_for_code(NOT_LOGGED_IN), ErrorCategory::Precondition);
        assert_eq!(category_for_code(TERMINAL_LIMIT), ErrorCategory::Busy);
        assert_eq!(category_for_code(BACKEND_UNAVAILABLE), ErrorCategory::External);
        assert_eq!(category_for_code(12345), ErrorCategory::Internal);
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for category in [
            ErrorCategory::NotFound,
            ErrorCategory::Precondition,
            ErrorCategory::Timeout,
        ] {
            assert_eq!(category.as_str().parse::<ErrorCategory>(), Ok(category));
        }
        assert!("bogus".parse::<ErrorCategory>().is_err());
    }
}
