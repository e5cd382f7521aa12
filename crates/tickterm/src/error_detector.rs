//! Classifies API failures reported by the actor as fatal or transient.

use std::time::Duration;

pub const MAX_RETRIES: u32 = 10;
const BASE_DELAY_SECS: u64 = 10;
const MAX_DELAY_SECS: u64 = 600;

const FATAL_PHRASES: &[&str] = &[
    "prompt is too long",
    "context_length_exceeded",
    "input is too long",
];

const TRANSIENT_PHRASES: &[&str] = &[
    "you've hit your limit",
    "you have hit your limit",
    "rate limit",
    "rate_limit",
    "quota exceeded",
    "billing_error",
    "overloaded",
    "529",
    "internal server error",
    "api_error",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retrying cannot help; ticking pauses until an operator intervenes.
    Fatal,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedError {
    pub class: ErrorClass,
    pub category: &'static str,
    pub text: String,
}

impl DetectedError {
    pub fn reason(&self) -> String {
        format!("{}: {}", self.category, self.text)
    }
}

/// Remembers the most serious error seen during the current turn.
#[derive(Debug, Default)]
pub struct ErrorDetector {
    error: Option<DetectedError>,
}

fn classify(text: &str) -> Option<(ErrorClass, &'static str)> {
    let lower = text.to_lowercase();
    if FATAL_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some((ErrorClass::Fatal, "context_limit"));
    }
    if TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) {
        return Some((ErrorClass::Transient, "rate_limit"));
    }
    None
}

impl ErrorDetector {
    /// Assistant text is scanned because some API errors arrive as plain
    /// messages rather than as an error result.
    pub fn check_text(&mut self, text: &str) {
        if let Some((class, category)) = classify(text) {
            self.record(DetectedError {
                class,
                category,
                text: text.trim().to_string(),
            });
        }
    }

    pub fn check_result(&mut self, is_error: bool, result: &str) {
        if !is_error {
            return;
        }
        let (class, category) = classify(result).unwrap_or_else(|| {
            let lower = result.to_lowercase();
            if lower.contains("prompt") && lower.contains("long") {
                (ErrorClass::Fatal, "context_limit")
            } else {
                (ErrorClass::Transient, "unknown")
            }
        });
        self.record(DetectedError {
            class,
            category,
            text: result.trim().to_string(),
        });
    }

    fn record(&mut self, error: DetectedError) {
        let keep_existing = self
            .error
            .as_ref()
            .is_some_and(|e| e.class == ErrorClass::Fatal && error.class != ErrorClass::Fatal);
        if !keep_existing {
            self.error = Some(error);
        }
    }

    pub fn error(&self) -> Option<&DetectedError> {
        self.error.as_ref()
    }

    pub fn is_fatal(&self) -> bool {
        self.error
            .as_ref()
            .is_some_and(|e| e.class == ErrorClass::Fatal)
    }

    pub fn reset(&mut self) {
        self.error = None;
    }
}

/// Delay before retry `attempt` (1-based): 10s doubling, capped at 600s.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let secs = BASE_DELAY_SECS.saturating_mul(1u64 << exponent);
    Duration::from_secs(secs.min(MAX_DELAY_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_phrases_are_fatal() {
        let mut detector = ErrorDetector::default();
        detector.check_text("API Error: Prompt is too long");
        assert!(detector.is_fatal());
        assert_eq!(detector.error().unwrap().category, "context_limit");
    }

    #[test]
    fn test_rate_limit_is_transient() {
        let mut detector = ErrorDetector::default();
        detector.check_text("You've hit your limit. Resets at 5pm.");
        let error = detector.error().unwrap();
        assert_eq!(error.class, ErrorClass::Transient);
        assert!(!detector.is_fatal());
    }

    #[test]
    fn test_plain_text_is_ignored() {
        let mut detector = ErrorDetector::default();
        detector.check_text("All terminals closed, see you next tick.");
        detector.check_result(false, "prompt too long");
        assert!(detector.error().is_none());
    }

    #[test]
    fn test_unrecognized_error_result_is_transient() {
        let mut detector = ErrorDetector::default();
        detector.check_result(true, "connection reset");
        assert_eq!(detector.error().unwrap().category, "unknown");

        detector.reset();
        detector.check_result(true, "The prompt was far too long");
        assert!(detector.is_fatal());
    }

    #[test]
    fn test_fatal_is_not_downgraded() {
        let mut detector = ErrorDetector::default();
        detector.check_text("context_length_exceeded");
        detector.check_result(true, "overloaded_error");
        assert!(detector.is_fatal());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1), Duration::from_secs(10));
        assert_eq!(backoff_delay(2), Duration::from_secs(20));
        assert_eq!(backoff_delay(6), Duration::from_secs(320));
        assert_eq!(backoff_delay(7), Duration::from_secs(600));
        assert_eq!(backoff_delay(MAX_RETRIES), Duration::from_secs(600));
    }
}
