//! Control-key recognition for `send_keys`.
//!
//! Text matching one of these names is sent to tmux as a key press; anything
//! else is typed literally.

use std::sync::LazyLock;

use regex::Regex;

/// tmux key names (case-sensitive, as tmux spells them).
pub const CONTROL_KEY_NAMES: &[&str] = &[
    "Enter", "Escape", "Space", "Tab", "BSpace", "DC", "IC", "Up", "Down", "Left", "Right",
    "Home", "End", "PPage", "NPage", "F1", "F2", "F3", "F4", "F5", "F6", "F7", "F8", "F9",
    "F10", "F11", "F12",
];

/// The newline key appended after literal text.
pub const ENTER: &str = "Enter";

static MODIFIER_COMBO: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[CM]-.{1,2}$").ok());

/// Check if `text` names a control sequence rather than text to type.
///
/// # Examples
///
/// ```
/// use tickterm_backend::keys::is_control_key;
///
/// assert!(is_control_key("Enter"));
/// assert!(is_control_key("C-c"));
/// assert!(!is_control_key("ls -la"));
/// ```
pub fn is_control_key(text: &str) -> bool {
    if CONTROL_KEY_NAMES.contains(&text) {
        return true;
    }
    MODIFIER_COMBO
        .as_ref()
        .is_some_and(|combo| combo.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_keys() {
        for key in ["Enter", "Escape", "BSpace", "PPage", "F12"] {
            assert!(is_control_key(key), "{key}");
        }
    }

    #[test]
    fn test_names_are_case_sensitive() {
        assert!(!is_control_key("enter"));
        assert!(!is_control_key("ESCAPE"));
    }

    #[test]
    fn test_modifier_combos() {
        assert!(is_control_key("C-c"));
        assert!(is_control_key("M-x"));
        assert!(is_control_key("C-]"));
        assert!(is_control_key("M-Up"));
        assert!(!is_control_key("C-abc"));
        assert!(!is_control_key("C-"));
        assert!(!is_control_key("X-c"));
    }

    #[test]
    fn test_plain_text() {
        assert!(!is_control_key("echo hello"));
        assert!(!is_control_key(""));
        assert!(!is_control_key("F13"));
    }
}
