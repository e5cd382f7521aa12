//! Buffer reconciliation between consecutive captures.
//!
//! tmux keeps a fixed-size history, so once it is full every new line evicts
//! the oldest one and a capture has the same length as the previous one. The
//! high-water mark has to move back by the number of evicted lines or new
//! output would be reported as already seen.

/// Splits captured pane text into lines, dropping trailing blank rows.
pub fn split_capture(content: &str) -> Vec<String> {
    let mut lines: Vec<String> = content
        .split('\n')
        .map(|line| line.trim_end_matches('\r').to_string())
        .collect();
    while lines.last().is_some_and(|line| line.trim().is_empty()) {
        lines.pop();
    }
    lines
}

/// Number of lines evicted from the front of `old` to produce `new`.
///
/// Finds the first position in `old` where `new` starts, confirming the
/// match over up to `verify_window` lines. Without any overlap the whole of
/// `new` counts as unread, so the result is `new.len()`.
///
/// Repetitive output (a progress line reprinted many times) can still match
/// at the wrong offset; the verification window narrows that but does not
/// rule it out.
pub fn detect_buffer_shift(old: &[String], new: &[String], verify_window: usize) -> usize {
    let Some(first) = new.first() else {
        return 0;
    };
    if old.is_empty() {
        return new.len();
    }
    for (i, line) in old.iter().enumerate() {
        if line != first {
            continue;
        }
        let span = verify_window.min(new.len()).min(old.len() - i);
        if (1..span).all(|j| old[i + j] == new[j]) {
            return i;
        }
    }
    new.len()
}

/// Returns the high-water mark to use against `new` after it replaces `old`.
pub fn reconcile_high_water_mark(
    old: &[String],
    new: &[String],
    high_water_mark: usize,
    verify_window: usize,
) -> usize {
    if new.len() < high_water_mark {
        return 0;
    }
    if !old.is_empty() && new.len() == old.len() && old != new {
        let shift = detect_buffer_shift(old, new, verify_window);
        return high_water_mark.saturating_sub(shift);
    }
    high_water_mark
}
