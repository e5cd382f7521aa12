//! Text the actor sees after a wait.

use std::fmt::Write as _;
use std::path::Path;

use crate::ManagerConfig;
use crate::Terminal;
use crate::TerminalId;

/// Inline/elision thresholds for diff blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiffFormat {
    pub inline_threshold: usize,
    pub head: usize,
    pub tail: usize,
}

impl DiffFormat {
    pub fn from_config(config: &ManagerConfig) -> Self {
        Self {
            inline_threshold: config.inline_threshold,
            head: config.elision_head,
            tail: config.elision_tail,
        }
    }
}

impl Default for DiffFormat {
    fn default() -> Self {
        Self::from_config(&ManagerConfig::default())
    }
}

pub(crate) fn heading(id: TerminalId, label: &str) -> String {
    format!("[term {id}: {label}]")
}

fn push_indented(out: &mut String, lines: &[String]) {
    for line in lines {
        let _ = write!(out, "\n  {line}");
    }
}

/// One diff block: a header with the line count, then the lines indented
/// by two spaces. Long diffs keep only a head and a tail, with a marker
/// pointing at the full scrollback.
pub fn format_diff(
    id: TerminalId,
    label: &str,
    new_lines: &[String],
    prefix: Option<&str>,
    scrollback: &Path,
    format: DiffFormat,
) -> String {
    let count = new_lines.len();
    let mut out = heading(id, label);
    if let Some(prefix) = prefix {
        let _ = write!(out, " {prefix},");
    }
    let noun = if count == 1 { "line" } else { "lines" };
    let _ = write!(out, " {count} new {noun}:");

    let elide = count > format.inline_threshold && count > format.head + format.tail;
    if !elide {
        push_indented(&mut out, new_lines);
        return out;
    }

    let omitted = count - format.head - format.tail;
    push_indented(&mut out, &new_lines[..format.head]);
    let _ = write!(
        out,
        "\n  ... ({omitted} lines omitted, full scrollback: {}) ...",
        scrollback.display()
    );
    push_indented(&mut out, &new_lines[count - format.tail..]);
    out
}

/// Reports one terminal and marks whatever it reported as seen.
pub fn summarize_terminal(terminal: &mut Terminal, format: DiffFormat) -> String {
    let id = terminal.id();
    let label = terminal.label().to_string();
    let scrollback = terminal.artifacts().scrollback.clone();

    if !terminal.is_alive() {
        let exit = match terminal.exit_code() {
            Some(code) => format!("process exited (code {code})"),
            None => "process exited".to_string(),
        };
        let text = if terminal.has_unseen_output() {
            format_diff(id, &label, terminal.new_lines(), Some(&exit), &scrollback, format)
        } else {
            format!("{} {exit}, no new output", heading(id, &label))
        };
        terminal.mark_seen();
        return text;
    }

    if !terminal.has_unseen_output() {
        return format!("{} no change", heading(id, &label));
    }
    let text = format_diff(id, &label, terminal.new_lines(), None, &scrollback, format);
    terminal.mark_seen();
    text
}
