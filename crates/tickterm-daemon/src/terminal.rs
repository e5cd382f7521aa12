use std::path::Path;
use std::path::PathBuf;

use chrono::DateTime;
use chrono::Utc;

use crate::buffer::reconcile_high_water_mark;

pub type TerminalId = u32;

const SESSION_PREFIX: &str = "term_";

/// Backend session name (and artifact directory name) for a terminal id.
pub fn session_name(id: TerminalId) -> String {
    format!("{SESSION_PREFIX}{id}")
}

/// Inverse of [`session_name`]; `None` for anything tickterm did not name.
pub fn parse_session_name(name: &str) -> Option<TerminalId> {
    let digits = name.strip_prefix(SESSION_PREFIX)?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Files the actor reads directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalArtifacts {
    pub dir: PathBuf,
    pub screen: PathBuf,
    pub screen_annotated: PathBuf,
    pub raw: PathBuf,
    pub scrollback: PathBuf,
    pub status: PathBuf,
}

impl TerminalArtifacts {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            screen: dir.join("screen"),
            screen_annotated: dir.join("screen.annotated"),
            raw: dir.join("raw"),
            scrollback: dir.join("scrollback"),
            status: dir.join("status"),
            dir,
        }
    }

    pub fn previous_scrollback(&self) -> PathBuf {
        self.dir.join("scrollback.prev")
    }
}

/// One interactive session and everything known about its output.
///
/// `lines` is the last full capture; the first `high_water_mark` of them
/// have been shown to the actor.
#[derive(Debug, Clone)]
pub struct Terminal {
    id: TerminalId,
    session_name: String,
    artifacts: TerminalArtifacts,
    lines: Vec<String>,
    high_water_mark: usize,
    process_alive: bool,
    exit_code: Option<i32>,
    launch_command: String,
    foreground_command: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    retired: bool,
}

impl Terminal {
    pub fn new(id: TerminalId, launch_command: impl Into<String>, sessions_dir: &Path) -> Self {
        let session_name = session_name(id);
        let now = Utc::now();
        Self {
            id,
            artifacts: TerminalArtifacts::new(sessions_dir.join(&session_name)),
            session_name,
            lines: Vec::new(),
            high_water_mark: 0,
            process_alive: true,
            exit_code: None,
            launch_command: launch_command.into(),
            foreground_command: String::new(),
            created_at: now,
            last_activity: now,
            retired: false,
        }
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub fn session_name(&self) -> &str {
        &self.session_name
    }

    pub fn artifacts(&self) -> &TerminalArtifacts {
        &self.artifacts
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn high_water_mark(&self) -> usize {
        self.high_water_mark
    }

    pub fn is_alive(&self) -> bool {
        self.process_alive
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit_code
    }

    pub fn launch_command(&self) -> &str {
        &self.launch_command
    }

    pub fn foreground_command(&self) -> &str {
        &self.foreground_command
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Closed terminals may still be referenced by an in-flight capture.
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    /// What the actor should call this terminal, and what `expect` must match.
    pub fn label(&self) -> &str {
        if self.foreground_command.is_empty() {
            &self.launch_command
        } else {
            &self.foreground_command
        }
    }

    pub fn new_lines(&self) -> &[String] {
        &self.lines[self.high_water_mark.min(self.lines.len())..]
    }

    pub fn has_unseen_output(&self) -> bool {
        !self.new_lines().is_empty()
    }

    pub fn mark_seen(&mut self) {
        self.high_water_mark = self.lines.len();
    }

    /// Replaces the buffer with a fresh capture. Returns false when nothing
    /// changed.
    pub fn apply_capture(&mut self, lines: Vec<String>, verify_window: usize) -> bool {
        if lines == self.lines {
            return false;
        }
        self.high_water_mark =
            reconcile_high_water_mark(&self.lines, &lines, self.high_water_mark, verify_window);
        self.lines = lines;
        self.last_activity = Utc::now();
        true
    }

    /// Returns true when the name actually changed.
    pub fn set_foreground_command(&mut self, command: String) -> bool {
        if command.is_empty() || command == self.foreground_command {
            return false;
        }
        self.foreground_command = command;
        true
    }

    /// Returns true on the alive to dead transition only.
    pub fn mark_exited(&mut self, exit_code: Option<i32>) -> bool {
        if !self.process_alive {
            return false;
        }
        self.process_alive = false;
        self.exit_code = exit_code;
        self.last_activity = Utc::now();
        true
    }

    /// `idle`, `exited` or `exited (<code>)`.
    pub fn status_line(&self) -> String {
        match (self.process_alive, self.exit_code) {
            (true, _) => "idle".to_string(),
            (false, Some(code)) => format!("exited ({code})"),
            (false, None) => "exited".to_string(),
        }
    }

    /// The visible window: the last `rows` lines.
    pub fn screen_text(&self, rows: usize) -> String {
        let start = self.lines.len().saturating_sub(rows);
        join_lines(&self.lines[start..])
    }

    pub fn scrollback_text(&self) -> String {
        join_lines(&self.lines)
    }
}

fn join_lines(lines: &[String]) -> String {
    if lines.is_empty() {
        return String::new();
    }
    let mut text = lines.join("\n");
    text.push('\n');
    text
}
