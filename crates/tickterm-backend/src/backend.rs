use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Liveness snapshot of a session's single pane.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaneStatus {
    pub dead: bool,
    pub exit_code: Option<i32>,
    pub foreground_command: String,
    pub foreground_pid: String,
}

/// Narrow contract the terminal manager uses to drive sessions.
///
/// Every call is a full round trip to the container. Implementations report
/// an unreachable container as [`crate::BackendError::Unavailable`] and never
/// retry on their own.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Best effort; any failure reads as "does not exist".
    async fn session_exists(&self, name: &str) -> bool;

    async fn create_session(&self, name: &str, command: &str, rows: u16, cols: u16) -> Result<()>;

    /// Appends everything the pane prints to `raw_path`.
    async fn pipe_output(&self, name: &str, raw_path: &Path) -> Result<()>;

    /// `literal` sends `payload` as typed text; otherwise it is a key name.
    async fn send_keys(&self, name: &str, payload: &str, literal: bool) -> Result<()>;

    /// Visible window plus up to `scrollback_lines` of history, oldest first.
    async fn capture_pane(&self, name: &str, scrollback_lines: usize) -> Result<String>;

    /// Visible window with escape sequences preserved.
    async fn capture_annotated(&self, name: &str) -> Result<String>;

    async fn pane_status(&self, name: &str) -> Result<PaneStatus>;

    /// Maps a generic interpreter (`python3`, `bash`, ...) to the script it
    /// runs. Falls back to `raw_command` whenever resolution fails.
    async fn resolve_foreground_script_name(&self, raw_command: &str, pid: &str) -> String;

    /// Idempotent: killing a missing session succeeds.
    async fn kill_session(&self, name: &str) -> Result<()>;
}
