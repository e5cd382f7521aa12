//! The login step: lost-terminal report, build error, and startup replay.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tickterm_backend::SessionBackend;
use tracing::debug;
use tracing::warn;

use crate::TerminalId;
use crate::TerminalManager;
use crate::config::DEFAULT_COMMAND;
use crate::recovery::format_lost_report;
use crate::summary::format_diff;
use crate::summary::heading;

/// Text returned by a login that had nothing to report.
pub const LOGGED_IN: &str = "Logged in.";

fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupTerminal {
    #[serde(alias = "tty")]
    pub terminal: TerminalId,
    #[serde(default = "default_command")]
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Terminals to bring up at login, from `system/startup.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartupConfig {
    #[serde(default, alias = "ttys")]
    pub terminals: Vec<StartupTerminal>,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            terminals: Vec::new(),
        }
        .normalized()
    }
}

impl StartupConfig {
    /// Missing or unreadable files give the default (a single shell in
    /// terminal 0).
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read startup config");
                return Self::default();
            }
        };
        match serde_json::from_str::<StartupConfig>(&contents) {
            Ok(config) => config.normalized(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "startup config is corrupt, using default");
                Self::default()
            }
        }
    }

    /// Sorted by id, one entry per id, terminal 0 always present.
    pub fn normalized(mut self) -> Self {
        self.terminals.sort_by_key(|t| t.terminal);
        self.terminals.dedup_by_key(|t| t.terminal);
        if self.terminals.first().map(|t| t.terminal) != Some(0) {
            self.terminals.insert(
                0,
                StartupTerminal {
                    terminal: 0,
                    command: default_command(),
                    label: Some(default_command()),
                },
            );
        }
        self
    }
}

fn build_error_section(error: &str) -> String {
    format!(
        "Container image rebuild FAILED (your container changes did not take effect):\n  {error}\nFix the container definition and it will retry next tick."
    )
}

/// Runs the login flow and returns the text the actor sees.
///
/// A repeat login within the same tick starts from a clean slate: every
/// open terminal is closed first. On the first login, terminals that
/// survived from the previous tick are left running and their startup
/// command is not replayed.
pub(crate) async fn run_login<B: SessionBackend + 'static>(
    manager: &TerminalManager<B>,
    startup: &StartupConfig,
    relogin: bool,
) -> String {
    if relogin {
        manager.close_all().await;
    }

    let mut sections = Vec::new();
    let report = format_lost_report(&manager.take_lost_terminals());
    if !report.is_empty() {
        sections.push(report);
    }
    if let Some(error) = manager.build_error() {
        sections.push(build_error_section(error));
    }

    let mut setup_errors = Vec::new();
    for entry in &startup.terminals {
        let id = entry.terminal;
        if manager.is_alive(id).await {
            debug!(terminal = id, "startup terminal already running");
            continue;
        }
        if let Err(e) = manager.type_text(id, &entry.command, true).await {
            warn!(terminal = id, error = %e, "startup terminal failed");
            setup_errors.push(format!("(terminal {id} setup error: {e})"));
        }
    }

    manager
        .wait_for_activity(manager.config().login_settle_timeout, false)
        .await;

    let mut others = Vec::new();
    for id in manager.terminal_ids() {
        let Some(terminal) = manager.terminal(id) else {
            continue;
        };
        let guard = terminal.lock().await;
        let new_lines = guard.new_lines();
        if id == 0 {
            if !new_lines.is_empty() {
                sections.push(new_lines.join("\n"));
            }
        } else if new_lines.is_empty() {
            others.push(format!("{} no change", heading(id, guard.label())));
        } else {
            others.push(format_diff(
                id,
                guard.label(),
                new_lines,
                None,
                &guard.artifacts().scrollback,
                manager.diff_format(),
            ));
        }
    }
    if !others.is_empty() {
        sections.push(others.join("\n"));
    }
    sections.extend(setup_errors);
    manager.mark_all_seen().await;

    if sections.is_empty() {
        LOGGED_IN.to_string()
    } else {
        sections.join("\n\n")
    }
}
