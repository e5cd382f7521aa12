//! Tick-start reconciliation of the previous tick's registry with the
//! sessions that actually survived.

use std::fs;

use serde::Serialize;
use tickterm_backend::SessionBackend;
use tracing::debug;
use tracing::info;

use crate::RegistryEntry;
use crate::SessionPaths;
use crate::TerminalId;
use crate::TerminalRegistry;
use crate::archive::archive_terminal_dir;
use crate::terminal::TerminalArtifacts;
use crate::terminal::parse_session_name;

/// A terminal from the previous run whose session is gone or whose
/// process has exited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LostTerminal {
    pub name: String,
    pub command: String,
    pub status: String,
    pub has_scrollback: bool,
}

/// A registered terminal whose process is still running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SurvivingTerminal {
    pub id: TerminalId,
    pub entry: RegistryEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub lost: Vec<LostTerminal>,
    pub surviving: Vec<SurvivingTerminal>,
    pub orphans_archived: usize,
}

/// Sorts every registered terminal into lost or surviving, archives the
/// directories of lost terminals and of orphans nobody registered, and
/// clears the registry if anything was lost.
pub async fn recover_stale_terminals<B: SessionBackend + ?Sized>(
    backend: &B,
    paths: &SessionPaths,
    registry: &TerminalRegistry,
    tick: u64,
) -> RecoveryReport {
    let entries = registry.load();
    let mut report = RecoveryReport::default();

    for (name, entry) in &entries {
        let status = match session_fate(backend, name).await {
            SessionFate::Running => {
                info!(session = %name, "terminal survived restart");
                match parse_session_name(name) {
                    Some(id) => report.surviving.push(SurvivingTerminal {
                        id,
                        entry: entry.clone(),
                    }),
                    None => debug!(session = %name, "surviving session has a foreign name, not adopting"),
                }
                continue;
            }
            SessionFate::Gone => {
                info!(session = %name, "terminal lost, session gone");
                entry.status.clone()
            }
            SessionFate::Exited(code) => {
                info!(session = %name, exit_code = ?code, "terminal lost, process exited");
                if let Err(e) = backend.kill_session(name).await {
                    debug!(session = %name, error = %e, "failed to kill dead session");
                }
                match code {
                    Some(code) => format!("exited ({code})"),
                    None => "exited".to_string(),
                }
            }
        };

        let artifacts = TerminalArtifacts::new(paths.terminal_dir(name));
        let has_scrollback = artifacts.scrollback.exists();
        if has_scrollback {
            if let Err(e) = fs::rename(&artifacts.scrollback, artifacts.previous_scrollback()) {
                debug!(session = %name, error = %e, "failed to keep previous scrollback");
            }
        }
        report.lost.push(LostTerminal {
            name: name.clone(),
            command: entry.command.clone(),
            status,
            has_scrollback,
        });
        archive_terminal_dir(&artifacts.dir, &paths.archive_dir, tick);
    }

    if let Ok(dir) = fs::read_dir(&paths.sessions_dir) {
        let orphans: Vec<_> = dir
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().into_owned();
                parse_session_name(&name).map(|_| (name, e.path()))
            })
            .filter(|(name, _)| !entries.contains_key(name))
            .collect();
        for (name, path) in orphans {
            if backend.session_exists(&name).await {
                continue;
            }
            info!(session = %name, "archiving orphan terminal directory");
            if archive_terminal_dir(&path, &paths.archive_dir, tick).is_some() {
                report.orphans_archived += 1;
            }
        }
    }

    if !report.lost.is_empty() {
        if let Err(e) = registry.clear() {
            debug!(error = %e, "failed to clear stale registry");
        }
    }
    report
}

enum SessionFate {
    Running,
    Gone,
    Exited(Option<i32>),
}

/// A session can outlive its process under `remain-on-exit`, so existence
/// alone does not make a survivor.
async fn session_fate<B: SessionBackend + ?Sized>(backend: &B, name: &str) -> SessionFate {
    if !backend.session_exists(name).await {
        return SessionFate::Gone;
    }
    match backend.pane_status(name).await {
        Ok(status) if status.dead => SessionFate::Exited(status.exit_code),
        Ok(_) => SessionFate::Running,
        Err(e) if e.is_liveness_loss() => SessionFate::Gone,
        Err(e) => {
            debug!(session = %name, error = %e, "status unknown, treating session as running");
            SessionFate::Running
        }
    }
}

/// Login-time text describing lost terminals; empty when nothing was lost.
pub fn format_lost_report(lost: &[LostTerminal]) -> String {
    if lost.is_empty() {
        return String::new();
    }
    let mut lines = vec!["Lost terminals (container restarted):".to_string()];
    for terminal in lost {
        let mut line = format!("  - {} ({}, last status: {})", terminal.name, terminal.command, terminal.status);
        if terminal.has_scrollback {
            line.push_str(", previous output kept in scrollback.prev");
        }
        lines.push(line);
    }
    lines.push("Their scrollback is archived under the session logs.".to_string());
    lines.join("\n")
}
