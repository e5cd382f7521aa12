use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::RwLock;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tickterm_backend::SessionBackend;
use tickterm_backend::is_control_key;
use tickterm_backend::keys::ENTER;
use tickterm_common::mutex_lock_or_recover;
use tickterm_common::rwlock_read_or_recover;
use tickterm_common::rwlock_write_or_recover;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::MissedTickBehavior;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::DiffFormat;
use crate::LostTerminal;
use crate::ManagerConfig;
use crate::RegistryEntries;
use crate::RegistryEntry;
use crate::SessionPaths;
use crate::Terminal;
use crate::TerminalError;
use crate::TerminalId;
use crate::TerminalRegistry;
use crate::ToolError;
use crate::archive::archive_terminal_dir;
use crate::buffer::split_capture;
use crate::recovery::SurvivingTerminal;
use crate::recovery::recover_stale_terminals;
use crate::signal::Signal;
use crate::signal::SignalListener;
use crate::summary::summarize_terminal;

pub type SharedTerminal = Arc<AsyncMutex<Terminal>>;

/// Returned by a wait that saw no terminals at all.
pub const NO_ACTIVITY: &str = "No activity, timeout reached.";

/// Grace added to the settle deadline so a wait that spent its whole
/// timeout in the first phase still gets one full settle window.
const SETTLE_GRACE: Duration = Duration::from_secs(1);

/// Owns every terminal of one tick.
///
/// # Lock ordering
///
/// 1. `create_lock` (creation, replacement, close and tool-driven typing)
/// 2. a terminal's own mutex (one full capture or one command)
///
/// The `terminals` map lock is synchronous and never held across an await.
/// The capture loop takes terminal mutexes one at a time and never the
/// creation lock.
pub struct TerminalManager<B: SessionBackend + 'static> {
    backend: Arc<B>,
    config: ManagerConfig,
    format: DiffFormat,
    paths: SessionPaths,
    registry: TerminalRegistry,
    registry_write: Mutex<()>,
    tick: u64,
    terminals: RwLock<BTreeMap<TerminalId, SharedTerminal>>,
    create_lock: AsyncMutex<()>,
    activity: Signal,
    interrupt: Signal,
    lost: Mutex<Vec<LostTerminal>>,
    build_error: Option<String>,
    capture_task: Mutex<Option<JoinHandle<()>>>,
    running: AtomicBool,
}

impl<B: SessionBackend + 'static> TerminalManager<B> {
    pub fn new(backend: Arc<B>, config: ManagerConfig, paths: SessionPaths, tick: u64) -> Self {
        Self {
            backend,
            format: DiffFormat::from_config(&config),
            config,
            registry: TerminalRegistry::new(paths.registry_file()),
            registry_write: Mutex::new(()),
            paths,
            tick,
            terminals: RwLock::new(BTreeMap::new()),
            create_lock: AsyncMutex::new(()),
            activity: Signal::new(),
            interrupt: Signal::new(),
            lost: Mutex::new(Vec::new()),
            build_error: None,
            capture_task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Container rebuild failure to report at the next login.
    pub fn with_build_error(mut self, build_error: Option<String>) -> Self {
        self.build_error = build_error.filter(|e| !e.trim().is_empty());
        self
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn diff_format(&self) -> DiffFormat {
        self.format
    }

    pub fn build_error(&self) -> Option<&str> {
        self.build_error.as_deref()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Recovers what the previous tick left behind, then starts the
    /// background capture loop.
    pub async fn start(self: &Arc<Self>) -> Result<(), TerminalError> {
        tokio::fs::create_dir_all(&self.paths.sessions_dir)
            .await
            .map_err(|e| TerminalError::Persistence {
                operation: "create_sessions_dir".to_string(),
                reason: format!("{}: {}", self.paths.sessions_dir.display(), e),
            })?;

        let report =
            recover_stale_terminals(self.backend.as_ref(), &self.paths, &self.registry, self.tick)
                .await;
        for survivor in &report.surviving {
            if let Err(e) = self.adopt(survivor).await {
                warn!(terminal = survivor.id, error = %e, "failed to reconnect surviving terminal");
            }
        }
        if !report.surviving.is_empty() {
            self.save_registry().await;
        }
        if !report.lost.is_empty() {
            info!(count = report.lost.len(), "terminals lost since last tick");
        }
        *mutex_lock_or_recover(&self.lost) = report.lost;

        self.running.store(true, Ordering::SeqCst);
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move { manager.capture_loop().await });
        *mutex_lock_or_recover(&self.capture_task) = Some(handle);
        Ok(())
    }

    /// Cancels the capture loop, waits for it to finish, then closes and
    /// archives every remaining terminal.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = mutex_lock_or_recover(&self.capture_task).take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(error = %e, "capture loop ended abnormally");
                }
            }
        }
        self.close_all().await;
    }

    async fn capture_loop(&self) {
        let mut ticker = tokio::time::interval(self.config.capture_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;
        while self.is_running() {
            ticker.tick().await;
            if !self.is_running() {
                break;
            }
            if self.capture_all().await {
                self.activity.fire();
                self.save_registry().await;
            }
        }
    }

    /// Live terminals in ascending id order.
    fn snapshot(&self) -> Vec<SharedTerminal> {
        rwlock_read_or_recover(&self.terminals)
            .values()
            .cloned()
            .collect()
    }

    pub fn terminal(&self, id: TerminalId) -> Option<SharedTerminal> {
        rwlock_read_or_recover(&self.terminals).get(&id).cloned()
    }

    pub fn contains(&self, id: TerminalId) -> bool {
        rwlock_read_or_recover(&self.terminals).contains_key(&id)
    }

    pub fn terminal_ids(&self) -> Vec<TerminalId> {
        rwlock_read_or_recover(&self.terminals)
            .keys()
            .copied()
            .collect()
    }

    pub fn len(&self) -> usize {
        rwlock_read_or_recover(&self.terminals).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remaining_capacity(&self) -> usize {
        self.config.max_terminals.saturating_sub(self.len())
    }

    /// Detected foreground command, falling back to the launch command.
    pub async fn label(&self, id: TerminalId) -> Option<String> {
        let terminal = self.terminal(id)?;
        let guard = terminal.lock().await;
        Some(guard.label().to_string())
    }

    pub async fn is_alive(&self, id: TerminalId) -> bool {
        let Some(terminal) = self.terminal(id) else {
            return false;
        };
        let guard = terminal.lock().await;
        guard.is_alive()
    }

    pub fn lost_terminals(&self) -> Vec<LostTerminal> {
        mutex_lock_or_recover(&self.lost).clone()
    }

    /// Hands out the lost-terminal report once.
    pub fn take_lost_terminals(&self) -> Vec<LostTerminal> {
        std::mem::take(&mut *mutex_lock_or_recover(&self.lost))
    }

    pub fn interrupt(&self) {
        self.interrupt.fire();
    }

    pub async fn has_unseen_changes(&self) -> bool {
        for terminal in self.snapshot() {
            let guard = terminal.lock().await;
            if !guard.is_retired() && guard.has_unseen_output() {
                return true;
            }
        }
        false
    }

    pub async fn mark_all_seen(&self) {
        for terminal in self.snapshot() {
            terminal.lock().await.mark_seen();
        }
    }

    /// Returns the terminal with `id`, creating it (or replacing a dead
    /// one) if needed.
    pub async fn get_or_create(
        &self,
        id: TerminalId,
        command: Option<&str>,
    ) -> Result<SharedTerminal, TerminalError> {
        let _creating = self.create_lock.lock().await;
        self.get_or_create_locked(id, command).await
    }

    /// Opens a terminal at the lowest free id. Returns the id and how many
    /// more terminals may be opened.
    pub async fn open_terminal(
        &self,
        command: Option<&str>,
    ) -> Result<(TerminalId, usize), TerminalError> {
        let _creating = self.create_lock.lock().await;
        let max = self.config.max_terminals;
        let id = {
            let terminals = rwlock_read_or_recover(&self.terminals);
            (0..max)
                .filter_map(|n| TerminalId::try_from(n).ok())
                .find(|id| !terminals.contains_key(id))
        }
        .ok_or(TerminalError::LimitReached(max))?;
        self.get_or_create_locked(id, command).await?;
        Ok((id, self.remaining_capacity()))
    }

    async fn get_or_create_locked(
        &self,
        id: TerminalId,
        command: Option<&str>,
    ) -> Result<SharedTerminal, TerminalError> {
        let max = self.config.max_terminals;
        let replaced = match self.terminal(id) {
            Some(existing) => {
                let mut old = existing.lock().await;
                if old.is_alive() {
                    drop(old);
                    return Ok(existing);
                }
                // remain-on-exit keeps the dead session around; clear it so
                // the replacement is created fresh instead of reattached.
                self.backend.kill_session(old.session_name()).await?;
                old.retire();
                true
            }
            None => {
                if self.len() >= max {
                    return Err(TerminalError::LimitReached(max));
                }
                false
            }
        };
        if !usize::try_from(id).is_ok_and(|n| n < max) {
            return Err(TerminalError::InvalidId { id, max });
        }

        let command = command
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.config.default_command);
        let mut terminal = Terminal::new(id, command, &self.paths.sessions_dir);
        self.attach(&mut terminal, true).await?;

        let shared = Arc::new(AsyncMutex::new(terminal));
        rwlock_write_or_recover(&self.terminals).insert(id, Arc::clone(&shared));
        info!(terminal = id, command, replaced, "terminal ready");
        self.save_registry().await;
        Ok(shared)
    }

    async fn adopt(&self, survivor: &SurvivingTerminal) -> Result<(), TerminalError> {
        let max = self.config.max_terminals;
        if !usize::try_from(survivor.id).is_ok_and(|n| n < max) {
            return Err(TerminalError::InvalidId {
                id: survivor.id,
                max,
            });
        }
        let mut terminal = Terminal::new(survivor.id, &survivor.entry.command, &self.paths.sessions_dir)
            .with_created_at(survivor.entry.created);
        self.attach(&mut terminal, false).await?;
        rwlock_write_or_recover(&self.terminals).insert(survivor.id, Arc::new(AsyncMutex::new(terminal)));
        info!(terminal = survivor.id, "reconnected surviving terminal");
        Ok(())
    }

    /// Creates (or reconnects to) the backend session, wires up the raw
    /// stream and takes a first capture that counts as already seen.
    async fn attach(&self, terminal: &mut Terminal, create: bool) -> Result<(), TerminalError> {
        let dir = terminal.artifacts().dir.clone();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| TerminalError::Persistence {
                operation: "create_terminal_dir".to_string(),
                reason: format!("{}: {}", dir.display(), e),
            })?;

        let name = terminal.session_name().to_string();
        let mut created = false;
        if self.backend.session_exists(&name).await {
            info!(terminal = terminal.id(), "reconnecting to existing session");
        } else if create {
            self.backend
                .create_session(&name, terminal.launch_command(), self.config.rows, self.config.cols)
                .await?;
            created = true;
        } else {
            return Err(TerminalError::Backend(
                tickterm_backend::BackendError::SessionGone(name),
            ));
        }

        if let Err(e) = self.backend.pipe_output(&name, &terminal.artifacts().raw).await {
            if created {
                if let Err(kill_err) = self.backend.kill_session(&name).await {
                    debug!(terminal = terminal.id(), error = %kill_err, "cleanup after failed attach");
                }
            }
            return Err(e.into());
        }
        touch(&terminal.artifacts().raw).await;

        self.capture_terminal(terminal).await;
        terminal.mark_seen();
        Ok(())
    }

    /// Sends keys to `id`, creating the terminal on first use. Control key
    /// names go out as key presses, anything else as literal text.
    pub async fn send_keys(&self, id: TerminalId, text: &str) -> Result<(), TerminalError> {
        self.type_text(id, text, false).await
    }

    /// Like [`Self::send_keys`], optionally followed by Enter. Text and Enter
    /// go out under the terminal's lock so no capture lands between them.
    pub async fn type_text(
        &self,
        id: TerminalId,
        text: &str,
        enter: bool,
    ) -> Result<(), TerminalError> {
        let terminal = self.get_or_create(id, None).await?;
        let guard = terminal.lock().await;
        self.send_locked(&guard, text, enter).await
    }

    /// Sends keys to a terminal that already exists and is still running.
    /// Never creates or replaces one. `check` runs under the creation lock
    /// and the terminal's own lock, so no close, auto-close or replacement
    /// can land between it and the keystrokes.
    pub async fn type_existing<F>(
        &self,
        id: TerminalId,
        text: &str,
        enter: bool,
        check: F,
    ) -> Result<(), ToolError>
    where
        F: FnOnce(&Terminal) -> Result<(), ToolError>,
    {
        let _creating = self.create_lock.lock().await;
        let Some(shared) = self.terminal(id) else {
            return Err(ToolError::NoSuchTerminal(id));
        };
        let guard = shared.lock().await;
        if guard.is_retired() {
            return Err(ToolError::NoSuchTerminal(id));
        }
        if !guard.is_alive() {
            return Err(ToolError::TerminalExited(id));
        }
        check(&guard)?;
        self.send_locked(&guard, text, enter).await?;
        Ok(())
    }

    async fn send_locked(
        &self,
        terminal: &Terminal,
        text: &str,
        enter: bool,
    ) -> Result<(), TerminalError> {
        let name = terminal.session_name();
        let control = is_control_key(text);
        self.backend.send_keys(name, text, !control).await?;
        if enter && !control {
            self.backend.send_keys(name, ENTER, false).await?;
        }
        debug!(terminal = terminal.id(), control, enter, "keys sent");
        Ok(())
    }

    /// Captures every live terminal once. Returns true if any changed.
    pub async fn capture_all(&self) -> bool {
        let mut any_changed = false;
        for terminal in self.snapshot() {
            let mut guard = terminal.lock().await;
            if self.capture_terminal(&mut guard).await {
                any_changed = true;
            }
        }
        any_changed
    }

    /// One capture cycle for one terminal. Returns true when its content,
    /// liveness or foreground command changed.
    async fn capture_terminal(&self, terminal: &mut Terminal) -> bool {
        if terminal.is_retired() {
            return false;
        }
        let id = terminal.id();
        let name = terminal.session_name().to_string();
        let mut changed = false;

        if terminal.is_alive() {
            match self.backend.pane_status(&name).await {
                Ok(status) if status.dead => {
                    if terminal.mark_exited(status.exit_code) {
                        info!(terminal = id, exit_code = ?status.exit_code, "process exited");
                        changed = true;
                    }
                }
                Ok(status) => {
                    if !status.foreground_command.is_empty() {
                        let resolved = self
                            .backend
                            .resolve_foreground_script_name(
                                &status.foreground_command,
                                &status.foreground_pid,
                            )
                            .await;
                        changed |= terminal.set_foreground_command(resolved);
                    }
                }
                Err(e) if e.is_liveness_loss() => {
                    if terminal.mark_exited(None) {
                        info!(terminal = id, error = %e, "session gone");
                        changed = true;
                    }
                }
                Err(e) => {
                    debug!(terminal = id, error = %e, "status check skipped");
                    return false;
                }
            }
        }

        let content = match self
            .backend
            .capture_pane(&name, self.config.scrollback_lines)
            .await
        {
            Ok(content) => content,
            Err(e) => {
                if e.is_liveness_loss() && terminal.mark_exited(None) {
                    info!(terminal = id, error = %e, "session gone during capture");
                    changed = true;
                } else {
                    debug!(terminal = id, error = %e, "capture skipped");
                }
                if changed {
                    write_artifact(&terminal.artifacts().status, &status_text(terminal)).await;
                }
                return changed;
            }
        };

        if !terminal.apply_capture(split_capture(&content), self.config.shift_verify_window) {
            if changed {
                write_artifact(&terminal.artifacts().status, &status_text(terminal)).await;
            }
            return changed;
        }
        self.write_artifacts(terminal).await;
        true
    }

    async fn write_artifacts(&self, terminal: &Terminal) {
        let artifacts = terminal.artifacts();
        write_artifact(&artifacts.scrollback, &terminal.scrollback_text()).await;
        write_artifact(
            &artifacts.screen,
            &terminal.screen_text(usize::from(self.config.rows)),
        )
        .await;
        match self.backend.capture_annotated(terminal.session_name()).await {
            Ok(annotated) => {
                let lines = split_capture(&annotated);
                let mut text = lines.join("\n");
                if !lines.is_empty() {
                    text.push('\n');
                }
                write_artifact(&artifacts.screen_annotated, &text).await;
            }
            Err(e) => debug!(terminal = terminal.id(), error = %e, "annotated capture failed"),
        }
        write_artifact(&artifacts.status, &status_text(terminal)).await;
        self.truncate_raw_if_needed(&artifacts.raw).await;
    }

    async fn truncate_raw_if_needed(&self, raw: &Path) {
        match tokio::fs::metadata(raw).await {
            Ok(meta) if meta.len() > self.config.raw_max_bytes => {
                debug!(path = %raw.display(), size = meta.len(), "truncating raw stream");
                write_artifact(raw, "").await;
            }
            _ => {}
        }
    }

    /// Two-phase wait: block for the first activity (or an interrupt, or
    /// the timeout), then keep capturing until output has been quiet for
    /// the settle window. With `build_summary` the result is the status
    /// summary, after which dead terminals are closed.
    pub async fn wait_for_activity(&self, timeout: Duration, build_summary: bool) -> String {
        let timeout = self.config.clamp_wait(Some(timeout));
        let deadline = Instant::now() + timeout;
        let mut activity = self.activity.subscribe();
        let mut interrupt = self.interrupt.subscribe();

        let mut interrupted = false;
        if !timeout.is_zero() {
            tokio::select! {
                _ = activity.fired() => {}
                _ = interrupt.fired() => interrupted = true,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
        interrupted |= interrupt.is_set();

        if interrupted {
            debug!("wait interrupted, skipping settle");
        } else {
            self.settle(deadline, &mut activity, &mut interrupt).await;
        }

        if !build_summary {
            return String::new();
        }
        let (summary, reported_dead) = self.summarize().await;
        for id in reported_dead {
            if let Err(e) = self.remove_terminal(id, false).await {
                warn!(terminal = id, error = %e, "auto-close failed");
            }
        }
        if summary.is_empty() {
            NO_ACTIVITY.to_string()
        } else {
            summary
        }
    }

    /// Changes count whether this loop or the background capture loop saw
    /// them first.
    async fn settle(
        &self,
        deadline: Instant,
        activity: &mut SignalListener,
        interrupt: &mut SignalListener,
    ) {
        let settle_deadline = deadline.max(Instant::now() + self.config.settle_window + SETTLE_GRACE);
        let mut quiet_since = Instant::now();
        while Instant::now() < settle_deadline {
            if interrupt.is_set() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.settle_poll) => {}
                _ = interrupt.fired() => break,
            }
            let captured = self.capture_all().await;
            if captured | activity.take() {
                quiet_since = Instant::now();
            } else if quiet_since.elapsed() >= self.config.settle_window {
                break;
            }
        }
    }

    /// Every open terminal in id order; empty when there are none.
    pub async fn build_status_summary(&self) -> String {
        self.summarize().await.0
    }

    /// The summary plus the ids of terminals it reported as exited.
    async fn summarize(&self) -> (String, Vec<TerminalId>) {
        let mut parts = Vec::new();
        let mut dead = Vec::new();
        for terminal in self.snapshot() {
            let mut guard = terminal.lock().await;
            if guard.is_retired() {
                continue;
            }
            parts.push(summarize_terminal(&mut guard, self.format));
            if !guard.is_alive() {
                dead.push(guard.id());
            }
        }
        (parts.join("\n"), dead)
    }

    /// Kills the session, archives its directory and forgets the terminal.
    /// Returns `Ok(false)` for an unknown id. An unreachable container
    /// aborts the close without touching the terminal.
    pub async fn close_terminal(&self, id: TerminalId) -> Result<bool, TerminalError> {
        self.remove_terminal(id, true).await
    }

    /// Closes everything, tolerating an unreachable container.
    pub async fn close_all(&self) {
        for id in self.terminal_ids() {
            if let Err(e) = self.remove_terminal(id, false).await {
                warn!(terminal = id, error = %e, "close failed");
            }
        }
    }

    async fn remove_terminal(&self, id: TerminalId, strict: bool) -> Result<bool, TerminalError> {
        let _creating = self.create_lock.lock().await;
        let Some(shared) = self.terminal(id) else {
            return Ok(false);
        };
        let mut terminal = shared.lock().await;
        if terminal.is_retired() {
            return Ok(false);
        }
        match self.backend.kill_session(terminal.session_name()).await {
            Ok(()) => {}
            Err(e) if strict && !e.is_liveness_loss() => return Err(e.into()),
            Err(e) => debug!(terminal = id, error = %e, "kill failed, archiving anyway"),
        }
        terminal.retire();
        let dir = terminal.artifacts().dir.clone();
        drop(terminal);

        {
            let mut terminals = rwlock_write_or_recover(&self.terminals);
            if terminals.get(&id).is_some_and(|t| Arc::ptr_eq(t, &shared)) {
                terminals.remove(&id);
            }
        }
        archive_terminal_dir(&dir, &self.paths.archive_dir, self.tick);
        info!(terminal = id, "terminal closed");
        self.save_registry().await;
        Ok(true)
    }

    /// Rewrites the registry from the live set.
    pub async fn save_registry(&self) {
        let mut entries = RegistryEntries::new();
        for terminal in self.snapshot() {
            let guard = terminal.lock().await;
            if !guard.is_retired() {
                entries.insert(guard.session_name().to_string(), RegistryEntry::from_terminal(&guard));
            }
        }
        let _writing = mutex_lock_or_recover(&self.registry_write);
        if let Err(e) = self.registry.save(&entries) {
            warn!(error = %e, "failed to save terminal registry");
        }
    }
}

fn status_text(terminal: &Terminal) -> String {
    format!("{}\n", terminal.status_line())
}

async fn write_artifact(path: &Path, contents: &str) {
    if let Err(e) = tokio::fs::write(path, contents).await {
        warn!(path = %path.display(), error = %e, "failed to write artifact");
    }
}

async fn touch(path: &Path) {
    if let Err(e) = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
    {
        debug!(path = %path.display(), error = %e, "failed to create raw stream file");
    }
}
