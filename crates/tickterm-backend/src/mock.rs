//! In-memory [`SessionBackend`] for exercising the manager without a container.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tickterm_common::mutex_lock_or_recover;

use crate::BackendError;
use crate::PaneStatus;
use crate::Result;
use crate::SessionBackend;
use crate::keys::ENTER;

/// Scriptable state of one fake session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockPane {
    pub command: String,
    pub lines: Vec<String>,
    pub annotated: Option<String>,
    pub dead: bool,
    pub exit_code: Option<i32>,
    pub foreground: String,
    pub pid: String,
    pub raw_path: Option<PathBuf>,
    pub sent: Vec<(String, bool)>,
    pub pending_input: String,
}

impl MockPane {
    pub fn running(foreground: impl Into<String>) -> Self {
        let foreground = foreground.into();
        Self {
            command: foreground.clone(),
            foreground,
            pid: "100".to_string(),
            ..Self::default()
        }
    }

    pub fn with_lines(mut self, lines: &[&str]) -> Self {
        self.lines = lines.iter().map(|l| l.to_string()).collect();
        self
    }
}

pub struct MockBackend {
    panes: Mutex<BTreeMap<String, MockPane>>,
    script_names: HashMap<String, String>,
    unavailable: AtomicBool,
    echo_input: bool,
    create_calls: AtomicUsize,
    kill_calls: AtomicUsize,
    capture_calls: AtomicUsize,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> MockBackendBuilder {
        MockBackendBuilder::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn has_session(&self, name: &str) -> bool {
        mutex_lock_or_recover(&self.panes).contains_key(name)
    }

    pub fn pane(&self, name: &str) -> Option<MockPane> {
        mutex_lock_or_recover(&self.panes).get(name).cloned()
    }

    pub fn insert_session(&self, name: &str, pane: MockPane) {
        mutex_lock_or_recover(&self.panes).insert(name.to_string(), pane);
    }

    /// Simulates the session vanishing, e.g. after a container restart.
    pub fn remove_session(&self, name: &str) {
        mutex_lock_or_recover(&self.panes).remove(name);
    }

    pub fn push_lines(&self, name: &str, lines: &[&str]) {
        self.with_pane(name, |pane| {
            pane.lines.extend(lines.iter().map(|l| l.to_string()))
        });
    }

    pub fn set_lines(&self, name: &str, lines: &[&str]) {
        self.with_pane(name, |pane| {
            pane.lines = lines.iter().map(|l| l.to_string()).collect()
        });
    }

    pub fn set_foreground(&self, name: &str, command: &str) {
        self.with_pane(name, |pane| pane.foreground = command.to_string());
    }

    /// Marks the pane dead, as tmux does with `remain-on-exit`.
    pub fn exit(&self, name: &str, code: Option<i32>) {
        self.with_pane(name, |pane| {
            pane.dead = true;
            pane.exit_code = code;
        });
    }

    pub fn sent_keys(&self, name: &str) -> Vec<(String, bool)> {
        self.pane(name).map(|p| p.sent).unwrap_or_default()
    }

    pub fn session_names(&self) -> Vec<String> {
        mutex_lock_or_recover(&self.panes).keys().cloned().collect()
    }

    pub fn create_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn kill_count(&self) -> usize {
        self.kill_calls.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    fn with_pane(&self, name: &str, f: impl FnOnce(&mut MockPane)) {
        if let Some(pane) = mutex_lock_or_recover(&self.panes).get_mut(name) {
            f(pane);
        }
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("mock container stopped".into()));
        }
        Ok(())
    }

    fn read_pane<T>(&self, name: &str, f: impl FnOnce(&MockPane) -> T) -> Result<T> {
        self.check_available()?;
        mutex_lock_or_recover(&self.panes)
            .get(name)
            .map(f)
            .ok_or_else(|| BackendError::SessionGone(name.to_string()))
    }
}

#[derive(Default)]
pub struct MockBackendBuilder {
    panes: BTreeMap<String, MockPane>,
    script_names: HashMap<String, String>,
    unavailable: bool,
    echo_input: bool,
}

impl MockBackendBuilder {
    pub fn with_session(mut self, name: &str, pane: MockPane) -> Self {
        self.panes.insert(name.to_string(), pane);
        self
    }

    pub fn with_script_name(mut self, raw: &str, resolved: &str) -> Self {
        self.script_names
            .insert(raw.to_string(), resolved.to_string());
        self
    }

    /// Literal input followed by `Enter` is appended to the pane's lines.
    pub fn with_echo(mut self) -> Self {
        self.echo_input = true;
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }

    pub fn build(self) -> MockBackend {
        MockBackend {
            panes: Mutex::new(self.panes),
            script_names: self.script_names,
            unavailable: AtomicBool::new(self.unavailable),
            echo_input: self.echo_input,
            create_calls: AtomicUsize::new(0),
            kill_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SessionBackend for MockBackend {
    async fn session_exists(&self, name: &str) -> bool {
        self.check_available().is_ok() && self.has_session(name)
    }

    async fn create_session(&self, name: &str, command: &str, _rows: u16, _cols: u16) -> Result<()> {
        self.check_available()?;
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut panes = mutex_lock_or_recover(&self.panes);
        if panes.contains_key(name) {
            return Err(BackendError::CommandFailed {
                command: "new-session".into(),
                code: 1,
                stderr: format!("duplicate session: {name}"),
            });
        }
        let foreground = command.split_whitespace().next().unwrap_or("bash");
        let mut pane = MockPane::running(foreground);
        pane.command = command.to_string();
        panes.insert(name.to_string(), pane);
        Ok(())
    }

    async fn pipe_output(&self, name: &str, raw_path: &Path) -> Result<()> {
        self.check_available()?;
        let mut panes = mutex_lock_or_recover(&self.panes);
        let pane = panes
            .get_mut(name)
            .ok_or_else(|| BackendError::SessionGone(name.to_string()))?;
        pane.raw_path = Some(raw_path.to_path_buf());
        Ok(())
    }

    async fn send_keys(&self, name: &str, payload: &str, literal: bool) -> Result<()> {
        self.check_available()?;
        let mut panes = mutex_lock_or_recover(&self.panes);
        let pane = panes
            .get_mut(name)
            .ok_or_else(|| BackendError::SessionGone(name.to_string()))?;
        pane.sent.push((payload.to_string(), literal));
        if self.echo_input {
            if literal {
                pane.pending_input.push_str(payload);
            } else if payload == ENTER {
                let line = std::mem::take(&mut pane.pending_input);
                pane.lines.push(line);
            }
        }
        Ok(())
    }

    async fn capture_pane(&self, name: &str, scrollback_lines: usize) -> Result<String> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        self.read_pane(name, |pane| {
            let skip = pane.lines.len().saturating_sub(scrollback_lines);
            let mut text = pane.lines[skip..].join("\n");
            // tmux pads the visible window with blank rows.
            text.push_str("\n\n\n");
            text
        })
    }

    async fn capture_annotated(&self, name: &str) -> Result<String> {
        self.read_pane(name, |pane| {
            pane.annotated
                .clone()
                .unwrap_or_else(|| pane.lines.join("\n"))
        })
    }

    async fn pane_status(&self, name: &str) -> Result<PaneStatus> {
        self.read_pane(name, |pane| PaneStatus {
            dead: pane.dead,
            exit_code: pane.exit_code,
            foreground_command: pane.foreground.clone(),
            foreground_pid: pane.pid.clone(),
        })
    }

    async fn resolve_foreground_script_name(&self, raw_command: &str, _pid: &str) -> String {
        self.script_names
            .get(raw_command)
            .cloned()
            .unwrap_or_else(|| raw_command.to_string())
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        self.check_available()?;
        self.kill_calls.fetch_add(1, Ordering::SeqCst);
        mutex_lock_or_recover(&self.panes).remove(name);
        Ok(())
    }
}
