//! Resolved configuration for one tick and the on-disk layout under the
//! data directory.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use tickterm_daemon::ManagerConfig;
use tickterm_daemon::SessionPaths;
use tracing::warn;

pub const DEFAULT_CONTAINER: &str = "tickterm";
pub const DEFAULT_RUNTIME: &str = "podman";
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_INITIAL_QUERY: &str = "Tick {tick} starting. Call login() to begin.";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub container: String,
    pub runtime: String,
    /// Longest the actor may stay silent before the tick is ended.
    pub idle_timeout: Duration,
    /// First prompt of every tick; `{tick}` is replaced with the tick number.
    pub initial_query: String,
    pub manager: ManagerConfig,
}

impl AppConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            container: DEFAULT_CONTAINER.to_string(),
            runtime: DEFAULT_RUNTIME.to_string(),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            initial_query: DEFAULT_INITIAL_QUERY.to_string(),
            manager: ManagerConfig::default(),
        }
    }

    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_initial_query(mut self, query: impl Into<String>) -> Self {
        self.initial_query = query.into();
        self
    }

    pub fn with_manager(mut self, manager: ManagerConfig) -> Self {
        self.manager = manager;
        self
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.data_dir.join("tmp")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.tmp_dir().join("sessions")
    }

    pub fn system_dir(&self) -> PathBuf {
        self.data_dir.join("system")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.system_dir().join("logs")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.log_dir().join("sessions")
    }

    pub fn state_file(&self) -> PathBuf {
        self.system_dir().join("state.json")
    }

    pub fn startup_file(&self) -> PathBuf {
        self.system_dir().join("startup.json")
    }

    pub fn paused_file(&self) -> PathBuf {
        self.system_dir().join("paused")
    }

    pub fn notifications_dir(&self) -> PathBuf {
        self.system_dir().join("notifications")
    }

    pub fn build_error_file(&self) -> PathBuf {
        self.system_dir().join("build_error")
    }

    pub fn session_paths(&self) -> SessionPaths {
        SessionPaths::new(self.sessions_dir(), self.archive_dir())
    }

    pub fn initial_prompt(&self, tick: u64) -> String {
        self.initial_query.replace("{tick}", &tick.to_string())
    }

    /// Text of the last failed container build, if the build tooling left one.
    pub fn read_build_error(&self) -> Option<String> {
        read_optional(&self.build_error_file())
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
    }

    pub fn to_json(&self) -> Value {
        let m = &self.manager;
        json!({
            "data_dir": self.data_dir.display().to_string(),
            "container": self.container,
            "runtime": self.runtime,
            "idle_timeout_secs": self.idle_timeout.as_secs(),
            "initial_query": self.initial_query,
            "paths": {
                "sessions": self.sessions_dir().display().to_string(),
                "archive": self.archive_dir().display().to_string(),
                "state": self.state_file().display().to_string(),
                "startup": self.startup_file().display().to_string(),
                "paused": self.paused_file().display().to_string(),
                "notifications": self.notifications_dir().display().to_string(),
                "build_error": self.build_error_file().display().to_string(),
                "logs": self.log_dir().display().to_string(),
            },
            "manager": {
                "max_terminals": m.max_terminals,
                "capture_interval_ms": m.capture_interval.as_millis() as u64,
                "settle_window_ms": m.settle_window.as_millis() as u64,
                "max_wait_secs": m.max_wait.as_secs(),
                "login_settle_timeout_secs": m.login_settle_timeout.as_secs(),
                "rows": m.rows,
                "cols": m.cols,
                "scrollback_lines": m.scrollback_lines,
                "raw_max_bytes": m.raw_max_bytes,
                "default_command": m.default_command,
            },
        })
    }
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_under_data_dir() {
        let config = AppConfig::new("/data");
        assert_eq!(config.sessions_dir(), PathBuf::from("/data/tmp/sessions"));
        assert_eq!(config.archive_dir(), PathBuf::from("/data/system/logs/sessions"));
        assert_eq!(config.paused_file(), PathBuf::from("/data/system/paused"));
        assert_eq!(
            config.session_paths().registry_file(),
            PathBuf::from("/data/tmp/sessions/registry.json")
        );
    }

    #[test]
    fn test_initial_prompt_names_the_tick() {
        let config = AppConfig::new("/data");
        assert_eq!(
            config.initial_prompt(12),
            "Tick 12 starting. Call login() to begin."
        );
    }

    #[test]
    fn test_build_error_blank_is_none() {
        let dir = TempDir::new().unwrap();
        let config = AppConfig::new(dir.path());
        assert_eq!(config.read_build_error(), None);

        std::fs::create_dir_all(config.system_dir()).unwrap();
        std::fs::write(config.build_error_file(), "  \n").unwrap();
        assert_eq!(config.read_build_error(), None);

        std::fs::write(config.build_error_file(), "step 2 failed\n").unwrap();
        assert_eq!(config.read_build_error().as_deref(), Some("step 2 failed"));
    }
}
