use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_MAX_TERMINALS: usize = 20;
const DEFAULT_CAPTURE_INTERVAL_MS: u64 = 500;
const DEFAULT_SETTLE_MS: u64 = 1500;
const DEFAULT_SETTLE_POLL_MS: u64 = 300;
const DEFAULT_MAX_WAIT_SECS: u64 = 60;
const DEFAULT_LOGIN_SETTLE_SECS: u64 = 15;
const DEFAULT_INLINE_THRESHOLD: usize = 20;
const DEFAULT_ELISION_HEAD: usize = 10;
const DEFAULT_ELISION_TAIL: usize = 10;
const DEFAULT_ROWS: u16 = 40;
const DEFAULT_COLS: u16 = 120;
const DEFAULT_SCROLLBACK_LINES: usize = 5000;
const DEFAULT_RAW_MAX_BYTES: u64 = 2_000_000;
const DEFAULT_SHIFT_VERIFY_WINDOW: usize = 5;
pub const DEFAULT_COMMAND: &str = "bash";

/// Tunables for one tick's terminal manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_terminals: usize,
    pub capture_interval: Duration,
    /// Quiet period that ends the settle phase of a wait.
    pub settle_window: Duration,
    pub settle_poll: Duration,
    /// Hard cap on any wait, whatever the caller asks for.
    pub max_wait: Duration,
    pub login_settle_timeout: Duration,
    pub inline_threshold: usize,
    pub elision_head: usize,
    pub elision_tail: usize,
    pub rows: u16,
    pub cols: u16,
    pub scrollback_lines: usize,
    pub raw_max_bytes: u64,
    pub shift_verify_window: usize,
    pub default_command: String,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_terminals: DEFAULT_MAX_TERMINALS,
            capture_interval: Duration::from_millis(DEFAULT_CAPTURE_INTERVAL_MS),
            settle_window: Duration::from_millis(DEFAULT_SETTLE_MS),
            settle_poll: Duration::from_millis(DEFAULT_SETTLE_POLL_MS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
            login_settle_timeout: Duration::from_secs(DEFAULT_LOGIN_SETTLE_SECS),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            elision_head: DEFAULT_ELISION_HEAD,
            elision_tail: DEFAULT_ELISION_TAIL,
            rows: DEFAULT_ROWS,
            cols: DEFAULT_COLS,
            scrollback_lines: DEFAULT_SCROLLBACK_LINES,
            raw_max_bytes: DEFAULT_RAW_MAX_BYTES,
            shift_verify_window: DEFAULT_SHIFT_VERIFY_WINDOW,
            default_command: DEFAULT_COMMAND.to_string(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl ManagerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_terminals: env_parse("TICKTERM_MAX_TERMINALS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_terminals),
            capture_interval: env_parse("TICKTERM_CAPTURE_INTERVAL_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.capture_interval),
            settle_window: env_parse("TICKTERM_SETTLE_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.settle_window),
            max_wait: env_parse("TICKTERM_MAX_WAIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.max_wait),
            rows: env_parse("TICKTERM_ROWS").unwrap_or(defaults.rows),
            cols: env_parse("TICKTERM_COLS").unwrap_or(defaults.cols),
            ..defaults
        }
    }

    pub fn with_max_terminals(mut self, max: usize) -> Self {
        self.max_terminals = max;
        self
    }

    pub fn with_capture_interval(mut self, interval: Duration) -> Self {
        self.capture_interval = interval;
        self
    }

    pub fn with_settle_window(mut self, window: Duration) -> Self {
        self.settle_window = window;
        self
    }

    pub fn with_max_wait(mut self, max: Duration) -> Self {
        self.max_wait = max;
        self
    }

    pub fn with_login_settle_timeout(mut self, timeout: Duration) -> Self {
        self.login_settle_timeout = timeout;
        self
    }

    pub fn with_elision(mut self, inline_threshold: usize, head: usize, tail: usize) -> Self {
        self.inline_threshold = inline_threshold;
        self.elision_head = head;
        self.elision_tail = tail;
        self
    }

    pub fn with_scrollback_lines(mut self, lines: usize) -> Self {
        self.scrollback_lines = lines;
        self
    }

    pub fn with_raw_max_bytes(mut self, bytes: u64) -> Self {
        self.raw_max_bytes = bytes;
        self
    }

    /// Clamps a caller-requested wait to the hard maximum.
    pub fn clamp_wait(&self, requested: Option<Duration>) -> Duration {
        requested.map_or(self.max_wait, |t| t.min(self.max_wait))
    }
}

/// Where one tick keeps live artifacts and where closed terminals go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub sessions_dir: PathBuf,
    pub archive_dir: PathBuf,
}

impl SessionPaths {
    pub fn new(sessions_dir: impl Into<PathBuf>, archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            sessions_dir: sessions_dir.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn registry_file(&self) -> PathBuf {
        self.sessions_dir.join("registry.json")
    }

    pub fn terminal_dir(&self, session_name: &str) -> PathBuf {
        self.sessions_dir.join(session_name)
    }

    pub fn sessions_dir(&self) -> &Path {
        &self.sessions_dir
    }
}
