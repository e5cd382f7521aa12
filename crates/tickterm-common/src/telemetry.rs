//! Tracing initialisation shared by the tickterm binary and its tests.
//!
//! Stdout carries the actor protocol, so log output goes to a daily rolling
//! file when a log directory is available and to stderr otherwise.

use std::io::IsTerminal;
use std::path::Path;
use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::RollingFileAppender;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_FILTER_ENV: &str = "TICKTERM_LOG";
pub const LOG_DIR_ENV: &str = "TICKTERM_LOG_DIR";
const LOG_FILE_PREFIX: &str = "tickterm";

#[derive(Debug)]
pub struct TelemetryGuard {
    _guard: Option<WorkerGuard>,
}

impl TelemetryGuard {
    fn disabled() -> Self {
        Self { _guard: None }
    }
}

/// Installs the global subscriber.
///
/// `TICKTERM_LOG` overrides `default_level`; `TICKTERM_LOG_DIR` overrides
/// `log_dir`. Returns a guard that flushes the file writer on drop. Calling
/// this twice is harmless: the second call returns a disabled guard.
pub fn init_tracing(default_level: &str, log_dir: Option<&Path>) -> TelemetryGuard {
    let env_filter = EnvFilter::try_from_env(LOG_FILTER_ENV)
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    let dir = log_dir_from_env().or_else(|| log_dir.map(Path::to_path_buf));
    let (writer, guard, ansi) = match dir.map(|d| open_rolling(&d)) {
        Some(Ok(appender)) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard), false)
        }
        Some(Err(reason)) => {
            eprintln!("Warning: {reason}, logging to stderr");
            (
                BoxMakeWriter::new(std::io::stderr),
                None,
                std::io::stderr().is_terminal(),
            )
        }
        None => (
            BoxMakeWriter::new(std::io::stderr),
            None,
            std::io::stderr().is_terminal(),
        ),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(ansi)
        .with_writer(writer);

    if subscriber.try_init().is_err() {
        return TelemetryGuard::disabled();
    }

    TelemetryGuard { _guard: guard }
}

fn open_rolling(dir: &Path) -> Result<RollingFileAppender, String> {
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create log dir {}: {}", dir.display(), e))?;
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .build(dir)
        .map_err(|e| format!("failed to open log file in {}: {}", dir.display(), e))
}

fn log_dir_from_env() -> Option<PathBuf> {
    std::env::var(LOG_DIR_ENV)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
