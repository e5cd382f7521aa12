#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Terminal manager for one tick: capture loop, settle-based waits, diff
//! summaries, crash recovery and the tool surface the actor drives.

mod archive;
mod buffer;
mod config;
mod error;
mod login;
mod manager;
mod recovery;
mod registry;
mod signal;
mod summary;
mod terminal;
mod tools;

pub use buffer::detect_buffer_shift;
pub use buffer::split_capture;
pub use config::DEFAULT_MAX_TERMINALS;
pub use config::ManagerConfig;
pub use config::SessionPaths;
pub use error::TerminalError;
pub use error::ToolError;
pub use login::LOGGED_IN;
pub use login::StartupConfig;
pub use login::StartupTerminal;
pub use manager::NO_ACTIVITY;
pub use manager::SharedTerminal;
pub use manager::TerminalManager;
pub use recovery::LostTerminal;
pub use recovery::RecoveryReport;
pub use recovery::format_lost_report;
pub use registry::RegistryEntries;
pub use registry::RegistryEntry;
pub use registry::TerminalRegistry;
pub use signal::Signal;
pub use signal::SignalListener;
pub use summary::DiffFormat;
pub use summary::format_diff;
pub use terminal::Terminal;
pub use terminal::TerminalArtifacts;
pub use terminal::TerminalId;
pub use terminal::session_name;
pub use tools::DEFAULT_WAIT_TIMEOUT;
pub use tools::ToolOutcome;
pub use tools::ToolRequest;
pub use tools::ToolSurface;

pub type Result<T> = std::result::Result<T, TerminalError>;
