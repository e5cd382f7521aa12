#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Session backend adapter: everything tickterm knows about tmux and the
//! container it runs in lives behind [`SessionBackend`].

mod backend;
mod error;
pub mod keys;
mod runner;
mod tmux;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use backend::PaneStatus;
pub use backend::SessionBackend;
pub use error::BackendError;
pub use keys::is_control_key;
pub use runner::CommandOutput;
pub use runner::CommandRunner;
pub use runner::ContainerRunner;
pub use tmux::TmuxBackend;
pub use tmux::shell_quote;

pub type Result<T> = std::result::Result<T, BackendError>;
