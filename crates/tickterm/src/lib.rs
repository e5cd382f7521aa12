#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! tickterm runs one tick of an agent against terminals hosted in a
//! container. The actor speaks JSON-RPC over stdio; everything it does to a
//! terminal goes through the tool surface in `tickterm-daemon`.

pub mod actor;
pub mod cli;
pub mod config;
pub mod error;
pub mod error_detector;
pub mod harness;
pub mod notifications;
pub mod rpc;
pub mod state;

pub use config::AppConfig;
pub use error::HarnessError;
pub use harness::TickOutcome;
pub use harness::TickReport;
pub use harness::run_tick;
