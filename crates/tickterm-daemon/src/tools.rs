//! The five operations the actor can call, with their preconditions.
//!
//! Every failure comes back as a [`ToolOutcome`] with `is_error` set; the
//! actor never sees a protocol-level error for a tool it called correctly.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tickterm_backend::SessionBackend;
use tracing::debug;
use tracing::info;

use crate::StartupConfig;
use crate::TerminalError;
use crate::TerminalId;
use crate::TerminalManager;
use crate::ToolError;
use crate::login::run_login;

pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// A validated tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    Login,
    Open {
        command: Option<String>,
    },
    Type {
        terminal: TerminalId,
        expect: String,
        text: String,
        enter: bool,
    },
    Wait {
        timeout: Duration,
    },
    Close {
        terminal: TerminalId,
    },
}

#[derive(Debug, Default, Deserialize)]
struct OpenParams {
    #[serde(default)]
    command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TypeParams {
    #[serde(default, alias = "tty")]
    terminal: TerminalId,
    #[serde(default)]
    expect: String,
    #[serde(default)]
    text: String,
    #[serde(default)]
    enter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct WaitParams {
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct CloseParams {
    #[serde(alias = "tty")]
    terminal: TerminalId,
}

fn parse_params<T: DeserializeOwned>(tool: &str, params: Option<Value>) -> Result<T, ToolError> {
    let params = match params {
        None | Some(Value::Null) => Value::Object(serde_json::Map::new()),
        Some(v) => v,
    };
    serde_json::from_value(params).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

impl ToolRequest {
    /// Builds a request from a tool name and its JSON arguments.
    pub fn parse(method: &str, params: Option<Value>) -> Result<Self, ToolError> {
        match method {
            "login" => Ok(ToolRequest::Login),
            "open" => {
                let p: OpenParams = parse_params(method, params)?;
                Ok(ToolRequest::Open { command: p.command })
            }
            "type" => {
                let p: TypeParams = parse_params(method, params)?;
                Ok(ToolRequest::Type {
                    terminal: p.terminal,
                    expect: p.expect,
                    text: p.text,
                    enter: p.enter.unwrap_or(true),
                })
            }
            "wait" => {
                let p: WaitParams = parse_params(method, params)?;
                Ok(ToolRequest::Wait {
                    timeout: p
                        .timeout
                        .map_or(DEFAULT_WAIT_TIMEOUT, Duration::from_secs),
                })
            }
            "close" => {
                let p: CloseParams = parse_params(method, params)?;
                Ok(ToolRequest::Close {
                    terminal: p.terminal,
                })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolRequest::Login => "login",
            ToolRequest::Open { .. } => "open",
            ToolRequest::Type { .. } => "type",
            ToolRequest::Wait { .. } => "wait",
            ToolRequest::Close { .. } => "close",
        }
    }
}

/// What the actor gets back from any tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub text: String,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    pub fn error(err: &ToolError) -> Self {
        Self {
            text: format!("Error: {err}"),
            is_error: true,
        }
    }
}

/// Tool surface for one tick. Holds the manager for the tick's lifetime.
pub struct ToolSurface<B: SessionBackend + 'static> {
    manager: Arc<TerminalManager<B>>,
    startup: StartupConfig,
    logged_in: AtomicBool,
}

impl<B: SessionBackend + 'static> ToolSurface<B> {
    pub fn new(manager: Arc<TerminalManager<B>>, startup: StartupConfig) -> Self {
        Self {
            manager,
            startup,
            logged_in: AtomicBool::new(false),
        }
    }

    pub fn manager(&self) -> &Arc<TerminalManager<B>> {
        &self.manager
    }

    pub fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    pub async fn dispatch(&self, request: ToolRequest) -> ToolOutcome {
        let tool = request.name();
        let result = match request {
            ToolRequest::Login => return self.login().await,
            ToolRequest::Open { command } => self.open(command.as_deref()).await,
            ToolRequest::Type {
                terminal,
                expect,
                text,
                enter,
            } => self.type_keys(terminal, &expect, &text, enter).await,
            ToolRequest::Wait { timeout } => self.wait(timeout).await,
            ToolRequest::Close { terminal } => self.close(terminal).await,
        };
        match result {
            Ok(text) => ToolOutcome::text(text),
            Err(e) => {
                debug!(tool, code = e.code(), error = %e, "tool call rejected");
                ToolOutcome::error(&e)
            }
        }
    }

    /// Parses and dispatches in one step; bad arguments become an error
    /// outcome like any other failure.
    pub async fn call(&self, method: &str, params: Option<Value>) -> ToolOutcome {
        match ToolRequest::parse(method, params) {
            Ok(request) => self.dispatch(request).await,
            Err(e) => ToolOutcome::error(&e),
        }
    }

    fn require_login(&self) -> Result<(), ToolError> {
        if self.is_logged_in() {
            Ok(())
        } else {
            Err(ToolError::NotLoggedIn)
        }
    }

    async fn login(&self) -> ToolOutcome {
        let relogin = self.logged_in.swap(true, Ordering::SeqCst);
        info!(relogin, "login");
        ToolOutcome::text(run_login(&self.manager, &self.startup, relogin).await)
    }

    async fn open(&self, command: Option<&str>) -> Result<String, ToolError> {
        self.require_login()?;
        let command = command
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.manager.config().default_command)
            .to_string();
        let (id, remaining) = self.manager.open_terminal(Some(&command)).await?;
        Ok(format!(
            "Opened terminal {id} ({command}). {remaining} more available."
        ))
    }

    async fn type_keys(
        &self,
        id: TerminalId,
        expect: &str,
        text: &str,
        enter: bool,
    ) -> Result<String, ToolError> {
        self.require_login()?;
        if text.is_empty() {
            return Err(ToolError::MissingText);
        }
        if expect.trim().is_empty() {
            return Err(ToolError::MissingExpect);
        }
        if self.manager.has_unseen_changes().await {
            return Err(ToolError::UnseenOutput);
        }
        self.manager
            .type_existing(id, text, enter, |terminal| {
                if terminal.has_unseen_output() {
                    return Err(ToolError::UnseenOutput);
                }
                let actual = terminal.label();
                if expect.trim().eq_ignore_ascii_case(actual) {
                    Ok(())
                } else {
                    Err(ToolError::ExpectMismatch {
                        terminal: id,
                        expected: expect.to_string(),
                        actual: actual.to_string(),
                    })
                }
            })
            .await?;
        Ok("Keystrokes sent.".to_string())
    }

    async fn wait(&self, timeout: Duration) -> Result<String, ToolError> {
        self.require_login()?;
        Ok(self.manager.wait_for_activity(timeout, true).await)
    }

    async fn close(&self, id: TerminalId) -> Result<String, ToolError> {
        self.require_login()?;
        if self.manager.close_terminal(id).await? {
            Ok(format!("Terminal {id} closed and archived."))
        } else {
            Err(TerminalError::NotFound(id).into())
        }
    }

    /// Actionable reasons the tick cannot end yet. Empty when it can.
    pub fn tick_end_issues(&self) -> Vec<String> {
        if !self.is_logged_in() {
            return vec![
                "You haven't called login() yet. Call login() first to get your situational awareness."
                    .to_string(),
            ];
        }
        let open = self.manager.terminal_ids();
        if open.is_empty() {
            return Vec::new();
        }
        let list = open
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        vec![format!(
            "Open terminals: {list}. Close them with close(terminal=N) or exit the shell."
        )]
    }
}
