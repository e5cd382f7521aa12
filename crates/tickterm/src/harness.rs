//! One tick from start to finish: bookkeeping, the terminal manager's
//! lifetime, and the conversation with the actor.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tickterm_backend::SessionBackend;
use tickterm_common::error_codes;
use tickterm_daemon::StartupConfig;
use tickterm_daemon::TerminalManager;
use tickterm_daemon::ToolError;
use tickterm_daemon::ToolOutcome;
use tickterm_daemon::ToolRequest;
use tickterm_daemon::ToolSurface;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::actor::ActorEvent;
use crate::actor::ActorLink;
use crate::actor::Outgoing;
use crate::config::AppConfig;
use crate::error::HarnessError;
use crate::error_detector::ErrorDetector;
use crate::error_detector::MAX_RETRIES;
use crate::error_detector::backoff_delay;
use crate::notifications::NotificationWatcher;
use crate::rpc::RpcResponse;
use crate::state::TickState;

pub const RETRY_PROMPT: &str =
    "The previous API call hit a transient error. Continue where you left off.";
pub const FINAL_MESSAGE_ISSUE: &str = "Send a final message before the tick can end.";

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// The actor ended its turn with nothing left to do.
    Completed,
    /// A fatal API error; the paused file now blocks further ticks.
    Paused { reason: String },
    ContextLimit,
    RetriesExhausted,
    IdleTimeout,
    /// The actor closed its end of the link.
    ActorGone,
    /// The process was asked to shut down.
    Interrupted,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Completed => "completed",
            TickOutcome::Paused { .. } => "paused",
            TickOutcome::ContextLimit => "context_limit",
            TickOutcome::RetriesExhausted => "retries_exhausted",
            TickOutcome::IdleTimeout => "idle_timeout",
            TickOutcome::ActorGone => "actor_gone",
            TickOutcome::Interrupted => "interrupted",
        }
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, TickOutcome::Completed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub outcome: TickOutcome,
    pub tool_calls: u64,
    pub retries: u32,
}

/// Runs one tick. Teardown (closing terminals, wiping `tmp/`, recording the
/// end time) happens whether or not the tick succeeds.
pub async fn run_tick<B, S>(
    config: &AppConfig,
    backend: Arc<B>,
    actor: ActorLink,
    shutdown: S,
) -> Result<TickReport, HarnessError>
where
    B: SessionBackend + 'static,
    S: Future<Output = ()> + Send,
{
    let paused = config.paused_file();
    if paused.exists() {
        return Err(HarnessError::Paused(paused));
    }
    for dir in [config.system_dir(), config.notifications_dir(), config.sessions_dir()] {
        std::fs::create_dir_all(&dir)
            .map_err(|e| HarnessError::persistence("create data dir", &dir, e))?;
    }

    let mut state = TickState::load(&config.state_file());
    let tick = state.begin_tick(Utc::now());
    state.save(&config.state_file())?;
    info!(tick, data_dir = %config.data_dir.display(), "tick starting");

    let manager = Arc::new(
        TerminalManager::new(backend, config.manager.clone(), config.session_paths(), tick)
            .with_build_error(config.read_build_error()),
    );
    let result = match manager.start().await {
        Ok(()) => {
            let startup = StartupConfig::load(&config.startup_file());
            let surface = Arc::new(ToolSurface::new(Arc::clone(&manager), startup));
            Ok(converse(config, surface, actor, tick, shutdown).await)
        }
        Err(e) => {
            error!(tick, error = %e, "terminal manager failed to start");
            Err(HarnessError::from(e))
        }
    };

    teardown(config, &manager).await;
    let report = result?;
    info!(
        tick,
        outcome = report.outcome.as_str(),
        tool_calls = report.tool_calls,
        retries = report.retries,
        "tick finished"
    );
    Ok(report)
}

async fn teardown<B: SessionBackend + 'static>(config: &AppConfig, manager: &TerminalManager<B>) {
    manager.stop().await;

    let tmp = config.tmp_dir();
    match tokio::fs::remove_dir_all(&tmp).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %tmp.display(), error = %e, "failed to wipe tmp dir"),
    }

    let mut state = TickState::load(&config.state_file());
    state.end_tick(Utc::now());
    if let Err(e) = state.save(&config.state_file()) {
        warn!(error = %e, "failed to record tick end");
    }
}

/// The event loop for one tick. Tool calls run as separate tasks so a long
/// `wait` never holds up notifications or other calls.
async fn converse<B, S>(
    config: &AppConfig,
    surface: Arc<ToolSurface<B>>,
    actor: ActorLink,
    tick: u64,
    shutdown: S,
) -> TickReport
where
    B: SessionBackend + 'static,
    S: Future<Output = ()> + Send,
{
    let ActorLink {
        mut events,
        outgoing,
    } = actor;
    tokio::pin!(shutdown);

    let (note_tx, mut note_rx) = mpsc::channel(16);
    let watcher = NotificationWatcher::new(config.notifications_dir()).spawn(note_tx);
    let mut calls = JoinSet::new();
    let mut detector = ErrorDetector::default();
    let mut last_text = String::new();
    let mut tool_calls = 0u64;
    let mut retries = 0u32;

    send(&outgoing, Outgoing::Prompt(config.initial_prompt(tick))).await;

    let idle = tokio::time::sleep(config.idle_timeout);
    tokio::pin!(idle);

    let outcome = loop {
        tokio::select! {
            event = events.recv() => {
                idle.as_mut().reset(tokio::time::Instant::now() + config.idle_timeout);
                let Some(event) = event else {
                    info!(tick, "actor closed the link");
                    break TickOutcome::ActorGone;
                };
                match event {
                    ActorEvent::ToolCall { id, method, params } => {
                        tool_calls += 1;
                        start_call(&mut calls, &surface, &outgoing, id, &method, params).await;
                    }
                    ActorEvent::AssistantText(text) => {
                        detector.check_text(&text);
                        last_text = text;
                    }
                    ActorEvent::ContextLimit => {
                        warn!(tick, "actor hit its context limit, ending tick");
                        break TickOutcome::ContextLimit;
                    }
                    ActorEvent::TurnEnd { is_error, result } => {
                        detector.check_result(is_error, &result);
                        if let Some(err) = detector.error().filter(|_| detector.is_fatal()) {
                            let reason = err.reason();
                            error!(tick, reason = %reason, "fatal API error, pausing");
                            write_pause_file(config, tick, &reason);
                            break TickOutcome::Paused { reason };
                        }
                        if let Some(err) = detector.error() {
                            if retries >= MAX_RETRIES {
                                error!(tick, retries, "retries exhausted, ending tick");
                                break TickOutcome::RetriesExhausted;
                            }
                            retries += 1;
                            let delay = backoff_delay(retries);
                            warn!(
                                tick,
                                category = err.category,
                                retry = retries,
                                max = MAX_RETRIES,
                                delay_secs = delay.as_secs(),
                                "transient API error, retrying"
                            );
                            detector.reset();
                            tokio::select! {
                                () = tokio::time::sleep(delay) => {}
                                () = &mut shutdown => {
                                    info!(tick, "shutdown requested during retry backoff");
                                    break TickOutcome::Interrupted;
                                }
                            }
                            idle.as_mut().reset(tokio::time::Instant::now() + config.idle_timeout);
                            send(&outgoing, Outgoing::Prompt(RETRY_PROMPT.to_string())).await;
                            continue;
                        }

                        let mut issues = surface.tick_end_issues();
                        if last_text.trim().is_empty() {
                            issues.push(FINAL_MESSAGE_ISSUE.to_string());
                        }
                        if issues.is_empty() {
                            break TickOutcome::Completed;
                        }
                        debug!(tick, count = issues.len(), "tick cannot end yet");
                        send(&outgoing, Outgoing::Prompt(tick_end_nag(&issues))).await;
                    }
                }
            }
            Some(joined) = calls.join_next(), if !calls.is_empty() => {
                if let Err(e) = joined {
                    if !e.is_cancelled() {
                        error!(tick, error = %e, "tool call task failed");
                    }
                }
            }
            Some(message) = note_rx.recv() => {
                info!(tick, "forwarding notification to actor");
                surface.manager().interrupt();
                send(&outgoing, Outgoing::Prompt(message)).await;
            }
            () = &mut idle => {
                warn!(tick, timeout_secs = config.idle_timeout.as_secs(), "actor idle, ending tick");
                break TickOutcome::IdleTimeout;
            }
            () = &mut shutdown => {
                info!(tick, "shutdown requested");
                break TickOutcome::Interrupted;
            }
        }
    };

    watcher.abort();
    calls.abort_all();
    while calls.join_next().await.is_some() {}

    TickReport {
        tick,
        outcome,
        tool_calls,
        retries,
    }
}

async fn start_call<B: SessionBackend + 'static>(
    calls: &mut JoinSet<()>,
    surface: &Arc<ToolSurface<B>>,
    outgoing: &mpsc::Sender<Outgoing>,
    id: u64,
    method: &str,
    params: Option<serde_json::Value>,
) {
    let request = match ToolRequest::parse(method, params) {
        Ok(request) => request,
        Err(e @ ToolError::UnknownTool(_)) => {
            debug!(id, method, "unknown tool");
            let resp = RpcResponse::error(Some(id), e.code(), &e.to_string());
            send(outgoing, Outgoing::Response(resp)).await;
            return;
        }
        Err(e) => {
            let resp = RpcResponse::tool_outcome(id, &ToolOutcome::error(&e));
            send(outgoing, Outgoing::Response(resp)).await;
            return;
        }
    };
    debug!(id, tool = request.name(), "tool call");
    let surface = Arc::clone(surface);
    let outgoing = outgoing.clone();
    calls.spawn(async move {
        let outcome = surface.dispatch(request).await;
        send(&outgoing, Outgoing::Response(RpcResponse::tool_outcome(id, &outcome))).await;
    });
}

async fn send(outgoing: &mpsc::Sender<Outgoing>, message: Outgoing) {
    if outgoing.send(message).await.is_err() {
        debug!("actor link closed, dropping message");
    }
}

pub fn tick_end_nag(issues: &[String]) -> String {
    let lines: Vec<String> = issues.iter().map(|issue| format!("- {issue}")).collect();
    format!("Tick can't end yet:\n{}", lines.join("\n"))
}

fn pause_text(tick: u64, reason: &str) -> String {
    format!(
        "Paused at {} due to {reason}.\nTick: {tick}\n\nOptions:\n1. Delete this file to retry (may fail again)\n2. Investigate the tick log for root cause\n",
        Utc::now().to_rfc3339()
    )
}

fn write_pause_file(config: &AppConfig, tick: u64, reason: &str) {
    let path = config.paused_file();
    if let Err(e) = std::fs::write(&path, pause_text(tick, reason)) {
        error!(
            path = %path.display(),
            error = %e,
            code = error_codes::PERSISTENCE_ERROR,
            "failed to write paused file"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nag_lists_each_issue() {
        let nag = tick_end_nag(&["Open terminals: 1.".to_string(), FINAL_MESSAGE_ISSUE.to_string()]);
        assert_eq!(
            nag,
            "Tick can't end yet:\n- Open terminals: 1.\n- Send a final message before the tick can end."
        );
    }

    #[test]
    fn test_pause_text_names_tick_and_reason() {
        let text = pause_text(41, "context_limit: prompt is too long");
        assert!(text.starts_with("Paused at "));
        assert!(text.contains("due to context_limit: prompt is too long.\nTick: 41\n"));
        assert!(text.ends_with("2. Investigate the tick log for root cause\n"));
    }

    #[test]
    fn test_only_completed_is_clean() {
        assert!(TickOutcome::Completed.is_clean());
        assert!(!TickOutcome::IdleTimeout.is_clean());
        assert_eq!(
            TickOutcome::Paused {
                reason: "x".into()
            }
            .as_str(),
            "paused"
        );
    }
}
