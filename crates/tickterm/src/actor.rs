//! The link to the actor process: newline-delimited JSON-RPC in both
//! directions, decoded into [`ActorEvent`]s for the harness.

use serde_json::Value;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::debug;
use tracing::warn;

use crate::rpc::RpcNotification;
use crate::rpc::RpcRequest;
use crate::rpc::RpcResponse;
use crate::rpc::parse_line;

const CHANNEL_CAPACITY: usize = 64;

/// What the actor told the harness.
#[derive(Debug, Clone, PartialEq)]
pub enum ActorEvent {
    ToolCall {
        id: u64,
        method: String,
        params: Option<Value>,
    },
    /// A complete assistant message.
    AssistantText(String),
    /// The actor finished its turn. `result` carries the final status text.
    TurnEnd { is_error: bool, result: String },
    /// The actor ran out of context and cannot continue.
    ContextLimit,
}

/// What the harness sends back.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    Response(RpcResponse),
    Prompt(String),
}

impl Outgoing {
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        match self {
            Outgoing::Response(resp) => serde_json::to_string(resp),
            Outgoing::Prompt(text) => serde_json::to_string(&RpcNotification::prompt(text)),
        }
    }
}

/// Harness side of the link.
#[derive(Debug)]
pub struct ActorLink {
    pub events: mpsc::Receiver<ActorEvent>,
    pub outgoing: mpsc::Sender<Outgoing>,
}

/// Actor side of an in-process link.
#[derive(Debug)]
pub struct ActorEnd {
    pub events: mpsc::Sender<ActorEvent>,
    pub outgoing: mpsc::Receiver<Outgoing>,
}

impl ActorLink {
    pub fn pair() -> (ActorLink, ActorEnd) {
        let (event_tx, event_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, out_rx) = mpsc::channel(CHANNEL_CAPACITY);
        (
            ActorLink {
                events: event_rx,
                outgoing: out_tx,
            },
            ActorEnd {
                events: event_tx,
                outgoing: out_rx,
            },
        )
    }
}

/// Links the harness to the actor over this process's stdin and stdout.
pub fn spawn_stdio() -> ActorLink {
    spawn_io(tokio::io::stdin(), tokio::io::stdout())
}

/// Runs a reader and a writer task over the given streams. The event
/// channel closes when the reader reaches end of input.
pub fn spawn_io<R, W>(reader: R, writer: W) -> ActorLink
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (link, end) = ActorLink::pair();
    let ActorEnd { events, outgoing } = end;
    let replies = link.outgoing.clone();
    tokio::spawn(read_loop(reader, events, replies));
    tokio::spawn(write_loop(writer, outgoing));
    link
}

async fn read_loop<R: AsyncRead + Unpin>(
    reader: R,
    events: mpsc::Sender<ActorEvent>,
    replies: mpsc::Sender<Outgoing>,
) {
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "actor input failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let delivered = match parse_line(&line).map(decode) {
            Ok(Some(event)) => events.send(event).await.is_ok(),
            Ok(None) => true,
            Err(resp) => replies.send(Outgoing::Response(resp)).await.is_ok(),
        };
        if !delivered {
            break;
        }
    }
    debug!("actor input closed");
}

fn decode(request: RpcRequest) -> Option<ActorEvent> {
    if let Some(id) = request.id {
        return Some(ActorEvent::ToolCall {
            id,
            method: request.method,
            params: request.params,
        });
    }
    let event = match request.method.as_str() {
        "assistant_text" => {
            ActorEvent::AssistantText(request.param_str("text").unwrap_or_default().to_string())
        }
        "turn_end" => ActorEvent::TurnEnd {
            is_error: request.param_bool("is_error").unwrap_or(false),
            result: request.param_str("result").unwrap_or_default().to_string(),
        },
        "context_limit" => ActorEvent::ContextLimit,
        other => {
            debug!(method = other, "ignoring unknown notification");
            return None;
        }
    };
    Some(event)
}

async fn write_loop<W: AsyncWrite + Unpin>(mut writer: W, mut outgoing: mpsc::Receiver<Outgoing>) {
    while let Some(message) = outgoing.recv().await {
        let mut line = match message.to_line() {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "failed to encode message for actor");
                continue;
            }
        };
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "actor output closed");
            break;
        }
        if let Err(e) = writer.flush().await {
            warn!(error = %e, "actor output closed");
            break;
        }
    }
}
