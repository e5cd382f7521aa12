#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use serde_json::json;
use tempfile::TempDir;
use tickterm::AppConfig;
use tickterm::HarnessError;
use tickterm::TickOutcome;
use tickterm::TickReport;
use tickterm::actor::ActorEnd;
use tickterm::actor::ActorEvent;
use tickterm::actor::ActorLink;
use tickterm::actor::Outgoing;
use tickterm::harness::FINAL_MESSAGE_ISSUE;
use tickterm::harness::RETRY_PROMPT;
use tickterm::rpc::RpcResponse;
use tickterm::run_tick;
use tickterm::state::TickState;
use tickterm_backend::mock::MockBackend;
use tickterm_common::error_codes;
use tickterm_daemon::ManagerConfig;
use tickterm_daemon::NO_ACTIVITY;

struct Fixture {
    _dir: TempDir,
    backend: Arc<MockBackend>,
    config: AppConfig,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let config = AppConfig::new(dir.path())
        .with_idle_timeout(Duration::from_secs(120))
        .with_manager(
            ManagerConfig::default().with_login_settle_timeout(Duration::from_secs(1)),
        );
    Fixture {
        _dir: dir,
        backend: Arc::new(MockBackend::builder().with_echo().build()),
        config,
    }
}

impl Fixture {
    async fn run<F, Fut>(&self, script: F) -> Result<TickReport, HarnessError>
    where
        F: FnOnce(Actor) -> Fut,
        Fut: Future<Output = ()>,
    {
        let (link, end) = ActorLink::pair();
        let (result, ()) = tokio::join!(
            run_tick(
                &self.config,
                Arc::clone(&self.backend),
                link,
                std::future::pending::<()>(),
            ),
            script(Actor { end, next_id: 0 }),
        );
        result
    }
}

/// Scripted stand-in for the actor process.
struct Actor {
    end: ActorEnd,
    next_id: u64,
}

impl Actor {
    async fn recv(&mut self) -> Outgoing {
        self.end.outgoing.recv().await.expect("harness closed the link")
    }

    async fn prompt(&mut self) -> String {
        match self.recv().await {
            Outgoing::Prompt(text) => text,
            other => panic!("expected a prompt, got {other:?}"),
        }
    }

    async fn response(&mut self) -> RpcResponse {
        match self.recv().await {
            Outgoing::Response(resp) => resp,
            other => panic!("expected a response, got {other:?}"),
        }
    }

    async fn request(&mut self, method: &str, params: Value) -> u64 {
        self.next_id += 1;
        self.end
            .events
            .send(ActorEvent::ToolCall {
                id: self.next_id,
                method: method.to_string(),
                params: Some(params),
            })
            .await
            .unwrap();
        self.next_id
    }

    async fn call(&mut self, method: &str, params: Value) -> (String, bool) {
        let id = self.request(method, params).await;
        let resp = self.response().await;
        assert_eq!(resp.id, Some(id));
        outcome(&resp)
    }

    async fn say(&mut self, text: &str) {
        self.end
            .events
            .send(ActorEvent::AssistantText(text.to_string()))
            .await
            .unwrap();
    }

    async fn end_turn(&mut self, is_error: bool, result: &str) {
        self.end
            .events
            .send(ActorEvent::TurnEnd {
                is_error,
                result: result.to_string(),
            })
            .await
            .unwrap();
    }

    async fn drain(mut self) {
        while self.end.outgoing.recv().await.is_some() {}
    }
}

fn outcome(resp: &RpcResponse) -> (String, bool) {
    let result = resp.result.as_ref().expect("tool response carries a result");
    (
        result["text"].as_str().unwrap().to_string(),
        result["is_error"].as_bool().unwrap(),
    )
}

#[tokio::test(start_paused = true)]
async fn test_tick_completes_after_login_and_close() {
    let fx = fixture();
    let report = fx
        .run(|mut actor| async move {
            assert_eq!(actor.prompt().await, "Tick 1 starting. Call login() to begin.");
            assert_eq!(actor.call("login", json!({})).await, ("bash".to_string(), false));
            assert_eq!(
                actor.call("close", json!({"terminal": 0})).await,
                ("Terminal 0 closed and archived.".to_string(), false)
            );
            actor.say("All done for this tick.").await;
            actor.end_turn(false, "").await;
            actor.drain().await;
        })
        .await
        .unwrap();

    assert_eq!(report.tick, 1);
    assert_eq!(report.outcome, TickOutcome::Completed);
    assert_eq!(report.tool_calls, 2);

    let state = TickState::load(&fx.config.state_file());
    assert_eq!(state.tick_count, 1);
    assert!(state.last_tick_end.is_some());
    assert!(!fx.config.tmp_dir().exists());
    assert!(fx.config.archive_dir().join("term_0-tick-1").is_dir());
}

#[tokio::test(start_paused = true)]
async fn test_turn_end_nags_until_tick_can_end() {
    let fx = fixture();
    let report = fx
        .run(|mut actor| async move {
            actor.prompt().await;
            actor.end_turn(false, "").await;
            let nag = actor.prompt().await;
            assert!(nag.starts_with("Tick can't end yet:\n- You haven't called login() yet."));
            assert!(nag.ends_with(&format!("\n- {FINAL_MESSAGE_ISSUE}")));

            actor.call("login", json!({})).await;
            actor.say("Logged in, closing up.").await;
            actor.end_turn(false, "").await;
            assert_eq!(
                actor.prompt().await,
                "Tick can't end yet:\n- Open terminals: 0. Close them with close(terminal=N) or exit the shell."
            );

            actor.call("close", json!({"terminal": 0})).await;
            actor.end_turn(false, "").await;
            actor.drain().await;
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, TickOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_error_pauses_ticking() {
    let fx = fixture();
    let report = fx
        .run(|mut actor| async move {
            actor.prompt().await;
            actor.say("API Error: prompt is too long").await;
            actor.end_turn(true, "Prompt is too long").await;
            actor.drain().await;
        })
        .await
        .unwrap();
    assert!(matches!(report.outcome, TickOutcome::Paused { .. }));

    let paused = std::fs::read_to_string(fx.config.paused_file()).unwrap();
    assert!(paused.contains("\nTick: 1\n"));
    assert!(paused.contains("1. Delete this file to retry"));

    let err = fx.run(|_actor| async {}).await.unwrap_err();
    assert!(matches!(err, HarnessError::Paused(_)));
    assert_eq!(TickState::load(&fx.config.state_file()).tick_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_transient_error_retries_after_backoff() {
    let fx = fixture();
    let report = fx
        .run(|mut actor| async move {
            actor.prompt().await;
            let started = tokio::time::Instant::now();
            actor.end_turn(true, "overloaded_error: Overloaded").await;
            assert_eq!(actor.prompt().await, RETRY_PROMPT);
            assert!(started.elapsed() >= Duration::from_secs(10));
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, TickOutcome::ActorGone);
    assert_eq!(report.retries, 1);
}

#[tokio::test(start_paused = true)]
async fn test_silent_actor_times_out() {
    let fx = fixture();
    let report = fx
        .run(|mut actor| async move {
            actor.prompt().await;
            actor.drain().await;
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, TickOutcome::IdleTimeout);
}

#[tokio::test(start_paused = true)]
async fn test_notification_interrupts_wait() {
    let fx = fixture();
    let notifications = fx.config.notifications_dir();
    let report = fx
        .run(|mut actor| async move {
            actor.prompt().await;
            actor.call("login", json!({})).await;

            let started = tokio::time::Instant::now();
            let wait_id = actor.request("wait", json!({"timeout": 60})).await;
            std::fs::write(notifications.join("ci.partial"), "CI is green\n").unwrap();
            std::fs::rename(notifications.join("ci.partial"), notifications.join("ci.txt"))
                .unwrap();

            let mut prompt = None;
            let mut waited = None;
            for _ in 0..2 {
                match actor.recv().await {
                    Outgoing::Prompt(text) => prompt = Some(text),
                    Outgoing::Response(resp) => {
                        assert_eq!(resp.id, Some(wait_id));
                        waited = Some(outcome(&resp).0);
                    }
                }
            }
            assert_eq!(prompt.as_deref(), Some("CI is green"));
            assert_eq!(waited.as_deref(), Some(NO_ACTIVITY));
            assert!(started.elapsed() < Duration::from_secs(60));
            assert!(!notifications.join("ci.txt").exists());
        })
        .await
        .unwrap();
    assert_eq!(report.outcome, TickOutcome::ActorGone);
}

#[tokio::test(start_paused = true)]
async fn test_tool_calls_run_concurrently() {
    let fx = fixture();
    fx.run(|mut actor| async move {
        actor.prompt().await;
        actor.call("login", json!({})).await;

        let wait_id = actor.request("wait", json!({"timeout": 10})).await;
        let open_id = actor.request("open", json!({"command": "htop"})).await;

        let first = actor.response().await;
        assert_eq!(first.id, Some(open_id));
        assert_eq!(
            outcome(&first).0,
            "Opened terminal 1 (htop). 18 more available."
        );
        let second = actor.response().await;
        assert_eq!(second.id, Some(wait_id));
    })
    .await
    .unwrap();
    assert_eq!(fx.backend.kill_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_protocol_errors() {
    let fx = fixture();
    fx.run(|mut actor| async move {
        actor.prompt().await;

        let id = actor.request("logout", json!({})).await;
        let resp = actor.response().await;
        assert_eq!(resp.id, Some(id));
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, error_codes::METHOD_NOT_FOUND);

        let (text, is_error) = actor.call("type", json!({"terminal": "zero"})).await;
        assert!(is_error);
        assert!(text.starts_with("Error: Invalid arguments for type():"));

        let (text, is_error) = actor.call("open", json!({})).await;
        assert!(is_error);
        assert_eq!(
            text,
            "Error: You must call login() first before using terminal tools."
        );
    })
    .await
    .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_login_reports_build_error() {
    let fx = fixture();
    std::fs::create_dir_all(fx.config.system_dir()).unwrap();
    std::fs::write(fx.config.build_error_file(), "RUN make: exit 2\n").unwrap();

    fx.run(|mut actor| async move {
        actor.prompt().await;
        let (text, is_error) = actor.call("login", json!({})).await;
        assert!(!is_error);
        assert!(text.contains("Container image rebuild FAILED"));
        assert!(text.contains("  RUN make: exit 2"));
    })
    .await
    .unwrap();
}
