use std::path::Path;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;

use crate::BackendError;
use crate::CommandOutput;
use crate::CommandRunner;
use crate::PaneStatus;
use crate::Result;
use crate::SessionBackend;

const PANE_STATUS_FORMAT: &str =
    "#{pane_dead}|#{pane_dead_status}|#{pane_current_command}|#{pane_pid}";
const DEFAULT_SHELL: &str = "bash";
const TERM_ENV: (&str, &str) = ("TERM", "xterm-256color");

/// Commands that usually run a script whose name is more telling.
const INTERPRETERS: &[&str] = &["python3", "python", "node", "ruby", "perl", "bash", "sh"];

/// tmux stderr fragments meaning the target session is gone.
const SESSION_GONE_MARKERS: &[&str] = &[
    "can't find session",
    "can't find pane",
    "can't find window",
    "no server running",
    "session not found",
    "no such session",
];

/// [`SessionBackend`] backed by tmux inside a container.
pub struct TmuxBackend<R: CommandRunner> {
    runner: R,
    history_limit: usize,
}

impl<R: CommandRunner> TmuxBackend<R> {
    pub fn new(runner: R, history_limit: usize) -> Self {
        Self {
            runner,
            history_limit,
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    async fn exec(&self, args: &[&str]) -> Result<CommandOutput> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.runner.run(&args, &[]).await
    }

    /// Runs `tmux <args>` and maps a non-zero exit to a typed error.
    async fn tmux(&self, session: &str, args: &[&str]) -> Result<String> {
        self.tmux_with_env(session, args, &[]).await
    }

    async fn tmux_with_env(
        &self,
        session: &str,
        args: &[&str],
        env: &[(&str, &str)],
    ) -> Result<String> {
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push("tmux".to_string());
        full.extend(args.iter().map(|a| a.to_string()));
        let output = self.runner.run(&full, env).await?;
        if output.success() {
            return Ok(output.stdout);
        }
        Err(classify_failure(session, args.first().copied().unwrap_or("tmux"), output))
    }

    async fn script_name(&self, pid: &str) -> Option<String> {
        let children = self.exec(&["ps", "-o", "pid=", "--ppid", pid]).await.ok()?;
        let child = children.stdout.split_whitespace().next()?;
        if !child.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let cmdline = self
            .exec(&["cat", &format!("/proc/{child}/cmdline")])
            .await
            .ok()?;
        if !cmdline.success() {
            return None;
        }
        let script = cmdline.stdout.split('\0').nth(1)?;
        if !script.contains('/') {
            return None;
        }
        script
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .map(str::to_string)
    }
}

fn classify_failure(session: &str, subcommand: &str, output: CommandOutput) -> BackendError {
    let lowered = output.stderr.to_ascii_lowercase();
    if SESSION_GONE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return BackendError::SessionGone(session.to_string());
    }
    BackendError::CommandFailed {
        command: subcommand.to_string(),
        code: output.code,
        stderr: output.stderr,
    }
}

/// Quotes `value` for a POSIX shell.
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn exact(name: &str) -> String {
    format!("={name}")
}

fn parse_pane_status(session: &str, stdout: &str) -> Result<PaneStatus> {
    let line = stdout
        .lines()
        .next()
        .filter(|l| !l.trim().is_empty())
        .ok_or_else(|| BackendError::SessionGone(session.to_string()))?;
    let mut fields = line.trim().splitn(4, '|');
    let dead = fields.next() == Some("1");
    let exit_code = fields.next().and_then(|s| s.trim().parse().ok());
    let foreground_command = fields.next().unwrap_or_default().trim().to_string();
    let foreground_pid = fields.next().unwrap_or_default().trim().to_string();
    Ok(PaneStatus {
        dead,
        exit_code: if dead { exit_code } else { None },
        foreground_command,
        foreground_pid,
    })
}

#[async_trait]
impl<R: CommandRunner> SessionBackend for TmuxBackend<R> {
    async fn session_exists(&self, name: &str) -> bool {
        self.tmux(name, &["has-session", "-t", &exact(name)])
            .await
            .is_ok()
    }

    async fn create_session(&self, name: &str, command: &str, rows: u16, cols: u16) -> Result<()> {
        let cols = cols.to_string();
        let rows = rows.to_string();
        let wrapped = (!command.is_empty() && command != DEFAULT_SHELL)
            .then(|| format!("{DEFAULT_SHELL} -c {}", shell_quote(command)));
        let mut args = vec!["new-session", "-d", "-s", name, "-x", &cols, "-y", &rows];
        if let Some(wrapped) = wrapped.as_deref() {
            args.push(wrapped);
        }
        info!(session = name, command, "creating tmux session");
        self.tmux_with_env(name, &args, &[TERM_ENV]).await?;

        let limit = self.history_limit.to_string();
        if let Err(e) = self
            .tmux(name, &["set-option", "-t", name, "history-limit", &limit])
            .await
        {
            debug!(session = name, error = %e, "failed to set history-limit");
        }
        if let Err(e) = self
            .tmux(name, &["set-window-option", "-t", name, "remain-on-exit", "on"])
            .await
        {
            debug!(session = name, error = %e, "failed to set remain-on-exit");
        }
        Ok(())
    }

    async fn pipe_output(&self, name: &str, raw_path: &Path) -> Result<()> {
        // Close any pipe left over from a previous attach before opening ours.
        self.tmux(name, &["pipe-pane", "-t", name]).await?;
        let sink = format!("cat >> {}", shell_quote(&raw_path.to_string_lossy()));
        self.tmux(name, &["pipe-pane", "-t", name, &sink]).await?;
        Ok(())
    }

    async fn send_keys(&self, name: &str, payload: &str, literal: bool) -> Result<()> {
        if literal {
            self.tmux(name, &["send-keys", "-t", name, "-l", "--", payload])
                .await?;
        } else {
            self.tmux(name, &["send-keys", "-t", name, payload]).await?;
        }
        Ok(())
    }

    async fn capture_pane(&self, name: &str, scrollback_lines: usize) -> Result<String> {
        let start = format!("-{scrollback_lines}");
        self.tmux(name, &["capture-pane", "-p", "-t", name, "-S", &start])
            .await
    }

    async fn capture_annotated(&self, name: &str) -> Result<String> {
        self.tmux(name, &["capture-pane", "-p", "-e", "-t", name])
            .await
    }

    async fn pane_status(&self, name: &str) -> Result<PaneStatus> {
        let stdout = self
            .tmux(name, &["list-panes", "-t", name, "-F", PANE_STATUS_FORMAT])
            .await?;
        parse_pane_status(name, &stdout)
    }

    async fn resolve_foreground_script_name(&self, raw_command: &str, pid: &str) -> String {
        if !INTERPRETERS.contains(&raw_command) || pid.is_empty() {
            return raw_command.to_string();
        }
        match self.script_name(pid).await {
            Some(name) => name,
            None => raw_command.to_string(),
        }
    }

    async fn kill_session(&self, name: &str) -> Result<()> {
        match self.tmux(name, &["kill-session", "-t", &exact(name)]).await {
            Ok(_) | Err(BackendError::SessionGone(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tickterm_common::mutex_lock_or_recover;

    #[derive(Default)]
    struct ScriptedRunner {
        replies: Mutex<VecDeque<Result<CommandOutput>>>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl ScriptedRunner {
        fn reply(self, stdout: &str, stderr: &str, code: i32) -> Self {
            mutex_lock_or_recover(&self.replies).push_back(Ok(CommandOutput {
                stdout: stdout.to_string(),
                stderr: stderr.to_string(),
                code,
            }));
            self
        }

        fn fail(self, err: BackendError) -> Self {
            mutex_lock_or_recover(&self.replies).push_back(Err(err));
            self
        }

        fn calls(&self) -> Vec<Vec<String>> {
            mutex_lock_or_recover(&self.calls).clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run(&self, args: &[String], _env: &[(&str, &str)]) -> Result<CommandOutput> {
            mutex_lock_or_recover(&self.calls).push(args.to_vec());
            mutex_lock_or_recover(&self.replies)
                .pop_front()
                .unwrap_or_else(|| Ok(CommandOutput::default()))
        }
    }

    fn backend(runner: ScriptedRunner) -> TmuxBackend<ScriptedRunner> {
        TmuxBackend::new(runner, 5000)
    }

    #[test]
    fn test_parse_pane_status_alive() {
        let status = parse_pane_status("term_0", "0||bash|4242\n").unwrap();
        assert!(!status.dead);
        assert_eq!(status.exit_code, None);
        assert_eq!(status.foreground_command, "bash");
        assert_eq!(status.foreground_pid, "4242");
    }

    #[test]
    fn test_parse_pane_status_dead_with_code() {
        let status = parse_pane_status("term_0", "1|2|python3|99").unwrap();
        assert!(status.dead);
        assert_eq!(status.exit_code, Some(2));
    }

    #[test]
    fn test_parse_pane_status_empty_is_gone() {
        let err = parse_pane_status("term_0", "\n").unwrap_err();
        assert_eq!(err, BackendError::SessionGone("term_0".into()));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("echo 'hi'"), r"'echo '\''hi'\'''");
    }

    #[tokio::test]
    async fn test_missing_session_stderr_maps_to_session_gone() {
        let b = backend(ScriptedRunner::default().reply("", "can't find session: term_1", 1));
        let err = b.capture_pane("term_1", 100).await.unwrap_err();
        assert_eq!(err, BackendError::SessionGone("term_1".into()));
    }

    #[tokio::test]
    async fn test_kill_is_idempotent() {
        let b = backend(ScriptedRunner::default().reply("", "no server running on /tmp/tmux", 1));
        assert!(b.kill_session("term_1").await.is_ok());
    }

    #[tokio::test]
    async fn test_kill_propagates_unavailable() {
        let b = backend(ScriptedRunner::default().fail(BackendError::Unavailable("down".into())));
        assert!(matches!(
            b.kill_session("term_1").await,
            Err(BackendError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_create_session_wraps_custom_command() {
        let b = backend(ScriptedRunner::default());
        b.create_session("term_2", "python3 bot.py", 40, 120)
            .await
            .unwrap();
        let calls = b.runner().calls();
        assert_eq!(
            calls[0],
            vec![
                "tmux", "new-session", "-d", "-s", "term_2", "-x", "120", "-y", "40",
                "bash -c 'python3 bot.py'"
            ]
        );
        assert!(calls[1].contains(&"history-limit".to_string()));
        assert!(calls[2].contains(&"remain-on-exit".to_string()));
    }

    #[tokio::test]
    async fn test_create_session_default_shell_has_no_command() {
        let b = backend(ScriptedRunner::default());
        b.create_session("term_0", "bash", 40, 120).await.unwrap();
        assert_eq!(b.runner().calls()[0].last().map(String::as_str), Some("40"));
    }

    #[tokio::test]
    async fn test_send_keys_literal_vs_named() {
        let b = backend(ScriptedRunner::default());
        b.send_keys("term_0", "-rf", true).await.unwrap();
        b.send_keys("term_0", "Enter", false).await.unwrap();
        let calls = b.runner().calls();
        assert_eq!(calls[0], vec!["tmux", "send-keys", "-t", "term_0", "-l", "--", "-rf"]);
        assert_eq!(calls[1], vec!["tmux", "send-keys", "-t", "term_0", "Enter"]);
    }

    #[tokio::test]
    async fn test_pipe_output_replaces_existing_pipe() {
        let b = backend(ScriptedRunner::default());
        b.pipe_output("term_3", Path::new("/data/tmp/sessions/term_3/raw"))
            .await
            .unwrap();
        let calls = b.runner().calls();
        assert_eq!(calls[0], vec!["tmux", "pipe-pane", "-t", "term_3"]);
        assert_eq!(
            calls[1],
            vec!["tmux", "pipe-pane", "-t", "term_3", "cat >> '/data/tmp/sessions/term_3/raw'"]
        );
    }

    #[tokio::test]
    async fn test_resolve_script_name_from_proc() {
        let b = backend(
            ScriptedRunner::default()
                .reply(" 314\n", "", 0)
                .reply("python3\0/opt/bots/chat\0--verbose\0", "", 0),
        );
        assert_eq!(b.resolve_foreground_script_name("python3", "100").await, "chat");
    }

    #[tokio::test]
    async fn test_resolve_keeps_relative_script_as_interpreter() {
        let b = backend(
            ScriptedRunner::default()
                .reply("314\n", "", 0)
                .reply("python3\0bot.py\0", "", 0),
        );
        assert_eq!(b.resolve_foreground_script_name("python3", "100").await, "python3");
    }

    #[tokio::test]
    async fn test_resolve_skips_non_interpreters() {
        let b = backend(ScriptedRunner::default());
        assert_eq!(b.resolve_foreground_script_name("vim", "100").await, "vim");
        assert!(b.runner().calls().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_without_children_falls_back() {
        let b = backend(ScriptedRunner::default().reply("", "", 1));
        assert_eq!(b.resolve_foreground_script_name("bash", "100").await, "bash");
    }
}
