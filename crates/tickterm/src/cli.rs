use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use tickterm_daemon::ManagerConfig;

use crate::config::AppConfig;
use crate::config::DEFAULT_CONTAINER;
use crate::config::DEFAULT_RUNTIME;

const LONG_ABOUT: &str = r#"tickterm runs one tick of an agent against terminals hosted in a container.

Each terminal is a tmux session inside the container. The actor drives them
through five tools over JSON-RPC on stdin/stdout:

    login()                          situational awareness, startup terminals
    open(command?)                   new terminal in the lowest free slot
    type(terminal, expect, text)     keystrokes, after naming what is running
    wait(timeout?)                   block until output settles, get a diff
    close(terminal)                  kill and archive a terminal

DATA DIRECTORY:
    tmp/sessions/            live terminal artifacts (wiped at tick end)
    system/logs/sessions/    archived terminals
    system/state.json        tick counter
    system/startup.json      terminals to bring up at login
    system/notifications/    drop *.txt files here to interrupt the actor
    system/paused            present after a fatal error; delete to resume

EXAMPLES:
    # Run a tick with the actor attached to stdio
    tickterm --data-dir /srv/agent tick

    # Show what the next tick would use
    tickterm --data-dir /srv/agent config"#;

#[derive(Parser, Debug)]
#[command(name = "tickterm")]
#[command(author, version)]
#[command(about = "Runs one agent tick against terminals hosted in a container")]
#[command(long_about = LONG_ABOUT)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Data directory holding tmp/ and system/
    #[arg(long, global = true, env = "TICKTERM_DATA_DIR", default_value = ".")]
    pub data_dir: PathBuf,

    /// Container that hosts the terminals
    #[arg(long, global = true, env = "TICKTERM_CONTAINER", default_value = DEFAULT_CONTAINER)]
    pub container: String,

    /// Container runtime used for exec
    #[arg(long, global = true, env = "TICKTERM_RUNTIME", default_value = DEFAULT_RUNTIME)]
    pub runtime: String,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run one tick with the actor on stdin/stdout
    Tick {
        /// First prompt of the tick; {tick} is replaced with the tick number
        #[arg(long)]
        query: Option<String>,

        /// Seconds the actor may stay silent before the tick ends
        #[arg(long, default_value_t = 300)]
        idle_timeout: u64,
    },

    /// Print the resolved configuration as JSON
    Config,

    /// Print the live terminal registry as JSON
    Registry,
}

impl Cli {
    pub fn app_config(&self) -> AppConfig {
        let mut config = AppConfig::new(&self.data_dir)
            .with_container(&self.container)
            .with_runtime(&self.runtime)
            .with_manager(ManagerConfig::from_env());
        if let Commands::Tick {
            query,
            idle_timeout,
        } = &self.command
        {
            config = config.with_idle_timeout(Duration::from_secs(*idle_timeout));
            if let Some(query) = query.as_deref().filter(|q| !q.trim().is_empty()) {
                config = config.with_initial_query(query);
            }
        }
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tick_flags_reach_config() {
        let cli = Cli::try_parse_from([
            "tickterm",
            "--data-dir",
            "/srv/agent",
            "tick",
            "--idle-timeout",
            "45",
            "--query",
            "Tick {tick}: check the build.",
        ])
        .unwrap();
        let config = cli.app_config();
        assert_eq!(config.data_dir, PathBuf::from("/srv/agent"));
        assert_eq!(config.idle_timeout, Duration::from_secs(45));
        assert_eq!(config.initial_prompt(3), "Tick 3: check the build.");
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["tickterm", "config", "--container", "box", "--runtime", "docker"])
            .unwrap();
        assert_eq!(cli.command, Commands::Config);
        let config = cli.app_config();
        assert_eq!(config.container, "box");
        assert_eq!(config.runtime, "docker");
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["tickterm"]).is_err());
    }
}
