use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use tickterm::HarnessError;
use tickterm::actor;
use tickterm::cli::Cli;
use tickterm::cli::Commands;
use tickterm::config::AppConfig;
use tickterm::run_tick;
use tickterm_backend::ContainerRunner;
use tickterm_backend::TmuxBackend;
use tickterm_common::ErrorCategory;
use tickterm_common::init_tracing;
use tickterm_daemon::TerminalRegistry;

fn main() {
    if let Err(e) = run() {
        if let Some(harness_error) = e.downcast_ref::<HarnessError>() {
            eprintln!("Error: {harness_error}");
            eprintln!("Suggestion: {}", harness_error.suggestion());
            if harness_error.is_retryable() {
                eprintln!("(This error may be transient - retry may succeed)");
            }
            std::process::exit(exit_code_for_category(harness_error.category()));
        }
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn exit_code_for_category(category: ErrorCategory) -> i32 {
    match category {
        ErrorCategory::InvalidInput => 64, // EX_USAGE
        ErrorCategory::NotFound => 69,     // EX_UNAVAILABLE
        ErrorCategory::Busy => 73,         // EX_CANTCREAT
        ErrorCategory::External | ErrorCategory::Internal => 74, // EX_IOERR
        ErrorCategory::Precondition | ErrorCategory::Timeout => 75, // EX_TEMPFAIL
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.app_config();

    match &cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config.to_json())?);
        }
        Commands::Registry => {
            let entries = TerminalRegistry::new(config.session_paths().registry_file()).load();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        Commands::Tick { .. } => {
            let level = if cli.verbose { "debug" } else { "info" };
            let _guard = init_tracing(level, Some(&config.log_dir()));
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            runtime.block_on(tick(config))?;
        }
    }
    Ok(())
}

async fn tick(config: AppConfig) -> anyhow::Result<()> {
    let runner = ContainerRunner::new(config.runtime.as_str(), config.container.as_str());
    let backend = Arc::new(TmuxBackend::new(runner, config.manager.scrollback_lines));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    let report = run_tick(&config, backend, actor::spawn_stdio(), shutdown).await?;
    if !report.outcome.is_clean() {
        tracing::warn!(tick = report.tick, outcome = report.outcome.as_str(), "tick ended early");
    }
    Ok(())
}
