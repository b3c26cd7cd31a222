//! `sweep`: batch maintenance for Open Cloud datastores.
//!
//! ```bash
//! export ROBLOX_UNIVERSE_ID=123456 ROBLOX_API_KEY=...
//! sweep recompute-leaderboard
//! sweep wipe --store Players --yes
//! sweep dump --store Themes > themes.jsonl
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use sweep_client::cli::Cli;
use sweep_client::{AbortController, App, Confirmation, ReqwestTransport, RunStatus};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

fn init_tracing(cli: &Cli) {
    let filter = match cli.log_level() {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.global.is_log_json {
        builder.json().init();
    } else {
        builder.with_target(false).compact().init();
    }
}

/// Asks on stderr and reads the answer from stdin. Only `y` or `yes`
/// confirms.
async fn prompt(question: &str) -> Result<bool> {
    let mut stderr = tokio::io::stderr();
    stderr
        .write_all(format!("{question} [y/N] ").as_bytes())
        .await?;
    stderr.flush().await?;

    let mut answer = String::new();
    BufReader::new(tokio::io::stdin())
        .read_line(&mut answer)
        .await?;
    let answer = answer.trim();
    Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
}

async fn run(cli: Cli) -> Result<RunStatus> {
    let config = match cli.config() {
        Ok(config) => Arc::new(config),
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return Ok(RunStatus::Misconfigured);
        }
    };

    let confirmation = match cli.command.task() {
        Some(_) if cli.global.is_confirmed => Confirmation::Confirmed,
        Some(task) => {
            let question = format!(
                "Run {task} against {}?",
                cli.command.stores().join(", ")
            );
            if !prompt(&question).await? {
                tracing::warn!(%task, "not confirmed; nothing was changed");
                return Ok(RunStatus::Success);
            }
            Confirmation::Confirmed
        }
        None => Confirmation::NotConfirmed,
    };

    let transport = Arc::new(ReqwestTransport::new(&config)?);
    let abort = Arc::new(AbortController::new());
    abort.trigger_on_ctrl_c();

    let app = App::new(transport, config, abort.signal());
    let mut stdout = tokio::io::stdout();
    let status = app
        .execute(&cli.command, confirmation, &mut stdout)
        .await?;
    if status == RunStatus::Aborted {
        eprintln!("aborted by user");
    }
    Ok(status)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli);

    match run(cli).await {
        Ok(status) => ExitCode::from(status.exit_code()),
        Err(err) => {
            tracing::error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
