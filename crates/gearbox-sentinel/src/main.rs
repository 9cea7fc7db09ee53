#![expect(
    clippy::multiple_crate_versions,
    reason = "transitive dependency duplication"
)]

use clap::{Parser, Subcommand};
use eyre::Context as _;
use std::process::ExitCode;
use tracing_subscriber::prelude::*;

mod abi;
mod chain;
mod cli_output;
mod commands;
mod config;
mod errors;
mod financial_math;
mod http;
mod paths;
mod price;
mod scanner;
mod store;
mod tokens;
mod valuation;
mod yields;

/// Gearbox credit account scanner and pool statistics.
#[derive(Parser, Debug)]
#[command(name = "gearbox-sentinel", version, arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check credit accounts <address> [chain].
    Position {
        /// Borrower wallet address.
        wallet: Option<String>,
        /// Chain name from the config (default: ethereum).
        chain: Option<String>,
    },

    /// List lending pools [chain].
    Pools {
        /// Only pools on this chain (case-insensitive).
        chain: Option<String>,
    },

    /// Top pools by APY [count].
    Top {
        #[arg(default_value_t = commands::pools::DEFAULT_TOP)]
        count: usize,
    },

    /// Show reward programs.
    Rewards,

    /// Protocol stats overview.
    Stats,

    /// Print resolved paths (useful for debugging).
    Paths,
}

fn init_logging(paths: &paths::SentinelPaths) -> tracing_appender::non_blocking::WorkerGuard {
    let env_filter = tracing_subscriber::EnvFilter::from_default_env();
    let file_name = paths
        .log_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("gearbox-sentinel.log.jsonl");
    let file_appender = tracing_appender::rolling::never(&paths.data_dir, file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_filter(env_filter.clone());
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    guard
}

#[tokio::main]
async fn main() -> eyre::Result<ExitCode> {
    color_eyre::install()?;
    // Usage errors exit 1; --help and --version exit 0.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            e.print().context("print usage")?;
            return Ok(code);
        }
    };

    let paths = paths::SentinelPaths::discover()?;
    std::fs::create_dir_all(&paths.data_dir).context("create data dir")?;
    let _log_guard = init_logging(&paths);
    let store = store::ConfigStore::new(&paths);

    if matches!(cli.cmd, Command::Paths) {
        let s = serde_json::to_string(&serde_json::json!({
          "config_dir": paths.config_dir,
          "config_file": store.path(),
          "data_dir": paths.data_dir,
          "log_file": paths.log_file,
        }))
        .context("serialize paths")?;
        cli_output::stdout_line(&s);
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = store.load()?;
    match cli.cmd {
        Command::Position { wallet, chain } => {
            commands::position::run(&cfg, wallet.as_deref(), chain.as_deref())
                .await
                .context("position failed")?;
        }
        Command::Pools { chain } => commands::pools::run_pools(&cfg, chain.as_deref())
            .await
            .context("pools failed")?,
        Command::Top { count } => commands::pools::run_top(&cfg, count)
            .await
            .context("top failed")?,
        Command::Rewards => commands::rewards::run(&cfg)
            .await
            .context("rewards failed")?,
        Command::Stats => commands::pools::run_stats(&cfg)
            .await
            .context("stats failed")?,
        Command::Paths => {}
    }
    Ok(ExitCode::SUCCESS)
}
