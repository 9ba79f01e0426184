//! driftcheck CLI - Main Entry Point
//!
//! Runs reconciliation plans against a backend, reads collection snapshots
//! and lists input schemas still free for new factors.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use driftcheck_harness::HarnessConfig;

mod commands;
mod output;

use commands::{config, fetch, run, schemas};

/// driftcheck - actuate, then poll until the backend agrees
#[derive(Parser)]
#[command(name = "driftcheck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "DRIFTCHECK_CONFIG", default_value = "driftcheck.toml", global = true)]
    config: PathBuf,

    /// Backend API base URL, overriding the configuration file
    #[arg(long, env = "DRIFTCHECK_BACKEND_URL", global = true)]
    backend_url: Option<String>,

    /// Admin frontend base URL, overriding the configuration file
    #[arg(long, env = "DRIFTCHECK_FRONTEND_URL", global = true)]
    frontend_url: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reconciliation plans
    Run(run::RunArgs),

    /// Read one snapshot of a collection
    Fetch(fetch::FetchArgs),

    /// List input schemas not yet mapped to a factor
    Schemas(schemas::SchemasArgs),

    /// Inspect or create the configuration file
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

/// Settings every command works from
pub struct Context {
    pub config: HarnessConfig,
    pub config_path: PathBuf,
    pub format: output::OutputFormat,
    pub cancel: CancellationToken,
}

fn init_logging(verbose: bool, json: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.json_logs);

    let mut config = HarnessConfig::load(&cli.config)?;
    if let Some(url) = cli.backend_url {
        config.backend_url = url;
    }
    if let Some(url) = cli.frontend_url {
        config.frontend_url = url;
    }

    // Ctrl-C stops backoff waits; results so far are still reported
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling running reconciliations");
            on_interrupt.cancel();
        }
    });

    let ctx = Context {
        config,
        config_path: cli.config,
        format: cli.format,
        cancel,
    };

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, &ctx).await,
        Commands::Fetch(args) => fetch::execute(args, &ctx).await,
        Commands::Schemas(args) => schemas::execute(args, &ctx).await,
        Commands::Config(cmd) => config::execute(cmd, &ctx),
        Commands::Version => {
            println!("driftcheck v{}", env!("CARGO_PKG_VERSION"));
            println!("common library v{}", driftcheck_common::VERSION);
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}
