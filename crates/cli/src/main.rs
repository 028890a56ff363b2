// leadsync - Knowlarity and Meta lead synchronisation

mod check;
mod exit_codes;
mod fetch;
mod sources;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use leadsync_config::Settings;

use exit_codes::{EXIT_SUCCESS, EXIT_USAGE};
use sync::SyncCommands;

#[derive(Parser)]
#[command(name = "leadsync")]
#[command(about = "Reconcile Knowlarity calls and Meta lead-ad submissions into one lead registry")]
#[command(long_version = long_version())]
#[command(version)]
struct Cli {
    /// Lead database path (default: LEADSYNC_DB, config file, or the per-user data dir)
    #[arg(long, global = true, value_name = "PATH")]
    db: Option<PathBuf>,

    /// More log output on stderr (-v debug, -vv trace). RUST_LOG overrides.
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors
    #[arg(long, short = 'q', global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch leads from a provider and reconcile them into the registry
    #[command(subcommand)]
    Sync(SyncCommands),

    /// Test connectivity to the Meta Graph API
    #[command(after_help = "\
Examples:
  leadsync check
  leadsync check --url https://graph.facebook.com/v20.0")]
    Check {
        /// URL to probe (default: META_API_BASE/META_GRAPH_VERSION)
        #[arg(long)]
        url: Option<String>,
    },

    /// List registered lead sources and their counters
    Sources {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
}

fn long_version() -> &'static str {
    concat!(
        env!("CARGO_PKG_VERSION"),
        " (", env!("GIT_COMMIT_HASH"), ")",
        "\ntarget:  ", env!("TARGET"),
    )
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    // stdout carries the JSON summary; logs stay on stderr
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run(cli: Cli) -> Result<(), CliError> {
    let mut settings = Settings::load().map_err(sync::config_error)?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }

    match cli.command {
        Commands::Sync(command) => sync::cmd_sync(command, &settings),
        Commands::Check { url } => {
            let url = url.unwrap_or_else(|| settings.meta.graph_url());
            check::cmd_check(&url)
        }
        Commands::Sources { json } => sources::cmd_sources(&settings.db_path, json),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

#[derive(Debug)]
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn args(msg: impl Into<String>) -> Self {
        Self { code: EXIT_USAGE, message: msg.into(), hint: None }
    }
}
