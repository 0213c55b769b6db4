mod cmd;
mod output;
mod root;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cmd::{
    availability::AvailabilitySubcommand, config::ConfigSubcommand, model::ModelSubcommand,
    stage::StageSubcommand,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "stagehand",
    about = "Stage gating and model rotation for AI-assisted delivery pipelines",
    version,
    propagate_version = true
)]
struct Cli {
    /// Campaign root (default: auto-detect from .stagehand/ or .git/)
    #[arg(long, global = true, env = "STAGEHAND_ROOT")]
    root: Option<PathBuf>,

    /// Persistent state directory for the availability cache
    #[arg(long, global = true, env = "STAGEHAND_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// Evaluate time-dependent commands at this RFC 3339 instant
    #[arg(long, global = true, hide = true, env = "STAGEHAND_NOW")]
    now: Option<DateTime<Utc>>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create .stagehand/ and a default config.yaml in the campaign root
    Init,

    /// Inspect and advance the campaign's stage gate
    Stage {
        #[command(subcommand)]
        subcommand: StageSubcommand,
    },

    /// Inspect and record provider model cooldowns
    Availability {
        #[command(subcommand)]
        subcommand: AvailabilitySubcommand,
    },

    /// Choose the model for the next AI attempt
    Model {
        #[command(subcommand)]
        subcommand: ModelSubcommand,
    },

    /// Show or validate the campaign configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

/// `RUST_LOG` when set and valid, `warn` otherwise.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
        .unwrap_or_else(|| EnvFilter::new("warn"))
}

fn main() {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());
    let state_dir = cli.state_dir.as_deref();
    let now = cli.now.unwrap_or_else(Utc::now);

    let result = match cli.command {
        Commands::Init => cmd::init::run(&root, cli.json),
        Commands::Stage { subcommand } => cmd::stage::run(&root, subcommand, cli.json),
        Commands::Availability { subcommand } => {
            cmd::availability::run(&root, state_dir, subcommand, now, cli.json)
        }
        Commands::Model { subcommand } => {
            cmd::model::run(&root, state_dir, subcommand, now, cli.json)
        }
        Commands::Config { subcommand } => cmd::config::run(&root, subcommand, cli.json),
    };

    if let Err(e) = result {
        // Print the full error chain (anyhow's alternate Display)
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
