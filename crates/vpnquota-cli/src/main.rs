//! vpnquota CLI - daily data quota tracking for tunnel sessions
//!
//! A command-line interface over the usage ledger: inspect the persisted
//! state, talk to the accounting server, and meter a running tunnel.

mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};

use vpnquota_core::AppConfig;

#[derive(Parser)]
#[command(name = "vpnquota")]
#[command(author, version, about = "Daily data quota tracking CLI", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set VPNQUOTA_DB_PATH env var)
    #[arg(long, env = "VPNQUOTA_DB_PATH", global = true)]
    db: Option<String>,

    /// Log ledger and sync activity to stderr
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the persisted usage state
    Status,

    /// Report zero usage to the server and show its answer
    Sync,

    /// Meter traffic until the quota stops the tunnel or Ctrl-C
    Watch(commands::watch::WatchArgs),

    /// Ad, daily claim and coin exchange rewards
    Reward {
        #[command(subcommand)]
        action: commands::reward::RewardAction,
    },

    /// Show recorded sync round trips
    History(commands::history::HistoryArgs),

    /// Show this device's id
    Device,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut config = AppConfig::load()?;
    if let Some(db_path) = &cli.db {
        config.db_path = Some(db_path.into());
    }

    // Initialize database
    let db = vpnquota_core::Database::open(config.resolved_db_path()?).await?;

    // Create context for commands
    let ctx = commands::Context {
        config,
        db,
        format: cli.format,
        quiet: cli.quiet,
    };

    // Execute command
    match cli.command {
        Commands::Status => commands::status::execute(&ctx).await,
        Commands::Sync => commands::sync::execute(&ctx).await,
        Commands::Watch(args) => commands::watch::execute(&ctx, args).await,
        Commands::Reward { action } => commands::reward::execute(&ctx, action).await,
        Commands::History(args) => commands::history::execute(&ctx, args).await,
        Commands::Device => commands::device::execute(&ctx).await,
        Commands::Config { action } => commands::config::execute(&ctx, action).await,
    }
}
