//! VaultSpace CLI - Command-line interface for the local vault
//!
//! Provides commands for:
//! - Browsing and searching the mirrored tree
//! - Viewing engine status and storage usage
//! - Resolving conflicts and retrying failed uploads
//! - Inspecting and clearing the content cache
//! - Showing and validating configuration
//!
//! Every command works offline against the local database.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    cache::CacheCommand, config::ConfigCommand, conflicts::ConflictsCommand, ls::LsCommand,
    search::SearchCommand, status::StatusCommand, uploads::UploadsCommand, CliContext,
};
use output::OutputFormat;
use vaultspace_core::config::Config;

#[derive(Debug, Parser)]
#[command(name = "vaultspace", version, about = "Offline-aware personal cloud vault")]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<String>,

    /// Minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List the contents of a folder
    Ls(LsCommand),
    /// Search names across the vault
    Search(SearchCommand),
    /// Show engine status
    Status(StatusCommand),
    /// Manage synchronization conflicts
    #[command(subcommand)]
    Conflicts(ConflictsCommand),
    /// Inspect and retry failed uploads
    #[command(subcommand)]
    Uploads(UploadsCommand),
    /// Inspect or clear the content cache
    #[command(subcommand)]
    Cache(CacheCommand),
    /// View and validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let context = CliContext::new(
        if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        cli.quiet,
        cli.config.as_deref(),
    );
    let config = context.load_config();
    init_tracing(&config, cli.verbose, cli.quiet);

    match cli.command {
        Commands::Ls(cmd) => cmd.execute(&context).await,
        Commands::Search(cmd) => cmd.execute(&context).await,
        Commands::Status(cmd) => cmd.execute(&context).await,
        Commands::Conflicts(cmd) => cmd.execute(&context).await,
        Commands::Uploads(cmd) => cmd.execute(&context).await,
        Commands::Cache(cmd) => cmd.execute(&context).await,
        Commands::Config(cmd) => cmd.execute(&context).await,
    }
}

/// `RUST_LOG` wins; otherwise `-v` raises the configured level
fn init_tracing(config: &Config, verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => config.logging.level.as_str(),
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if config.logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}
