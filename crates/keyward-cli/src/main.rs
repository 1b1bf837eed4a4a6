//! CLI entry point for keyward.
//!
//! Runs a single key-management command, or a batch file of them, against
//! the vault described by the configuration and the `KEYWARD_MASTER_KEY`
//! environment variable.

mod batch;
mod commands;

use std::io::BufReader;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use keyward_vault::{KeyManager, MasterKey, VaultConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::commands::KeyCommand;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// keyward — local key management with an audit trail.
#[derive(Parser)]
#[command(
    name = "keyward",
    version,
    about = "keyward — create, rotate, revoke and use encryption keys",
    long_about = "Manages symmetric keys sealed under a master key taken from \
                  KEYWARD_MASTER_KEY, tracks which applications may use them, \
                  and audits every operation."
)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true, env = "KEYWARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Key(KeyCommand),

    /// Execute commands from a batch file, one per line.
    Run {
        #[arg(long)]
        file: PathBuf,
    },

    /// Print a freshly generated master key for KEYWARD_MASTER_KEY.
    MasterKey,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config = VaultConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_tracing(&config.log_level);

    match cli.command {
        Commands::MasterKey => cmd_master_key(),
        Commands::Key(command) => cmd_key(&config, &command),
        Commands::Run { file } => cmd_run(&config, file),
    }
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_key(config: &VaultConfig, command: &KeyCommand) -> Result<()> {
    let manager = open_manager(config)?;
    let message = command.execute(&manager)?;
    println!("✓ {message}");
    Ok(())
}

fn cmd_run(config: &VaultConfig, file: PathBuf) -> Result<()> {
    let manager = open_manager(config)?;
    let reader = std::fs::File::open(&file)
        .with_context(|| format!("failed to open batch file {}", file.display()))?;

    info!(path = %file.display(), "running batch file");
    let summary = batch::run(&manager, BufReader::new(reader), &mut std::io::stdout().lock())?;

    println!();
    println!("  {} succeeded, {} failed", summary.succeeded, summary.failed);
    Ok(())
}

fn cmd_master_key() -> Result<()> {
    let key = MasterKey::generate().context("failed to generate master key")?;
    println!("KEYWARD_MASTER_KEY={}", key.to_base64().as_str());
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn open_manager(config: &VaultConfig) -> Result<KeyManager> {
    let master_key = MasterKey::from_env().context("cannot open vault")?;
    KeyManager::open(config, master_key).context("failed to open vault")
}

/// Initialize the tracing subscriber with the given default log level.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
