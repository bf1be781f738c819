//! wgtun CLI - Main Entry Point
//!
//! Manages WireGuard interfaces and peers stored by wgtun and brings their
//! tunnels up and down.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use wgtun_engine::{Engine, EngineConfig};

mod commands;
mod output;

use commands::{interface, keys, peer, tunnel};

/// wgtun - WireGuard tunnel management
#[derive(Parser)]
#[command(name = "wgtun")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "WGTUN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Database file, overriding the configured one
    #[arg(long, env = "WGTUN_DB", global = true)]
    db: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage WireGuard interfaces
    #[command(subcommand)]
    Interface(interface::InterfaceCommands),

    /// Manage peers of an interface
    #[command(subcommand)]
    Peer(peer::PeerCommands),

    /// Generate and check WireGuard keys
    #[command(subcommand)]
    Keys(keys::KeysCommands),

    /// Bring tunnels up and down
    #[command(subcommand)]
    Tunnel(tunnel::TunnelCommands),

    /// Show version information
    Version,
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(wgtun_common::default_config_path);
    let mut config = EngineConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    if let Some(db) = &cli.db {
        config.store.db_path = db.clone();
    }
    Ok(config)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    if let Err(e) = run(cli) {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    if let Commands::Version = cli.command {
        println!("wgtun v{}", wgtun_common::VERSION);
        return Ok(());
    }

    let config = load_config(&cli)?;
    let engine = Engine::open(&config).with_context(|| {
        format!("Failed to open database {}", config.db_path().display())
    })?;

    match cli.command {
        Commands::Interface(cmd) => interface::execute(cmd, &engine, cli.format),
        Commands::Peer(cmd) => peer::execute(cmd, &engine, cli.format),
        Commands::Keys(cmd) => keys::execute(cmd, &engine, cli.format),
        Commands::Tunnel(cmd) => tunnel::execute(cmd, &engine, cli.format),
        Commands::Version => Ok(()),
    }
}
