use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use leechwarden_config::LeechwardenConfig;
use leechwarden_core::SystemClock;
use leechwarden_engine::admin::{cleanup_table, list_blocked, unblock_address};
use leechwarden_engine::Runtime;
use leechwarden_prevention::{MemoryNft, NftBackend, NftCommand};
use leechwarden_protocols::Aria2Client;
use leechwarden_telemetry::{AuditLog, EventLogger};

#[derive(Parser, Debug)]
#[command(name = "leechwarden", version, about)]
pub struct Cli {
    /// Configuration file (defaults to config/leechwarden.yaml when present)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Watch aria2 peers and block leechers
    Run(RunArgs),
    /// Remove the nftables table and exit
    Cleanup(CleanupArgs),
    /// Print the currently blocked addresses
    List,
    /// Lift the block on one address
    Unblock(UnblockArgs),
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Judge peers without touching the kernel; blocks go to an in-memory table
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CleanupArgs {
    /// Table to remove instead of the configured one
    #[arg(long)]
    pub table: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct UnblockArgs {
    pub address: String,
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<LeechwardenConfig> {
    LeechwardenConfig::load_optional(path.as_ref()).context("Failed to load configuration")
}

pub async fn run(path: Option<PathBuf>, args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(path)?;
    EventLogger::init(&config.telemetry.log_level);
    info!("leechwarden {} started", env!("CARGO_PKG_VERSION"));

    if args.dry_run {
        warn!("Dry run: blocks are kept in memory and never reach the kernel");
        run_with_backend(config, MemoryNft::default()).await
    } else {
        let backend = NftCommand::new(&config.prevention.nft_binary);
        run_with_backend(config, backend).await
    }
}

async fn run_with_backend<B: NftBackend>(
    config: LeechwardenConfig,
    backend: B,
) -> anyhow::Result<()> {
    let client = Aria2Client::new(
        config.rpc.endpoint(),
        &config.rpc.secret,
        config.rpc.timeout(),
    )
    .context("Failed to build aria2 client")?;

    let runtime = Runtime::new(config, client, backend, Arc::new(SystemClock))
        .context("Failed to initialize nftables")?;
    runtime.run().await?;
    Ok(())
}

pub fn cleanup(path: Option<PathBuf>, args: CleanupArgs) -> anyhow::Result<()> {
    // A broken config must not prevent removing the table.
    let (config, load_error) = match load_config(path) {
        Ok(config) => (config, None),
        Err(e) => (LeechwardenConfig::default(), Some(e)),
    };
    EventLogger::init(&config.telemetry.log_level);
    if let Some(e) = load_error {
        warn!("{:#}; using defaults", e);
    }

    let table = args.table.unwrap_or(config.prevention.nft_table);
    let mut backend = NftCommand::new(&config.prevention.nft_binary);
    cleanup_table(&mut backend, &table).context("Failed to cleanup nftables")?;
    info!("Cleanup completed successfully");
    Ok(())
}

pub fn list(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    EventLogger::init(&config.telemetry.log_level);

    let backend = NftCommand::new(&config.prevention.nft_binary);
    for address in list_blocked(backend, &config.prevention.nft_table)? {
        println!("{address}");
    }
    Ok(())
}

pub fn unblock(path: Option<PathBuf>, args: UnblockArgs) -> anyhow::Result<()> {
    let config = load_config(path)?;
    EventLogger::init(&config.telemetry.log_level);

    let audit = AuditLog::open(&config.telemetry.audit_log)?;
    let backend = NftCommand::new(&config.prevention.nft_binary);
    unblock_address(backend, &config.prevention.nft_table, &args.address, &audit)
        .with_context(|| format!("Failed to unblock {}", args.address))?;
    Ok(())
}

pub fn check_config(path: Option<PathBuf>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    print!("{}", serde_yaml::to_string(&config)?);
    Ok(())
}
