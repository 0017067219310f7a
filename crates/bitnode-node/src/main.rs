//! bitnode - inspect and verify the chain state kept in a data directory.

use anyhow::{bail, Context, Result};
use bitnode_consensus::{Block, ChainParams};
use bitnode_storage::{ChainStore, FileStore};
use bitnode_sync::{BlockValidationError, BlockValidator, Clock, HeaderChain, SystemClock};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

mod config;

use config::NodeConfig;

/// Bitcoin-style chain state tool.
#[derive(Parser, Debug)]
#[command(name = "bitnode")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bitnode.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Network (mainnet, testnet, regtest)
    #[arg(short, long)]
    network: Option<String>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print header and block heights
    Info,
    /// Print the block locator for the stored header chain
    Locator,
    /// Re-check stored headers and block index against each other
    Verify,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = NodeConfig::load(&args.config, &args)?;

    // Initialize logging
    let log_level = match config.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("bitnode v{}", env!("CARGO_PKG_VERSION"));
    info!("Network: {}", config.network);
    info!("Data directory: {:?}", config.data_dir);

    let params = ChainParams::for_network(config.network);
    let store = FileStore::open(&config.data_dir)
        .with_context(|| format!("Failed to open {}", config.data_dir.display()))?;
    let headers = HeaderChain::load(params, &store)?;

    match args.command {
        Command::Info => info_cmd(&headers, &store),
        Command::Locator => locator_cmd(&headers, &config),
        Command::Verify => verify_cmd(&headers, &store),
    }
}

fn info_cmd(headers: &HeaderChain, store: &FileStore) -> Result<()> {
    let records = store.block_index_records()?;
    let tip = headers.last();

    println!("network:        {}", headers.params().network);
    println!("genesis:        {}", headers.params().genesis_hash());
    println!("header height:  {}", headers.len() - 1);
    println!("header tip:     {}", tip.hash());
    println!("tip time:       {}", tip.time);
    match records.last() {
        Some(last) => {
            println!("block height:   {}", last.height);
            println!("block tip:      {}", last.hash);
        }
        None => println!("block height:   none"),
    }
    Ok(())
}

fn locator_cmd(headers: &HeaderChain, config: &NodeConfig) -> Result<()> {
    let now = SystemClock.now();
    for hash in headers.locator(now, config.sync.header_freshness_secs) {
        let height = headers.position(&hash).unwrap_or_default();
        println!("{height:>8} {hash}");
    }
    Ok(())
}

/// Header-only checks; blocks are not revalidated offline.
struct HeaderCheck;

impl BlockValidator for HeaderCheck {
    fn verify_block(&self, block: &Block, height: u32) -> Result<(), BlockValidationError> {
        Err(BlockValidationError {
            hash: block.hash(),
            height,
            reason: "block validation is not available offline".to_string(),
        })
    }
}

fn verify_cmd(headers: &HeaderChain, store: &FileStore) -> Result<()> {
    let now = SystemClock.now();
    let mut replay = HeaderChain::genesis_only(headers.params().clone());
    let (accepted, rejection) = replay.extend_checked(&headers.headers()[1..], now, &HeaderCheck);
    if let Some(reason) = rejection {
        bail!("header {} failed: {}", accepted + 1, reason);
    }
    info!(headers = headers.len(), "Header chain verified");

    let records = store.block_index_records()?;
    for (position, record) in records.iter().enumerate() {
        if record.height as usize != position {
            bail!("block index record {} claims height {}", position, record.height);
        }
        if headers.hash_at(position) != Some(record.hash) {
            bail!("block {} at height {} is not on the header chain", record.hash, position);
        }
        match store.read_block(&record.hash)? {
            Some(data) if data.len() == record.size as usize => {}
            Some(data) => bail!(
                "block {} is {} bytes, index says {}",
                record.hash,
                data.len(),
                record.size
            ),
            None => bail!("block {} is missing its block file", record.hash),
        }
    }
    if records.is_empty() {
        warn!("Block index is empty");
    }
    println!("ok: {} headers, {} blocks", headers.len(), records.len());
    Ok(())
}
