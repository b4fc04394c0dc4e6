use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};
use clap::Parser;
use erc20_indexer::config::IndexerConfig;
use erc20_indexer::report::{DEFAULT_DECIMALS, OutputFormat, format_holders, format_summary};
use erc20_indexer::rpc::RpcClient;
use erc20_indexer::{Indexer, IndexerEvent};
use num_bigint::BigInt;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Index ERC20 Transfer events into an in-memory balance ledger", long_about = None)]
struct Cli {
    /// Token contract (overrides ERC20_CONTRACT_ADDRESS)
    #[arg(long)]
    contract: Option<Address>,

    /// First block to backfill (overrides START_BLOCK)
    #[arg(long)]
    start_block: Option<u64>,

    /// Confirmation depth (overrides CONFIRMATIONS)
    #[arg(long)]
    confirmations: Option<u64>,

    /// Blocks per log request (overrides BATCH_SIZE)
    #[arg(long)]
    batch_size: Option<u64>,

    /// Poll interval in milliseconds (overrides POLL_INTERVAL_MS)
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// RPC endpoint, repeatable (overrides JSON_RPC_URLS)
    #[arg(long = "rpc-url")]
    rpc_urls: Vec<String>,

    #[arg(short, long)]
    verbose: bool,

    /// Seconds between progress lines
    #[arg(long, default_value = "30")]
    report_interval: u64,

    /// Output format of the final report: table, json or csv
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Holders listed in the final report
    #[arg(long, default_value = "20")]
    top: usize,

    #[arg(long, default_value_t = DEFAULT_DECIMALS)]
    decimals: u8,
}

impl Cli {
    fn apply(&self, config: &mut IndexerConfig) {
        if let Some(contract) = self.contract {
            config.contract_address = contract;
        }
        if let Some(start_block) = self.start_block {
            config.start_block = start_block;
        }
        if let Some(confirmations) = self.confirmations {
            config.confirmation_depth = confirmations;
        }
        if let Some(batch_size) = self.batch_size {
            config.batch_size = batch_size;
        }
        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }
        if !self.rpc_urls.is_empty() {
            config.rpc_urls = self.rpc_urls.clone();
        }
        config.verbose |= self.verbose;
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = IndexerConfig::from_env()?;
    cli.apply(&mut config);
    config
        .validate()
        .context("Invalid indexer configuration")?;
    init_tracing(config.verbose);

    info!("Starting ERC20 balance indexer");
    info!("Contract address: {}", config.contract_address);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.rpc_urls.len()
    );
    info!(
        "Start block {}, confirmations {}, batch size {}",
        config.start_block, config.confirmation_depth, config.batch_size
    );

    let client = RpcClient::new(&config.rpc_urls, config.contract_address)
        .context("Failed to create RPC client")?;
    let indexer = Indexer::new(config, client).context("Invalid indexer configuration")?;
    let mut events = indexer.subscribe();

    if let Err(e) = indexer.start().await {
        error!("Backfill failed: {}", e);
        return Err(e.into());
    }

    let mut progress = tokio::time::interval(Duration::from_secs(cli.report_interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received");
                break;
            }
            _ = progress.tick() => {
                let cursor = indexer.get_cursor();
                info!(
                    "Processed up to block {:?} ({} block(s) in flight), {} holder(s)",
                    cursor.last_block_processed,
                    cursor.in_flight(),
                    indexer.holder_count()
                );
            }
            event = events.recv() => match event {
                Ok(IndexerEvent::RangeIndexed { from_block, to_block, events: count }) => {
                    info!("Indexed {} transfer(s) in blocks {}-{}", count, from_block, to_block);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("Missed {} indexer event(s)", skipped),
                Err(RecvError::Closed) => break,
            },
        }
    }

    indexer.stop();
    indexer.join().await;

    let format = OutputFormat::from(cli.format.as_str());
    let balances = indexer.get_balances();
    let supply: BigInt = balances.values().sum();
    println!(
        "{}",
        format_summary(
            &indexer.get_cursor(),
            balances.len(),
            &supply,
            cli.decimals,
            format
        )
    );
    println!(
        "{}",
        format_holders(&indexer.top_holders(cli.top), cli.decimals, format)
    );

    Ok(())
}
