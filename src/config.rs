use alloy_primitives::{Address, address};
use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_CONTRACT_ADDRESS: Address = address!("00fdae9174357424a78afaad98da36fd66dd9e03");
pub const DEFAULT_START_BLOCK: u64 = 6_563_800;
pub const DEFAULT_CONFIRMATIONS: u64 = 12;
pub const DEFAULT_BATCH_SIZE: u64 = 100_000;
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_RPC_URL: &str = "http://localhost:8545";

/// Everything the indexer needs to know about the token and the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexerConfig {
    /// ERC20 contract whose `Transfer` events are indexed.
    pub contract_address: Address,
    /// First block of the backfill.
    pub start_block: u64,
    /// Blocks behind the head that are never read.
    pub confirmation_depth: u64,
    /// Blocks per `eth_getLogs` request.
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub rpc_urls: Vec<String>,
    /// Log every sub-range and every applied transfer.
    pub verbose: bool,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            contract_address: DEFAULT_CONTRACT_ADDRESS,
            start_block: DEFAULT_START_BLOCK,
            confirmation_depth: DEFAULT_CONFIRMATIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval: DEFAULT_POLL_INTERVAL,
            rpc_urls: vec![DEFAULT_RPC_URL.to_string()],
            verbose: false,
        }
    }
}

impl IndexerConfig {
    /// Defaults overridden by environment variables (and `.env`).
    ///
    /// Only parsing errors are reported here; call [`validate`](Self::validate)
    /// once every override has been applied.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
            .context("Invalid indexer configuration in environment")
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let contract_address = match lookup("ERC20_CONTRACT_ADDRESS") {
            Some(raw) => {
                Address::from_str(raw.trim()).map_err(|_| ConfigError::InvalidAddress(raw))?
            }
            None => defaults.contract_address,
        };

        let rpc_urls = match lookup("JSON_RPC_URLS").or_else(|| lookup("JSON_RPC_URL")) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(String::from)
                .collect(),
            None => defaults.rpc_urls,
        };

        Ok(Self {
            contract_address,
            start_block: parse_var(&lookup, "START_BLOCK", defaults.start_block)?,
            confirmation_depth: parse_var(&lookup, "CONFIRMATIONS", defaults.confirmation_depth)?,
            batch_size: parse_var(&lookup, "BATCH_SIZE", defaults.batch_size)?,
            poll_interval: Duration::from_millis(parse_var(
                &lookup,
                "POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )?),
            rpc_urls,
            verbose: parse_var(&lookup, "VERBOSE", defaults.verbose)?,
        })
    }

    /// Checks that do not need the chain.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        if self.rpc_urls.is_empty() {
            return Err(ConfigError::NoRpcUrl);
        }
        Ok(())
    }

    /// The start block must already be confirmed when indexing begins.
    pub fn check_start_block(&self, confirmed: Option<u64>) -> Result<(), ConfigError> {
        let ahead = match confirmed {
            Some(confirmed) => self.start_block > confirmed,
            None => self.start_block > 0,
        };
        if ahead {
            return Err(ConfigError::StartBlockAheadOfChain {
                start_block: self.start_block,
                confirmed,
            });
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(default),
    }
}
