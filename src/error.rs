//! Error types for the indexer.

use std::time::Duration;

use thiserror::Error;

/// Failure surfaced by a [`TransferSource`](crate::rpc::TransferSource).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    #[error("failed to decode log: {0}")]
    Decode(String),
}

/// A batch fetch failed partway through.
///
/// `last_processed` is the highest block of the failed run whose events were
/// fully folded into the ledger, or `None` if its first sub-range failed. A
/// caller resumes from [`resume_from`](Self::resume_from).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("fetching blocks {from_block}-{to_block} failed (last processed: {last_processed:?}): {source}")]
pub struct FetchError {
    pub from_block: u64,
    pub to_block: u64,
    pub last_processed: Option<u64>,
    #[source]
    pub source: RpcError,
}

impl FetchError {
    /// First block a retry has to cover.
    pub fn resume_from(&self) -> u64 {
        self.last_processed.map_or(self.from_block, |block| block + 1)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    #[error("at least one RPC URL must be provided")]
    NoRpcUrl,

    #[error("invalid RPC URL: {0}")]
    InvalidRpcUrl(String),

    #[error("invalid contract address: {0}")]
    InvalidAddress(String),

    #[error("invalid value for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error(
        "start block {start_block} is ahead of the confirmed height ({})",
        .confirmed.map_or_else(|| "none".to_string(), |block| block.to_string())
    )]
    StartBlockAheadOfChain {
        start_block: u64,
        confirmed: Option<u64>,
    },
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("indexer is already running")]
    AlreadyStarted,

    #[error("indexer has been stopped")]
    Stopped,
}
