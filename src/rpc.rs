use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, RpcError};
use crate::events::{Transfer, TransferEvent, decode_transfer_event};

/// Source of chain height and decoded transfer events.
///
/// Implementations own transport concerns (retries, timeouts, failover). The
/// indexer core calls these sequentially and never retries on its own.
#[async_trait]
pub trait TransferSource: Send + Sync {
    async fn current_height(&self) -> Result<u64, RpcError>;

    /// Transfers in `[from_block, to_block]`, ordered by
    /// `(block_number, log_index)`.
    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RpcError>;
}

#[async_trait]
impl<T: TransferSource + ?Sized> TransferSource for Arc<T> {
    async fn current_height(&self) -> Result<u64, RpcError> {
        (**self).current_height().await
    }

    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RpcError> {
        (**self).get_events(from_block, to_block).await
    }
}

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const MAX_RETRIES: usize = 5;

/// JSON-RPC client for one ERC20 contract, rotating across endpoints.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    contract_address: Address,
    transfer_topic: B256,
    max_retries: usize,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String], contract_address: Address) -> Result<Self, ConfigError> {
        if rpc_urls.is_empty() {
            return Err(ConfigError::NoRpcUrl);
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| ConfigError::InvalidRpcUrl(url.clone()))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            contract_address,
            transfer_topic: Transfer::SIGNATURE_HASH,
            max_retries: MAX_RETRIES,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    fn handle_error(&self, error_str: &str) -> RpcError {
        warn!(
            "RPC error on {}: {}, rotating provider",
            self.get_current_url(),
            error_str
        );
        self.rotate_provider();
        RpcError::Transport(error_str.to_string())
    }

    fn handle_timeout(&self) -> RpcError {
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            self.get_current_url()
        );
        self.rotate_provider();
        RpcError::Timeout(REQUEST_TIMEOUT)
    }

    pub async fn get_latest_block(&self) -> Result<u64, RpcError> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                match timeout(REQUEST_TIMEOUT, provider.get_block_number()).await {
                    Ok(Ok(block_number)) => Ok(block_number),
                    Ok(Err(e)) => Err(client.handle_error(&e.to_string())),
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    /// One `eth_getLogs` call with retries. The outer error is a retried
    /// transport failure; the inner one is a "too many results" rejection the
    /// caller resolves by splitting the range.
    async fn get_logs_internal(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Result<Vec<Log>, RpcError>, RpcError> {
        let client = self.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            async move {
                let provider = client.get_provider();
                let filter = Filter::new()
                    .address(client.contract_address)
                    .event_signature(client.transfer_topic)
                    .from_block(from_block)
                    .to_block(to_block);

                match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => {
                        let error_str = e.to_string();
                        if error_str.contains("exceeds max results") {
                            debug!(
                                "Max results exceeded for blocks {}-{}, will split range",
                                from_block, to_block
                            );
                            Ok(Err(RpcError::Transport(error_str)))
                        } else {
                            Err(client.handle_error(&error_str))
                        }
                    }
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
    }

    fn parse_max_results_error(error_str: &str) -> Option<(u64, u64)> {
        let re = Regex::new(r"retry with the range (\d+)-(\d+)").ok()?;
        let captures = re.captures(error_str)?;

        let from = captures.get(1)?.as_str().parse().ok()?;
        let to = captures.get(2)?.as_str().parse().ok()?;

        Some((from, to))
    }

    /// End of the node-suggested sub-range, when the hint starts at
    /// `from_block` and stays within `to_block`.
    fn range_hint(error_str: &str, from_block: u64, to_block: u64) -> Option<u64> {
        let (hint_from, hint_to) = Self::parse_max_results_error(error_str)?;
        (hint_from == from_block && hint_from <= hint_to && hint_to <= to_block).then_some(hint_to)
    }

    /// Raw transfer logs in `[from_block, to_block]`, following the node's
    /// range hints when a single query would return too many results.
    pub async fn get_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>, RpcError> {
        let mut all_logs = Vec::new();
        let mut current_from = from_block;

        while current_from <= to_block {
            match self.get_logs_internal(current_from, to_block).await? {
                Ok(logs) => {
                    all_logs.extend(logs);
                    break;
                }
                Err(e) => {
                    let Some(split_to) =
                        Self::range_hint(&e.to_string(), current_from, to_block)
                    else {
                        return Err(e);
                    };

                    info!(
                        "Hit max results limit for blocks {}-{}, splitting at block {}",
                        current_from, to_block, split_to
                    );

                    let logs = self.get_logs_internal(current_from, split_to).await??;
                    all_logs.extend(logs);
                    if split_to == to_block {
                        break;
                    }
                    current_from = split_to + 1;
                }
            }
        }

        Ok(all_logs)
    }
}

#[async_trait]
impl TransferSource for RpcClient {
    async fn current_height(&self) -> Result<u64, RpcError> {
        self.get_latest_block().await
    }

    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RpcError> {
        let logs = self.get_logs(from_block, to_block).await?;

        let mut events = logs
            .iter()
            .filter(|log| !log.removed)
            .map(decode_transfer_event)
            .collect::<Result<Vec<_>, _>>()?;
        events.sort_by_key(|event| (event.block_number, event.log_index));

        Ok(events)
    }
}
