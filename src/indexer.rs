//! The indexer façade: owns configuration and shared state, runs the backfill
//! and hands over to a background poller.

use std::sync::{Arc, Mutex, PoisonError};

use alloy_primitives::Address;
use num_bigint::BigInt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::IndexerConfig;
use crate::cursor::{ProcessingCursor, SharedCursor};
use crate::error::{ConfigError, IndexerError};
use crate::fetcher::BatchFetcher;
use crate::ledger::{self, Balances, Ledger, SharedLedger};
use crate::poller::{ConfirmationPoller, IndexerEvent};
use crate::rpc::TransferSource;

const EVENT_CHANNEL_CAPACITY: usize = 256;

enum Lifecycle {
    Idle,
    Starting { stop_requested: bool },
    Running { shutdown: watch::Sender<bool>, handle: JoinHandle<()> },
    Stopped { handle: Option<JoinHandle<()>> },
}

pub struct Indexer<S> {
    config: IndexerConfig,
    ledger: SharedLedger,
    cursor: SharedCursor,
    fetcher: Arc<BatchFetcher<S>>,
    events: broadcast::Sender<IndexerEvent>,
    lifecycle: Mutex<Lifecycle>,
}

impl<S: TransferSource + 'static> Indexer<S> {
    pub fn new(config: IndexerConfig, source: S) -> Result<Self, ConfigError> {
        config.validate()?;

        let ledger = Ledger::shared();
        let cursor = SharedCursor::new();
        let fetcher = Arc::new(BatchFetcher::new(
            Arc::new(source),
            ledger.clone(),
            cursor.clone(),
            config.batch_size,
        ));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Ok(Self {
            config,
            ledger,
            cursor,
            fetcher,
            events,
            lifecycle: Mutex::new(Lifecycle::Idle),
        })
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run the backfill, then start polling in the background.
    ///
    /// Returns once polling has begun. Fails with [`ConfigError::StartBlockAheadOfChain`]
    /// before fetching anything when the start block is not yet confirmed. A
    /// failed backfill leaves the indexer idle; calling `start` again resumes
    /// after the last processed block.
    pub async fn start(&self) -> Result<(), IndexerError> {
        {
            let mut lifecycle = self.lifecycle();
            match *lifecycle {
                Lifecycle::Idle => *lifecycle = Lifecycle::Starting { stop_requested: false },
                Lifecycle::Starting { .. } | Lifecycle::Running { .. } => {
                    return Err(IndexerError::AlreadyStarted);
                }
                Lifecycle::Stopped { .. } => return Err(IndexerError::Stopped),
            }
        }

        info!(
            "Starting indexer for {} from block {}",
            self.config.contract_address, self.config.start_block
        );

        let mut poller = ConfirmationPoller::new(
            self.fetcher.clone(),
            self.config.confirmation_depth,
            self.config.poll_interval,
            self.events.clone(),
        );

        if let Err(e) = self.backfill(&mut poller).await {
            error!("Backfill failed: {}", e);
            let mut lifecycle = self.lifecycle();
            *lifecycle = match *lifecycle {
                Lifecycle::Starting {
                    stop_requested: true,
                } => Lifecycle::Stopped { handle: None },
                _ => Lifecycle::Idle,
            };
            return Err(e);
        }

        let mut lifecycle = self.lifecycle();
        if let Lifecycle::Starting {
            stop_requested: true,
        } = *lifecycle
        {
            info!("Stop requested during backfill, not polling");
            *lifecycle = Lifecycle::Stopped { handle: None };
            return Ok(());
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poller.run(shutdown_rx));
        *lifecycle = Lifecycle::Running { shutdown, handle };
        Ok(())
    }

    /// First start: the configured start block must already be confirmed.
    /// A resumed start skips the check and continues after whatever an
    /// earlier attempt applied.
    async fn backfill(&self, poller: &mut ConfirmationPoller<S>) -> Result<u64, IndexerError> {
        let confirmed = poller.current_confirmed().await?;
        if self.cursor.get().last_block_enqueued.is_none() {
            self.config.check_start_block(confirmed)?;
        }
        poller.backfill_to(self.resume_block(), confirmed).await
    }

    /// Backfill start: the configured block, or just past whatever an earlier
    /// failed attempt already applied.
    fn resume_block(&self) -> u64 {
        self.cursor
            .get()
            .next_block()
            .map_or(self.config.start_block, |next| next.max(self.config.start_block))
    }

    /// Stop scheduling ticks. A fetch already in progress completes.
    pub fn stop(&self) {
        let mut lifecycle = self.lifecycle();
        match std::mem::replace(&mut *lifecycle, Lifecycle::Stopped { handle: None }) {
            Lifecycle::Idle => info!("Indexer stopped before start"),
            Lifecycle::Starting { .. } => {
                *lifecycle = Lifecycle::Starting {
                    stop_requested: true,
                };
            }
            Lifecycle::Running { shutdown, handle } => {
                info!("Stopping indexer");
                if shutdown.send(true).is_err() {
                    warn!("Poller already exited");
                }
                *lifecycle = Lifecycle::Stopped {
                    handle: Some(handle),
                };
            }
            stopped @ Lifecycle::Stopped { .. } => *lifecycle = stopped,
        }
    }

    /// Wait for the poller task to exit after [`stop`](Self::stop).
    pub async fn join(&self) {
        let handle = match &mut *self.lifecycle() {
            Lifecycle::Stopped { handle } => handle.take(),
            _ => None,
        };
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Poller task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.lifecycle(), Lifecycle::Running { .. })
    }

    pub fn get_balances(&self) -> Balances {
        ledger::read(&self.ledger).snapshot()
    }

    pub fn balance_of(&self, address: &Address) -> BigInt {
        ledger::read(&self.ledger).balance_of(address)
    }

    /// Top `count` holders by balance.
    pub fn top_holders(&self, count: usize) -> Vec<(Address, BigInt)> {
        ledger::read(&self.ledger).top_holders(count)
    }

    pub fn holder_count(&self) -> usize {
        ledger::read(&self.ledger).len()
    }

    pub fn get_cursor(&self) -> ProcessingCursor {
        self.cursor.get()
    }

    /// Progress and failure notifications from backfill and polling.
    pub fn subscribe(&self) -> broadcast::Receiver<IndexerEvent> {
        self.events.subscribe()
    }
}
