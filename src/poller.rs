//! Confirmation-depth poller.
//!
//! # Backfilling
//! Query the chain head, subtract the confirmation depth and fetch everything
//! from the start block up to that confirmed height. Failure here is returned
//! to the caller. A start block past the confirmed height is left for polling
//! to pick up once it confirms.
//!
//! # Polling
//! Every `poll_interval`, query the head again and fetch
//! `[next_block, confirmed]` when the confirmed height has moved past
//! `next_block`. A failed tick is reported and retried from the same
//! `next_block` on the following tick. Ticks never overlap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info};

use crate::error::{FetchError, IndexerError, RpcError};
use crate::fetcher::BatchFetcher;
use crate::rpc::TransferSource;

/// Highest block considered final given the current head, or `None` while
/// the chain is shorter than the confirmation depth.
pub fn confirmed_height(head: u64, confirmation_depth: u64) -> Option<u64> {
    head.checked_sub(confirmation_depth)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Backfilling,
    Polling { next_block: u64 },
    Stopped,
}

/// Progress notifications published by the poller.
#[derive(Debug, Clone)]
pub enum IndexerEvent {
    BackfillComplete {
        next_block: u64,
    },
    RangeIndexed {
        from_block: u64,
        to_block: u64,
        events: usize,
    },
    HeightUnavailable(RpcError),
    FetchFailed(FetchError),
}

/// What a single polling tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing newly confirmed.
    Idle { confirmed: Option<u64> },
    Indexed { from_block: u64, to_block: u64 },
    Failed,
}

pub struct ConfirmationPoller<S> {
    fetcher: Arc<BatchFetcher<S>>,
    confirmation_depth: u64,
    poll_interval: Duration,
    state: PollerState,
    events: broadcast::Sender<IndexerEvent>,
}

impl<S: TransferSource> ConfirmationPoller<S> {
    pub fn new(
        fetcher: Arc<BatchFetcher<S>>,
        confirmation_depth: u64,
        poll_interval: Duration,
        events: broadcast::Sender<IndexerEvent>,
    ) -> Self {
        Self {
            fetcher,
            confirmation_depth,
            poll_interval,
            state: PollerState::Backfilling,
            events,
        }
    }

    pub fn state(&self) -> PollerState {
        self.state
    }

    fn publish(&self, event: IndexerEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Query the head and derive the confirmed height from it.
    pub async fn current_confirmed(&self) -> Result<Option<u64>, RpcError> {
        let head = self.fetcher.source().current_height().await?;
        let confirmed = confirmed_height(head, self.confirmation_depth);
        debug!(head, confirmed = ?confirmed, "Chain height");
        Ok(confirmed)
    }

    /// Fetch `[from_block, confirmed]` and switch to polling.
    ///
    /// Returns the first block the polling phase will look at.
    pub async fn backfill(&mut self, from_block: u64) -> Result<u64, IndexerError> {
        let confirmed = self.current_confirmed().await?;
        self.backfill_to(from_block, confirmed).await
    }

    /// Backfill against an already queried confirmed height.
    pub async fn backfill_to(
        &mut self,
        from_block: u64,
        confirmed: Option<u64>,
    ) -> Result<u64, IndexerError> {
        info!(confirmed = ?confirmed, from_block, "Starting backfill");

        let next_block = match confirmed {
            Some(confirmed) => {
                self.fetcher.run(from_block, confirmed).await?;
                from_block.max(confirmed + 1)
            }
            None => from_block,
        };

        self.state = PollerState::Polling { next_block };
        info!(next_block, "Backfill complete, polling for new blocks");
        self.publish(IndexerEvent::BackfillComplete { next_block });
        Ok(next_block)
    }

    /// One polling iteration. Errors are reported, never returned.
    pub async fn tick(&mut self) -> TickOutcome {
        let PollerState::Polling { next_block } = self.state else {
            return TickOutcome::Idle { confirmed: None };
        };

        let head = match self.fetcher.source().current_height().await {
            Ok(head) => head,
            Err(e) => {
                error!(next_block, "Failed to query chain height: {}", e);
                self.publish(IndexerEvent::HeightUnavailable(e));
                return TickOutcome::Failed;
            }
        };

        let confirmed = confirmed_height(head, self.confirmation_depth);
        let to_block = match confirmed {
            Some(confirmed) if confirmed >= next_block => confirmed,
            _ => {
                debug!(head, next_block, "No newly confirmed blocks");
                return TickOutcome::Idle { confirmed };
            }
        };

        match self.fetcher.run(next_block, to_block).await {
            Ok(summary) => {
                self.state = PollerState::Polling {
                    next_block: to_block + 1,
                };
                self.publish(IndexerEvent::RangeIndexed {
                    from_block: next_block,
                    to_block,
                    events: summary.events,
                });
                TickOutcome::Indexed {
                    from_block: next_block,
                    to_block,
                }
            }
            Err(e) => {
                error!(next_block, "Polling fetch failed, retrying next tick: {}", e);
                self.publish(IndexerEvent::FetchFailed(e));
                TickOutcome::Failed
            }
        }
    }

    /// Tick every `poll_interval` until `shutdown` flips to `true` or its
    /// sender is dropped. An in-flight tick finishes before the loop exits.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = interval_at(Instant::now() + self.poll_interval, self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }

        self.state = PollerState::Stopped;
        info!("Poller stopped");
    }
}
