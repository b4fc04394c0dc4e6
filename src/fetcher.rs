//! Range batching: walks `[start, end]` in fixed-size sub-ranges and folds
//! each sub-range's transfers into the ledger, in block order.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cursor::SharedCursor;
use crate::error::FetchError;
use crate::ledger::{self, SharedLedger};
use crate::rpc::TransferSource;

/// Inclusive sub-ranges of `[start, end]`, each at most `size` blocks wide.
///
/// Empty when `start > end`. `size` must be non-zero.
#[derive(Debug, Clone)]
pub struct BlockRanges {
    next: Option<u64>,
    end: u64,
    size: u64,
}

pub fn block_ranges(start: u64, end: u64, size: u64) -> BlockRanges {
    debug_assert!(size > 0, "batch size must be non-zero");
    BlockRanges {
        next: (start <= end).then_some(start),
        end,
        size: size.max(1),
    }
}

impl Iterator for BlockRanges {
    type Item = (u64, u64);

    fn next(&mut self) -> Option<Self::Item> {
        let from = self.next?;
        let to = from.saturating_add(self.size - 1).min(self.end);
        self.next = (to < self.end).then(|| to + 1);
        Some((from, to))
    }
}

/// Result of a completed run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub batches: usize,
    pub events: usize,
}

pub struct BatchFetcher<S> {
    source: Arc<S>,
    ledger: SharedLedger,
    cursor: SharedCursor,
    batch_size: u64,
    run_lock: Mutex<()>,
}

impl<S: TransferSource> BatchFetcher<S> {
    pub fn new(source: Arc<S>, ledger: SharedLedger, cursor: SharedCursor, batch_size: u64) -> Self {
        Self {
            source,
            ledger,
            cursor,
            batch_size,
            run_lock: Mutex::new(()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Fetch and apply every transfer in `[start_block, end_block]`.
    ///
    /// Runs are serialized: a second caller waits until the first finishes.
    /// On failure nothing from the failing sub-range has been applied and
    /// the cursor still points at the last completed sub-range. The error's
    /// `last_processed` only counts sub-ranges of this run.
    pub async fn run(&self, start_block: u64, end_block: u64) -> Result<RunSummary, FetchError> {
        let _guard = self.run_lock.lock().await;

        if start_block > end_block {
            return Ok(RunSummary::default());
        }

        info!("Blocks {}-{}", start_block, end_block);
        self.cursor.update(|c| c.mark_enqueued(end_block));

        let mut summary = RunSummary::default();
        let mut completed = None;
        for (from_block, to_block) in block_ranges(start_block, end_block, self.batch_size) {
            debug!(" Batch {}-{}", from_block, to_block);

            let events = self
                .source
                .get_events(from_block, to_block)
                .await
                .map_err(|source| FetchError {
                    from_block,
                    to_block,
                    last_processed: completed,
                    source,
                })?;

            {
                let mut ledger = ledger::write(&self.ledger);
                for event in &events {
                    debug!(
                        "  {}#{}: {} => {} ({})",
                        event.transaction_hash, event.log_index, event.from, event.to, event.amount
                    );
                    ledger.apply(event);
                }
            }
            self.cursor.update(|c| c.mark_processed(to_block));
            completed = Some(to_block);

            summary.batches += 1;
            summary.events += events.len();
        }

        info!(
            "Processed {} transfers in {} batch(es) up to block {}",
            summary.events, summary.batches, end_block
        );
        Ok(summary)
    }
}
