//! Processing cursor: how far the indexer has been asked to go and how far
//! it actually got.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

/// High-water marks of the batch fetcher.
///
/// - `last_block_enqueued`: upper bound of the most recent run that was
///   accepted, set before any of its events are fetched.
/// - `last_block_processed`: last sub-range boundary whose events are all in
///   the ledger.
///
/// Both start as `None` and never move backwards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingCursor {
    pub last_block_enqueued: Option<u64>,
    pub last_block_processed: Option<u64>,
}

impl ProcessingCursor {
    pub fn mark_enqueued(&mut self, block: u64) {
        self.last_block_enqueued = Some(raise(self.last_block_enqueued, block));
    }

    pub fn mark_processed(&mut self, block: u64) {
        self.last_block_processed = Some(raise(self.last_block_processed, block));
    }

    /// Next block to fetch, or `None` if nothing has been processed yet.
    pub fn next_block(&self) -> Option<u64> {
        self.last_block_processed.map(|block| block + 1)
    }

    /// Blocks accepted but not yet folded into the ledger.
    pub fn in_flight(&self) -> u64 {
        match (self.last_block_enqueued, self.last_block_processed) {
            (Some(enqueued), Some(processed)) => enqueued.saturating_sub(processed),
            (Some(enqueued), None) => enqueued,
            _ => 0,
        }
    }
}

fn raise(current: Option<u64>, block: u64) -> u64 {
    current.map_or(block, |current| current.max(block))
}

#[derive(Debug, Clone, Default)]
pub struct SharedCursor(Arc<RwLock<ProcessingCursor>>);

impl SharedCursor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> ProcessingCursor {
        *self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn update(&self, f: impl FnOnce(&mut ProcessingCursor)) {
        let mut cursor = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut cursor);
    }
}
