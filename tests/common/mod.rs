#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, B256, U256};
use async_trait::async_trait;
use erc20_indexer::poller::IndexerEvent;
use erc20_indexer::{RpcError, SENTINEL_ADDRESS, TransferEvent, TransferSource};
use tokio::sync::{Semaphore, broadcast, watch};

/// Scripted chain: a settable head, a fixed set of transfers and ranges that
/// fail on request. Every `get_events` call is recorded.
#[derive(Default)]
pub struct MockSource {
    height: AtomicU64,
    height_fails: AtomicBool,
    events: Mutex<Vec<TransferEvent>>,
    failing_ranges: Mutex<HashSet<(u64, u64)>>,
    requests: Mutex<Vec<(u64, u64)>>,
}

impl MockSource {
    pub fn new(height: u64, events: Vec<TransferEvent>) -> Self {
        let source = Self::default();
        source.set_height(height);
        *source.events.lock().unwrap() = events;
        source
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_height_fails(&self, fails: bool) {
        self.height_fails.store(fails, Ordering::SeqCst);
    }

    pub fn fail_range(&self, from: u64, to: u64) {
        self.failing_ranges.lock().unwrap().insert((from, to));
    }

    pub fn clear_failures(&self) {
        self.failing_ranges.lock().unwrap().clear();
    }

    pub fn push_event(&self, event: TransferEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.requests.lock().unwrap().clone()
    }

    pub fn max_requested_block(&self) -> Option<u64> {
        self.requests().iter().map(|(_, to)| *to).max()
    }
}

#[async_trait]
impl TransferSource for MockSource {
    async fn current_height(&self) -> Result<u64, RpcError> {
        if self.height_fails.load(Ordering::SeqCst) {
            return Err(RpcError::Transport("node unavailable".into()));
        }
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RpcError> {
        self.requests.lock().unwrap().push((from_block, to_block));

        if self
            .failing_ranges
            .lock()
            .unwrap()
            .contains(&(from_block, to_block))
        {
            return Err(RpcError::Transport(format!(
                "eth_getLogs {from_block}-{to_block} failed"
            )));
        }

        let mut events: Vec<_> = self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| (from_block..=to_block).contains(&e.block_number))
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.block_number, e.log_index));
        Ok(events)
    }
}

/// [`MockSource`] whose `get_events` calls block until released, one permit
/// per call. Entries are counted before blocking.
pub struct GatedSource {
    pub inner: MockSource,
    entered: watch::Sender<usize>,
    permits: Semaphore,
}

impl GatedSource {
    pub fn new(inner: MockSource) -> Self {
        Self {
            inner,
            entered: watch::Sender::new(0),
            permits: Semaphore::new(0),
        }
    }

    pub fn release(&self, calls: usize) {
        self.permits.add_permits(calls);
    }

    pub fn entered(&self) -> usize {
        *self.entered.borrow()
    }

    /// Wait until `calls` fetches have started.
    pub async fn wait_entered(&self, calls: usize) {
        let mut rx = self.entered.subscribe();
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|n| *n >= calls))
            .await
            .expect("timed out waiting for a fetch")
            .unwrap();
    }
}

#[async_trait]
impl TransferSource for GatedSource {
    async fn current_height(&self) -> Result<u64, RpcError> {
        self.inner.current_height().await
    }

    async fn get_events(
        &self,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<TransferEvent>, RpcError> {
        self.entered.send_modify(|n| *n += 1);
        self.permits.acquire().await.unwrap().forget();
        self.inner.get_events(from_block, to_block).await
    }
}

pub fn addr(byte: u8) -> Address {
    Address::repeat_byte(byte)
}

pub fn transfer(from: Address, to: Address, amount: u64, block_number: u64) -> TransferEvent {
    TransferEvent {
        from,
        to,
        amount: U256::from(amount),
        block_number,
        transaction_hash: B256::with_last_byte((block_number % 251) as u8),
        log_index: 0,
    }
}

pub fn mint(to: Address, amount: u64, block_number: u64) -> TransferEvent {
    transfer(SENTINEL_ADDRESS, to, amount, block_number)
}

/// Transfers spread over `[0, last_block]`, a few per sub-range.
pub fn spread_history(last_block: u64, step: u64) -> Vec<TransferEvent> {
    let mut events = Vec::new();
    let mut block = 0;
    let mut i = 0u64;
    while block <= last_block {
        let holder = addr((i % 5 + 1) as u8);
        let next = addr(((i + 1) % 5 + 1) as u8);
        events.push(mint(holder, 1_000 + i, block));
        events.push(TransferEvent {
            log_index: 1,
            ..transfer(holder, next, 10 + i, block)
        });
        if i % 3 == 0 {
            events.push(TransferEvent {
                log_index: 2,
                ..transfer(next, SENTINEL_ADDRESS, 5, block)
            });
        }
        block += step;
        i += 1;
    }
    events
}

/// Wait for the first event matching `pred`.
pub async fn wait_for(
    rx: &mut broadcast::Receiver<IndexerEvent>,
    pred: impl Fn(&IndexerEvent) -> bool,
) -> IndexerEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for indexer event")
}
