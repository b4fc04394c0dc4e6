mod common;

use std::sync::Arc;

use common::{MockSource, addr, mint, spread_history, transfer};
use erc20_indexer::cursor::SharedCursor;
use erc20_indexer::ledger::{self, Ledger, SharedLedger};
use erc20_indexer::{BatchFetcher, RpcError, SENTINEL_ADDRESS};
use num_bigint::BigInt;

fn fetcher(source: MockSource, batch_size: u64) -> (BatchFetcher<MockSource>, SharedLedger, SharedCursor) {
    let ledger = Ledger::shared();
    let cursor = SharedCursor::new();
    let fetcher = BatchFetcher::new(Arc::new(source), ledger.clone(), cursor.clone(), batch_size);
    (fetcher, ledger, cursor)
}

#[tokio::test]
async fn batch_size_does_not_change_the_ledger() {
    let history = spread_history(250_000, 7_919);

    let (small, small_ledger, small_cursor) = fetcher(MockSource::new(0, history.clone()), 100_000);
    let (large, large_ledger, large_cursor) = fetcher(MockSource::new(0, history), 250_001);

    small.run(0, 250_000).await.unwrap();
    large.run(0, 250_000).await.unwrap();

    assert_eq!(
        small.source().requests(),
        vec![(0, 99_999), (100_000, 199_999), (200_000, 250_000)]
    );
    assert_eq!(large.source().requests(), vec![(0, 250_000)]);
    assert_eq!(
        ledger::read(&small_ledger).snapshot(),
        ledger::read(&large_ledger).snapshot()
    );
    assert_eq!(small_cursor.get(), large_cursor.get());
    assert_eq!(small_cursor.get().last_block_processed, Some(250_000));
}

#[tokio::test]
async fn failed_sub_range_is_resumable() {
    let history = spread_history(199_999, 1_237);
    let source = MockSource::new(0, history.clone());
    source.fail_range(110_000, 119_999);
    let (fetcher, ledger, cursor) = fetcher(source, 10_000);

    let err = fetcher.run(100_000, 199_999).await.unwrap_err();
    assert_eq!((err.from_block, err.to_block), (110_000, 119_999));
    assert_eq!(err.last_processed, Some(109_999));
    assert!(matches!(err.source, RpcError::Transport(_)));
    assert_eq!(cursor.get().last_block_processed, Some(109_999));
    assert_eq!(cursor.get().last_block_enqueued, Some(199_999));

    fetcher.source().clear_failures();
    fetcher.run(err.resume_from(), 199_999).await.unwrap();
    assert_eq!(cursor.get().last_block_processed, Some(199_999));

    let requests = fetcher.source().requests();
    assert_eq!(
        requests.iter().filter(|r| **r == (100_000, 109_999)).count(),
        1,
        "first sub-range must not be fetched twice"
    );

    let (reference, reference_ledger, _) = fetcher_for(history);
    reference.run(100_000, 199_999).await.unwrap();
    assert_eq!(
        ledger::read(&ledger).snapshot(),
        ledger::read(&reference_ledger).snapshot()
    );
}

fn fetcher_for(
    history: Vec<erc20_indexer::TransferEvent>,
) -> (BatchFetcher<MockSource>, SharedLedger, SharedCursor) {
    fetcher(MockSource::new(0, history), 10_000)
}

#[tokio::test]
async fn failure_on_first_sub_range_leaves_cursor_unprocessed() {
    let source = MockSource::new(0, vec![mint(addr(1), 5, 3)]);
    source.fail_range(0, 9);
    let (fetcher, ledger, cursor) = fetcher(source, 10);

    let err = fetcher.run(0, 25).await.unwrap_err();
    assert_eq!(err.last_processed, None);
    assert_eq!(err.resume_from(), 0);
    assert_eq!(cursor.get().last_block_processed, None);
    assert_eq!(cursor.get().last_block_enqueued, Some(25));
    assert!(ledger::read(&ledger).is_empty());
}

#[tokio::test]
async fn resume_point_stays_inside_a_disjoint_run() {
    let source = MockSource::new(0, vec![mint(addr(1), 5, 42), mint(addr(2), 9, 550)]);
    source.fail_range(500, 599);
    let (fetcher, ledger, cursor) = fetcher(source, 100);

    fetcher.run(0, 99).await.unwrap();
    let err = fetcher.run(500, 699).await.unwrap_err();

    assert_eq!(err.last_processed, None);
    assert_eq!(err.resume_from(), 500);
    assert_eq!(cursor.get().last_block_processed, Some(99));
    assert_eq!(ledger::read(&ledger).balance_of(&addr(2)), BigInt::default());

    fetcher.source().clear_failures();
    fetcher.run(err.resume_from(), 699).await.unwrap();
    assert_eq!(ledger::read(&ledger).balance_of(&addr(2)), BigInt::from(9));
    assert!(fetcher.source().requests().iter().all(|(from, _)| *from != 100));
}

#[tokio::test]
async fn empty_range_is_a_no_op() {
    let (fetcher, _, cursor) = fetcher(MockSource::new(0, vec![]), 10);

    let summary = fetcher.run(11, 10).await.unwrap();
    assert_eq!(summary.batches, 0);
    assert!(fetcher.source().requests().is_empty());
    assert_eq!(cursor.get().last_block_enqueued, None);
    assert_eq!(cursor.get().last_block_processed, None);
}

#[tokio::test]
async fn events_applied_in_order_with_sentinel_excluded() {
    let (a, b) = (addr(0xa), addr(0xb));
    let events = vec![
        transfer(SENTINEL_ADDRESS, a, 100, 1),
        transfer(a, b, 30, 2),
        transfer(b, SENTINEL_ADDRESS, 10, 3),
    ];
    let (fetcher, ledger, _) = fetcher(MockSource::new(0, events), 2);

    let summary = fetcher.run(1, 3).await.unwrap();
    assert_eq!(summary.batches, 2);
    assert_eq!(summary.events, 3);

    let balances = ledger::read(&ledger).snapshot();
    assert_eq!(balances.len(), 2);
    assert_eq!(balances[&a], BigInt::from(70));
    assert_eq!(balances[&b], BigInt::from(20));
    assert!(!balances.contains_key(&SENTINEL_ADDRESS));
}

#[tokio::test]
async fn concurrent_runs_are_serialized() {
    let history = spread_history(999, 13);
    let (fetcher, ledger, cursor) = fetcher(MockSource::new(0, history.clone()), 100);
    let fetcher = Arc::new(fetcher);

    let first = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.run(0, 499).await }
    });
    let second = tokio::spawn({
        let fetcher = fetcher.clone();
        async move { fetcher.run(500, 999).await }
    });
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let (reference, reference_ledger, _) = fetcher_for(history);
    reference.run(0, 999).await.unwrap();

    assert_eq!(
        ledger::read(&ledger).snapshot(),
        ledger::read(&reference_ledger).snapshot()
    );
    assert_eq!(cursor.get().last_block_processed, Some(999));
}
