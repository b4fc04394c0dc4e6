//! Exact ERC20 balance ledger built from `Transfer` events.
//!
//! ```text
//! Indexer ── start() ──► ConfirmationPoller
//!                           ├── backfill [start_block, head - depth]
//!                           └── tick every poll_interval
//!                                   │
//!                                   ▼
//!                           BatchFetcher ── TransferSource (RpcClient)
//!                                   │
//!                                   ▼
//!                              Ledger + ProcessingCursor
//! ```

pub mod config;
pub mod cursor;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod indexer;
pub mod ledger;
pub mod poller;
pub mod report;
pub mod rpc;

pub use config::IndexerConfig;
pub use cursor::ProcessingCursor;
pub use error::{ConfigError, FetchError, IndexerError, RpcError};
pub use events::{SENTINEL_ADDRESS, TransferEvent};
pub use fetcher::BatchFetcher;
pub use indexer::Indexer;
pub use ledger::{Balances, Ledger};
pub use poller::{ConfirmationPoller, IndexerEvent};
pub use rpc::{RpcClient, TransferSource};
