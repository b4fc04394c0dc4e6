use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256, U256};

use crate::error::RpcError;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Mint/burn address. Never holds a balance entry.
pub const SENTINEL_ADDRESS: Address = Address::ZERO;

/// A decoded ERC20 `Transfer` log, ready to be folded into the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    pub from: Address,
    pub to: Address,
    pub amount: U256,
    pub block_number: u64,
    pub transaction_hash: B256,
    pub log_index: u64,
}

impl TransferEvent {
    pub fn is_mint(&self) -> bool {
        self.from == SENTINEL_ADDRESS
    }

    pub fn is_burn(&self) -> bool {
        self.to == SENTINEL_ADDRESS
    }
}

pub fn decode_transfer_event(log: &Log) -> Result<TransferEvent, RpcError> {
    let log_data = log.data();
    let decoded = Transfer::decode_raw_log(log.topics(), &log_data.data)
        .map_err(|e| RpcError::Decode(e.to_string()))?;

    let block_number = log
        .block_number
        .ok_or_else(|| RpcError::Decode("log is missing block number".into()))?;
    let transaction_hash = log
        .transaction_hash
        .ok_or_else(|| RpcError::Decode("log is missing transaction hash".into()))?;
    let log_index = log
        .log_index
        .ok_or_else(|| RpcError::Decode("log is missing log index".into()))?;

    Ok(TransferEvent {
        from: decoded.from,
        to: decoded.to,
        amount: decoded.value,
        block_number,
        transaction_hash,
        log_index,
    })
}
