//! Running balance ledger built from transfer events.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use alloy_primitives::{Address, U256};
use num_bigint::{BigInt, Sign};

use crate::events::{SENTINEL_ADDRESS, TransferEvent};

/// Point-in-time copy of every tracked balance.
pub type Balances = HashMap<Address, BigInt>;

/// Ledger shared between the fetcher (writer) and façade readers.
pub type SharedLedger = Arc<RwLock<Ledger>>;

/// Balance map plus the accumulation rule.
///
/// Balances are signed so that replaying a partial history can go negative
/// without wrapping. The sentinel address never gets an entry.
#[derive(Debug, Default, Clone)]
pub struct Ledger {
    balances: Balances,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedLedger {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Fold one transfer into the balance map.
    ///
    /// Applying the same event twice doubles its effect; there is no
    /// deduplication at this level.
    pub fn apply(&mut self, event: &TransferEvent) {
        let amount = to_bigint(event.amount);

        if event.from != SENTINEL_ADDRESS {
            *self.balances.entry(event.from).or_default() -= &amount;
        }
        if event.to != SENTINEL_ADDRESS {
            *self.balances.entry(event.to).or_default() += amount;
        }
    }

    pub fn snapshot(&self) -> Balances {
        self.balances.clone()
    }

    pub fn balance_of(&self, address: &Address) -> BigInt {
        self.balances.get(address).cloned().unwrap_or_default()
    }

    /// Number of addresses with an entry (including zero balances).
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Sum of all stored balances, which equals minted minus burned.
    pub fn total(&self) -> BigInt {
        self.balances.values().sum()
    }

    /// Largest balances first, ties broken by address.
    pub fn top_holders(&self, count: usize) -> Vec<(Address, BigInt)> {
        sorted_balances(&self.balances)
            .into_iter()
            .take(count)
            .collect()
    }
}

/// Entries ordered by balance descending, then address ascending.
pub fn sorted_balances(balances: &Balances) -> Vec<(Address, BigInt)> {
    let mut entries: Vec<_> = balances
        .iter()
        .map(|(address, balance)| (*address, balance.clone()))
        .collect();
    entries.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    entries
}

pub fn to_bigint(value: U256) -> BigInt {
    BigInt::from_bytes_be(Sign::Plus, &value.to_be_bytes::<32>())
}

/// Lock helpers that ignore poisoning. A write never leaves a key half-updated.
pub fn read(ledger: &SharedLedger) -> RwLockReadGuard<'_, Ledger> {
    ledger.read().unwrap_or_else(PoisonError::into_inner)
}

pub fn write(ledger: &SharedLedger) -> RwLockWriteGuard<'_, Ledger> {
    ledger.write().unwrap_or_else(PoisonError::into_inner)
}
