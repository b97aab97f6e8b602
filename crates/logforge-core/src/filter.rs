//! Log filter registry — the set of (address, event signature, start block)
//! filters currently active per chain.
//!
//! Factory discovery registers new filters mid-batch, concurrently with
//! fetch-path reads. Readers take copy-on-write snapshots (`Arc<Vec<_>>`),
//! so a registration never mutates a list a reader is iterating.

use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

/// A single active log filter. Immutable once created; never deleted
/// during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilter {
    pub chain_id: u64,
    /// Contract label the filter indexes for (e.g. `"Market"`).
    pub contract: String,
    /// Emitting address, lowercase `0x…`.
    pub address: String,
    /// Event signature hash (`topics[0]`).
    pub topic0: String,
    /// First block the filter applies to (inclusive).
    pub start_block: u64,
}

/// Registry of active log filters, snapshot-consistent under concurrent
/// registration.
#[derive(Default)]
pub struct FilterRegistry {
    filters: RwLock<Arc<Vec<LogFilter>>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter. Idempotent: a second registration of the same
    /// (chain_id, address, topic0) is a no-op and returns `false`.
    pub fn register(&self, filter: LogFilter) -> bool {
        let mut guard = self.filters.write().unwrap();
        if guard.iter().any(|f| {
            f.chain_id == filter.chain_id
                && f.address.eq_ignore_ascii_case(&filter.address)
                && f.topic0.eq_ignore_ascii_case(&filter.topic0)
        }) {
            return false;
        }
        tracing::debug!(
            chain_id = filter.chain_id,
            contract = %filter.contract,
            address = %filter.address,
            start_block = filter.start_block,
            "filter registered"
        );
        let mut next = guard.as_ref().clone();
        next.push(filter);
        *guard = Arc::new(next);
        true
    }

    /// A consistent snapshot of the filters active for `chain_id`.
    ///
    /// The snapshot is detached: registrations after this call do not
    /// appear in it.
    pub fn snapshot(&self, chain_id: u64) -> Vec<LogFilter> {
        let guard = Arc::clone(&self.filters.read().unwrap());
        guard
            .iter()
            .filter(|f| f.chain_id == chain_id)
            .cloned()
            .collect()
    }

    /// Addresses registered for the given event signature on a chain.
    pub fn addresses_matching(&self, chain_id: u64, topic0: &str) -> Vec<String> {
        let guard = Arc::clone(&self.filters.read().unwrap());
        guard
            .iter()
            .filter(|f| f.chain_id == chain_id && f.topic0.eq_ignore_ascii_case(topic0))
            .map(|f| f.address.clone())
            .collect()
    }

    /// The contract label registered at `address`, if any.
    pub fn contract_at(&self, chain_id: u64, address: &str) -> Option<String> {
        let guard = Arc::clone(&self.filters.read().unwrap());
        guard
            .iter()
            .find(|f| f.chain_id == chain_id && f.address.eq_ignore_ascii_case(address))
            .map(|f| f.contract.clone())
    }

    /// Total number of registered filters (all chains).
    pub fn len(&self) -> usize {
        self.filters.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
