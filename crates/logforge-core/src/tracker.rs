//! Header window — remembers the hashes of recently processed blocks so the
//! reorg walk-back can find the last common ancestor without re-reading
//! business tables.

use std::collections::BTreeMap;

/// Bounded map of block number → hash for recently processed blocks.
///
/// Only blocks whose hash the engine actually observed are recorded (range
/// ends and blocks that carried logs); gaps are fine — the walk-back skips
/// blocks it has no local hash for.
pub struct HeaderWindow {
    hashes: BTreeMap<u64, String>,
    capacity: usize,
}

impl HeaderWindow {
    /// A capacity of 128 comfortably covers the deepest reorgs seen on
    /// major EVM chains.
    pub fn new(capacity: usize) -> Self {
        Self {
            hashes: BTreeMap::new(),
            capacity,
        }
    }

    /// Record the observed hash of a block, evicting the oldest entries
    /// beyond capacity.
    pub fn record(&mut self, number: u64, hash: impl Into<String>) {
        self.hashes.insert(number, hash.into());
        while self.hashes.len() > self.capacity {
            self.hashes.pop_first();
        }
    }

    /// The locally recorded hash of `number`, if any.
    pub fn hash_at(&self, number: u64) -> Option<&str> {
        self.hashes.get(&number).map(String::as_str)
    }

    /// Discard everything above `number` (reorg rollback).
    pub fn rewind_to(&mut self, number: u64) {
        self.hashes.retain(|n, _| *n <= number);
    }

    /// Lowest block number still recorded.
    pub fn oldest(&self) -> Option<u64> {
        self.hashes.keys().next().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}
