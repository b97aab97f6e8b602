//! Shared types for the indexing pipeline.

use serde::{Deserialize, Serialize};

// ─── BlockHeader ─────────────────────────────────────────────────────────────

/// A minimal block header — enough for the sync engine to track progress and
/// verify parent-hash chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block number.
    pub number: u64,
    /// Block hash (`0x…`).
    pub hash: String,
    /// Parent block hash (`0x…`).
    pub parent_hash: String,
    /// Unix timestamp of the block (seconds since epoch).
    pub timestamp: i64,
}

impl BlockHeader {
    /// Returns `true` if `parent` is the direct parent of `self`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash == parent.hash
    }
}

// ─── LogEnvelope ─────────────────────────────────────────────────────────────

/// A raw, undecoded log as fetched from a chain — per-tick working data.
///
/// `parent_hash` is filled only by clients that have it at hand
/// (`eth_getLogs` does not return it); reorg verification uses block
/// headers, not envelopes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEnvelope {
    pub chain_id: u64,
    pub block_number: u64,
    pub block_hash: String,
    pub parent_hash: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub log_index: u32,
    /// Emitting contract address, lowercase `0x…`.
    pub address: String,
    /// `topics[0]` is the event signature hash.
    pub topics: Vec<String>,
    /// ABI-encoded non-indexed data, `0x…`.
    pub data: String,
}

impl LogEnvelope {
    /// The deterministic replay order key: (block, transaction index, log index).
    pub fn ordering_key(&self) -> (u64, u32, u32) {
        (self.block_number, self.tx_index, self.log_index)
    }

    /// The event signature hash, if the log has any topics.
    pub fn topic0(&self) -> Option<&str> {
        self.topics.first().map(String::as_str)
    }
}

// ─── BlockRange ──────────────────────────────────────────────────────────────

/// An inclusive range of unprocessed blocks, computed each scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to }
    }

    /// Number of blocks in the range.
    pub fn len(&self) -> u64 {
        self.to.saturating_sub(self.from) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.to < self.from
    }

    pub fn contains(&self, block: u64) -> bool {
        block >= self.from && block <= self.to
    }
}

impl std::fmt::Display for BlockRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {}]", self.from, self.to)
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
