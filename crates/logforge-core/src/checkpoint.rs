//! Checkpoint store — persists, per chain, the last safely-processed block.
//!
//! The checkpoint is saved only after the range's store transaction commits.
//! A crash between the two is safe to recover from: the next startup
//! re-detects its position via the reorg check, and redoing the last range
//! is harmless because handlers are upsert-idempotent.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// The persisted sync position of one chain. One row per tracked chain.
///
/// Invariant: `block_hash` must equal the canonical hash of `block_number`
/// as currently known — a mismatch found by the reorg check triggers
/// rollback to the common ancestor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    pub chain_id: u64,
    /// Last safely-processed block number.
    pub block_number: u64,
    /// Hash of that block. Empty before the first range commits.
    pub block_hash: String,
    /// Unix timestamp of the last save.
    pub updated_at: i64,
}

impl ChainState {
    pub fn new(chain_id: u64, block_number: u64, block_hash: impl Into<String>) -> Self {
        Self {
            chain_id,
            block_number,
            block_hash: block_hash.into(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The next block to process.
    pub fn next_block(&self) -> u64 {
        self.block_number + 1
    }
}

/// Trait for persisting chain checkpoints.
///
/// `save` must be an atomic upsert, durable before the sync engine treats
/// the range as done. `load` doubles as the checkpoint inspection interface
/// for health checks.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, chain_id: u64) -> Result<Option<ChainState>, StoreError>;

    async fn save(&self, state: ChainState) -> Result<(), StoreError>;

    /// Remove a checkpoint (operator reset after a deep reorg).
    async fn delete(&self, chain_id: u64) -> Result<(), StoreError>;
}

// ─── In-memory store (tests / ephemeral runs) ────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory checkpoint store for tests and ephemeral indexers.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    data: Mutex<HashMap<u64, ChainState>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn load(&self, chain_id: u64) -> Result<Option<ChainState>, StoreError> {
        Ok(self.data.lock().unwrap().get(&chain_id).cloned())
    }

    async fn save(&self, state: ChainState) -> Result<(), StoreError> {
        self.data.lock().unwrap().insert(state.chain_id, state);
        Ok(())
    }

    async fn delete(&self, chain_id: u64) -> Result<(), StoreError> {
        self.data.lock().unwrap().remove(&chain_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryCheckpointStore::new();
        assert!(store.load(1).await.unwrap().is_none());

        store.save(ChainState::new(1, 1000, "0xabc")).await.unwrap();

        let state = store.load(1).await.unwrap().unwrap();
        assert_eq!(state.block_number, 1000);
        assert_eq!(state.block_hash, "0xabc");
        assert_eq!(state.next_block(), 1001);
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = MemoryCheckpointStore::new();
        store.save(ChainState::new(1, 100, "0xold")).await.unwrap();
        store.save(ChainState::new(1, 200, "0xnew")).await.unwrap();

        let state = store.load(1).await.unwrap().unwrap();
        assert_eq!(state.block_number, 200);
        assert_eq!(state.block_hash, "0xnew");
    }

    #[tokio::test]
    async fn chains_partitioned() {
        let store = MemoryCheckpointStore::new();
        store.save(ChainState::new(1, 100, "0xeth")).await.unwrap();
        store.save(ChainState::new(137, 500, "0xpol")).await.unwrap();

        assert_eq!(store.load(1).await.unwrap().unwrap().block_hash, "0xeth");
        assert_eq!(store.load(137).await.unwrap().unwrap().block_hash, "0xpol");

        store.delete(1).await.unwrap();
        assert!(store.load(1).await.unwrap().is_none());
        assert!(store.load(137).await.unwrap().is_some());
    }
}
