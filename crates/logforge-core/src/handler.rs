//! Event handler traits, registry, and the transactional handler context.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::IndexError;
use crate::store::StoreTransaction;

/// A decoded event — the typed record a handler receives. Event arguments
/// are decoded against the contract's ABI before dispatch; a handler never
/// sees raw topics or data.
#[derive(Debug, Clone)]
pub struct Event {
    pub chain_id: u64,
    /// Contract label the emitting address is registered under.
    pub contract: String,
    /// Event name (e.g. `"PositionPurchased"`).
    pub name: String,
    /// Emitting address, lowercase `0x…`.
    pub address: String,
    pub block_number: u64,
    pub block_hash: String,
    pub tx_hash: String,
    pub tx_index: u32,
    pub log_index: u32,
    /// Decoded arguments, keyed by ABI input name.
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl Event {
    /// A stable, collision-free id for per-event rows: `chainId-txHash-logIndex`.
    /// Required for idempotent reorg-replay.
    pub fn row_id(&self) -> String {
        format!("{}-{}-{}", self.chain_id, self.tx_hash, self.log_index)
    }
}

/// Read-only contract-call facility usable inside a handler, pinned to the
/// block of the event being processed — never "latest". Implementations live
/// in `logforge-evm`.
#[async_trait]
pub trait StateReader: Send + Sync {
    /// Execute a read-only call against `address` with pre-encoded
    /// `call_data` (`0x…`), at the pinned block. Returns the raw return
    /// data as `0x…` hex.
    async fn read(&self, address: &str, call_data: &str) -> Result<String, IndexError>;

    /// The block number every read is pinned to.
    fn pinned_block(&self) -> u64;
}

/// Everything a handler may touch while processing one event: the range's
/// store transaction, a block-pinned state reader, and chain metadata.
pub struct HandlerContext<'a> {
    pub db: &'a mut StoreTransaction,
    pub reader: &'a dyn StateReader,
    pub chain_id: u64,
    pub block_number: u64,
}

/// Trait for user-provided event handlers.
///
/// Handlers must be idempotent under replay (use `upsert`, and compose row
/// ids from chain-stable parts) — after a reorg the same range is re-applied
/// rather than undone.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Contract label this handler is keyed under (e.g. `"Market"`).
    fn contract(&self) -> &str;

    /// Event name this handler is keyed under (e.g. `"Trade"`).
    fn event(&self) -> &str;

    async fn handle(&self, event: &Event, ctx: &mut HandlerContext<'_>)
        -> Result<(), IndexError>;
}

/// Registry of event handlers, keyed by (contract label, event name).
///
/// Built explicitly at startup and passed into the engine — no ambient
/// module-load registration, so handler sets are testable in isolation.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<(String, String), Arc<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. One handler per (contract, event) pair; a later
    /// registration replaces the earlier one.
    pub fn on(&mut self, handler: Arc<dyn EventHandler>) {
        let key = (handler.contract().to_string(), handler.event().to_string());
        if self.handlers.insert(key, handler).is_some() {
            tracing::warn!("handler replaced an existing registration");
        }
    }

    /// Look up the handler for an event. `None` is not an error: many
    /// emitted events are intentionally unhandled.
    pub fn get(&self, contract: &str, event: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers
            .get(&(contract.to_string(), event.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{RowStore, RowWrite, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct NullStore;

    #[async_trait]
    impl RowStore for NullStore {
        async fn get(&self, _: &str, _: &str) -> Result<Option<serde_json::Value>, StoreError> {
            Ok(None)
        }
        async fn scan(&self, _: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError> {
            Ok(vec![])
        }
        async fn apply(&self, _: Vec<RowWrite>) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct NullReader;

    #[async_trait]
    impl StateReader for NullReader {
        async fn read(&self, _: &str, _: &str) -> Result<String, IndexError> {
            Ok("0x".into())
        }
        fn pinned_block(&self) -> u64 {
            0
        }
    }

    struct Counter {
        contract: String,
        event: String,
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl EventHandler for Counter {
        fn contract(&self) -> &str {
            &self.contract
        }
        fn event(&self) -> &str {
            &self.event
        }
        async fn handle(
            &self,
            _event: &Event,
            _ctx: &mut HandlerContext<'_>,
        ) -> Result<(), IndexError> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
    }

    fn sample_event() -> Event {
        Event {
            chain_id: 137,
            contract: "Market".into(),
            name: "Trade".into(),
            address: "0xabc".into(),
            block_number: 50,
            block_hash: "0xb".into(),
            tx_hash: "0xdead".into(),
            tx_index: 2,
            log_index: 9,
            fields: serde_json::Map::new(),
        }
    }

    #[test]
    fn row_id_composition() {
        assert_eq!(sample_event().row_id(), "137-0xdead-9");
    }

    #[tokio::test]
    async fn registry_keyed_by_contract_and_event() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.on(Arc::new(Counter {
            contract: "Market".into(),
            event: "Trade".into(),
            calls: Arc::clone(&calls),
        }));

        assert!(registry.get("Market", "Trade").is_some());
        assert!(registry.get("Market", "Resolved").is_none());
        assert!(registry.get("Poll", "Trade").is_none());

        let handler = Arc::clone(registry.get("Market", "Trade").unwrap());
        let mut tx = StoreTransaction::new(Arc::new(NullStore));
        let reader = NullReader;
        let mut ctx = HandlerContext {
            db: &mut tx,
            reader: &reader,
            chain_id: 137,
            block_number: 50,
        };
        handler.handle(&sample_event(), &mut ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn later_registration_replaces() {
        let a = Arc::new(AtomicU32::new(0));
        let b = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        for calls in [&a, &b] {
            registry.on(Arc::new(Counter {
                contract: "Market".into(),
                event: "Trade".into(),
                calls: Arc::clone(calls),
            }));
        }
        assert_eq!(registry.len(), 1);
    }
}
