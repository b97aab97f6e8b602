//! logforge-core — foundation for the reorg-safe, multi-chain event-indexing engine.
//!
//! # Architecture
//!
//! ```text
//! IndexerBuilder → SyncEngine (one per chain)
//!                      ├── FilterRegistry    (static + factory-discovered log filters)
//!                      ├── FactoryResolver   (child contract discovery)
//!                      ├── DispatchQueue     (block/tx/log ordered replay)
//!                      ├── HandlerRegistry   (one handler per contract:event)
//!                      ├── StoreTransaction  (all-or-nothing range writes)
//!                      ├── HeaderWindow      (recent hashes for reorg walk-back)
//!                      └── CheckpointStore   (crash recovery)
//! ```

pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod factory;
pub mod filter;
pub mod handler;
pub mod retry;
pub mod store;
pub mod tracker;
pub mod types;

pub use checkpoint::{ChainState, CheckpointStore, MemoryCheckpointStore};
pub use config::{ChainConfig, ContractConfig, FactoryConfig, IndexerConfig};
pub use dispatch::DispatchQueue;
pub use error::IndexError;
pub use factory::{Discovery, FactoryResolver, FactoryRule};
pub use filter::{FilterRegistry, LogFilter};
pub use handler::{Event, EventHandler, HandlerContext, HandlerRegistry, StateReader};
pub use retry::RetryPolicy;
pub use store::{RowStore, RowWrite, StoreError, StoreTransaction};
pub use tracker::HeaderWindow;
pub use types::{BlockHeader, BlockRange, LogEnvelope};
