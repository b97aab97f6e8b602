//! logforge-evm — EVM chain client, typed ABI event codec, and the per-chain
//! sync engine.
//!
//! # Sync tick
//!
//! ```text
//! IDLE → FETCHING_HEAD → COMPUTING_RANGE → FETCHING_LOGS → REORG_CHECK
//!      → DISPATCHING → COMMITTING → IDLE
//! ```
//!
//! Factory discovery interleaves with dispatch in block order: a child
//! contract registered mid-range has its same-block logs fetched and merged
//! into the remaining dispatch queue before later entries are processed.

pub mod abi;
pub mod client;
pub mod engine;
pub mod limit;
pub mod reader;
pub mod rpc;
pub mod sync;

pub use abi::{AbiRegistry, CallArg, ContractAbi, EventAbi, EventInput, ParamKind};
pub use client::{EvmClient, HttpClientConfig, HttpEvmClient, RetryingClient};
pub use engine::{shutdown_channel, Indexer, IndexerBuilder};
pub use reader::PinnedReader;
pub use sync::SyncEngine;
