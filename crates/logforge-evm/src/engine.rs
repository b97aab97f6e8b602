//! The multi-chain indexer runtime and its builder.
//!
//! One [`SyncEngine`] task per configured chain, sharing the ABI registry,
//! handler registry, and stores. Chains fail independently: one chain's
//! fatal error does not stop the others, but `run` reports it once every
//! task has finished.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use logforge_core::checkpoint::{ChainState, CheckpointStore, MemoryCheckpointStore};
use logforge_core::config::IndexerConfig;
use logforge_core::filter::FilterRegistry;
use logforge_core::handler::{EventHandler, HandlerRegistry};
use logforge_core::store::RowStore;
use logforge_core::IndexError;
use logforge_store::MemoryStore;

use crate::abi::{AbiRegistry, ContractAbi};
use crate::client::{EvmClient, HttpClientConfig, HttpEvmClient};
use crate::sync::SyncEngine;

/// A `(trigger, listener)` pair for cooperative shutdown: send `true` to
/// stop every chain loop at its next safe point (range boundary).
pub fn shutdown_channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

// ─── Builder ─────────────────────────────────────────────────────────────────

/// Builder for [`Indexer`]. ABIs and handlers are registered here, stores
/// and clients can be swapped (tests inject scripted chains and in-memory
/// stores); anything not provided gets a default.
pub struct IndexerBuilder {
    config: IndexerConfig,
    abis: AbiRegistry,
    handlers: HandlerRegistry,
    rows: Option<Arc<dyn RowStore>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    clients: HashMap<u64, Arc<dyn EvmClient>>,
}

impl IndexerBuilder {
    pub fn new(config: IndexerConfig) -> Self {
        Self {
            config,
            abis: AbiRegistry::new(),
            handlers: HandlerRegistry::new(),
            rows: None,
            checkpoints: None,
            clients: HashMap::new(),
        }
    }

    /// Register a contract ABI under its label.
    pub fn abi(mut self, abi: ContractAbi) -> Self {
        self.abis.add_contract(abi);
        self
    }

    /// Register an event handler.
    pub fn handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.on(handler);
        self
    }

    /// Use `rows` as the business-data store (default: in-memory).
    pub fn rows(mut self, rows: Arc<dyn RowStore>) -> Self {
        self.rows = Some(rows);
        self
    }

    /// Use `checkpoints` for sync positions (default: in-memory).
    pub fn checkpoints(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Use `client` for `chain_id` instead of an HTTP client built from the
    /// chain's `rpc_url`.
    pub fn client(mut self, chain_id: u64, client: Arc<dyn EvmClient>) -> Self {
        self.clients.insert(chain_id, client);
        self
    }

    /// Validate the configuration against the registered ABIs and assemble
    /// the runtime.
    pub fn build(mut self) -> Result<Indexer, IndexError> {
        for chain in &self.config.chains {
            for contract in &chain.contracts {
                if self.abis.contract(&contract.label).is_none() {
                    return Err(IndexError::Config(format!(
                        "chain {}: contract '{}' has no registered ABI",
                        chain.chain_id, contract.label
                    )));
                }
            }
            for factory in &chain.factories {
                for label in [&factory.parent, &factory.child] {
                    if self.abis.contract(label).is_none() {
                        return Err(IndexError::Config(format!(
                            "chain {}: factory references unknown label '{label}'",
                            chain.chain_id
                        )));
                    }
                }
            }

            if !self.clients.contains_key(&chain.chain_id) {
                let http = HttpEvmClient::new(
                    chain.chain_id,
                    &chain.rpc_url,
                    HttpClientConfig {
                        requests_per_second: chain.requests_per_second,
                        ..HttpClientConfig::default()
                    },
                )?;
                self.clients.insert(chain.chain_id, Arc::new(http));
            }
        }

        Ok(Indexer {
            config: self.config,
            abis: Arc::new(self.abis),
            handlers: Arc::new(self.handlers),
            filters: Arc::new(FilterRegistry::new()),
            rows: self.rows.unwrap_or_else(|| Arc::new(MemoryStore::new())),
            checkpoints: self
                .checkpoints
                .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
            clients: self.clients,
        })
    }
}

// ─── Indexer ─────────────────────────────────────────────────────────────────

/// The assembled multi-chain indexer.
pub struct Indexer {
    config: IndexerConfig,
    abis: Arc<AbiRegistry>,
    handlers: Arc<HandlerRegistry>,
    filters: Arc<FilterRegistry>,
    rows: Arc<dyn RowStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    clients: HashMap<u64, Arc<dyn EvmClient>>,
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer").finish_non_exhaustive()
    }
}

impl Indexer {
    pub fn builder(config: IndexerConfig) -> IndexerBuilder {
        IndexerBuilder::new(config)
    }

    /// Run every chain's sync loop until shutdown or until all have
    /// stopped. Returns the first chain failure, if any.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), IndexError> {
        let mut tasks = Vec::with_capacity(self.config.chains.len());

        for chain in &self.config.chains {
            let client = Arc::clone(self.clients.get(&chain.chain_id).ok_or_else(|| {
                IndexError::Config(format!("no client for chain {}", chain.chain_id))
            })?);
            let mut engine = SyncEngine::new(
                chain.clone(),
                client,
                Arc::clone(&self.abis),
                Arc::clone(&self.filters),
                Arc::clone(&self.handlers),
                Arc::clone(&self.rows),
                Arc::clone(&self.checkpoints),
            );
            let shutdown = shutdown.clone();
            let name = chain.name.clone();
            tasks.push(tokio::spawn(async move {
                (name, engine.run(shutdown).await)
            }));
        }

        info!(chains = tasks.len(), "indexer started");

        let mut first_failure = None;
        for task in tasks {
            match task.await {
                Ok((_, Ok(()))) => {}
                Ok((name, Err(e))) => {
                    error!(chain = %name, error = %e, "chain sync failed");
                    if first_failure.is_none() {
                        first_failure = Some(e);
                    }
                }
                Err(e) => {
                    if first_failure.is_none() {
                        first_failure = Some(IndexError::Aborted {
                            reason: format!("chain task panicked: {e}"),
                        });
                    }
                }
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// The persisted sync position of a chain, for health inspection.
    pub async fn checkpoint(&self, chain_id: u64) -> Result<Option<ChainState>, IndexError> {
        Ok(self.checkpoints.load(chain_id).await?)
    }

    /// The business-data store (tests inspect committed rows through this).
    pub fn rows(&self) -> &Arc<dyn RowStore> {
        &self.rows
    }

    /// The active filter registry.
    pub fn filters(&self) -> &Arc<FilterRegistry> {
        &self.filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::{EventAbi, EventInput, ParamKind};

    fn config_with_contract(label: &str) -> IndexerConfig {
        serde_json::from_value(serde_json::json!({
            "chains": [{
                "chain_id": 1,
                "name": "testnet",
                "rpc_url": "http://localhost:8545",
                "contracts": [
                    {"label": label, "address": "0xaaa", "start_block": 100},
                ],
            }]
        }))
        .unwrap()
    }

    #[test]
    fn build_rejects_unknown_contract_label() {
        let err = Indexer::builder(config_with_contract("Ghost"))
            .build()
            .unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }

    #[test]
    fn build_accepts_registered_labels() {
        let abi = ContractAbi::new(
            "Market",
            vec![EventAbi::new(
                "Trade",
                vec![EventInput::new("trader", ParamKind::Address, true)],
            )],
        );
        let indexer = Indexer::builder(config_with_contract("Market"))
            .abi(abi)
            .build()
            .unwrap();
        assert!(indexer.filters().is_empty(), "filters register at bootstrap");
    }

    #[test]
    fn build_rejects_factory_with_unknown_child() {
        let config: IndexerConfig = serde_json::from_value(serde_json::json!({
            "chains": [{
                "chain_id": 1,
                "name": "testnet",
                "rpc_url": "http://localhost:8545",
                "factories": [{
                    "parent": "PollFactory",
                    "event": "MarketCreated",
                    "address_arg": "market",
                    "child": "Market",
                }],
            }]
        }))
        .unwrap();
        let err = Indexer::builder(config).build().unwrap_err();
        assert!(matches!(err, IndexError::Config(_)));
    }
}
