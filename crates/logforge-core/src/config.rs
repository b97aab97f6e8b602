//! Declarative indexer configuration: chains, static contracts, and factory
//! relationships. Plain serde structs, loadable from JSON.

use serde::{Deserialize, Serialize};

use crate::factory::FactoryRule;

/// Top-level configuration: one entry per tracked chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexerConfig {
    pub chains: Vec<ChainConfig>,
}

impl IndexerConfig {
    pub fn chain(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

/// Per-chain sync configuration and contract set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Human-readable chain slug (e.g. `"polygon"`), used in logs.
    pub name: String,
    pub rpc_url: String,
    /// Scheduler tick interval. Shorter for fast chains, longer for slow ones.
    #[serde(default = "defaults::poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum blocks per processed range.
    #[serde(default = "defaults::batch_size")]
    pub batch_size: u64,
    /// Reorgs deeper than this halt the chain's loop for operator review.
    #[serde(default = "defaults::max_reorg_depth")]
    pub max_reorg_depth: u64,
    /// Concurrent per-filter log fetches within one tick.
    #[serde(default = "defaults::fetch_concurrency")]
    pub fetch_concurrency: usize,
    /// RPC requests-per-second budget for this chain's client.
    #[serde(default = "defaults::requests_per_second")]
    pub requests_per_second: f64,
    /// How many times a failing range is re-dispatched before the chain's
    /// loop escalates to a fatal error.
    #[serde(default = "defaults::dispatch_retry_budget")]
    pub dispatch_retry_budget: u32,
    #[serde(default)]
    pub contracts: Vec<ContractConfig>,
    #[serde(default)]
    pub factories: Vec<FactoryConfig>,
}

/// A statically configured contract instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContractConfig {
    /// ABI label (resolved against the ABI registry).
    pub label: String,
    /// Deployed address, `0x…`.
    pub address: String,
    /// First block to index from.
    pub start_block: u64,
}

/// A factory relationship; the chain id is implied by the enclosing
/// [`ChainConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactoryConfig {
    /// Parent contract label (must appear in `contracts`).
    pub parent: String,
    /// Creation event name on the parent.
    pub event: String,
    /// Decoded argument carrying the child address.
    pub address_arg: String,
    /// Child contract label (resolved against the ABI registry).
    pub child: String,
}

impl ChainConfig {
    /// Materialize this chain's factory rules.
    pub fn factory_rules(&self) -> Vec<FactoryRule> {
        self.factories
            .iter()
            .map(|f| FactoryRule {
                chain_id: self.chain_id,
                parent_contract: f.parent.clone(),
                event_name: f.event.clone(),
                address_arg: f.address_arg.clone(),
                child_contract: f.child.clone(),
            })
            .collect()
    }

    /// The block before the earliest configured start block — the initial
    /// "last processed" position when no checkpoint exists.
    pub fn initial_block(&self) -> u64 {
        self.contracts
            .iter()
            .map(|c| c.start_block)
            .min()
            .unwrap_or(0)
            .saturating_sub(1)
    }
}

mod defaults {
    pub fn poll_interval_ms() -> u64 {
        2000
    }
    pub fn batch_size() -> u64 {
        1000
    }
    pub fn max_reorg_depth() -> u64 {
        64
    }
    pub fn fetch_concurrency() -> usize {
        4
    }
    pub fn requests_per_second() -> f64 {
        10.0
    }
    pub fn dispatch_retry_budget() -> u32 {
        5
    }
}
