//! Error types for the indexing pipeline.

use thiserror::Error;

use crate::store::StoreError;

/// Errors that can occur during indexing.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Transient RPC failure after backoff exhaustion. Pauses only the
    /// affected chain's sync loop.
    #[error("chain {chain_id} unavailable: {reason}")]
    ChainUnavailable { chain_id: u64, reason: String },

    /// Malformed ABI-encoded data. Non-retryable for the specific log, but
    /// the surrounding range fetch is retried since a transient bad response
    /// is indistinguishable from a real decode bug.
    #[error("decode error ({context}): {reason}")]
    Decode { context: String, reason: String },

    /// No common ancestor found within the configured depth or the locally
    /// recorded headers — fatal for that chain's loop; requires a manual
    /// checkpoint reset.
    #[error("chain {chain_id}: no common ancestor within {max_depth} blocks (walked {depth})")]
    DeepReorg {
        chain_id: u64,
        depth: u64,
        max_depth: u64,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    /// A handler failed; the whole range's transaction is rolled back.
    #[error("handler error in '{contract}:{event}': {reason}")]
    Handler {
        contract: String,
        event: String,
        reason: String,
    },

    #[error("indexer aborted: {reason}")]
    Aborted { reason: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl IndexError {
    /// Returns `true` if the sync engine should retry the failed range.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ChainUnavailable { .. } | Self::Handler { .. } | Self::Decode { .. } => true,
            Self::Store(e) => e.is_retryable(),
            Self::DeepReorg { .. } | Self::Aborted { .. } | Self::Config(_) => false,
        }
    }

    /// Returns `true` if the chain's loop must halt for operator intervention.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeepReorg { .. } | Self::Aborted { .. })
    }

    /// Retryable failures that should not count against the dispatch retry
    /// budget: the chain being unreachable says nothing about the handlers.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::ChainUnavailable { .. })
    }
}
