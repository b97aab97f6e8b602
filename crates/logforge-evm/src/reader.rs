//! Block-pinned state reader handed to handlers.

use std::sync::Arc;

use async_trait::async_trait;

use logforge_core::handler::StateReader;
use logforge_core::IndexError;

use crate::client::EvmClient;

/// A [`StateReader`] pinning every contract call to one block — the block of
/// the event being processed. Replaying a range after a reorg therefore
/// reads the same chain state it read the first time (on archive nodes).
pub struct PinnedReader {
    client: Arc<dyn EvmClient>,
    block: u64,
}

impl PinnedReader {
    pub fn new(client: Arc<dyn EvmClient>, block: u64) -> Self {
        Self { client, block }
    }
}

#[async_trait]
impl StateReader for PinnedReader {
    async fn read(&self, address: &str, call_data: &str) -> Result<String, IndexError> {
        self.client.call(address, call_data, self.block).await
    }

    fn pinned_block(&self) -> u64 {
        self.block
    }
}
