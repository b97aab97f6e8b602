//! Per-chain sync engine: the tick loop, reorg handling, and dispatch.
//!
//! Each tick processes at most one block range: verify the checkpoint still
//! sits on the canonical chain, fetch the range's logs across all active
//! filters, replay them in (block, tx index, log index) order inside a
//! single store transaction, then commit and checkpoint. A reorg rolls the
//! checkpoint back to the last common ancestor and lets the next tick
//! re-process forward; a reorg deeper than `max_reorg_depth` is fatal.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use logforge_core::checkpoint::{ChainState, CheckpointStore};
use logforge_core::config::ChainConfig;
use logforge_core::dispatch::DispatchQueue;
use logforge_core::factory::{Discovery, FactoryResolver};
use logforge_core::filter::{FilterRegistry, LogFilter};
use logforge_core::handler::{HandlerContext, HandlerRegistry};
use logforge_core::retry::RetryPolicy;
use logforge_core::store::{RowStore, StoreTransaction};
use logforge_core::tracker::HeaderWindow;
use logforge_core::types::{BlockRange, LogEnvelope};
use logforge_core::IndexError;

use crate::abi::AbiRegistry;
use crate::client::EvmClient;
use crate::reader::PinnedReader;

/// Table holding factory-discovered contract bindings, written through the
/// same range transaction as the creation event and reloaded at bootstrap —
/// a child discovered before the current checkpoint survives restarts.
pub const DISCOVERED_CONTRACTS: &str = "discovered_contracts";

/// Ring of recently observed canonical block hashes, keyed by
/// `number % window capacity` so the table stays bounded. Written through
/// each range's transaction and reloaded at bootstrap — without it, a reorg
/// that happened while the process was down would find no local hashes to
/// walk back over and read as unrecoverably deep.
pub const RECENT_HEADERS: &str = "recent_headers";

/// Sync driver for one chain. Owns that chain's checkpoint position and
/// header window; everything shared (ABIs, handlers, stores, filters) comes
/// in as `Arc`s.
pub struct SyncEngine {
    chain: ChainConfig,
    client: Arc<dyn EvmClient>,
    abis: Arc<AbiRegistry>,
    filters: Arc<FilterRegistry>,
    factory: FactoryResolver,
    handlers: Arc<HandlerRegistry>,
    rows: Arc<dyn RowStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    window: HeaderWindow,
    retry: RetryPolicy,
    state: ChainState,
}

impl SyncEngine {
    pub fn new(
        chain: ChainConfig,
        client: Arc<dyn EvmClient>,
        abis: Arc<AbiRegistry>,
        filters: Arc<FilterRegistry>,
        handlers: Arc<HandlerRegistry>,
        rows: Arc<dyn RowStore>,
        checkpoints: Arc<dyn CheckpointStore>,
    ) -> Self {
        let factory = FactoryResolver::new(chain.factory_rules());
        let state = ChainState::new(chain.chain_id, chain.initial_block(), "");
        // Window larger than the reorg limit, so the walk-back never runs
        // out of local hashes before hitting it.
        let window = HeaderWindow::new((chain.max_reorg_depth as usize) * 2);
        Self {
            chain,
            client,
            abis,
            filters,
            factory,
            handlers,
            rows,
            checkpoints,
            window,
            retry: RetryPolicy::default(),
            state,
        }
    }

    /// Load the checkpoint (or derive the initial position) and register the
    /// statically configured contracts.
    pub async fn bootstrap(&mut self) -> Result<(), IndexError> {
        let chain_id = self.chain.chain_id;

        self.state = match self.checkpoints.load(chain_id).await? {
            Some(state) => state,
            // No hash yet: the first tick skips the parent check.
            None => ChainState::new(chain_id, self.chain.initial_block(), ""),
        };

        for contract in &self.chain.contracts {
            let address = contract.address.to_ascii_lowercase();
            self.register_contract(&contract.label, &address, contract.start_block)?;
        }

        // Factory children discovered in earlier runs.
        for (_, row) in self.rows.scan(DISCOVERED_CONTRACTS).await? {
            if row.get("chain_id").and_then(serde_json::Value::as_u64) != Some(chain_id) {
                continue;
            }
            let (Some(label), Some(address), Some(start_block)) = (
                row.get("contract").and_then(serde_json::Value::as_str),
                row.get("address").and_then(serde_json::Value::as_str),
                row.get("start_block").and_then(serde_json::Value::as_u64),
            ) else {
                warn!(chain = %self.chain.name, ?row, "malformed discovered-contract row");
                continue;
            };
            self.register_contract(label, address, start_block)?;
        }

        // Recent canonical hashes, so the reorg walk-back has local
        // knowledge even when the reorg straddled a restart.
        let span = self.window.capacity() as u64;
        for (_, row) in self.rows.scan(RECENT_HEADERS).await? {
            if row.get("chain_id").and_then(serde_json::Value::as_u64) != Some(chain_id) {
                continue;
            }
            let (Some(number), Some(hash)) = (
                row.get("number").and_then(serde_json::Value::as_u64),
                row.get("hash").and_then(serde_json::Value::as_str),
            ) else {
                warn!(chain = %self.chain.name, ?row, "malformed recent-header row");
                continue;
            };
            // Slots above the checkpoint are leftovers from a rolled-back
            // range; slots lapped by the ring are stale.
            if number > self.state.block_number || self.state.block_number - number >= span {
                continue;
            }
            self.window.record(number, hash);
        }

        info!(
            chain = %self.chain.name,
            chain_id,
            from_block = self.state.next_block(),
            filters = self.filters.snapshot(chain_id).len(),
            "sync engine bootstrapped"
        );
        Ok(())
    }

    /// Run until `shutdown` flips to `true` or a fatal error occurs.
    ///
    /// Transport failures pause and retry without limit — an unreachable
    /// chain is an outage, not a bug. Other retryable failures consume the
    /// dispatch retry budget; exhausting it aborts the chain.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), IndexError> {
        self.bootstrap().await?;

        let poll = Duration::from_millis(self.chain.poll_interval_ms);
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!(chain = %self.chain.name, "sync engine stopped");
                return Ok(());
            }

            match self.tick().await {
                Ok(true) => {
                    // Progress made; catch up without sleeping.
                    failures = 0;
                    continue;
                }
                Ok(false) => {
                    failures = 0;
                }
                Err(e) if e.is_fatal() => {
                    error!(chain = %self.chain.name, error = %e, "sync engine halted");
                    return Err(e);
                }
                Err(e) if e.is_transport() => {
                    warn!(chain = %self.chain.name, error = %e, "chain unavailable, will retry");
                }
                Err(e) => {
                    failures += 1;
                    if failures > self.chain.dispatch_retry_budget {
                        error!(
                            chain = %self.chain.name,
                            failures,
                            error = %e,
                            "dispatch retry budget exhausted"
                        );
                        return Err(IndexError::Aborted {
                            reason: format!(
                                "chain {}: range failed {failures} times: {e}",
                                self.chain.chain_id
                            ),
                        });
                    }
                    let delay = self.retry.delay_for(failures);
                    warn!(
                        chain = %self.chain.name,
                        failures,
                        budget = self.chain.dispatch_retry_budget,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "range failed, will retry"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(poll) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    /// Process at most one block range. Returns `Ok(true)` if state
    /// advanced (more work may be waiting), `Ok(false)` if the chain head
    /// has nothing new.
    pub async fn tick(&mut self) -> Result<bool, IndexError> {
        let chain_id = self.chain.chain_id;

        let head = self.client.chain_head().await?;
        let from = self.state.next_block();
        if head.number < from {
            return Ok(false);
        }

        // Canonical-chain check: the next block must extend the checkpoint.
        if !self.state.block_hash.is_empty() {
            let extends = match self.client.block_header(from).await? {
                Some(h) => h.parent_hash == self.state.block_hash,
                None => false,
            };
            if !extends {
                warn!(
                    chain = %self.chain.name,
                    checkpoint = self.state.block_number,
                    "reorg detected, walking back to common ancestor"
                );
                self.rollback_to_ancestor().await?;
                return Ok(true);
            }
        }

        let to = head.number.min(from + self.chain.batch_size - 1);
        let range = BlockRange::new(from, to);

        // Pin the range end's hash up front; it becomes the checkpoint.
        let end = self.client.block_header(to).await?.ok_or_else(|| {
            IndexError::ChainUnavailable {
                chain_id,
                reason: format!("block {to} disappeared while fetching range {range}"),
            }
        })?;

        let envelopes = self.fetch_range(range).await?;
        debug!(chain = %self.chain.name, range = %range, logs = envelopes.len(), "range fetched");

        let mut queue = DispatchQueue::new(envelopes);
        let mut tx = StoreTransaction::new(Arc::clone(&self.rows));
        let mut observed: Vec<(u64, String)> = Vec::new();

        match self.dispatch(&mut queue, &mut tx, range, &mut observed).await {
            Ok(dispatched) => {
                observed.push((end.number, end.hash.clone()));
                self.persist_headers(&mut tx, &observed).await?;
                let writes = tx.pending_writes();
                tx.commit().await?;
                for (number, hash) in observed {
                    self.window.record(number, hash);
                }
                self.state = ChainState::new(chain_id, to, end.hash);
                self.checkpoints.save(self.state.clone()).await?;
                info!(
                    chain = %self.chain.name,
                    range = %range,
                    dispatched,
                    writes,
                    "range committed"
                );
                Ok(true)
            }
            Err(e) => {
                tx.rollback();
                Err(e)
            }
        }
    }

    /// Fetch the range's logs across the current filter snapshot, a bounded
    /// number of filters at a time.
    async fn fetch_range(&self, range: BlockRange) -> Result<Vec<LogEnvelope>, IndexError> {
        let snapshot = self.filters.snapshot(self.chain.chain_id);
        let fetches = snapshot
            .into_iter()
            .filter(|f| f.start_block <= range.to)
            .map(|filter| {
                let client = Arc::clone(&self.client);
                let sub = BlockRange::new(range.from.max(filter.start_block), range.to);
                async move { client.logs(sub, &filter).await }
            });

        let results: Vec<Result<Vec<LogEnvelope>, IndexError>> = stream::iter(fetches)
            .buffer_unordered(self.chain.fetch_concurrency.max(1))
            .collect()
            .await;

        let mut envelopes = Vec::new();
        for result in results {
            envelopes.extend(result?);
        }
        Ok(envelopes)
    }

    /// Mirror the range's observed hashes into the bounded header ring,
    /// through the same transaction as the range's writes.
    async fn persist_headers(
        &self,
        tx: &mut StoreTransaction,
        observed: &[(u64, String)],
    ) -> Result<(), IndexError> {
        let slots = (self.window.capacity() as u64).max(1);
        for (number, hash) in observed {
            let id = format!("{}-{}", self.chain.chain_id, number % slots);
            let row = json!({
                "chain_id": self.chain.chain_id,
                "number": number,
                "hash": hash,
            });
            tx.upsert(RECENT_HEADERS, &id, row.clone(), row).await?;
        }
        Ok(())
    }

    /// Replay the queue in canonical order, discovering factory children as
    /// their creation events pass through. Returns the number of events
    /// dispatched to handlers.
    async fn dispatch(
        &self,
        queue: &mut DispatchQueue,
        tx: &mut StoreTransaction,
        range: BlockRange,
        observed: &mut Vec<(u64, String)>,
    ) -> Result<u64, IndexError> {
        let mut dispatched = 0;

        while let Some(env) = queue.pop() {
            if !env.block_hash.is_empty() {
                observed.push((env.block_number, env.block_hash.clone()));
            }

            let Some(event) = self.abis.decode_log(&env)? else {
                continue;
            };

            // Registration happens before the handler runs, so the child's
            // same-block logs can merge in behind the cursor.
            if let Some(discovery) = self.factory.resolve(&event) {
                let merged = self
                    .register_child(&discovery, BlockRange::new(discovery.start_block, range.to), queue)
                    .await?;
                if merged > 0 {
                    debug!(
                        chain = %self.chain.name,
                        child = %discovery.contract,
                        address = %discovery.address,
                        merged,
                        "merged child logs into dispatch order"
                    );
                }
                // The binding commits with the range, so a child discovered
                // before the checkpoint is re-registered at startup.
                let id = format!("{}-{}", discovery.chain_id, discovery.address);
                let row = json!({
                    "chain_id": discovery.chain_id,
                    "contract": discovery.contract,
                    "address": discovery.address,
                    "start_block": discovery.start_block,
                });
                tx.upsert(DISCOVERED_CONTRACTS, &id, row.clone(), row).await?;
            }

            let Some(handler) = self.handlers.get(&event.contract, &event.name) else {
                continue;
            };

            let reader = PinnedReader::new(Arc::clone(&self.client), event.block_number);
            let mut ctx = HandlerContext {
                db: &mut *tx,
                reader: &reader,
                chain_id: event.chain_id,
                block_number: event.block_number,
            };
            handler.handle(&event, &mut ctx).await.map_err(|e| match e {
                IndexError::Handler { .. } => e,
                other => IndexError::Handler {
                    contract: event.contract.clone(),
                    event: event.name.clone(),
                    reason: other.to_string(),
                },
            })?;
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Bind an address to a contract label and register one filter per ABI
    /// event. Returns the filters that were not already registered.
    fn register_contract(
        &self,
        label: &str,
        address: &str,
        start_block: u64,
    ) -> Result<Vec<LogFilter>, IndexError> {
        let abi = self.abis.contract(label).ok_or_else(|| {
            IndexError::Config(format!("no ABI registered for label '{label}'"))
        })?;
        self.abis.bind(self.chain.chain_id, address, label);

        let mut registered = Vec::new();
        for event in &abi.events {
            let filter = LogFilter {
                chain_id: self.chain.chain_id,
                contract: label.to_string(),
                address: address.to_string(),
                topic0: event.topic0(),
                start_block,
            };
            if self.filters.register(filter.clone()) {
                registered.push(filter);
            }
        }
        Ok(registered)
    }

    /// Bind a discovered child's ABI, register its filters, and pull its
    /// logs from the creation block through the range end into the queue.
    async fn register_child(
        &self,
        discovery: &Discovery,
        fetch_range: BlockRange,
        queue: &mut DispatchQueue,
    ) -> Result<usize, IndexError> {
        if self.abis.contract(&discovery.contract).is_none() {
            warn!(
                chain = %self.chain.name,
                child = %discovery.contract,
                "discovered child has no registered ABI, skipping"
            );
            return Ok(0);
        }

        let new_filters =
            self.register_contract(&discovery.contract, &discovery.address, discovery.start_block)?;

        let mut merged = 0;
        for filter in new_filters {
            let logs = self.client.logs(fetch_range, &filter).await?;
            merged += queue.merge(logs);
        }
        Ok(merged)
    }

    /// Walk the checkpoint back until a locally known hash matches the
    /// remote chain again. Bounded by `max_reorg_depth`.
    async fn rollback_to_ancestor(&mut self) -> Result<(), IndexError> {
        let chain_id = self.chain.chain_id;
        let max_depth = self.chain.max_reorg_depth;
        let floor = self.chain.initial_block();

        let mut depth: u64 = 0;
        let mut number = self.state.block_number;

        loop {
            if depth >= max_depth {
                return Err(IndexError::DeepReorg {
                    chain_id,
                    depth,
                    max_depth,
                });
            }
            if number <= floor {
                // Reorged past everything ever indexed: start over.
                warn!(chain = %self.chain.name, floor, "reorg reached initial block, resetting");
                self.state = ChainState::new(chain_id, floor, "");
                self.window.rewind_to(floor);
                self.checkpoints.save(self.state.clone()).await?;
                return Ok(());
            }

            let local = if number == self.state.block_number && !self.state.block_hash.is_empty() {
                Some(self.state.block_hash.clone())
            } else {
                self.window.hash_at(number).map(str::to_string)
            };

            match local {
                Some(local_hash) => {
                    let matches = match self.client.block_header(number).await? {
                        Some(remote) => remote.hash == local_hash,
                        None => false,
                    };
                    if matches {
                        info!(
                            chain = %self.chain.name,
                            ancestor = number,
                            depth,
                            "common ancestor found, checkpoint rolled back"
                        );
                        self.state = ChainState::new(chain_id, number, local_hash);
                        self.window.rewind_to(number);
                        self.checkpoints.save(self.state.clone()).await?;
                        return Ok(());
                    }
                }
                // A gap in the window is skipped; running out of window
                // entirely means the ancestor is beyond local knowledge.
                None => {
                    if self.window.oldest().map_or(true, |oldest| number < oldest) {
                        return Err(IndexError::DeepReorg {
                            chain_id,
                            depth,
                            max_depth,
                        });
                    }
                }
            }

            depth += 1;
            number -= 1;
        }
    }

    /// Current sync position (for inspection).
    pub fn state(&self) -> &ChainState {
        &self.state
    }
}
