//! The chain client trait and its JSON-RPC/HTTP implementation.
//!
//! `HttpEvmClient` owns the full transport policy for one chain: a token
//! bucket rate limit, exponential backoff on transient HTTP failures, and
//! error classification. The sync engine only sees [`EvmClient`], so tests
//! drive it with scripted in-memory chains instead.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use logforge_core::filter::LogFilter;
use logforge_core::retry::RetryPolicy;
use logforge_core::types::{BlockHeader, BlockRange, LogEnvelope};
use logforge_core::IndexError;

use crate::limit::RateLimiter;
use crate::rpc::{parse_hex_u64, to_hex_u64, RpcRequest, RpcResponse};

// ─── EvmClient ───────────────────────────────────────────────────────────────

/// Read-only chain access, as the sync engine needs it.
#[async_trait]
pub trait EvmClient: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Latest block header.
    async fn chain_head(&self) -> Result<BlockHeader, IndexError>;

    /// Header of block `number`, or `None` if the node no longer has it
    /// (pruned past, or reorged away).
    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, IndexError>;

    /// Logs matching `filter` within `range` (inclusive).
    async fn logs(
        &self,
        range: BlockRange,
        filter: &LogFilter,
    ) -> Result<Vec<LogEnvelope>, IndexError>;

    /// Read-only contract call at a specific block. Returns raw return
    /// data as `0x…` hex.
    async fn call(&self, to: &str, data: &str, at_block: u64) -> Result<String, IndexError>;
}

// ─── HttpEvmClient ───────────────────────────────────────────────────────────

/// Transport configuration for [`HttpEvmClient`].
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub retry: RetryPolicy,
    /// Sustained requests-per-second budget (also the burst size).
    pub requests_per_second: f64,
    pub request_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            requests_per_second: 10.0,
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// JSON-RPC 2.0 client over HTTP for one chain.
pub struct HttpEvmClient {
    chain_id: u64,
    url: String,
    http: reqwest::Client,
    retry: RetryPolicy,
    limiter: RateLimiter,
    next_id: AtomicU64,
}

impl HttpEvmClient {
    pub fn new(chain_id: u64, url: impl Into<String>, config: HttpClientConfig) -> Result<Self, IndexError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| IndexError::Config(format!("http client: {e}")))?;

        Ok(Self {
            chain_id,
            url: url.into(),
            http,
            retry: config.retry,
            limiter: RateLimiter::new(config.requests_per_second),
            next_id: AtomicU64::new(1),
        })
    }

    /// Issue one JSON-RPC call, retrying transient HTTP failures per the
    /// retry policy. Node-reported errors and malformed bodies are not
    /// retried here.
    async fn request(&self, method: &str, params: Vec<Value>) -> Result<Value, IndexError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcRequest::new(id, method, params);

        let mut attempt: u32 = 0;
        loop {
            self.limiter.acquire().await;

            match self.send(&req).await {
                Ok(response) => {
                    return response.into_result().map_err(|e| IndexError::Decode {
                        context: format!("{method} (chain {})", self.chain_id),
                        reason: e.to_string(),
                    });
                }
                Err(reason) => {
                    attempt += 1;
                    let err = IndexError::ChainUnavailable {
                        chain_id: self.chain_id,
                        reason,
                    };
                    let Some(delay) = self.retry.backoff_for(&err, attempt) else {
                        return Err(err);
                    };
                    warn!(
                        chain_id = self.chain_id,
                        method,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "rpc request failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// One HTTP round-trip. `Err` means transport trouble (retryable);
    /// a parsed response is returned even when it carries a node error.
    async fn send(&self, req: &RpcRequest) -> Result<RpcResponse, String> {
        let resp = self
            .http
            .post(&self.url)
            .json(req)
            .send()
            .await
            .map_err(|e| format!("http: {e}"))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(format!("http status {status}"));
        }

        resp.json::<RpcResponse>()
            .await
            .map_err(|e| format!("body: {e}"))
    }

    fn decode_err(&self, context: &str, reason: impl Into<String>) -> IndexError {
        IndexError::Decode {
            context: format!("{context} (chain {})", self.chain_id),
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl EvmClient for HttpEvmClient {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn chain_head(&self) -> Result<BlockHeader, IndexError> {
        let result = self
            .request("eth_getBlockByNumber", vec![json!("latest"), json!(false)])
            .await?;
        parse_header(&result)
            .ok_or_else(|| self.decode_err("eth_getBlockByNumber", "malformed header"))
    }

    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, IndexError> {
        let result = self
            .request(
                "eth_getBlockByNumber",
                vec![json!(to_hex_u64(number)), json!(false)],
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_header(&result)
            .map(Some)
            .ok_or_else(|| self.decode_err("eth_getBlockByNumber", "malformed header"))
    }

    async fn logs(
        &self,
        range: BlockRange,
        filter: &LogFilter,
    ) -> Result<Vec<LogEnvelope>, IndexError> {
        let params = json!({
            "fromBlock": to_hex_u64(range.from),
            "toBlock": to_hex_u64(range.to),
            "address": filter.address,
            "topics": [filter.topic0],
        });
        let result = self.request("eth_getLogs", vec![params]).await?;

        let entries = result
            .as_array()
            .ok_or_else(|| self.decode_err("eth_getLogs", "result is not an array"))?;

        let mut envelopes = Vec::with_capacity(entries.len());
        for entry in entries {
            // Logs from reorged-away blocks come flagged; skip them.
            if entry.get("removed").and_then(Value::as_bool) == Some(true) {
                continue;
            }
            let env = parse_log(self.chain_id, entry)
                .ok_or_else(|| self.decode_err("eth_getLogs", "malformed log entry"))?;
            envelopes.push(env);
        }

        debug!(
            chain_id = self.chain_id,
            address = %filter.address,
            range = %range,
            count = envelopes.len(),
            "fetched logs"
        );
        Ok(envelopes)
    }

    async fn call(&self, to: &str, data: &str, at_block: u64) -> Result<String, IndexError> {
        let result = self
            .request(
                "eth_call",
                vec![json!({"to": to, "data": data}), json!(to_hex_u64(at_block))],
            )
            .await?;
        result
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| self.decode_err("eth_call", "result is not a string"))
    }
}

// ─── Response parsing ────────────────────────────────────────────────────────

fn parse_header(value: &Value) -> Option<BlockHeader> {
    Some(BlockHeader {
        number: parse_hex_u64(value.get("number")?.as_str()?)?,
        hash: value.get("hash")?.as_str()?.to_string(),
        parent_hash: value.get("parentHash")?.as_str()?.to_string(),
        timestamp: parse_hex_u64(value.get("timestamp")?.as_str()?)? as i64,
    })
}

fn parse_log(chain_id: u64, value: &Value) -> Option<LogEnvelope> {
    let topics = value
        .get("topics")?
        .as_array()?
        .iter()
        .map(|t| t.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;

    Some(LogEnvelope {
        chain_id,
        block_number: parse_hex_u64(value.get("blockNumber")?.as_str()?)?,
        block_hash: value.get("blockHash")?.as_str()?.to_string(),
        // eth_getLogs does not carry the parent hash; reorg checks use
        // headers instead.
        parent_hash: String::new(),
        tx_hash: value.get("transactionHash")?.as_str()?.to_string(),
        tx_index: parse_hex_u64(value.get("transactionIndex")?.as_str()?)? as u32,
        log_index: parse_hex_u64(value.get("logIndex")?.as_str()?)? as u32,
        address: value.get("address")?.as_str()?.to_ascii_lowercase(),
        topics,
        data: value.get("data")?.as_str()?.to_string(),
    })
}

// ─── RetryingClient ──────────────────────────────────────────────────────────

/// Decorator adding a retry layer over any [`EvmClient`] — used to wrap
/// clients that do not carry their own transport retries (test doubles,
/// mainly; `HttpEvmClient` retries internally).
pub struct RetryingClient<C> {
    inner: Arc<C>,
    retry: RetryPolicy,
}

impl<C: EvmClient> RetryingClient<C> {
    pub fn new(inner: Arc<C>, retry: RetryPolicy) -> Self {
        Self { inner, retry }
    }

    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, IndexError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transport() => {
                    attempt += 1;
                    let Some(delay) = self.retry.backoff_for(&e, attempt) else {
                        return Err(e);
                    };
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl<C: EvmClient> EvmClient for RetryingClient<C> {
    fn chain_id(&self) -> u64 {
        self.inner.chain_id()
    }

    async fn chain_head(&self) -> Result<BlockHeader, IndexError> {
        self.with_retries(|| self.inner.chain_head()).await
    }

    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>, IndexError> {
        self.with_retries(|| self.inner.block_header(number)).await
    }

    async fn logs(
        &self,
        range: BlockRange,
        filter: &LogFilter,
    ) -> Result<Vec<LogEnvelope>, IndexError> {
        self.with_retries(|| self.inner.logs(range, filter)).await
    }

    async fn call(&self, to: &str, data: &str, at_block: u64) -> Result<String, IndexError> {
        self.with_retries(|| self.inner.call(to, data, at_block))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_parsing() {
        let header = parse_header(&json!({
            "number": "0x64",
            "hash": "0xaaa",
            "parentHash": "0x999",
            "timestamp": "0x5f5e100",
        }))
        .unwrap();
        assert_eq!(header.number, 100);
        assert_eq!(header.hash, "0xaaa");
        assert_eq!(header.parent_hash, "0x999");
        assert_eq!(header.timestamp, 100_000_000);

        assert!(parse_header(&json!({"number": "0x64"})).is_none());
    }

    #[test]
    fn log_parsing_lowercases_address() {
        let env = parse_log(
            137,
            &json!({
                "blockNumber": "0x64",
                "blockHash": "0xb",
                "transactionHash": "0xt",
                "transactionIndex": "0x2",
                "logIndex": "0x7",
                "address": "0xABCDEF0000000000000000000000000000000001",
                "topics": ["0xt0", "0xt1"],
                "data": "0x",
            }),
        )
        .unwrap();
        assert_eq!(env.chain_id, 137);
        assert_eq!(env.ordering_key(), (100, 2, 7));
        assert_eq!(env.address, "0xabcdef0000000000000000000000000000000001");
        assert_eq!(env.topic0(), Some("0xt0"));
    }

    #[tokio::test]
    async fn retrying_client_gives_up_after_budget() {
        struct AlwaysDown;

        #[async_trait]
        impl EvmClient for AlwaysDown {
            fn chain_id(&self) -> u64 {
                1
            }
            async fn chain_head(&self) -> Result<BlockHeader, IndexError> {
                Err(IndexError::ChainUnavailable {
                    chain_id: 1,
                    reason: "down".into(),
                })
            }
            async fn block_header(&self, _: u64) -> Result<Option<BlockHeader>, IndexError> {
                unreachable!()
            }
            async fn logs(
                &self,
                _: BlockRange,
                _: &LogFilter,
            ) -> Result<Vec<LogEnvelope>, IndexError> {
                unreachable!()
            }
            async fn call(&self, _: &str, _: &str, _: u64) -> Result<String, IndexError> {
                unreachable!()
            }
        }

        let client = RetryingClient::new(
            Arc::new(AlwaysDown),
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                growth: 1.0,
                jitter: 0.0,
            },
        );
        let err = client.chain_head().await.unwrap_err();
        assert!(err.is_transport());
    }
}
