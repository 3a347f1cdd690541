// src/rpc.rs
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy::primitives::{Address, Bytes, B256, U64};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::chain::{ChainClient, LogFilter, RawLog};
use crate::error::ChainError;

#[derive(Debug, Deserialize, Clone)]
struct Log {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,

    // Null while the log is pending.
    #[serde(rename = "blockNumber")]
    block_number: Option<U64>,

    #[serde(rename = "transactionHash")]
    tx_hash: Option<B256>,

    #[serde(rename = "logIndex")]
    log_index: Option<U64>,

    #[serde(default)]
    removed: bool,
}

impl Log {
    fn into_raw(self) -> Option<RawLog> {
        if self.removed {
            return None;
        }
        Some(RawLog {
            address: self.address,
            topics: self.topics,
            data: self.data,
            block_number: self.block_number?.to::<u64>(),
            tx_hash: self.tx_hash?,
            log_index: self.log_index?.to::<u64>(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: U64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// JSON-RPC node client over HTTP.
#[derive(Debug)]
pub struct RpcClient {
    client: Client,
    url: String,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ChainError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ChainError> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params
        });

        debug!("Sending {} → {}", method, self.url);

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if resp.status() != StatusCode::OK {
            return Err(ChainError::Rpc {
                code: i64::from(resp.status().as_u16()),
                message: format!("HTTP {}", resp.status()),
            });
        }
        let parsed: RpcResponse = resp.json().await.map_err(transport)?;

        if let Some(error) = parsed.error {
            return Err(ChainError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        let result = parsed
            .result
            .ok_or_else(|| ChainError::Malformed(format!("{} response has no result", method)))?;
        serde_json::from_value(result).map_err(|e| ChainError::Malformed(format!("{}: {}", method, e)))
    }

    pub async fn get_block_number(&self) -> Result<u64, ChainError> {
        let number: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    pub async fn fetch_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, ChainError> {
        let mut params = json!({
            "fromBlock": format!("0x{:x}", filter.from_block),
            "toBlock": format!("0x{:x}", filter.to_block),
            "address": filter.address,
        });
        if let Some(topic0) = filter.topic0 {
            params["topics"] = json!([topic0]);
        }

        let logs: Vec<Log> = self.request("eth_getLogs", json!([params])).await?;
        debug!(
            "eth_getLogs {} ({} → {}): {} logs",
            filter.address,
            filter.from_block,
            filter.to_block,
            logs.len()
        );
        Ok(logs.into_iter().filter_map(Log::into_raw).collect())
    }

    pub async fn get_block_timestamp(&self, number: u64) -> Result<Option<u64>, ChainError> {
        let block: Option<BlockHeader> = self
            .request("eth_getBlockByNumber", json!([format!("0x{:x}", number), false]))
            .await?;
        Ok(block.map(|b| b.timestamp.to::<u64>()))
    }

    pub async fn eth_call(&self, to: Address, data: &[u8]) -> Result<Bytes, ChainError> {
        let call = json!({
            "to": to,
            "data": format!("0x{}", hex::encode(data)),
        });
        self.request("eth_call", json!([call, "latest"])).await
    }
}

fn transport(e: reqwest::Error) -> ChainError {
    if e.is_timeout() {
        ChainError::Timeout
    } else {
        ChainError::Transport(e)
    }
}

impl ChainClient for RpcClient {
    fn block_number(&self) -> BoxFuture<'_, Result<u64, ChainError>> {
        self.get_block_number().boxed()
    }

    fn get_logs(&self, filter: LogFilter) -> BoxFuture<'_, Result<Vec<RawLog>, ChainError>> {
        async move { self.fetch_logs(&filter).await }.boxed()
    }

    fn block_timestamp(&self, number: u64) -> BoxFuture<'_, Result<Option<u64>, ChainError>> {
        self.get_block_timestamp(number).boxed()
    }

    fn call(&self, to: Address, data: Bytes) -> BoxFuture<'_, Result<Bytes, ChainError>> {
        async move { self.eth_call(to, &data).await }.boxed()
    }
}
