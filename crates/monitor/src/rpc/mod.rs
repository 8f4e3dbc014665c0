use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use deposit_tracker_domain::services::telemetry::RPC_CALLS_TOTAL;
use metrics::counter;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::json;

use crate::chain::{Block, ChainError, ChainReader, Receipt};

mod types;

pub use types::{
    format_quantity, parse_quantity_u64, JsonRpcErrorObject, JsonRpcRequest, JsonRpcResponse,
    RpcBlock, RpcLog, RpcReceipt, RpcTransaction,
};

/// Chain reader over an Ethereum JSON-RPC HTTP endpoint. Every call is bounded
/// by the client's connect and response timeouts.
pub struct JsonRpcChainReader {
    client: reqwest::Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl JsonRpcChainReader {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        connect_timeout: Duration,
    ) -> Result<Self, ChainError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| ChainError::Network(err.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<P, T>(&self, method: &str, params: P) -> Result<Option<T>, ChainError>
    where
        P: Serialize + Send,
        T: DeserializeOwned,
    {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let result = self.send(&request).await;
        let label = match &result {
            Ok(_) => "ok",
            Err(ChainError::RateLimited { .. }) => "rate_limited",
            Err(ChainError::Network(_)) => "network_error",
            Err(_) => "error",
        };
        counter!(RPC_CALLS_TOTAL, "method" => method.to_string(), "result" => label)
            .increment(1);
        result
    }

    async fn send<P, T>(&self, request: &JsonRpcRequest<'_, P>) -> Result<Option<T>, ChainError>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after_secs = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse().ok());
            return Err(ChainError::RateLimited { retry_after_secs });
        }
        if status.is_server_error() {
            return Err(ChainError::Network(format!("http status {status}")));
        }
        if !status.is_success() {
            return Err(ChainError::Rpc {
                code: i64::from(status.as_u16()),
                message: format!("http status {status}"),
            });
        }

        let body: JsonRpcResponse<T> = response.json().await.map_err(|err| {
            if err.is_timeout() || err.is_connect() || err.is_body() {
                ChainError::Network(err.to_string())
            } else {
                ChainError::Malformed(err.to_string())
            }
        })?;
        if let Some(error) = body.error {
            return Err(error.into_chain_error());
        }
        Ok(body.result)
    }
}

fn transport_error(err: reqwest::Error) -> ChainError {
    if let Some(status) = err.status() {
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ChainError::RateLimited {
                retry_after_secs: None,
            };
        }
    }
    ChainError::Network(err.to_string())
}

#[async_trait]
impl ChainReader for JsonRpcChainReader {
    async fn tip_height(&self) -> Result<u64, ChainError> {
        let raw: String = self
            .call("eth_blockNumber", json!([]))
            .await?
            .ok_or_else(|| ChainError::Malformed("eth_blockNumber returned null".into()))?;
        parse_quantity_u64(&raw)
    }

    async fn block_with_transactions(&self, height: u64) -> Result<Block, ChainError> {
        let raw: RpcBlock = self
            .call("eth_getBlockByNumber", json!([format_quantity(height), true]))
            .await?
            .ok_or(ChainError::MissingBlock(height))?;
        Block::try_from(raw)
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Receipt, ChainError> {
        let raw: RpcReceipt = self
            .call("eth_getTransactionReceipt", json!([hash]))
            .await?
            .ok_or_else(|| ChainError::MissingReceipt(hash.to_string()))?;
        Receipt::try_from(raw)
    }
}
