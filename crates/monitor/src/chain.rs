//! Chain data as the scanner sees it, and the reader contract over the node.
//!
//! Readers never retry; every failure is surfaced as a [`ChainError`] so the
//! scan loop can decide between skipping a tick and backing off.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    pub hash: String,
    /// `None` for contract creation.
    pub to: Option<String>,
    /// Wei.
    pub gas_price: u128,
    /// Wei.
    pub value: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub number: u64,
    /// Unix seconds.
    pub timestamp: u64,
    pub transactions: Vec<ChainTransaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptLog {
    pub address: String,
    /// Position within the transaction's receipt, starting at 0.
    pub log_index: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub transaction_hash: String,
    pub logs: Vec<ReceiptLog>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// Timeouts, DNS/connect failures, dropped connections, gateway errors.
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by rpc provider")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("malformed rpc response: {0}")]
    Malformed(String),
    #[error("block {0} not found")]
    MissingBlock(u64),
    #[error("receipt for {0} not found")]
    MissingReceipt(String),
}

#[async_trait]
pub trait ChainReader: Send + Sync {
    async fn tip_height(&self) -> Result<u64, ChainError>;
    async fn block_with_transactions(&self, height: u64) -> Result<Block, ChainError>;
    async fn transaction_receipt(&self, hash: &str) -> Result<Receipt, ChainError>;
}
