//! Ethereum JSON-RPC wire types and their conversion into chain types.

use serde::{Deserialize, Serialize};

use crate::chain::{Block, ChainError, ChainTransaction, Receipt, ReceiptLog};

#[derive(Debug, Serialize)]
pub struct JsonRpcRequest<'a, T> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    pub params: T,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse<T> {
    pub result: Option<T>,
    pub error: Option<JsonRpcErrorObject>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Provider codes that mean "slow down" rather than "bad request".
const RATE_LIMIT_CODES: &[i64] = &[-32005, 429];

impl JsonRpcErrorObject {
    pub fn into_chain_error(self) -> ChainError {
        let lowered = self.message.to_ascii_lowercase();
        if RATE_LIMIT_CODES.contains(&self.code)
            || lowered.contains("rate limit")
            || lowered.contains("too many requests")
        {
            ChainError::RateLimited {
                retry_after_secs: None,
            }
        } else {
            ChainError::Rpc {
                code: self.code,
                message: self.message,
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcBlock {
    pub number: String,
    pub timestamp: String,
    #[serde(default)]
    pub transactions: Vec<RpcTransaction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcTransaction {
    pub hash: String,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub gas_price: Option<String>,
    #[serde(default)]
    pub max_fee_per_gas: Option<String>,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub logs: Vec<RpcLog>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcLog {
    pub address: String,
    /// Block-wide index as reported by the node. Only used in diagnostics.
    #[serde(default)]
    pub log_index: Option<String>,
    pub data: String,
}

impl TryFrom<RpcBlock> for Block {
    type Error = ChainError;

    fn try_from(block: RpcBlock) -> Result<Self, Self::Error> {
        let transactions = block
            .transactions
            .into_iter()
            .map(ChainTransaction::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block {
            number: parse_quantity_u64(&block.number)?,
            timestamp: parse_quantity_u64(&block.timestamp)?,
            transactions,
        })
    }
}

impl TryFrom<RpcTransaction> for ChainTransaction {
    type Error = ChainError;

    fn try_from(tx: RpcTransaction) -> Result<Self, Self::Error> {
        let gas_price = match tx.gas_price.as_deref().or(tx.max_fee_per_gas.as_deref()) {
            Some(raw) => parse_quantity_u128(raw)?,
            None => 0,
        };
        Ok(ChainTransaction {
            value: parse_quantity_u128(&tx.value)?,
            hash: tx.hash,
            to: tx.to,
            gas_price,
        })
    }
}

impl TryFrom<RpcReceipt> for Receipt {
    type Error = ChainError;

    fn try_from(receipt: RpcReceipt) -> Result<Self, Self::Error> {
        // Keys use the position inside this receipt; the node's block-wide
        // index changes when the transaction lands at another position.
        let logs = receipt
            .logs
            .into_iter()
            .enumerate()
            .map(|(position, log)| {
                let data = decode_data(&log.data).map_err(|err| {
                    ChainError::Malformed(format!(
                        "{err} (tx {}, block log index {})",
                        receipt.transaction_hash,
                        log.log_index.as_deref().unwrap_or("?")
                    ))
                })?;
                Ok(ReceiptLog {
                    log_index: position as u64,
                    data,
                    address: log.address,
                })
            })
            .collect::<Result<Vec<_>, ChainError>>()?;
        Ok(Receipt {
            transaction_hash: receipt.transaction_hash,
            logs,
        })
    }
}

fn strip_hex_prefix(raw: &str) -> &str {
    raw.strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw)
}

pub fn parse_quantity_u64(raw: &str) -> Result<u64, ChainError> {
    let digits = strip_hex_prefix(raw);
    if digits.is_empty() {
        return Ok(0);
    }
    u64::from_str_radix(digits, 16)
        .map_err(|err| ChainError::Malformed(format!("quantity `{raw}`: {err}")))
}

pub fn parse_quantity_u128(raw: &str) -> Result<u128, ChainError> {
    let digits = strip_hex_prefix(raw);
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|err| ChainError::Malformed(format!("quantity `{raw}`: {err}")))
}

pub fn decode_data(raw: &str) -> Result<Vec<u8>, ChainError> {
    hex::decode(strip_hex_prefix(raw))
        .map_err(|err| ChainError::Malformed(format!("log data: {err}")))
}

pub fn format_quantity(value: u64) -> String {
    format!("0x{value:x}")
}
