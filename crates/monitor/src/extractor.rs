//! Pure extraction of deposit candidates from a transaction and its receipt.

use deposit_tracker_domain::model::{ContractAddress, DepositRecord, PUBKEY_LENGTH};
use thiserror::Error;

use crate::chain::{ChainTransaction, Receipt, ReceiptLog};

/// Block fields copied onto every candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockContext {
    pub number: u64,
    pub timestamp: u64,
}

/// A matching log whose payload is too short to hold a validator key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("log {log_index} of {transaction_hash} carries {actual} payload bytes, need {PUBKEY_LENGTH}")]
pub struct DecodeError {
    pub transaction_hash: String,
    pub log_index: u64,
    pub actual: usize,
}

/// Whether the transaction is addressed to the watched contract.
pub fn is_contract_transaction(tx: &ChainTransaction, contract: &ContractAddress) -> bool {
    tx.to.as_deref().is_some_and(|to| contract.matches(to))
}

/// Yields one candidate per log emitted by `contract`, provided the
/// transaction itself targets the contract. Lazy and side-effect free, so the
/// same inputs always produce the same sequence.
pub fn extract_deposits<'a>(
    block: BlockContext,
    tx: &'a ChainTransaction,
    receipt: &'a Receipt,
    contract: &'a ContractAddress,
) -> impl Iterator<Item = Result<DepositRecord, DecodeError>> + 'a {
    let targeted = is_contract_transaction(tx, contract);
    receipt
        .logs
        .iter()
        .filter(move |log| targeted && contract.matches(&log.address))
        .map(move |log| decode_deposit(block, tx, log))
}

fn decode_deposit(
    block: BlockContext,
    tx: &ChainTransaction,
    log: &ReceiptLog,
) -> Result<DepositRecord, DecodeError> {
    let pubkey = decode_pubkey(&log.data).ok_or_else(|| DecodeError {
        transaction_hash: tx.hash.clone(),
        log_index: log.log_index,
        actual: log.data.len(),
    })?;
    Ok(DepositRecord {
        block_number: block.number,
        block_timestamp: block.timestamp,
        fee: tx.gas_price.to_string(),
        transaction_hash: tx.hash.clone(),
        log_index: log.log_index,
        pubkey,
        value: tx.value.to_string(),
    })
}

/// `0x`-prefixed hex of the first [`PUBKEY_LENGTH`] payload bytes.
pub fn decode_pubkey(data: &[u8]) -> Option<String> {
    data.get(..PUBKEY_LENGTH)
        .map(|key| format!("0x{}", hex::encode(key)))
}
