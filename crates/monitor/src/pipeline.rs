//! Per-height work: collect the candidates of one block, persist them, then
//! notify for the records that were new.

use deposit_tracker_domain::model::{ContractAddress, DepositRecord};
use deposit_tracker_domain::services::telemetry::{DEPOSITS_INGESTED_TOTAL, NOTIFICATIONS_TOTAL};
use deposit_tracker_domain::storage::{DepositStore, StorageError};
use futures_util::stream::{self, StreamExt, TryStreamExt};
use metrics::counter;
use tracing::{debug, warn};

use crate::chain::{ChainError, ChainReader, Receipt};
use crate::extractor::{extract_deposits, is_contract_transaction, BlockContext};
use crate::notify::Notifier;

/// Candidates extracted from one block, in block order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeightBatch {
    pub height: u64,
    pub records: Vec<DepositRecord>,
    pub decode_errors: usize,
}

/// Fetches the block at `height` and the receipts of every transaction sent to
/// `contract`. Receipts are fetched `concurrency` at a time and reassembled in
/// block order, so the output does not depend on response timing.
pub async fn collect_height<R>(
    reader: &R,
    contract: &ContractAddress,
    height: u64,
    concurrency: usize,
) -> Result<HeightBatch, ChainError>
where
    R: ChainReader + ?Sized,
{
    let block = reader.block_with_transactions(height).await?;
    let context = BlockContext {
        number: block.number,
        timestamp: block.timestamp,
    };

    let targeted: Vec<_> = block
        .transactions
        .iter()
        .filter(|tx| is_contract_transaction(tx, contract))
        .collect();

    let pending: Vec<_> = targeted
        .iter()
        .map(|tx| reader.transaction_receipt(&tx.hash))
        .collect();
    let receipts: Vec<Receipt> = stream::iter(pending)
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let mut batch = HeightBatch {
        height,
        ..HeightBatch::default()
    };
    for (tx, receipt) in targeted.into_iter().zip(receipts.iter()) {
        for candidate in extract_deposits(context, tx, receipt, contract) {
            match candidate {
                Ok(record) => batch.records.push(record),
                Err(err) => {
                    warn!(%err, height, "skipping undecodable deposit log");
                    counter!(DEPOSITS_INGESTED_TOTAL, "result" => "decode_error")
                        .increment(1);
                    batch.decode_errors += 1;
                }
            }
        }
    }

    debug!(
        height,
        transactions = block.transactions.len(),
        candidates = batch.records.len(),
        "collected height"
    );
    Ok(batch)
}

/// What happened to a batch of candidates. `error` is set when a save failed;
/// `inserted` still lists the records stored before the failure.
#[derive(Debug, Default)]
pub struct PersistReport {
    pub inserted: Vec<DepositRecord>,
    pub duplicates: usize,
    pub error: Option<StorageError>,
}

/// Saves candidates in order and stops at the first storage error.
pub async fn persist_candidates<S>(store: &S, records: &[DepositRecord]) -> PersistReport
where
    S: DepositStore + ?Sized,
{
    let mut report = PersistReport::default();
    for record in records {
        match store.save_deposit(record).await {
            Ok(outcome) if outcome.is_inserted() => {
                counter!(DEPOSITS_INGESTED_TOTAL, "result" => "inserted").increment(1);
                report.inserted.push(record.clone());
            }
            Ok(_) => {
                counter!(DEPOSITS_INGESTED_TOTAL, "result" => "duplicate").increment(1);
                report.duplicates += 1;
            }
            Err(err) => {
                report.error = Some(err);
                break;
            }
        }
    }
    report
}

/// Hands every newly stored record to the notifier. Failures are logged and
/// counted, never propagated. Returns how many were accepted.
pub fn notify_inserted<N>(notifier: &N, records: &[DepositRecord]) -> usize
where
    N: Notifier + ?Sized,
{
    let mut accepted = 0;
    for record in records {
        match notifier.notify(record) {
            Ok(()) => {
                counter!(NOTIFICATIONS_TOTAL, "result" => "queued").increment(1);
                accepted += 1;
            }
            Err(err) => {
                warn!(%err, tx = record.transaction_hash, "deposit notification dropped");
                counter!(NOTIFICATIONS_TOTAL, "result" => "dropped").increment(1);
            }
        }
    }
    accepted
}
