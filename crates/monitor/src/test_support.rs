//! In-memory chain, store and notifier used by the scanner tests.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use deposit_tracker_domain::model::{
    DepositKey, DepositRecord, DepositStats, SaveOutcome, DEFAULT_DEPOSIT_CONTRACT,
};
use deposit_tracker_domain::services::connectivity::ConnectionState;
use deposit_tracker_domain::storage::{
    DepositStore, MonitorStateStore, StorageError, StorageResult,
};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chain::{Block, ChainError, ChainReader, ChainTransaction, Receipt, ReceiptLog};
use crate::notify::{NotificationError, Notifier};

const FOREIGN_ADDRESS: &str = "0x1111111111111111111111111111111111111111";

/// A transaction to the deposit contract whose receipt carries `logs`
/// matching events, each with a distinct key.
pub fn deposit_tx(hash: &str, logs: u64) -> (ChainTransaction, Receipt) {
    let tx = ChainTransaction {
        hash: hash.to_string(),
        to: Some(DEFAULT_DEPOSIT_CONTRACT.to_string()),
        gas_price: 20_000_000_000,
        value: 32_000_000_000_000_000_000,
    };
    let logs = (0..logs)
        .map(|log_index| {
            let mut data = vec![0u8; 96];
            data[0] = log_index as u8;
            for (slot, byte) in data[1..48].iter_mut().zip(hash.bytes()) {
                *slot = byte;
            }
            ReceiptLog {
                address: DEFAULT_DEPOSIT_CONTRACT.to_string(),
                log_index,
                data,
            }
        })
        .collect();
    let receipt = Receipt {
        transaction_hash: hash.to_string(),
        logs,
    };
    (tx, receipt)
}

#[derive(Default)]
struct ChainState {
    tip: u64,
    blocks: BTreeMap<u64, Block>,
    receipts: HashMap<String, Receipt>,
    tip_failures: VecDeque<ChainError>,
    block_failures: HashMap<u64, ChainError>,
    receipt_failures: HashMap<String, ChainError>,
    cancel_after_block: Option<(u64, CancellationToken)>,
    tip_calls: usize,
    block_calls: Vec<u64>,
    receipt_calls: usize,
    call_times: Vec<Instant>,
}

/// Scriptable chain. Heights without a pushed block are empty blocks.
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new(tip: u64) -> Self {
        Self {
            state: Mutex::new(ChainState {
                tip,
                ..ChainState::default()
            }),
        }
    }

    fn with<T>(&self, f: impl FnOnce(&mut ChainState) -> T) -> T {
        let mut state = self.state.lock().expect("chain state poisoned");
        f(&mut state)
    }

    pub fn set_tip(&self, tip: u64) {
        self.with(|s| s.tip = tip);
    }

    pub fn push_block(&self, height: u64, txs: Vec<(ChainTransaction, Receipt)>) {
        self.with(|s| {
            let block = s.blocks.entry(height).or_insert_with(|| empty_block(height));
            for (tx, receipt) in txs {
                block.transactions.push(tx);
                s.receipts.insert(receipt.transaction_hash.clone(), receipt);
            }
        });
    }

    /// Adds a transaction to another address; its receipt must never be read.
    pub fn push_foreign_tx(&self, height: u64, hash: &str) {
        self.with(|s| {
            let block = s.blocks.entry(height).or_insert_with(|| empty_block(height));
            block.transactions.push(ChainTransaction {
                hash: hash.to_string(),
                to: Some(FOREIGN_ADDRESS.to_string()),
                gas_price: 1,
                value: 0,
            });
        });
    }

    pub fn truncate_log(&self, hash: &str, log_index: u64, len: usize) {
        self.with(|s| {
            if let Some(receipt) = s.receipts.get_mut(hash) {
                for log in receipt.logs.iter_mut().filter(|l| l.log_index == log_index) {
                    log.data.truncate(len);
                }
            }
        });
    }

    pub fn fail_tip_once(&self, err: ChainError) {
        self.with(|s| s.tip_failures.push_back(err));
    }

    pub fn fail_block_once(&self, height: u64, err: ChainError) {
        self.with(|s| s.block_failures.insert(height, err));
    }

    pub fn fail_receipt_once(&self, hash: &str, err: ChainError) {
        self.with(|s| s.receipt_failures.insert(hash.to_string(), err));
    }

    /// Cancels `token` once the block at `height` has been served.
    pub fn cancel_after_block(&self, height: u64, token: CancellationToken) {
        self.with(|s| s.cancel_after_block = Some((height, token)));
    }

    pub fn tip_calls(&self) -> usize {
        self.with(|s| s.tip_calls)
    }

    pub fn block_calls(&self) -> Vec<u64> {
        self.with(|s| s.block_calls.clone())
    }

    pub fn receipt_calls(&self) -> usize {
        self.with(|s| s.receipt_calls)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.with(|s| s.call_times.clone())
    }
}

fn empty_block(height: u64) -> Block {
    Block {
        number: height,
        timestamp: 1_700_000_000 + height * 12,
        transactions: Vec::new(),
    }
}

#[async_trait]
impl ChainReader for FakeChain {
    async fn tip_height(&self) -> Result<u64, ChainError> {
        self.with(|s| {
            s.tip_calls += 1;
            s.call_times.push(Instant::now());
            match s.tip_failures.pop_front() {
                Some(err) => Err(err),
                None => Ok(s.tip),
            }
        })
    }

    async fn block_with_transactions(&self, height: u64) -> Result<Block, ChainError> {
        let block = self.with(|s| {
            s.block_calls.push(height);
            s.call_times.push(Instant::now());
            if let Some(err) = s.block_failures.remove(&height) {
                return Err(err);
            }
            if let Some((at, token)) = &s.cancel_after_block {
                if *at == height {
                    token.cancel();
                }
            }
            Ok(s.blocks
                .get(&height)
                .cloned()
                .unwrap_or_else(|| empty_block(height)))
        });
        // Let tasks woken by a cancellation run before the scanner continues.
        tokio::task::yield_now().await;
        block
    }

    async fn transaction_receipt(&self, hash: &str) -> Result<Receipt, ChainError> {
        self.with(|s| {
            s.receipt_calls += 1;
            s.call_times.push(Instant::now());
            if let Some(err) = s.receipt_failures.remove(hash) {
                return Err(err);
            }
            s.receipts
                .get(hash)
                .cloned()
                .ok_or_else(|| ChainError::MissingReceipt(hash.to_string()))
        })
    }
}

/// Deposit and checkpoint store with switchable failures.
pub struct FakeStore {
    records: Mutex<BTreeMap<DepositKey, DepositRecord>>,
    checkpoint: Mutex<Option<u64>>,
    state: Mutex<ConnectionState>,
    failing_height: Mutex<Option<u64>>,
    fail_checkpoint: AtomicBool,
    saves: AtomicUsize,
}

impl Default for FakeStore {
    fn default() -> Self {
        Self {
            records: Mutex::default(),
            checkpoint: Mutex::default(),
            state: Mutex::new(ConnectionState::Connected),
            failing_height: Mutex::default(),
            fail_checkpoint: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }
}

impl FakeStore {
    pub fn with_checkpoint(height: u64) -> Self {
        let store = Self::default();
        *store.checkpoint.lock().expect("checkpoint") = Some(height);
        store
    }

    pub fn insert(&self, record: DepositRecord) {
        self.records
            .lock()
            .expect("records")
            .insert(record.key(), record);
    }

    pub fn set_state(&self, state: ConnectionState) {
        *self.state.lock().expect("state") = state;
    }

    /// Saves of records at `height` fail as unavailable until cleared.
    pub fn fail_saves_at(&self, height: Option<u64>) {
        *self.failing_height.lock().expect("failing height") = height;
    }

    pub fn fail_checkpoint_writes(&self, fail: bool) {
        self.fail_checkpoint.store(fail, Ordering::SeqCst);
    }

    pub fn checkpoint(&self) -> Option<u64> {
        *self.checkpoint.lock().expect("checkpoint")
    }

    pub fn records(&self) -> Vec<DepositRecord> {
        self.records
            .lock()
            .expect("records")
            .values()
            .cloned()
            .collect()
    }

    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DepositStore for FakeStore {
    async fn save_deposit(&self, record: &DepositRecord) -> StorageResult<SaveOutcome> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if *self.failing_height.lock().expect("failing height") == Some(record.block_number) {
            return Err(StorageError::Unavailable("connection reset".into()));
        }
        let mut records = self.records.lock().expect("records");
        if records.contains_key(&record.key()) {
            return Ok(SaveOutcome::DuplicateIgnored);
        }
        records.insert(record.key(), record.clone());
        Ok(SaveOutcome::Inserted)
    }

    async fn highest_persisted_height(&self) -> StorageResult<Option<u64>> {
        Ok(self
            .records
            .lock()
            .expect("records")
            .values()
            .map(|r| r.block_number)
            .max())
    }

    async fn deposit_stats(&self) -> StorageResult<DepositStats> {
        let records = self.records.lock().expect("records");
        Ok(DepositStats {
            count: records.len() as u64,
            total_value_wei: records.values().filter_map(DepositRecord::value_wei).sum(),
        })
    }

    async fn recent_deposits(&self, limit: u64) -> StorageResult<Vec<DepositRecord>> {
        let mut records = self.records();
        records.sort_by(|a, b| b.block_timestamp.cmp(&a.block_timestamp));
        records.truncate(limit as usize);
        Ok(records)
    }

    fn connection_state(&self) -> ConnectionState {
        *self.state.lock().expect("state")
    }
}

#[async_trait]
impl MonitorStateStore for FakeStore {
    async fn last_processed_height(&self) -> StorageResult<Option<u64>> {
        Ok(self.checkpoint())
    }

    async fn upsert_last_processed_height(&self, height: u64) -> StorageResult<()> {
        if self.fail_checkpoint.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("connection reset".into()));
        }
        *self.checkpoint.lock().expect("checkpoint") = Some(height);
        Ok(())
    }
}

/// Records what it was asked to deliver; can be switched to reject, or tied
/// to a token the way the Telegram dispatcher is.
#[derive(Default)]
pub struct FakeNotifier {
    delivered: Mutex<Vec<DepositRecord>>,
    failing: AtomicBool,
    stopped_by: Mutex<Option<CancellationToken>>,
}

impl FakeNotifier {
    /// Rejects with [`NotificationError::Closed`] once `token` is cancelled.
    pub fn stops_with(token: CancellationToken) -> Self {
        Self {
            stopped_by: Mutex::new(Some(token)),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delivered(&self) -> Vec<DepositRecord> {
        self.delivered.lock().expect("delivered").clone()
    }
}

impl Notifier for FakeNotifier {
    fn notify(&self, record: &DepositRecord) -> Result<(), NotificationError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotificationError::QueueFull);
        }
        let stopped = self
            .stopped_by
            .lock()
            .expect("stop token")
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled);
        if stopped {
            return Err(NotificationError::Closed);
        }
        self.delivered.lock().expect("delivered").push(record.clone());
        Ok(())
    }
}
