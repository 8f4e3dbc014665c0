//! Deposit contract scanner: reads blocks from an Ethereum JSON-RPC node,
//! extracts deposit events, stores them idempotently and notifies about new
//! ones. The `deposit-monitor` binary wires these pieces to the environment;
//! other processes can embed the scanner through [`run_monitor`] or drive
//! [`Scanner::tick`] themselves.

pub mod chain;
pub mod cursor;
pub mod extractor;
pub mod notify;
pub mod pipeline;
pub mod rpc;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use chain::{Block, ChainError, ChainReader, ChainTransaction, Receipt, ReceiptLog};
pub use cursor::Cursor;
pub use extractor::{extract_deposits, BlockContext, DecodeError};
pub use notify::{LogNotifier, NotificationError, Notifier, TelegramNotifier};
pub use rpc::JsonRpcChainReader;
pub use worker::{
    run_monitor, shutdown_signal, supervise_scanner, MonitorError, ScanContext, ScanError,
    ScanPhase, ScanSettings, Scanner, TickOutcome,
};
