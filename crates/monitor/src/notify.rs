//! Best-effort deposit notifications.
//!
//! `notify` never blocks the scan: the Telegram notifier only enqueues the
//! message and a background dispatcher performs the HTTP call. Messages that
//! cannot be queued or delivered are logged and dropped.

use std::sync::Arc;
use std::time::Duration;

use deposit_tracker_domain::config::TelegramCredentials;
use deposit_tracker_domain::model::{format_ether, DepositRecord};
use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";
const QUEUE_CAPACITY: usize = 256;
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("notification queue is full")]
    QueueFull,
    #[error("notification dispatcher has stopped")]
    Closed,
}

pub trait Notifier: Send + Sync {
    /// Hands the record to the sink without waiting for delivery.
    fn notify(&self, record: &DepositRecord) -> Result<(), NotificationError>;
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify(&self, record: &DepositRecord) -> Result<(), NotificationError> {
        (**self).notify(record)
    }
}

impl<N: Notifier + ?Sized> Notifier for Arc<N> {
    fn notify(&self, record: &DepositRecord) -> Result<(), NotificationError> {
        (**self).notify(record)
    }
}

/// Used when no chat credentials are configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, record: &DepositRecord) -> Result<(), NotificationError> {
        info!(
            tx = record.transaction_hash,
            log_index = record.log_index,
            "notification sink not configured, deposit not forwarded"
        );
        Ok(())
    }
}

pub fn deposit_message(record: &DepositRecord) -> String {
    let amount = record
        .value_wei()
        .map(format_ether)
        .unwrap_or_else(|| record.value.clone());
    format!(
        "New deposit detected:\nHash: {}\nAmount: {} ETH",
        record.transaction_hash, amount
    )
}

/// Sends deposit messages to one Telegram chat.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    queue: mpsc::Sender<String>,
}

impl TelegramNotifier {
    /// Starts the dispatcher task; it drains queued messages and exits once
    /// `cancel` fires.
    pub fn spawn(
        credentials: TelegramCredentials,
        cancel: CancellationToken,
    ) -> Result<(Self, JoinHandle<()>), reqwest::Error> {
        let client = reqwest::Client::builder().timeout(SEND_TIMEOUT).build()?;
        let (queue, rx) = mpsc::channel(QUEUE_CAPACITY);
        let dispatcher = TelegramDispatcher {
            client,
            endpoint: format!(
                "{}/bot{}/sendMessage",
                TELEGRAM_API_BASE, credentials.bot_token
            ),
            chat_id: credentials.chat_id,
        };
        let handle = tokio::spawn(dispatcher.run(rx, cancel));
        Ok((Self { queue }, handle))
    }
}

impl Notifier for TelegramNotifier {
    fn notify(&self, record: &DepositRecord) -> Result<(), NotificationError> {
        self.queue
            .try_send(deposit_message(record))
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => NotificationError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => NotificationError::Closed,
            })
    }
}

struct TelegramDispatcher {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramDispatcher {
    async fn run(self, mut rx: mpsc::Receiver<String>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                message = rx.recv() => match message {
                    Some(text) => self.send(&text).await,
                    None => return,
                },
            }
        }

        rx.close();
        while let Some(text) = rx.recv().await {
            self.send(&text).await;
        }
    }

    async fn send(&self, text: &str) {
        let result = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "chat_id": self.chat_id,
                "text": text,
                "disable_web_page_preview": true,
            }))
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) => warn!(status = %resp.status(), "telegram send failed"),
            Err(err) => warn!(?err, "telegram send failed"),
        }
    }
}
