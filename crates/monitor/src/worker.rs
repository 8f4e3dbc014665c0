use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use strum_macros::{Display, IntoStaticStr};
use thiserror::Error;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use deposit_tracker_domain::{
    config::{ConfigError, MonitorConfig},
    model::ContractAddress,
    services::{
        connectivity::ConnectionState,
        telemetry::{
            TelemetryError, BLOCKS_SCANNED_TOTAL, LAST_HEIGHT, SCAN_PHASE, TICK_OUTCOME_TOTAL,
        },
    },
    storage::{DepositStore, MonitorStateStore, StorageError},
};
use deposit_tracker_storage::SeaOrmStorage;

use crate::{
    chain::{ChainError, ChainReader},
    cursor::Cursor,
    notify::{LogNotifier, Notifier, TelegramNotifier},
    pipeline::{collect_height, notify_inserted, persist_candidates},
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("rpc error: {0}")]
    Chain(#[from] ChainError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("notifier setup failed: {0}")]
    Notifier(#[from] reqwest::Error),
    #[error("signal handler error: {0}")]
    Signal(#[from] std::io::Error),
    #[error("task failed: {0}")]
    Task(#[from] JoinError),
}

/// Failure that aborts the current tick.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScanError {
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl ScanError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ScanError::Chain(ChainError::RateLimited { .. }))
    }
}

/// Knobs of the scan loop, taken from [`MonitorConfig`].
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub contract: ContractAddress,
    pub poll_interval: Duration,
    pub rate_limit_cooldown: Duration,
    pub receipt_concurrency: usize,
    pub start_height: Option<u64>,
}

impl ScanSettings {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            contract: config.contract_address().clone(),
            poll_interval: config.poll_interval(),
            rate_limit_cooldown: config.rate_limit_cooldown(),
            receipt_concurrency: config.receipt_concurrency(),
            start_height: config.start_height(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            contract: ContractAddress::default(),
            poll_interval: Duration::from_secs(10),
            rate_limit_cooldown: Duration::from_secs(60),
            receipt_concurrency: 8,
            start_height: None,
        }
    }
}

/// Everything a tick needs, passed in explicitly.
pub struct ScanContext<R, S, N: ?Sized> {
    pub reader: Arc<R>,
    pub store: Arc<S>,
    pub notifier: Arc<N>,
    pub settings: ScanSettings,
}

impl<R, S, N: ?Sized> ScanContext<R, S, N> {
    pub fn new(reader: Arc<R>, store: Arc<S>, notifier: Arc<N>, settings: ScanSettings) -> Self {
        Self {
            reader,
            store,
            notifier,
            settings,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ScanPhase {
    Idle,
    Fetching,
    Scanning,
    Persisting,
    Notifying,
    Backoff,
}

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TickOutcome {
    /// Nothing new on chain, or shutdown before the first height.
    Idle,
    Advanced {
        from: u64,
        to: u64,
        inserted: usize,
        duplicates: usize,
    },
    /// The cursor moved to `to`, then a later height failed.
    Partial {
        from: u64,
        to: u64,
        inserted: usize,
        duplicates: usize,
        error: ScanError,
    },
    RateLimited,
    NetworkError(ChainError),
    /// Storage is down; the chain was not queried.
    PersistenceUnavailable,
    Failed(ScanError),
}

impl TickOutcome {
    /// Whether the loop must sit out the rate-limit cooldown.
    pub fn needs_backoff(&self) -> bool {
        match self {
            TickOutcome::RateLimited => true,
            TickOutcome::Partial { error, .. } => error.is_rate_limited(),
            _ => false,
        }
    }

    fn from_error(error: ScanError) -> Self {
        match error {
            ScanError::Chain(ChainError::RateLimited { .. }) => TickOutcome::RateLimited,
            ScanError::Chain(err @ ChainError::Network(_)) => TickOutcome::NetworkError(err),
            ScanError::Storage(err) if err.is_unavailable() => TickOutcome::PersistenceUnavailable,
            other => TickOutcome::Failed(other),
        }
    }
}

/// Drives the cursor from persisted progress toward the chain tip, one height
/// at a time. Only [`Scanner::tick`] moves the cursor.
pub struct Scanner<R, S, N: ?Sized> {
    ctx: ScanContext<R, S, N>,
    cursor: Option<Cursor>,
    checkpointed: Option<u64>,
    phase: ScanPhase,
    cancel: CancellationToken,
}

impl<R, S, N> Scanner<R, S, N>
where
    R: ChainReader,
    S: DepositStore + MonitorStateStore,
    N: Notifier + ?Sized,
{
    pub fn new(ctx: ScanContext<R, S, N>, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            cursor: None,
            checkpointed: None,
            phase: ScanPhase::Idle,
            cancel,
        }
    }

    /// Last height whose deposits are stored; `None` until the first tick
    /// resolved it.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor.map(|cursor| cursor.height())
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    /// Runs ticks at the poll interval until cancelled. A rate-limited tick
    /// pauses the loop for the cooldown, after which it polls immediately.
    pub async fn run(mut self) {
        let period = self.ctx.settings.poll_interval.max(Duration::from_millis(1));
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            contract = %self.ctx.settings.contract,
            poll_secs = period.as_secs(),
            "deposit scanner started"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = self.tick().await;
            if outcome.needs_backoff() {
                let cooldown = self.ctx.settings.rate_limit_cooldown;
                self.set_phase(ScanPhase::Backoff);
                warn!(cooldown_secs = cooldown.as_secs(), "rpc provider rate limited, pausing");
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(cooldown) => {}
                }
                self.set_phase(ScanPhase::Idle);
                ticker.reset_immediately();
            }
        }

        self.set_phase(ScanPhase::Idle);
        info!(cursor = ?self.cursor(), "deposit scanner stopped");
    }

    /// One pass from the cursor to the current tip. Never panics on chain or
    /// storage failures; they are reported through the outcome.
    pub async fn tick(&mut self) -> TickOutcome {
        let outcome = self.scan().await;
        self.flush_checkpoint().await;
        self.set_phase(ScanPhase::Idle);
        report(&outcome);
        outcome
    }

    async fn scan(&mut self) -> TickOutcome {
        let state = self.ctx.store.connection_state();
        if state != ConnectionState::Connected {
            debug!(%state, "storage not connected, skipping tick");
            return TickOutcome::PersistenceUnavailable;
        }

        self.set_phase(ScanPhase::Fetching);
        let tip = match self.ctx.reader.tip_height().await {
            Ok(tip) => tip,
            Err(err) => return TickOutcome::from_error(err.into()),
        };

        let mut cursor = match self.cursor {
            Some(cursor) => cursor,
            None => match self.resume(tip).await {
                Ok(cursor) => {
                    self.cursor = Some(cursor);
                    cursor
                }
                Err(err) => return TickOutcome::from_error(err.into()),
            },
        };
        if tip <= cursor.height() {
            return TickOutcome::Idle;
        }

        let from = cursor.next_height();
        let mut inserted = 0;
        let mut duplicates = 0;
        for height in from..=tip {
            if self.cancel.is_cancelled() {
                info!(height, "shutdown requested, stopping before height");
                break;
            }
            match self.process_height(height).await {
                Ok((new, repeated)) => {
                    inserted += new;
                    duplicates += repeated;
                    cursor.advance(height);
                    self.cursor = Some(cursor);
                    gauge!(LAST_HEIGHT).set(height as f64);
                }
                Err(error) if cursor.height() >= from => {
                    return TickOutcome::Partial {
                        from,
                        to: cursor.height(),
                        inserted,
                        duplicates,
                        error,
                    };
                }
                Err(error) => return TickOutcome::from_error(error),
            }
        }

        if cursor.height() < from {
            TickOutcome::Idle
        } else {
            TickOutcome::Advanced {
                from,
                to: cursor.height(),
                inserted,
                duplicates,
            }
        }
    }

    /// Stores every candidate of `height`, then notifies for the new ones.
    /// Records saved before a storage failure are still notified.
    async fn process_height(&mut self, height: u64) -> Result<(usize, usize), ScanError> {
        self.set_phase(ScanPhase::Scanning);
        let batch = collect_height(
            self.ctx.reader.as_ref(),
            &self.ctx.settings.contract,
            height,
            self.ctx.settings.receipt_concurrency,
        )
        .await?;

        self.set_phase(ScanPhase::Persisting);
        let persisted = persist_candidates(self.ctx.store.as_ref(), &batch.records).await;

        if !persisted.inserted.is_empty() {
            self.set_phase(ScanPhase::Notifying);
            notify_inserted(self.ctx.notifier.as_ref(), &persisted.inserted);
        }
        if let Some(err) = persisted.error {
            return Err(err.into());
        }

        counter!(BLOCKS_SCANNED_TOTAL).increment(1);
        Ok((persisted.inserted.len(), persisted.duplicates))
    }

    /// Picks the starting cursor: checkpoint, then highest stored deposit,
    /// then the configured start height, then the tip.
    async fn resume(&mut self, tip: u64) -> Result<Cursor, StorageError> {
        if let Some(height) = self.ctx.store.last_processed_height().await? {
            info!(height, "resuming from checkpoint");
            self.checkpointed = Some(height);
            return Ok(Cursor::new(height));
        }
        // The height of the newest stored deposit may have been cut short by a
        // crash, so it is scanned again.
        if let Some(height) = self.ctx.store.highest_persisted_height().await? {
            info!(height, "no checkpoint, resuming from highest stored deposit");
            return Ok(Cursor::new(height.saturating_sub(1)));
        }
        if let Some(start) = self.ctx.settings.start_height {
            info!(start, "empty database, starting at configured height");
            return Ok(Cursor::new(start.saturating_sub(1)));
        }
        info!(tip, "empty database, starting at chain tip");
        Ok(Cursor::new(tip))
    }

    async fn flush_checkpoint(&mut self) {
        let Some(height) = self.cursor() else {
            return;
        };
        if self.checkpointed == Some(height) {
            return;
        }
        match self.ctx.store.upsert_last_processed_height(height).await {
            Ok(()) => self.checkpointed = Some(height),
            Err(err) => warn!(?err, height, "failed to write scan checkpoint"),
        }
    }

    fn set_phase(&mut self, phase: ScanPhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "scan phase changed");
            self.phase = phase;
            gauge!(SCAN_PHASE).set(phase as u8 as f64);
        }
    }
}

fn report(outcome: &TickOutcome) {
    let label: &'static str = outcome.into();
    counter!(TICK_OUTCOME_TOTAL, "outcome" => label).increment(1);
    match outcome {
        TickOutcome::Idle => debug!("no new heights"),
        TickOutcome::Advanced {
            from,
            to,
            inserted,
            duplicates,
        } => info!(from, to, inserted, duplicates, "scanned heights"),
        TickOutcome::Partial {
            from,
            to,
            inserted,
            duplicates,
            error,
        } => warn!(from, to, inserted, duplicates, %error, "tick stopped early"),
        TickOutcome::RateLimited => warn!("rpc provider rate limited"),
        TickOutcome::NetworkError(err) => warn!(%err, "rpc unreachable, retrying next tick"),
        TickOutcome::PersistenceUnavailable => warn!("storage unavailable, retrying next tick"),
        TickOutcome::Failed(err) => error!(%err, "tick failed, retrying next tick"),
    }
}

/// Wires the scanner, the storage reconnect task and the notifier together and
/// runs them until SIGINT or SIGTERM.
pub async fn run_monitor<R>(
    config: MonitorConfig,
    storage: SeaOrmStorage,
    reader: R,
) -> Result<(), MonitorError>
where
    R: ChainReader + 'static,
{
    let services = CancellationToken::new();
    let reconnect =
        storage.spawn_reconnect_task(config.reconnect_interval(), services.child_token());

    let (notifier, dispatcher): (Arc<dyn Notifier>, Option<JoinHandle<()>>) =
        match config.telegram() {
            Some(credentials) => {
                let (notifier, handle) =
                    TelegramNotifier::spawn(credentials.clone(), services.child_token())?;
                (Arc::new(notifier), Some(handle))
            }
            None => {
                info!("telegram credentials not configured, deposits are only logged");
                (Arc::new(LogNotifier), None)
            }
        };

    let ctx = ScanContext::new(
        Arc::new(reader),
        Arc::new(storage),
        notifier,
        ScanSettings::from_config(&config),
    );
    let scan_cancel = CancellationToken::new();
    let scanner = Scanner::new(ctx, scan_cancel.clone());
    let result = supervise_scanner(scanner, scan_cancel, services, shutdown_signal()).await;

    reconnect.await?;
    if let Some(dispatcher) = dispatcher {
        dispatcher.await?;
    }
    result
}

/// Runs `scanner` until `shutdown` resolves or the scanner stops by itself.
///
/// `scan_cancel` must be the scanner's own token. `services` is cancelled only
/// after the scanner task has joined, so records stored by the final height are
/// still handed to a live notifier.
pub async fn supervise_scanner<R, S, N, F>(
    scanner: Scanner<R, S, N>,
    scan_cancel: CancellationToken,
    services: CancellationToken,
    shutdown: F,
) -> Result<(), MonitorError>
where
    R: ChainReader + 'static,
    S: DepositStore + MonitorStateStore + 'static,
    N: Notifier + ?Sized + 'static,
    F: Future<Output = std::io::Result<()>>,
{
    let mut scan_task = tokio::spawn(scanner.run());

    let mut scan_finished = false;
    let result = tokio::select! {
        signal = shutdown => signal.map_err(MonitorError::from),
        joined = &mut scan_task => {
            scan_finished = true;
            joined.map_err(MonitorError::from)
        }
    };

    info!("shutting down deposit monitor");
    scan_cancel.cancel();
    let joined = if scan_finished {
        Ok(())
    } else {
        scan_task.await.map_err(MonitorError::from)
    };
    services.cancel();
    result.and(joined)
}

/// Resolves on the first SIGINT or SIGTERM.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => info!("received SIGTERM"),
        result = tokio::signal::ctrl_c() => {
            result?;
            info!("received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("received ctrl-c");
    Ok(())
}
