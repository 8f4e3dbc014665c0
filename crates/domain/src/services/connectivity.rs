//! Persistence connectivity as an explicit state machine.
//!
//! The gateway flips the state to `Disconnected` when an operation fails for
//! connectivity reasons; a background task owned by the gateway probes the
//! backend at a fixed interval until it answers again. The scan loop only
//! reads the state.

use std::{fmt::Display, future::Future, sync::Arc, time::Duration};

use metrics::{counter, gauge};
use strum_macros::{Display as StrumDisplay, IntoStaticStr};
use tokio::{sync::watch, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::telemetry::{STORAGE_CONNECTION_STATE, STORAGE_CONNECTION_TRANSITIONS_TOTAL};

#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Connected,
    Disconnected,
    Reconnecting,
}

impl ConnectionState {
    fn gauge_value(self) -> f64 {
        match self {
            ConnectionState::Connected => 1.0,
            ConnectionState::Reconnecting => 0.5,
            ConnectionState::Disconnected => 0.0,
        }
    }
}

/// Shared handle onto the connectivity state. Cloning is cheap; all clones
/// observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectionSupervisor {
    state: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionSupervisor {
    pub fn new(initial: ConnectionState) -> Self {
        let (state, _) = watch::channel(initial);
        gauge!(STORAGE_CONNECTION_STATE).set(initial.gauge_value());
        Self {
            state: Arc::new(state),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Records a connectivity failure. A reconnect already in progress keeps
    /// its `Reconnecting` state.
    pub fn mark_disconnected(&self, reason: impl Display) {
        let changed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        if changed {
            warn!(%reason, "storage disconnected");
            self.record(ConnectionState::Disconnected);
        }
    }

    pub fn mark_connected(&self) {
        if self.transition(ConnectionState::Connected) {
            info!("storage connected");
        }
    }

    fn transition(&self, next: ConnectionState) -> bool {
        let changed = self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            self.record(next);
        }
        changed
    }

    fn record(&self, state: ConnectionState) {
        let label: &'static str = state.into();
        gauge!(STORAGE_CONNECTION_STATE).set(state.gauge_value());
        counter!(STORAGE_CONNECTION_TRANSITIONS_TOTAL, "state" => label).increment(1);
    }

    /// Drives reconnection until `cancel` fires: waits for the state to leave
    /// `Connected`, then calls `probe` every `interval` until it succeeds.
    pub async fn run_reconnect_loop<F, Fut, E>(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        mut probe: F,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let mut rx = self.subscribe();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                lost = rx.wait_for(|state| *state != ConnectionState::Connected) => {
                    if lost.is_err() {
                        return;
                    }
                }
            }

            self.transition(ConnectionState::Reconnecting);
            let mut attempt: u32 = 0;
            loop {
                attempt = attempt.saturating_add(1);
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => return,
                    outcome = probe() => outcome,
                };
                match outcome {
                    Ok(()) => {
                        info!(attempt, "storage reconnected");
                        self.mark_connected();
                        break;
                    }
                    Err(err) => {
                        warn!(%err, attempt, "storage reconnect attempt failed");
                    }
                }
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(interval) => {}
                }
            }
        }
    }
}

impl Default for ConnectionSupervisor {
    fn default() -> Self {
        Self::new(ConnectionState::Connected)
    }
}
