//! SeaORM-backed storage adapters that satisfy the domain storage traits while
//! keeping the database backend swappable (SQLite by default, PostgreSQL via
//! feature flag).

mod builder;
mod deposit_store;
mod entity;
mod errors;
mod migration;
mod monitor_state_store;

use std::{sync::Arc, time::Duration};

use deposit_tracker_domain::services::connectivity::ConnectionSupervisor;
use deposit_tracker_domain::storage::StorageResult;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub use builder::StorageBuilder;
use errors::{is_connectivity_error, StorageError};

/// Shared storage handle used by the monitor and any external readers.
#[derive(Clone)]
pub struct SeaOrmStorage {
    db: Arc<DatabaseConnection>,
    connectivity: ConnectionSupervisor,
}

impl SeaOrmStorage {
    /// Connects to the provided database URL and ensures the schema is present.
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        Self::builder().database_url(database_url).build().await
    }

    /// Keeps calling [`SeaOrmStorage::connect`] every `interval` until the
    /// database answers. Only returns on success; callers bound it with a
    /// shutdown signal or a timeout.
    pub async fn connect_with_retry(database_url: &str, interval: Duration) -> Self {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            match Self::connect(database_url).await {
                Ok(storage) => {
                    if attempt > 1 {
                        info!(attempt, "storage reachable");
                    }
                    return storage;
                }
                Err(err) => {
                    warn!(%err, attempt, retry_in = ?interval, "storage unreachable at startup");
                    sleep(interval).await;
                }
            }
        }
    }

    pub fn builder() -> StorageBuilder {
        StorageBuilder::new()
    }

    pub(crate) fn from_connection(db: DatabaseConnection) -> Self {
        Self {
            db: Arc::new(db),
            connectivity: ConnectionSupervisor::default(),
        }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        self.db.as_ref()
    }

    pub fn connectivity(&self) -> &ConnectionSupervisor {
        &self.connectivity
    }

    /// Spawns the background task that pings the database at `interval`
    /// whenever the connection has been marked lost.
    pub fn spawn_reconnect_task(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let db = Arc::clone(&self.db);
        let connectivity = self.connectivity.clone();
        tokio::spawn(async move {
            connectivity
                .run_reconnect_loop(interval, cancel, || {
                    let db = Arc::clone(&db);
                    async move { db.ping().await }
                })
                .await;
        })
    }

    /// Fails fast while the gateway is reconnecting.
    pub(crate) fn ensure_connected(&self) -> StorageResult<()> {
        if self.connectivity.is_connected() {
            Ok(())
        } else {
            Err(StorageError::Unavailable(format!(
                "connection {}",
                self.connectivity.state()
            )))
        }
    }

    /// Maps a backend error, flagging the connection as lost when the failure
    /// was a connectivity one.
    pub(crate) fn map_db_error(&self, err: DbErr) -> StorageError {
        if is_connectivity_error(&err) {
            self.connectivity.mark_disconnected(&err);
            StorageError::Unavailable(err.to_string())
        } else {
            StorageError::from_source(err)
        }
    }
}
