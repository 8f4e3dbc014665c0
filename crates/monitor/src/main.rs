//! Monitor binary that tails the deposit contract over JSON-RPC.

use std::io;

use deposit_tracker_domain::config::MonitorConfig;
use deposit_tracker_domain::services::telemetry::{init_telemetry, TelemetryConfig};
use deposit_tracker_monitor::{run_monitor, shutdown_signal, JsonRpcChainReader, MonitorError};
use deposit_tracker_storage::SeaOrmStorage;
use tracing::info;

#[tokio::main]
async fn main() -> io::Result<()> {
    if let Err(err) = bootstrap().await {
        eprintln!("[monitor] bootstrap failed: {err}");
        return Err(io::Error::other(err.to_string()));
    }

    Ok(())
}

async fn bootstrap() -> Result<(), MonitorError> {
    let config = MonitorConfig::load_from_env()?;
    let telemetry_config = TelemetryConfig::from_env("MONITOR");
    init_telemetry(&telemetry_config)?;

    let storage = tokio::select! {
        storage = SeaOrmStorage::connect_with_retry(
            config.database_url(),
            config.reconnect_interval(),
        ) => storage,
        signal = shutdown_signal() => {
            signal?;
            info!("shutdown requested before storage became reachable");
            return Ok(());
        }
    };
    let reader = JsonRpcChainReader::new(
        config.rpc_endpoint(),
        config.rpc_timeout(),
        config.rpc_connect_timeout(),
    )?;
    run_monitor(config, storage, reader).await
}
