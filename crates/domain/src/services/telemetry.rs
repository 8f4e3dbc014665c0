//! Process-wide logging and metrics for the deposit tracker.
//!
//! Metric names live here so every crate emits the same series; the optional
//! Prometheus exporter is only started when a listen address is configured.

use std::net::SocketAddr;

use metrics::{describe_counter, describe_gauge, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{get_optional_var, hydrate_env_file};

/// JSON-RPC calls, labelled by `method` and `result`.
pub const RPC_CALLS_TOTAL: &str = "monitor_rpc_calls_total";
/// Deposit candidates, labelled `result=inserted|duplicate|decode_error`.
pub const DEPOSITS_INGESTED_TOTAL: &str = "monitor_deposits_ingested_total";
pub const NOTIFICATIONS_TOTAL: &str = "monitor_notifications_total";
pub const BLOCKS_SCANNED_TOTAL: &str = "monitor_blocks_scanned_total";
pub const TICK_OUTCOME_TOTAL: &str = "monitor_tick_outcome_total";
pub const LAST_HEIGHT: &str = "monitor_last_height";
pub const SCAN_PHASE: &str = "monitor_scan_phase";
pub const STORAGE_CONNECTION_STATE: &str = "storage_connection_state";
pub const STORAGE_CONNECTION_TRANSITIONS_TOTAL: &str = "storage_connection_transitions_total";

const DEFAULT_LOG_FILTER: &str = "info";

static SUBSCRIBER_INSTALLED: OnceCell<()> = OnceCell::new();
static EXPORTER_ADDRESS: OnceCell<Option<SocketAddr>> = OnceCell::new();

/// Observability knobs read from `<PREFIX>_LOG_FILTER` and
/// `<PREFIX>_METRICS_ADDRESS`.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    log_filter: String,
    metrics_address: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env(prefix: &str) -> Self {
        let _ = hydrate_env_file();
        let upper = prefix.trim().to_ascii_uppercase();

        Self {
            log_filter: get_optional_var(&format!("{upper}_LOG_FILTER"))
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            metrics_address: get_optional_var(&format!("{upper}_METRICS_ADDRESS")),
        }
    }

    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    pub fn metrics_address(&self) -> Option<&str> {
        self.metrics_address.as_deref()
    }
}

/// Installs the tracing subscriber and, if configured, the Prometheus
/// exporter. Safe to call more than once; later calls are no-ops.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    install_tracing(config)?;
    match install_exporter(config)? {
        Some(address) => info!(%address, "prometheus exporter listening"),
        None => debug!("metrics exporter disabled"),
    }
    describe_metrics();
    Ok(())
}

/// Registers units and help text for every series the tracker emits.
pub fn describe_metrics() {
    describe_counter!(RPC_CALLS_TOTAL, Unit::Count, "JSON-RPC calls by method and result");
    describe_counter!(
        DEPOSITS_INGESTED_TOTAL,
        Unit::Count,
        "Deposit candidates by persistence result"
    );
    describe_counter!(
        NOTIFICATIONS_TOTAL,
        Unit::Count,
        "Deposit notifications queued or dropped"
    );
    describe_counter!(BLOCKS_SCANNED_TOTAL, Unit::Count, "Heights fully persisted");
    describe_counter!(TICK_OUTCOME_TOTAL, Unit::Count, "Scan ticks by outcome");
    describe_gauge!(LAST_HEIGHT, "Last height whose deposits are stored");
    describe_gauge!(SCAN_PHASE, "Current scan phase ordinal (0 = idle, 5 = backoff)");
    describe_gauge!(
        STORAGE_CONNECTION_STATE,
        "Storage connectivity (1 connected, 0.5 reconnecting, 0 disconnected)"
    );
    describe_counter!(
        STORAGE_CONNECTION_TRANSITIONS_TOTAL,
        Unit::Count,
        "Storage connectivity transitions by target state"
    );
}

fn install_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    if SUBSCRIBER_INSTALLED.get().is_some() {
        return Ok(());
    }

    let env_filter = EnvFilter::try_new(config.log_filter())
        .map_err(|err| TelemetryError::InvalidLogFilter(err.to_string()))?;

    if SUBSCRIBER_INSTALLED.set(()).is_ok() {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()
            .map_err(|err| TelemetryError::Tracing(err.to_string()))?;
    }

    Ok(())
}

fn parse_metrics_address(config: &TelemetryConfig) -> Result<Option<SocketAddr>, TelemetryError> {
    config
        .metrics_address()
        .map(|raw| {
            raw.parse().map_err(|err: std::net::AddrParseError| {
                TelemetryError::InvalidMetricsAddress(raw.to_string(), err.to_string())
            })
        })
        .transpose()
}

/// Starts the exporter on the current tokio runtime.
fn install_exporter(config: &TelemetryConfig) -> Result<Option<SocketAddr>, TelemetryError> {
    let address = parse_metrics_address(config)?;
    EXPORTER_ADDRESS
        .get_or_try_init(|| {
            if let Some(socket) = address {
                PrometheusBuilder::new()
                    .with_http_listener(socket)
                    .install()
                    .map_err(|err| TelemetryError::Metrics(err.to_string()))?;
            }
            Ok(address)
        })
        .copied()
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    InvalidLogFilter(String),
    #[error("failed to install tracing subscriber: {0}")]
    Tracing(String),
    #[error("invalid metrics address `{0}`: {1}")]
    InvalidMetricsAddress(String, String),
    #[error("failed to install metrics exporter: {0}")]
    Metrics(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    #[test]
    fn telemetry_config_uses_defaults() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("DEPOSIT_TRACKER_SKIP_DOTENV", "1");
        env::remove_var("MONITOR_LOG_FILTER");
        env::remove_var("MONITOR_METRICS_ADDRESS");

        let cfg = TelemetryConfig::from_env("monitor");
        assert_eq!(cfg.log_filter(), "info");
        assert_eq!(cfg.metrics_address(), None);
    }

    #[test]
    fn telemetry_config_reads_trimmed_env() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("DEPOSIT_TRACKER_SKIP_DOTENV", "1");
        env::set_var("MONITOR_LOG_FILTER", " deposit_tracker_monitor=debug ");
        env::set_var("MONITOR_METRICS_ADDRESS", "  ");

        let cfg = TelemetryConfig::from_env("MONITOR");
        assert_eq!(cfg.log_filter(), "deposit_tracker_monitor=debug");
        assert_eq!(cfg.metrics_address(), None);

        env::remove_var("MONITOR_LOG_FILTER");
        env::remove_var("MONITOR_METRICS_ADDRESS");
    }

    #[test]
    fn bad_metrics_address_is_rejected() {
        let _guard = ENV_GUARD.lock().unwrap();
        env::set_var("DEPOSIT_TRACKER_SKIP_DOTENV", "1");
        env::set_var("MONITOR_METRICS_ADDRESS", "localhost");
        let cfg = TelemetryConfig::from_env("MONITOR");
        env::remove_var("MONITOR_METRICS_ADDRESS");

        assert!(matches!(
            parse_metrics_address(&cfg),
            Err(TelemetryError::InvalidMetricsAddress(addr, _)) if addr == "localhost"
        ));
    }

    #[test]
    fn described_series_render_with_help_text() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            metrics::counter!(TICK_OUTCOME_TOTAL, "outcome" => "idle").increment(2);
            metrics::gauge!(LAST_HEIGHT).set(42.0);
        });

        let rendered = handle.render();
        assert!(rendered.contains("# HELP monitor_tick_outcome_total Scan ticks by outcome"));
        assert!(rendered.contains("monitor_tick_outcome_total{outcome=\"idle\"} 2"));
        assert!(rendered.contains("monitor_last_height 42"));
    }
}
