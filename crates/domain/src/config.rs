//! Environment-driven configuration structures shared by all binaries.

use std::{env, time::Duration};

use thiserror::Error;

use crate::model::{AddressFormatError, ContractAddress};

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RATE_LIMIT_COOLDOWN_SECS: u64 = 60;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_RPC_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_RECEIPT_CONCURRENCY: usize = 8;
pub const DEFAULT_RECONNECT_INTERVAL_SECS: u64 = 5;

/// Bot token and chat for deposit notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

/// Monitor configuration derived from `.env`/process variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    database_url: String,
    rpc_url: String,
    rpc_api_key: Option<String>,
    contract_address: ContractAddress,
    poll_interval: Duration,
    rate_limit_cooldown: Duration,
    rpc_timeout: Duration,
    rpc_connect_timeout: Duration,
    receipt_concurrency: usize,
    reconnect_interval: Duration,
    start_height: Option<u64>,
    telegram: Option<TelegramCredentials>,
}

impl MonitorConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// process variables. Missing or malformed entries surface as
    /// `ConfigError` so the binary can fail before touching the chain.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let contract_address = match get_optional_var("DEPOSIT_CONTRACT_ADDRESS") {
            Some(raw) => {
                ContractAddress::parse(&raw).map_err(|source| ConfigError::InvalidAddress {
                    key: "DEPOSIT_CONTRACT_ADDRESS",
                    source,
                })?
            }
            None => ContractAddress::default(),
        };

        let telegram = match (
            get_optional_var("TELEGRAM_BOT_TOKEN"),
            get_optional_var("TELEGRAM_CHAT_ID"),
        ) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramCredentials { bot_token, chat_id }),
            (None, None) => None,
            _ => {
                return Err(ConfigError::IncompleteGroup {
                    keys: "TELEGRAM_BOT_TOKEN/TELEGRAM_CHAT_ID",
                })
            }
        };

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            rpc_url: get_required_var("ETH_RPC_URL")?,
            rpc_api_key: get_optional_var("ETH_RPC_API_KEY"),
            contract_address,
            poll_interval: secs_or("MONITOR_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?,
            rate_limit_cooldown: secs_or(
                "MONITOR_RATE_LIMIT_COOLDOWN_SECS",
                DEFAULT_RATE_LIMIT_COOLDOWN_SECS,
            )?,
            rpc_timeout: secs_or("MONITOR_RPC_TIMEOUT_SECS", DEFAULT_RPC_TIMEOUT_SECS)?,
            rpc_connect_timeout: secs_or(
                "MONITOR_RPC_CONNECT_TIMEOUT_SECS",
                DEFAULT_RPC_CONNECT_TIMEOUT_SECS,
            )?,
            receipt_concurrency: parse_optional("MONITOR_RECEIPT_CONCURRENCY")?
                .unwrap_or(DEFAULT_RECEIPT_CONCURRENCY)
                .max(1),
            reconnect_interval: secs_or(
                "STORAGE_RECONNECT_INTERVAL_SECS",
                DEFAULT_RECONNECT_INTERVAL_SECS,
            )?,
            start_height: parse_optional("MONITOR_START_HEIGHT")?,
            telegram,
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// RPC endpoint with the API key appended as a trailing path segment.
    pub fn rpc_endpoint(&self) -> String {
        match &self.rpc_api_key {
            Some(key) => format!("{}/{}", self.rpc_url.trim_end_matches('/'), key),
            None => self.rpc_url.clone(),
        }
    }

    pub fn contract_address(&self) -> &ContractAddress {
        &self.contract_address
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        self.rate_limit_cooldown
    }

    pub fn rpc_timeout(&self) -> Duration {
        self.rpc_timeout
    }

    pub fn rpc_connect_timeout(&self) -> Duration {
        self.rpc_connect_timeout
    }

    pub fn receipt_concurrency(&self) -> usize {
        self.receipt_concurrency
    }

    pub fn reconnect_interval(&self) -> Duration {
        self.reconnect_interval
    }

    pub fn start_height(&self) -> Option<u64> {
        self.start_height
    }

    pub fn telegram(&self) -> Option<&TelegramCredentials> {
        self.telegram.as_ref()
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or(ConfigError::MissingVar { key })
}

pub(crate) fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_optional<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr<Err = std::num::ParseIntError>,
{
    get_optional_var(key)
        .map(|raw| {
            raw.parse()
                .map_err(|source| ConfigError::InvalidNumber { key, source })
        })
        .transpose()
}

fn secs_or(key: &'static str, default: u64) -> Result<Duration, ConfigError> {
    Ok(Duration::from_secs(
        parse_optional::<u64>(key)?.unwrap_or(default),
    ))
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("DEPOSIT_TRACKER_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid address in `{key}`: {source}")]
    InvalidAddress {
        key: &'static str,
        #[source]
        source: AddressFormatError,
    },
    #[error("`{keys}` must be set together")]
    IncompleteGroup { keys: &'static str },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
