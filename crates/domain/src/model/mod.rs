//! Data structures and helpers shared across the storage and monitor crates.

use thiserror::Error;

/// Length in bytes of a BLS12-381 validator public key.
pub const PUBKEY_LENGTH: usize = 48;

/// Required length (in hex characters, without `0x`) of an account address.
pub const ADDRESS_HEX_LENGTH: usize = 40;

/// Mainnet beacon-chain deposit contract.
pub const DEFAULT_DEPOSIT_CONTRACT: &str = "0x00000000219ab540356cbb839cbe05303d7705fa";

const WEI_PER_ETHER: u128 = 1_000_000_000_000_000_000;

/// Errors emitted when a configured contract address fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressFormatError {
    #[error("address must be exactly {ADDRESS_HEX_LENGTH} hex characters after `0x`")]
    WrongLength,
    #[error("address contains non-hex characters")]
    NonHex,
}

/// Contract address the extractor filters on. Stored lower-cased with a `0x`
/// prefix so comparisons against chain data are case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContractAddress(String);

impl ContractAddress {
    pub fn parse(value: &str) -> Result<Self, AddressFormatError> {
        let trimmed = value.trim();
        let digits = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .unwrap_or(trimmed);
        if digits.len() != ADDRESS_HEX_LENGTH {
            return Err(AddressFormatError::WrongLength);
        }
        if !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AddressFormatError::NonHex);
        }
        Ok(Self(format!("0x{}", digits.to_ascii_lowercase())))
    }

    /// Case-insensitive comparison against an address as reported by the node.
    pub fn matches(&self, candidate: &str) -> bool {
        self.0.eq_ignore_ascii_case(candidate.trim())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContractAddress {
    fn default() -> Self {
        Self(DEFAULT_DEPOSIT_CONTRACT.to_string())
    }
}

impl std::fmt::Display for ContractAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Natural unique key of a deposit: one transaction may emit several
/// matching events, each with its own log index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DepositKey {
    pub transaction_hash: String,
    pub log_index: u64,
}

/// A deposit extracted from a contract event, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositRecord {
    pub block_number: u64,
    /// Unix seconds.
    pub block_timestamp: u64,
    /// Gas price in wei, decimal, as reported by the node.
    pub fee: String,
    pub transaction_hash: String,
    pub log_index: u64,
    /// `0x`-prefixed hex of the 48-byte validator key.
    pub pubkey: String,
    /// Ether value of the depositing transaction in wei, decimal.
    pub value: String,
}

impl DepositRecord {
    pub fn key(&self) -> DepositKey {
        DepositKey {
            transaction_hash: self.transaction_hash.to_ascii_lowercase(),
            log_index: self.log_index,
        }
    }

    /// Value in wei; `None` when the stored string is not a decimal integer.
    pub fn value_wei(&self) -> Option<u128> {
        self.value.parse().ok()
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Inserted,
    DuplicateIgnored,
}

impl SaveOutcome {
    pub fn is_inserted(self) -> bool {
        matches!(self, SaveOutcome::Inserted)
    }
}

/// Aggregates over stored deposits, consumed by external readers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DepositStats {
    pub count: u64,
    pub total_value_wei: u128,
}

/// Renders a wei amount as ether with trailing zeros trimmed (`32`, `0.5`).
pub fn format_ether(wei: u128) -> String {
    let whole = wei / WEI_PER_ETHER;
    let fraction = wei % WEI_PER_ETHER;
    if fraction == 0 {
        return whole.to_string();
    }
    let digits = format!("{fraction:018}");
    format!("{whole}.{}", digits.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(hash: &str, log_index: u64) -> DepositRecord {
        DepositRecord {
            block_number: 1,
            block_timestamp: 2,
            fee: "3".into(),
            transaction_hash: hash.into(),
            log_index,
            pubkey: "0xab".into(),
            value: "32000000000000000000".into(),
        }
    }

    #[test]
    fn contract_address_canonicalizes_case() {
        let address = ContractAddress::parse("0x00000000219AB540356cBB839Cbe05303d7705Fa").unwrap();
        assert_eq!(address.as_str(), DEFAULT_DEPOSIT_CONTRACT);
        assert!(address.matches("0x00000000219ab540356CBB839CBE05303D7705FA"));
        assert!(!address.matches("0x0000000000000000000000000000000000000000"));
    }

    #[test]
    fn contract_address_accepts_missing_prefix() {
        let address = ContractAddress::parse("00000000219ab540356cbb839cbe05303d7705fa").unwrap();
        assert_eq!(address, ContractAddress::default());
    }

    #[test]
    fn contract_address_rejects_invalid_inputs() {
        assert_eq!(
            ContractAddress::parse("0xdeadbeef"),
            Err(AddressFormatError::WrongLength)
        );
        assert_eq!(
            ContractAddress::parse("0xzz000000219ab540356cbb839cbe05303d7705fa"),
            Err(AddressFormatError::NonHex)
        );
    }

    #[test]
    fn deposit_key_distinguishes_log_index() {
        let first = sample("0xAA", 0);
        let second = sample("0xaa", 1);
        assert_ne!(first.key(), second.key());
        assert_eq!(first.key(), sample("0xaa", 0).key());
    }

    #[test]
    fn value_wei_parses_decimal() {
        assert_eq!(sample("0x1", 0).value_wei(), Some(32 * WEI_PER_ETHER));
        let mut broken = sample("0x1", 0);
        broken.value = "0x20".into();
        assert_eq!(broken.value_wei(), None);
    }

    #[test]
    fn format_ether_trims_fraction() {
        assert_eq!(format_ether(32 * WEI_PER_ETHER), "32");
        assert_eq!(format_ether(WEI_PER_ETHER / 2), "0.5");
        assert_eq!(format_ether(1), "0.000000000000000001");
        assert_eq!(format_ether(0), "0");
    }
}
