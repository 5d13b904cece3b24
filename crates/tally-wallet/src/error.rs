//! Wallet error types.

use tally_core::error::{AddressError, CollaboratorError, EraError, NetworkConfigError};
use tally_core::network::NetworkFamily;
use tally_core::types::{Chain, OutPoint};
use thiserror::Error;

use crate::capability::{Capability, DerivationScheme};
use crate::store::Table;

/// Persistence failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A referenced row does not exist (never created, or removed concurrently).
    #[error("{table} row {id} no longer exists")]
    Stale { table: Table, id: u64 },

    /// The transaction did not acquire the table it tried to touch.
    #[error("table {0} is not locked by this transaction")]
    TableNotLocked(Table),

    /// Write attempted on a table held for reading.
    #[error("table {0} is locked read-only")]
    ReadOnly(Table),

    /// Unique key already present.
    #[error("duplicate {table} row: {key}")]
    Duplicate { table: Table, key: String },
}

/// Fatal configuration problems, detected at construction or load time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{scheme:?} derivation is not supported on {family:?} networks")]
    UnsupportedCombination { scheme: DerivationScheme, family: NetworkFamily },

    #[error(transparent)]
    Network(#[from] NetworkConfigError),

    #[error("gap limit must be between 1 and {max}, got {value}")]
    InvalidGapLimit { value: u32, max: u32 },

    #[error("network {0} is not configured")]
    UnknownNetwork(u32),

    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// Errors that can occur in wallet operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WalletError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A referenced entity disappeared; callers may re-fetch or abort.
    #[error("stale {entity} {id}")]
    StaleState { entity: &'static str, id: u64 },

    /// Operation invoked on a wallet lacking the capability.
    #[error("wallet lacks capability {0:?}")]
    MissingCapability(Capability),

    /// The chain does not hold UTXO addresses.
    #[error("chain {0} does not support gap-limit discovery")]
    UnsupportedChain(Chain),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error(transparent)]
    Era(#[from] EraError),

    /// The staking credential of an address could not be determined.
    #[error("could not determine staking credential{}: {reason}", describe_out_point(.out_point))]
    UndeterminedCredential { out_point: Option<OutPoint>, reason: String },

    /// Every derived external address is at or below the display cutoff.
    #[error("no derived address above display cutoff {cutoff:?}")]
    NoAddressAboveCutoff { cutoff: Option<u32> },

    /// Invalid BIP-39 mnemonic phrase.
    #[error("invalid mnemonic: {0}")]
    InvalidMnemonic(String),

    /// Key derivation failure.
    #[error("key derivation: {0}")]
    KeyDerivation(String),
}

fn describe_out_point(out_point: &Option<OutPoint>) -> String {
    out_point.as_ref().map(|o| format!(" of {o}")).unwrap_or_default()
}

impl From<StoreError> for WalletError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Stale { table, id } => {
                WalletError::StaleState { entity: table.entity(), id }
            }
            other => WalletError::Store(other),
        }
    }
}

impl From<NetworkConfigError> for WalletError {
    fn from(e: NetworkConfigError) -> Self {
        WalletError::Config(ConfigError::Network(e))
    }
}
