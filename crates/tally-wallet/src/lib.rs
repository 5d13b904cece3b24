//! # tally-wallet: capability-typed HD wallet accounting.
//!
//! Models wallets as immutable snapshots carrying an explicit capability
//! set, discovers used addresses with a gap-limit scanner, aggregates
//! UTXO balances and delegation state, and classifies mangled outputs.
//!
//! # Modules
//!
//! - [`error`]: `WalletError`, `StoreError`, `ConfigError`
//! - [`capability`]: capability sets and typed `WalletWith<C>` handles
//! - [`model`]: conceptual wallets, public derivers, address building
//! - [`store`]: scoped transactions and the in-memory store
//! - [`scanner`]: gap-limit address discovery
//! - [`balance`]: balances and mangled-UTXO classification
//! - [`delegation`]: certificates, delegation state, reward history
//! - [`keys`] / [`mnemonic`]: seeds, key derivation, BIP-39
//! - [`config`]: layered configuration and tracing setup
//! - [`wallet`]: the `WalletService` facade

pub mod balance;
pub mod capability;
pub mod config;
pub mod delegation;
pub mod error;
pub mod keys;
pub mod mnemonic;
pub mod model;
pub mod scanner;
pub mod store;
pub mod wallet;

pub use balance::{classify_mangled, UnmangleSummary};
pub use capability::{Capability, CapabilitySet, DerivationScheme, WalletWith};
pub use config::WalletConfig;
pub use delegation::{create_delegation_certificates, Certificate, DelegationSummary};
pub use error::{ConfigError, StoreError, WalletError};
pub use keys::{Seed, SeedKeyring};
pub use model::{ConceptualWallet, DeriverId, PublicDeriver, WalletId};
pub use scanner::{AddressUsage, DiscoveryOutcome, GapLimitScanner};
pub use store::{MemoryStore, WalletStore};
pub use wallet::{NewWallet, RefreshReport, WalletService};
