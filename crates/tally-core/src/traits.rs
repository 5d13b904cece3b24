//! Collaborator contracts consumed by the wallet engine.
//!
//! - [`StateFetcher`]: remote ledger queries (address usage, UTXOs, staking accounts)
//! - [`KeyDeriver`]: public child-key derivation along a path
//! - [`Signer`]: opaque signing of payloads
//!
//! Failures are reported as [`CollaboratorError`] and never retried here.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::error::CollaboratorError;
use crate::multi_token::MultiToken;
use crate::types::{DerivationPath, OutPoint, PoolId, PublicKey, Signature};

/// An unspent output as reported by the remote backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteUtxo {
    pub out_point: OutPoint,
    /// Raw address payload; parsed lazily by consumers.
    #[serde(with = "hex_bytes")]
    pub address: Vec<u8>,
    pub value: MultiToken,
}

/// Staking account state of a reward address.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Default)]
pub struct AccountState {
    pub delegated_pool: Option<PoolId>,
    /// Withdrawable rewards in lovelace.
    pub rewards: u64,
    pub registered: bool,
}

/// One reward payout.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RewardEntry {
    pub epoch: u64,
    pub amount: u64,
    pub pool: PoolId,
}

/// Remote ledger queries.
#[async_trait]
pub trait StateFetcher: Send + Sync {
    /// Subset of `addresses` that appear in at least one transaction.
    async fn check_addresses_in_use(
        &self,
        addresses: &[Address],
    ) -> Result<HashSet<Address>, CollaboratorError>;

    /// Every unspent output paying to any of `addresses`.
    async fn get_utxos_for_addresses(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<RemoteUtxo>, CollaboratorError>;

    /// Registration, delegation and reward balance of a reward address.
    async fn get_account_state(
        &self,
        reward_address: &Address,
    ) -> Result<AccountState, CollaboratorError>;

    /// Reward payouts to `reward_address`, ordered by epoch.
    async fn get_reward_history(
        &self,
        reward_address: &Address,
    ) -> Result<Vec<RewardEntry>, CollaboratorError>;
}

/// Public child-key derivation.
pub trait KeyDeriver: Send + Sync {
    /// Public key at `path`.
    fn derive_public(&self, path: &DerivationPath) -> Result<PublicKey, CollaboratorError>;
}

/// Opaque signing capability.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `payload` with the key at `path`.
    async fn sign(
        &self,
        path: &DerivationPath,
        payload: &[u8],
    ) -> Result<Signature, CollaboratorError>;
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
