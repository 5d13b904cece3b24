//! Delegation state, certificates and reward history.

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use tally_core::address::{Address, Credential};
use tally_core::era::EraTimeline;
use tally_core::multi_token::MultiToken;
use tally_core::network::ProtocolParams;
use tally_core::traits::{KeyDeriver, StateFetcher};
use tally_core::types::PoolId;
use tracing::debug;

use crate::balance::get_utxo_delegated_balance;
use crate::capability::{GetAllUtxos, GetStakingKey, WalletWith};
use crate::error::WalletError;
use crate::store::WalletStore;

/// Staking certificate to be embedded in a transaction.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub enum Certificate {
    StakeRegistration(Credential),
    StakeDeregistration(Credential),
    StakeDelegation { credential: Credential, pool: PoolId },
}

/// Certificates moving `credential` to `pool` (or out of delegation when `None`).
///
/// Registration always precedes delegation.
pub fn create_delegation_certificates(
    credential: Credential,
    registered: bool,
    pool: Option<PoolId>,
) -> Vec<Certificate> {
    match (pool, registered) {
        (None, true) => vec![Certificate::StakeDeregistration(credential)],
        (None, false) => Vec::new(),
        (Some(pool), false) => vec![
            Certificate::StakeRegistration(credential),
            Certificate::StakeDelegation { credential, pool },
        ],
        (Some(pool), true) => vec![Certificate::StakeDelegation { credential, pool }],
    }
}

/// Net key deposit paid by `certificates`; negative when it is a refund.
pub fn deposit_delta(certificates: &[Certificate], params: &ProtocolParams) -> BigInt {
    let deposit = BigInt::from(params.key_deposit);
    certificates.iter().fold(BigInt::from(0), |acc, cert| match cert {
        Certificate::StakeRegistration(_) => acc + &deposit,
        Certificate::StakeDeregistration(_) => acc - &deposit,
        Certificate::StakeDelegation { .. } => acc,
    })
}

/// Delegation view of one account.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DelegationSummary {
    pub reward_address: Address,
    pub registered: bool,
    pub delegated_pool: Option<PoolId>,
    /// Withdrawable rewards.
    pub rewards: MultiToken,
    /// UTXO value whose address carries the account's staking credential.
    pub utxo_delegated: MultiToken,
    /// `utxo_delegated` plus rewards.
    pub total_delegated: MultiToken,
}

pub async fn get_delegation_state(
    store: &dyn WalletStore,
    fetcher: &dyn StateFetcher,
    keys: &dyn KeyDeriver,
    wallet: &WalletWith<GetStakingKey>,
) -> Result<DelegationSummary, WalletError> {
    let network = wallet.network();
    let reward_address = wallet.reward_address(keys)?;
    let account = fetcher.get_account_state(&reward_address).await?;
    let utxo_delegated = match wallet.deriver().capability::<GetAllUtxos>() {
        Some(utxos) => get_utxo_delegated_balance(store, &utxos, &reward_address).await?,
        None => network.zero(),
    };
    let rewards = network.lovelace(account.rewards);
    let total_delegated = utxo_delegated.join_add(&rewards);
    debug!(
        deriver = wallet.id.0,
        registered = account.registered,
        pool = ?account.delegated_pool,
        "delegation state fetched"
    );
    Ok(DelegationSummary {
        reward_address,
        registered: account.registered,
        delegated_pool: account.delegated_pool,
        rewards,
        utxo_delegated,
        total_delegated,
    })
}

/// A reward payout with the wall-clock start of its epoch.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RewardWithTime {
    pub epoch: u64,
    pub amount: u64,
    pub pool: PoolId,
    pub epoch_start: DateTime<Utc>,
}

pub async fn reward_history_with_time(
    fetcher: &dyn StateFetcher,
    timeline: &EraTimeline,
    reward_address: &Address,
) -> Result<Vec<RewardWithTime>, WalletError> {
    let history = fetcher.get_reward_history(reward_address).await?;
    history
        .into_iter()
        .map(|entry| {
            Ok(RewardWithTime {
                epoch_start: timeline.epoch_start_time(entry.epoch)?,
                epoch: entry.epoch,
                amount: entry.amount,
                pool: entry.pool,
            })
        })
        .collect()
}
