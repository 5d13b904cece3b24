//! UTXO-backed balances and mangled-address classification.
//!
//! A UTXO is *mangled* when its address does not carry the wallet's current
//! staking credential, so its value is not counted towards delegation.
//! Enterprise, bootstrap and pointer addresses carry no inline staking
//! credential and are always mangled. Mangled outputs are split into those
//! worth sending back to a proper address (`can_unmangle`) and dust that
//! would not cover the cost of being spent (`cannot_unmangle`).

use std::sync::Arc;

use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use tally_core::address::{Address, AddressKind, Credential};
use tally_core::error::CollaboratorError;
use tally_core::multi_token::MultiToken;
use tally_core::network::NetworkDescriptor;
use tally_core::traits::{KeyDeriver, StateFetcher};
use tally_core::types::OutPoint;
use tracing::{debug, info};

use crate::capability::{GetAllUtxos, GetStakingKey, WalletWith};
use crate::error::WalletError;
use crate::model::PublicDeriver;
use crate::store::{scoped_write, Table, UtxoRow, WalletStore};

/// Replace the deriver's UTXO rows with the backend's current view of its
/// external and internal addresses. Returns the number of UTXOs stored.
pub async fn sync_utxos(
    store: &dyn WalletStore,
    fetcher: &dyn StateFetcher,
    wallet: &WalletWith<GetAllUtxos>,
) -> Result<usize, WalletError> {
    let id = wallet.id;
    let addresses: Vec<Address> =
        wallet.get_all_utxo_addresses(store).await?.into_iter().map(|row| row.address).collect();
    let remote = if addresses.is_empty() {
        Vec::new()
    } else {
        fetcher.get_utxos_for_addresses(&addresses).await?
    };

    let zero = wallet.network().zero();
    let mut rows = Vec::with_capacity(remote.len());
    for utxo in remote {
        if !utxo.value.is_compatible(&zero) {
            return Err(CollaboratorError::MalformedResponse(format!(
                "utxo {} is denominated in {}@{}",
                utxo.out_point,
                utxo.value.defaults().identifier,
                utxo.value.defaults().network_id
            ))
            .into());
        }
        rows.push(UtxoRow {
            deriver: id,
            out_point: utxo.out_point,
            address: utxo.address,
            value: utxo.value,
        });
    }
    let count = rows.len();
    scoped_write(store, &[Table::PublicDerivers, Table::Utxos], |tx| {
        Ok(tx.replace_utxos(id, rows)?)
    })
    .await?;
    info!(deriver = id.0, utxos = count, addresses = addresses.len(), "utxo set synced");
    Ok(count)
}

/// Sum of every UTXO value held by the deriver.
pub async fn get_balance(
    store: &dyn WalletStore,
    wallet: &WalletWith<GetAllUtxos>,
) -> Result<MultiToken, WalletError> {
    let utxos = wallet.get_all_utxos(store).await?;
    Ok(sum_values(wallet.network().zero(), utxos.iter()))
}

/// Sum of UTXO values whose address delegates to `staking_address`'s credential.
pub async fn get_utxo_delegated_balance(
    store: &dyn WalletStore,
    wallet: &WalletWith<GetAllUtxos>,
    staking_address: &Address,
) -> Result<MultiToken, WalletError> {
    let credential =
        staking_address.staking_credential().ok_or_else(|| WalletError::UndeterminedCredential {
            out_point: None,
            reason: format!("{:?} address carries no staking credential", staking_address.kind()),
        })?;
    let utxos = wallet.get_all_utxos(store).await?;
    let mut delegated = Vec::new();
    for utxo in &utxos {
        if parse_utxo_address(utxo)?.staking_credential() == Some(credential) {
            delegated.push(utxo);
        }
    }
    Ok(sum_values(wallet.network().zero(), delegated.into_iter()))
}

/// Partition of mangled UTXOs.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UnmangleSummary {
    pub can_unmangle: Vec<OutPoint>,
    pub cannot_unmangle: Vec<OutPoint>,
    pub can_unmangle_total: MultiToken,
    pub cannot_unmangle_total: MultiToken,
}

impl UnmangleSummary {
    fn empty(network: &NetworkDescriptor) -> Self {
        Self {
            can_unmangle: Vec::new(),
            cannot_unmangle: Vec::new(),
            can_unmangle_total: network.zero(),
            cannot_unmangle_total: network.zero(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.can_unmangle.is_empty() && self.cannot_unmangle.is_empty()
    }
}

/// Classify every UTXO not carrying `credential`.
///
/// A mangled UTXO can be unmangled when its default-asset amount covers the
/// fee of spending it plus the minimum an output with its assets must hold.
/// Unparsable addresses and reward addresses fail the whole computation.
pub fn classify_mangled(
    utxos: &[UtxoRow],
    credential: &Credential,
    network: &NetworkDescriptor,
) -> Result<UnmangleSummary, WalletError> {
    let params = &network.protocol;
    let mut summary = UnmangleSummary::empty(network);
    for utxo in utxos {
        let address = parse_utxo_address(utxo)?;
        if address.kind() == AddressKind::Reward {
            return Err(WalletError::UndeterminedCredential {
                out_point: Some(utxo.out_point),
                reason: "reward address cannot hold outputs".into(),
            });
        }
        if address.staking_credential() == Some(credential) {
            continue;
        }
        let threshold: BigInt = params.input_fee() + params.min_ada_required(&utxo.value);
        if utxo.value.get_default() >= &threshold {
            summary.can_unmangle.push(utxo.out_point);
            summary.can_unmangle_total = summary.can_unmangle_total.join_add(&utxo.value);
        } else {
            summary.cannot_unmangle.push(utxo.out_point);
            summary.cannot_unmangle_total = summary.cannot_unmangle_total.join_add(&utxo.value);
        }
    }
    debug!(
        can = summary.can_unmangle.len(),
        cannot = summary.cannot_unmangle.len(),
        "classified mangled utxos"
    );
    Ok(summary)
}

/// Mangled-UTXO partition for a deriver, relative to its own staking key.
pub async fn get_unmangle_amounts(
    store: &dyn WalletStore,
    keys: &dyn KeyDeriver,
    deriver: &Arc<PublicDeriver>,
) -> Result<UnmangleSummary, WalletError> {
    let utxo_wallet = deriver.require::<GetAllUtxos>()?;
    let staking: WalletWith<GetStakingKey> = deriver.require()?;
    let credential = staking.staking_key(keys)?.credential;
    let utxos = utxo_wallet.get_all_utxos(store).await?;
    classify_mangled(&utxos, &credential, deriver.network())
}

fn parse_utxo_address(utxo: &UtxoRow) -> Result<Address, WalletError> {
    Address::from_bytes(&utxo.address).map_err(|e| WalletError::UndeterminedCredential {
        out_point: Some(utxo.out_point),
        reason: e.to_string(),
    })
}

fn sum_values<'a>(zero: MultiToken, utxos: impl Iterator<Item = &'a UtxoRow>) -> MultiToken {
    utxos.fold(zero, |acc, utxo| acc.join_add(&utxo.value))
}
