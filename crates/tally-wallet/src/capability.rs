//! Capability sets and capability-typed wallet handles.
//!
//! What a [`PublicDeriver`] can do is decided once, at construction, from
//! its derivation scheme and its network family. Callers ask for a typed
//! handle with [`PublicDeriver::capability`]; a `None` answer means the
//! operation does not apply to this wallet.

use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_core::address::{Address, Credential};
use tally_core::constants::{BIP44_PURPOSE, CIP1852_PURPOSE};
use tally_core::network::NetworkFamily;
use tally_core::traits::{KeyDeriver, Signer};
use tally_core::types::{Chain, DerivationPath, PublicKey, Signature};
use tracing::debug;

use crate::error::{ConfigError, WalletError};
use crate::model::{staking_path, PublicDeriver};
use crate::store::{scoped_read, scoped_write, AddressRow, Table, UtxoRow, WalletStore};

/// Key derivation scheme of a conceptual wallet.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DerivationScheme {
    /// Legacy `m/44'/1815'/account'` wallets with bootstrap addresses.
    Bip44,
    /// Staking-aware `m/1852'/1815'/account'` wallets.
    Cip1852,
}

impl DerivationScheme {
    pub fn purpose(&self) -> u32 {
        match self {
            DerivationScheme::Bip44 => BIP44_PURPOSE,
            DerivationScheme::Cip1852 => CIP1852_PURPOSE,
        }
    }
}

/// One independently queryable wallet capability.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    PublicKey,
    SigningKey,
    Utxos,
    UtxoChains,
    DisplayCutoff,
    StakingKey,
    Accounting,
}

impl Capability {
    pub const ALL: [Capability; 7] = [
        Capability::PublicKey,
        Capability::SigningKey,
        Capability::Utxos,
        Capability::UtxoChains,
        Capability::DisplayCutoff,
        Capability::StakingKey,
        Capability::Accounting,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// A set of capabilities.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CapabilitySet(u8);

impl CapabilitySet {
    pub const EMPTY: Self = Self(0);

    pub fn of(caps: &[Capability]) -> Self {
        caps.iter().fold(Self::EMPTY, |set, c| set.with(*c))
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0 & cap.bit() != 0
    }

    pub fn with(self, cap: Capability) -> Self {
        Self(self.0 | cap.bit())
    }

    pub fn without(self, cap: Capability) -> Self {
        Self(self.0 & !cap.bit())
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        Capability::ALL.into_iter().filter(|c| self.contains(*c))
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// The fixed capability set of a `(scheme, network family)` pair.
///
/// Unsupported pairs are configuration errors.
pub fn derive_capabilities(
    scheme: DerivationScheme,
    family: NetworkFamily,
) -> Result<CapabilitySet, ConfigError> {
    match (scheme, family) {
        (DerivationScheme::Bip44, NetworkFamily::CardanoHaskell) => Ok(CapabilitySet::of(&[
            Capability::PublicKey,
            Capability::SigningKey,
            Capability::Utxos,
            Capability::UtxoChains,
            Capability::DisplayCutoff,
        ])),
        (DerivationScheme::Cip1852, NetworkFamily::CardanoHaskell)
        | (DerivationScheme::Cip1852, NetworkFamily::Jormungandr) => {
            Ok(CapabilitySet::of(&Capability::ALL))
        }
        (DerivationScheme::Bip44, NetworkFamily::Jormungandr) => {
            Err(ConfigError::UnsupportedCombination { scheme, family })
        }
    }
}

/// Type-level tag for a [`Capability`].
pub trait CapabilityMarker {
    const CAPABILITY: Capability;
}

macro_rules! capability_markers {
    ($($(#[$doc:meta])* $name:ident => $cap:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Debug)]
            pub enum $name {}

            impl CapabilityMarker for $name {
                const CAPABILITY: Capability = Capability::$cap;
            }
        )*
    };
}

capability_markers! {
    /// Account public key access.
    GetPublicKey => PublicKey;
    /// Signing through the signer collaborator.
    GetSigningKey => SigningKey;
    /// UTXO retrieval.
    GetAllUtxos => Utxos;
    /// External/internal chain address derivation.
    HasUtxoChains => UtxoChains;
    /// Display cutoff bookkeeping.
    DisplayCutoff => DisplayCutoff;
    /// Staking key access.
    GetStakingKey => StakingKey;
    /// Reward (accounting) address retrieval.
    GetAllAccounting => Accounting;
}

/// A deriver proven to support capability `C`.
pub struct WalletWith<C> {
    deriver: Arc<PublicDeriver>,
    _capability: PhantomData<fn() -> C>,
}

impl<C: CapabilityMarker> WalletWith<C> {
    pub(crate) fn new(deriver: Arc<PublicDeriver>) -> Option<Self> {
        deriver
            .capabilities()
            .contains(C::CAPABILITY)
            .then(|| Self { deriver, _capability: PhantomData })
    }
}

impl<C> WalletWith<C> {
    pub fn deriver(&self) -> &Arc<PublicDeriver> {
        &self.deriver
    }
}

impl<C> Clone for WalletWith<C> {
    fn clone(&self) -> Self {
        Self { deriver: Arc::clone(&self.deriver), _capability: PhantomData }
    }
}

impl<C> Deref for WalletWith<C> {
    type Target = PublicDeriver;

    fn deref(&self) -> &PublicDeriver {
        &self.deriver
    }
}

impl<C: CapabilityMarker> fmt::Debug for WalletWith<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalletWith")
            .field("capability", &C::CAPABILITY)
            .field("deriver", &self.deriver.id)
            .finish()
    }
}

impl WalletWith<GetPublicKey> {
    pub fn public_key(&self) -> &PublicKey {
        &self.deriver.account_key
    }

    pub fn path(&self) -> &DerivationPath {
        &self.deriver.path
    }
}

impl WalletWith<GetSigningKey> {
    pub fn signing_path(&self, chain: Chain, index: u32) -> DerivationPath {
        self.deriver.path.child(chain.index()).child(index)
    }

    /// Sign `payload` with the key of address `(chain, index)`.
    pub async fn sign(
        &self,
        signer: &dyn Signer,
        chain: Chain,
        index: u32,
        payload: &[u8],
    ) -> Result<Signature, WalletError> {
        let path = self.signing_path(chain, index);
        debug!(deriver = self.deriver.id.0, %path, "signing payload");
        Ok(signer.sign(&path, payload).await?)
    }
}

impl WalletWith<GetAllUtxos> {
    pub async fn get_all_utxos(
        &self,
        store: &dyn WalletStore,
    ) -> Result<Vec<UtxoRow>, WalletError> {
        let id = self.deriver.id;
        scoped_read(store, &[Table::Utxos], |tx| Ok(tx.utxos(id)?)).await
    }

    /// Every address on the external and internal chains.
    pub async fn get_all_utxo_addresses(
        &self,
        store: &dyn WalletStore,
    ) -> Result<Vec<AddressRow>, WalletError> {
        let id = self.deriver.id;
        scoped_read(store, &[Table::Addresses], |tx| {
            let mut rows = tx.addresses(id, Some(Chain::External))?;
            rows.extend(tx.addresses(id, Some(Chain::Internal))?);
            Ok(rows)
        })
        .await
    }
}

impl WalletWith<HasUtxoChains> {
    pub fn chain_path(&self, chain: Chain) -> DerivationPath {
        self.deriver.path.child(chain.index())
    }

    pub async fn chain_addresses(
        &self,
        store: &dyn WalletStore,
        chain: Chain,
    ) -> Result<Vec<AddressRow>, WalletError> {
        let id = self.deriver.id;
        scoped_read(store, &[Table::Addresses], |tx| Ok(tx.addresses(id, Some(chain))?)).await
    }
}

impl WalletWith<DisplayCutoff> {
    pub async fn get_cutoff(&self, store: &dyn WalletStore) -> Result<Option<u32>, WalletError> {
        let id = self.deriver.id;
        scoped_read(store, &[Table::PublicDerivers], |tx| Ok(tx.deriver(id)?.display_cutoff)).await
    }

    pub async fn set_cutoff(
        &self,
        store: &dyn WalletStore,
        cutoff: Option<u32>,
    ) -> Result<(), WalletError> {
        let id = self.deriver.id;
        scoped_write(store, &[Table::PublicDerivers], |tx| {
            Ok(tx.set_display_cutoff(id, cutoff)?)
        })
        .await
    }

    /// Claim the first derived external address above the display cutoff
    /// and move the cutoff onto it.
    ///
    /// Never derives new addresses: run discovery first. Fails with
    /// [`WalletError::NoAddressAboveCutoff`] when nothing is left above the
    /// cutoff.
    pub async fn pop_address(&self, store: &dyn WalletStore) -> Result<AddressRow, WalletError> {
        let id = self.deriver.id;
        scoped_write(store, &[Table::PublicDerivers, Table::Addresses], |tx| {
            let cutoff = tx.deriver(id)?.display_cutoff;
            let next = tx
                .addresses(id, Some(Chain::External))?
                .into_iter()
                .find(|row| cutoff.is_none_or(|c| row.index > c))
                .ok_or(WalletError::NoAddressAboveCutoff { cutoff })?;
            tx.set_display_cutoff(id, Some(next.index))?;
            debug!(deriver = id.0, index = next.index, "display cutoff advanced");
            Ok(next)
        })
        .await
    }
}

/// Staking key of a deriver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StakingKey {
    pub path: DerivationPath,
    pub public_key: PublicKey,
    pub credential: Credential,
}

impl WalletWith<GetStakingKey> {
    pub fn staking_path(&self) -> DerivationPath {
        staking_path(&self.deriver.path)
    }

    pub fn staking_key(&self, keys: &dyn KeyDeriver) -> Result<StakingKey, WalletError> {
        let path = self.staking_path();
        let public_key = keys.derive_public(&path)?;
        Ok(StakingKey { path, credential: Credential::from_key(&public_key), public_key })
    }

    pub fn reward_address(&self, keys: &dyn KeyDeriver) -> Result<Address, WalletError> {
        let key = self.staking_key(keys)?;
        Ok(Address::reward(self.deriver.network().chain_network, key.credential))
    }
}

impl WalletWith<GetAllAccounting> {
    pub async fn get_all_accounting_addresses(
        &self,
        store: &dyn WalletStore,
    ) -> Result<Vec<AddressRow>, WalletError> {
        let id = self.deriver.id;
        scoped_read(store, &[Table::Addresses], |tx| {
            Ok(tx.addresses(id, Some(Chain::Staking))?)
        })
        .await
    }
}
