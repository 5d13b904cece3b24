//! Conceptual wallets and their public derivers (HD accounts).
//!
//! Both are immutable snapshots shared behind `Arc`. Renaming a wallet or
//! reloading a deriver produces a new value instead of mutating one in
//! place, so handles can be read from any task without locking.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_core::address::{Address, Credential};
use tally_core::constants::STAKING_KEY_INDEX;
use tally_core::network::NetworkDescriptor;
use tally_core::traits::KeyDeriver;
use tally_core::types::{Chain, DerivationPath, PublicKey};

use crate::capability::{
    derive_capabilities, Capability, CapabilityMarker, CapabilitySet, DerivationScheme, WalletWith,
};
use crate::error::WalletError;

macro_rules! row_id {
    ($($(#[$doc:meta])* $name:ident;)*) => {
        $(
            $(#[$doc])*
            #[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub u64);

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

row_id! {
    /// Identifier of a conceptual wallet.
    WalletId;
    /// Identifier of a public deriver.
    DeriverId;
    /// Identifier of a key-derivation node.
    NodeId;
}

/// Identity of the hardware device holding a wallet's keys.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HardwareIdentity {
    pub vendor: String,
    pub model: String,
    pub device_id: String,
}

/// Root identity of a wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConceptualWallet {
    pub id: WalletId,
    pub network: Arc<NetworkDescriptor>,
    pub scheme: DerivationScheme,
    pub name: String,
    pub hardware: Option<HardwareIdentity>,
}

impl ConceptualWallet {
    /// Snapshot with a new display name.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self { name: name.into(), ..self.clone() }
    }

    pub fn is_hardware(&self) -> bool {
        self.hardware.is_some()
    }
}

/// One HD account under a conceptual wallet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicDeriver {
    pub id: DeriverId,
    pub conceptual: Arc<ConceptualWallet>,
    /// Account path, e.g. `m/1852'/1815'/0'`.
    pub path: DerivationPath,
    pub account_key: PublicKey,
    capabilities: CapabilitySet,
}

impl PublicDeriver {
    /// Build a deriver, computing its capability set.
    ///
    /// Hardware wallets keep their keys on the device, so they never carry
    /// the signing-key capability.
    pub fn new(
        id: DeriverId,
        conceptual: Arc<ConceptualWallet>,
        path: DerivationPath,
        account_key: PublicKey,
    ) -> Result<Self, WalletError> {
        let mut capabilities = derive_capabilities(conceptual.scheme, conceptual.network.family)?;
        if conceptual.is_hardware() {
            capabilities = capabilities.without(Capability::SigningKey);
        }
        Ok(Self { id, conceptual, path, account_key, capabilities })
    }

    pub fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    pub fn network(&self) -> &NetworkDescriptor {
        &self.conceptual.network
    }

    /// Typed handle for capability `C`, if this deriver supports it.
    pub fn capability<C: CapabilityMarker>(self: &Arc<Self>) -> Option<WalletWith<C>> {
        WalletWith::new(Arc::clone(self))
    }

    /// Like [`capability`](Self::capability), but absence is an error.
    pub fn require<C: CapabilityMarker>(self: &Arc<Self>) -> Result<WalletWith<C>, WalletError> {
        self.capability::<C>().ok_or(WalletError::MissingCapability(C::CAPABILITY))
    }

    /// Same deriver attached to a newer conceptual-wallet snapshot.
    pub fn with_conceptual(&self, conceptual: Arc<ConceptualWallet>) -> Self {
        Self { conceptual, ..self.clone() }
    }
}

/// Builds the chain addresses of one deriver.
///
/// Staking-aware derivers embed their staking credential in every
/// payment address; legacy derivers produce bootstrap addresses.
pub struct AddressBuilder<'a> {
    deriver: &'a PublicDeriver,
    keys: &'a dyn KeyDeriver,
    stake: Option<Credential>,
}

impl<'a> AddressBuilder<'a> {
    pub fn new(deriver: &'a PublicDeriver, keys: &'a dyn KeyDeriver) -> Result<Self, WalletError> {
        let stake = if deriver.capabilities().contains(Capability::StakingKey) {
            let path = staking_path(&deriver.path);
            Some(Credential::from_key(&keys.derive_public(&path)?))
        } else {
            None
        };
        Ok(Self { deriver, keys, stake })
    }

    pub fn path(&self, chain: Chain, index: u32) -> DerivationPath {
        self.deriver.path.child(chain.index()).child(index)
    }

    /// Key and address at `(chain, index)`.
    pub fn build(&self, chain: Chain, index: u32) -> Result<(PublicKey, Address), WalletError> {
        let key = self.keys.derive_public(&self.path(chain, index))?;
        let network = self.deriver.network().chain_network;
        let address = match (chain, &self.stake) {
            (Chain::Staking, Some(stake)) => Address::reward(network, *stake),
            (Chain::Staking, None) => {
                return Err(WalletError::MissingCapability(Capability::StakingKey));
            }
            (_, Some(stake)) => {
                Address::Base { network, payment: Credential::from_key(&key), stake: *stake }
            }
            (_, None) => Address::legacy_from_key(network, &key),
        };
        Ok((key, address))
    }

    pub fn deriver_id(&self) -> DeriverId {
        self.deriver.id
    }

    pub fn staking_credential(&self) -> Option<&Credential> {
        self.stake.as_ref()
    }
}

/// `account/2/0`.
pub(crate) fn staking_path(account: &DerivationPath) -> DerivationPath {
    account.child(Chain::Staking.index()).child(STAKING_KEY_INDEX)
}
