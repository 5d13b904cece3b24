//! Wallet service: creation, restoration and refresh of wallets.
//!
//! [`WalletService`] ties together the store, the remote state fetcher,
//! the gap-limit scanner and per-wallet key derivers. Every handle it hands
//! out is an immutable snapshot; operations that change a wallet return a
//! fresh one.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tally_core::address::Address;
use tally_core::constants::CARDANO_COIN_TYPE;
use tally_core::multi_token::{MultiToken, NetworkId};
use tally_core::network::NetworkDescriptor;
use tally_core::traits::{KeyDeriver, StateFetcher};
use tally_core::types::{DerivationPath, PublicKey};
use tracing::{info, warn};

use crate::balance::{get_balance, get_unmangle_amounts, sync_utxos, UnmangleSummary};
use crate::capability::{
    derive_capabilities, DerivationScheme, DisplayCutoff, GetAllUtxos, GetStakingKey, HasUtxoChains,
};
use crate::config::WalletConfig;
use crate::delegation::{
    get_delegation_state, reward_history_with_time, DelegationSummary, RewardWithTime,
};
use crate::error::{ConfigError, WalletError};
use crate::keys::SeedKeyring;
use crate::mnemonic::mnemonic_to_seed;
use crate::model::{ConceptualWallet, DeriverId, HardwareIdentity, NodeId, PublicDeriver, WalletId};
use crate::scanner::{DiscoveryOutcome, GapLimitScanner};
use crate::store::{
    scoped_read, scoped_write, AddressRow, ConceptualWalletRow, KeyDerivationRow, PublicDeriverRow,
    Table, WalletStore, WriteTx,
};

/// Result of [`WalletService::refresh`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RefreshReport {
    pub discovery: Vec<DiscoveryOutcome>,
    pub staking_address: Option<Address>,
    pub utxo_count: usize,
}

/// Request to create a wallet.
#[derive(Debug, Clone)]
pub struct NewWallet {
    pub network_id: u32,
    pub scheme: DerivationScheme,
    pub name: String,
    pub hardware: Option<HardwareIdentity>,
}

pub struct WalletService {
    store: Arc<dyn WalletStore>,
    fetcher: Arc<dyn StateFetcher>,
    scanner: GapLimitScanner,
    networks: HashMap<NetworkId, Arc<NetworkDescriptor>>,
    keyrings: RwLock<HashMap<WalletId, Arc<dyn KeyDeriver>>>,
}

impl WalletService {
    pub fn new(
        config: &WalletConfig,
        store: Arc<dyn WalletStore>,
        fetcher: Arc<dyn StateFetcher>,
    ) -> Result<Self, WalletError> {
        config.validate()?;
        let networks = config.resolve_networks()?.into_iter().map(|n| (n.network_id, n)).collect();
        Ok(Self {
            store,
            fetcher,
            scanner: GapLimitScanner::new(config.gap_limit)?,
            networks,
            keyrings: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &dyn WalletStore {
        self.store.as_ref()
    }

    pub fn scanner(&self) -> &GapLimitScanner {
        &self.scanner
    }

    pub fn network(&self, id: u32) -> Result<Arc<NetworkDescriptor>, ConfigError> {
        self.networks.get(&NetworkId(id)).cloned().ok_or(ConfigError::UnknownNetwork(id))
    }

    /// Register the key deriver of an existing wallet (e.g. after restart).
    pub fn attach_keys(&self, wallet: WalletId, keys: Arc<dyn KeyDeriver>) {
        self.keyrings.write().insert(wallet, keys);
    }

    fn keys(&self, wallet: WalletId) -> Result<Arc<dyn KeyDeriver>, WalletError> {
        self.keyrings
            .read()
            .get(&wallet)
            .cloned()
            .ok_or_else(|| {
                WalletError::KeyDerivation(format!("no key deriver attached to wallet {wallet}"))
            })
    }

    /// Create a conceptual wallet together with its first account.
    pub async fn create_wallet(
        &self,
        request: NewWallet,
        keys: Arc<dyn KeyDeriver>,
    ) -> Result<Arc<PublicDeriver>, WalletError> {
        let network = self.network(request.network_id)?;
        derive_capabilities(request.scheme, network.family)?;
        let path = account_path(request.scheme, 0);
        let account_key = keys.derive_public(&path)?;

        let row = scoped_write(
            self.store(),
            &[Table::ConceptualWallets, Table::PublicDerivers, Table::KeyDerivations],
            |tx| {
                let wallet = WalletId(tx.allocate_id());
                tx.insert_wallet(ConceptualWalletRow {
                    id: wallet,
                    network_id: network.network_id,
                    scheme: request.scheme,
                    name: request.name.clone(),
                    hardware: request.hardware.clone(),
                })?;
                insert_account(tx, wallet, path.clone(), account_key)
            },
        )
        .await?;

        let conceptual = Arc::new(ConceptualWallet {
            id: row.wallet,
            network,
            scheme: request.scheme,
            name: request.name,
            hardware: request.hardware,
        });
        self.attach_keys(row.wallet, keys);
        let deriver = Arc::new(PublicDeriver::new(row.id, conceptual, row.path, row.account_key)?);
        info!(wallet = row.wallet.0, deriver = row.id.0, path = %deriver.path, "wallet created");
        Ok(deriver)
    }

    /// Create a software wallet from a BIP-39 phrase.
    pub async fn restore_from_mnemonic(
        &self,
        network_id: u32,
        scheme: DerivationScheme,
        name: &str,
        phrase: &str,
    ) -> Result<Arc<PublicDeriver>, WalletError> {
        let seed = mnemonic_to_seed(phrase)?;
        let request = NewWallet { network_id, scheme, name: name.to_string(), hardware: None };
        self.create_wallet(request, Arc::new(SeedKeyring::new(seed))).await
    }

    /// Derive another account under an existing wallet.
    pub async fn add_account(
        &self,
        wallet: WalletId,
        account: u32,
    ) -> Result<Arc<PublicDeriver>, WalletError> {
        let keys = self.keys(wallet)?;
        let conceptual = self.load_wallet(wallet).await?;
        let path = account_path(conceptual.scheme, account);
        let account_key = keys.derive_public(&path)?;
        let row = scoped_write(
            self.store(),
            &[Table::ConceptualWallets, Table::PublicDerivers, Table::KeyDerivations],
            |tx| {
                tx.wallet(wallet)?;
                insert_account(tx, wallet, path, account_key)
            },
        )
        .await?;
        info!(wallet = wallet.0, deriver = row.id.0, account, "account added");
        Ok(Arc::new(PublicDeriver::new(row.id, conceptual, row.path, row.account_key)?))
    }

    pub async fn rename_wallet(
        &self,
        wallet: WalletId,
        name: &str,
    ) -> Result<Arc<ConceptualWallet>, WalletError> {
        scoped_write(self.store(), &[Table::ConceptualWallets], |tx| {
            Ok(tx.rename_wallet(wallet, name)?)
        })
        .await?;
        self.load_wallet(wallet).await
    }

    /// Remove a wallet and everything derived from it.
    pub async fn remove_wallet(&self, wallet: WalletId) -> Result<(), WalletError> {
        let derivers = scoped_write(self.store(), &Table::ALL, |tx| {
            let derivers = tx.derivers_of(wallet)?;
            tx.remove_wallet(wallet)?;
            Ok(derivers)
        })
        .await?;
        for deriver in &derivers {
            self.scanner.forget(deriver.id);
        }
        self.keyrings.write().remove(&wallet);
        info!(wallet = wallet.0, "wallet removed");
        Ok(())
    }

    pub async fn list_wallets(&self) -> Result<Vec<Arc<ConceptualWallet>>, WalletError> {
        let rows =
            scoped_read(self.store(), &[Table::ConceptualWallets], |tx| Ok(tx.wallets()?)).await?;
        rows.into_iter().map(|row| self.conceptual_from_row(row).map(Arc::new)).collect()
    }

    pub async fn load_wallet(
        &self,
        wallet: WalletId,
    ) -> Result<Arc<ConceptualWallet>, WalletError> {
        let row = scoped_read(self.store(), &[Table::ConceptualWallets], |tx| {
            Ok(tx.wallet(wallet)?)
        })
        .await?;
        Ok(Arc::new(self.conceptual_from_row(row)?))
    }

    /// Fresh snapshot of a deriver and its wallet.
    pub async fn load_deriver(&self, id: DeriverId) -> Result<Arc<PublicDeriver>, WalletError> {
        let (wallet, deriver) =
            scoped_read(self.store(), &[Table::ConceptualWallets, Table::PublicDerivers], |tx| {
                let deriver = tx.deriver(id)?;
                Ok((tx.wallet(deriver.wallet)?, deriver))
            })
            .await?;
        let conceptual = Arc::new(self.conceptual_from_row(wallet)?);
        Ok(Arc::new(PublicDeriver::new(deriver.id, conceptual, deriver.path, deriver.account_key)?))
    }

    pub async fn list_derivers(
        &self,
        wallet: WalletId,
    ) -> Result<Vec<Arc<PublicDeriver>>, WalletError> {
        let (row, derivers) =
            scoped_read(self.store(), &[Table::ConceptualWallets, Table::PublicDerivers], |tx| {
                Ok((tx.wallet(wallet)?, tx.derivers_of(wallet)?))
            })
            .await?;
        let conceptual = Arc::new(self.conceptual_from_row(row)?);
        derivers
            .into_iter()
            .map(|d| {
                let conceptual = Arc::clone(&conceptual);
                Ok(Arc::new(PublicDeriver::new(d.id, conceptual, d.path, d.account_key)?))
            })
            .collect()
    }

    /// Discover both chains, register the staking address where the
    /// account has one, then resync the UTXO set.
    pub async fn refresh(
        &self,
        deriver: &Arc<PublicDeriver>,
    ) -> Result<RefreshReport, WalletError> {
        let keys = self.keys(deriver.conceptual.id)?;
        let chains = deriver.require::<HasUtxoChains>()?;
        let discovery = self
            .scanner
            .discover_all(self.store(), self.fetcher.as_ref(), keys.as_ref(), &chains)
            .await?;
        let staking_address = match deriver.capability::<GetStakingKey>() {
            Some(staking) => {
                let row = self
                    .scanner
                    .ensure_staking_address(self.store(), keys.as_ref(), &staking)
                    .await?;
                Some(row.address)
            }
            None => None,
        };
        let utxos = deriver.require::<GetAllUtxos>()?;
        let utxo_count = sync_utxos(self.store(), self.fetcher.as_ref(), &utxos).await?;
        Ok(RefreshReport { discovery, staking_address, utxo_count })
    }

    pub async fn balance(&self, deriver: &Arc<PublicDeriver>) -> Result<MultiToken, WalletError> {
        get_balance(self.store(), &deriver.require::<GetAllUtxos>()?).await
    }

    pub async fn delegation(
        &self,
        deriver: &Arc<PublicDeriver>,
    ) -> Result<DelegationSummary, WalletError> {
        let keys = self.keys(deriver.conceptual.id)?;
        let staking = deriver.require::<GetStakingKey>()?;
        get_delegation_state(self.store(), self.fetcher.as_ref(), keys.as_ref(), &staking).await
    }

    pub async fn unmangle_amounts(
        &self,
        deriver: &Arc<PublicDeriver>,
    ) -> Result<UnmangleSummary, WalletError> {
        let keys = self.keys(deriver.conceptual.id)?;
        get_unmangle_amounts(self.store(), keys.as_ref(), deriver).await
    }

    pub async fn reward_history(
        &self,
        deriver: &Arc<PublicDeriver>,
    ) -> Result<Vec<RewardWithTime>, WalletError> {
        let keys = self.keys(deriver.conceptual.id)?;
        let reward_address = deriver.require::<GetStakingKey>()?.reward_address(keys.as_ref())?;
        let timeline = &deriver.network().eras;
        reward_history_with_time(self.fetcher.as_ref(), timeline, &reward_address).await
    }

    /// Next receive address above the display cutoff.
    pub async fn next_receive_address(
        &self,
        deriver: &Arc<PublicDeriver>,
    ) -> Result<AddressRow, WalletError> {
        let cutoff = deriver.require::<DisplayCutoff>()?;
        let result = cutoff.pop_address(self.store()).await;
        if let Err(WalletError::NoAddressAboveCutoff { cutoff }) = &result {
            warn!(
                deriver = deriver.id.0,
                ?cutoff,
                "receive addresses exhausted; refresh to extend discovery"
            );
        }
        result
    }

    fn conceptual_from_row(
        &self,
        row: ConceptualWalletRow,
    ) -> Result<ConceptualWallet, WalletError> {
        Ok(ConceptualWallet {
            id: row.id,
            network: self.network(row.network_id.0)?,
            scheme: row.scheme,
            name: row.name,
            hardware: row.hardware,
        })
    }
}

fn account_path(scheme: DerivationScheme, account: u32) -> DerivationPath {
    DerivationPath::account(scheme.purpose(), CARDANO_COIN_TYPE, account)
}

fn insert_account(
    tx: &mut dyn WriteTx,
    wallet: WalletId,
    path: DerivationPath,
    account_key: PublicKey,
) -> Result<PublicDeriverRow, WalletError> {
    let id = DeriverId(tx.allocate_id());
    let root_node = NodeId(tx.allocate_id());
    let row = PublicDeriverRow { id, wallet, path, account_key, root_node, display_cutoff: None };
    tx.insert_deriver(row.clone())?;
    tx.insert_key_node(KeyDerivationRow {
        id: root_node,
        deriver: id,
        parent: None,
        index: row.path.indices().last().copied().unwrap_or_default(),
        public_key: Some(account_key),
    })?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tally_core::error::CollaboratorError;
    use tally_core::traits::{AccountState, RemoteUtxo, RewardEntry};
    use tally_core::types::{Chain, Hash256, OutPoint};

    use crate::keys::Seed;
    use crate::store::MemoryStore;

    #[derive(Default)]
    struct MockFetcher {
        used: Mutex<HashSet<Address>>,
        utxos: Mutex<Vec<RemoteUtxo>>,
    }

    #[async_trait]
    impl StateFetcher for MockFetcher {
        async fn check_addresses_in_use(
            &self,
            addresses: &[Address],
        ) -> Result<HashSet<Address>, CollaboratorError> {
            let used = self.used.lock();
            Ok(addresses.iter().filter(|a| used.contains(a)).cloned().collect())
        }

        async fn get_utxos_for_addresses(
            &self,
            addresses: &[Address],
        ) -> Result<Vec<RemoteUtxo>, CollaboratorError> {
            let wanted: HashSet<Vec<u8>> = addresses.iter().map(Address::to_bytes).collect();
            Ok(self.utxos.lock().iter().filter(|u| wanted.contains(&u.address)).cloned().collect())
        }

        async fn get_account_state(
            &self,
            _address: &Address,
        ) -> Result<AccountState, CollaboratorError> {
            Ok(AccountState::default())
        }

        async fn get_reward_history(
            &self,
            _address: &Address,
        ) -> Result<Vec<RewardEntry>, CollaboratorError> {
            Ok(Vec::new())
        }
    }

    fn service() -> (WalletService, Arc<MockFetcher>) {
        let fetcher = Arc::new(MockFetcher::default());
        let config = WalletConfig { gap_limit: 5, ..WalletConfig::default() };
        let store = Arc::new(MemoryStore::new());
        let svc = WalletService::new(&config, store, fetcher.clone()).unwrap();
        (svc, fetcher)
    }

    fn request(scheme: DerivationScheme) -> NewWallet {
        NewWallet { network_id: 0, scheme, name: "main".into(), hardware: None }
    }

    fn keyring(b: u8) -> Arc<dyn KeyDeriver> {
        Arc::new(SeedKeyring::new(Seed::from_bytes([b; 32])))
    }

    #[tokio::test]
    async fn create_and_reload() {
        let (svc, _) = service();
        let d = svc.create_wallet(request(DerivationScheme::Cip1852), keyring(1)).await.unwrap();
        assert_eq!(d.path.to_string(), "m/1852'/1815'/0'");
        let reloaded = svc.load_deriver(d.id).await.unwrap();
        assert_eq!(reloaded.account_key, d.account_key);
        assert_eq!(reloaded.capabilities(), d.capabilities());
        assert_eq!(svc.list_wallets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_network_is_config_error() {
        let (svc, _) = service();
        let req = NewWallet { network_id: 9999, ..request(DerivationScheme::Cip1852) };
        let err = svc.create_wallet(req, keyring(1)).await.unwrap_err();
        assert_eq!(err, WalletError::Config(ConfigError::UnknownNetwork(9999)));
    }

    #[tokio::test]
    async fn legacy_on_jormungandr_rejected_before_writing() {
        let (svc, _) = service();
        let req = NewWallet { network_id: 100, ..request(DerivationScheme::Bip44) };
        let err = svc.create_wallet(req, keyring(1)).await.unwrap_err();
        assert!(matches!(err, WalletError::Config(ConfigError::UnsupportedCombination { .. })));
        assert!(svc.list_wallets().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn refresh_discovers_and_syncs() {
        let (svc, fetcher) = service();
        let d = svc.create_wallet(request(DerivationScheme::Cip1852), keyring(2)).await.unwrap();
        let chains = d.require::<HasUtxoChains>().unwrap();

        // First pass: nothing used, one batch per chain.
        let report = svc.refresh(&d).await.unwrap();
        assert_eq!(report.discovery[0].derived_total, 5);
        assert_eq!(report.discovery[1].derived_total, 5);
        assert!(report.staking_address.is_some());
        assert_eq!(report.utxo_count, 0);

        // Usage at external index 3 extends the chain by one batch.
        let external = chains.chain_addresses(svc.store(), Chain::External).await.unwrap();
        fetcher.used.lock().insert(external[3].address.clone());
        fetcher.utxos.lock().push(RemoteUtxo {
            out_point: OutPoint { tx_id: Hash256([9; 32]), index: 0 },
            address: external[3].address.to_bytes(),
            value: d.network().lovelace(3_000_000),
        });
        let report = svc.refresh(&d).await.unwrap();
        assert_eq!(report.discovery[0].derived_total, 10);
        assert_eq!(report.discovery[0].last_used, Some(3));
        assert_eq!(report.utxo_count, 1);
        assert_eq!(svc.balance(&d).await.unwrap(), d.network().lovelace(3_000_000));

        let delegation = svc.delegation(&d).await.unwrap();
        assert_eq!(delegation.utxo_delegated, d.network().lovelace(3_000_000));
        assert!(svc.unmangle_amounts(&d).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn receive_addresses_exhaust_without_refresh() {
        let (svc, _) = service();
        let d = svc.create_wallet(request(DerivationScheme::Bip44), keyring(3)).await.unwrap();
        assert!(matches!(
            svc.next_receive_address(&d).await,
            Err(WalletError::NoAddressAboveCutoff { cutoff: None })
        ));
        svc.refresh(&d).await.unwrap();
        for expected in 0..5 {
            assert_eq!(svc.next_receive_address(&d).await.unwrap().index, expected);
        }
        assert!(matches!(
            svc.next_receive_address(&d).await,
            Err(WalletError::NoAddressAboveCutoff { cutoff: Some(4) })
        ));
    }

    #[tokio::test]
    async fn legacy_wallet_has_no_delegation() {
        let (svc, _) = service();
        let d = svc.create_wallet(request(DerivationScheme::Bip44), keyring(4)).await.unwrap();
        let report = svc.refresh(&d).await.unwrap();
        assert!(report.staking_address.is_none());
        assert!(matches!(svc.delegation(&d).await, Err(WalletError::MissingCapability(_))));
    }

    #[tokio::test]
    async fn accounts_rename_and_remove() {
        let (svc, _) = service();
        let d = svc.create_wallet(request(DerivationScheme::Cip1852), keyring(5)).await.unwrap();
        let wallet = d.conceptual.id;
        let second = svc.add_account(wallet, 1).await.unwrap();
        assert_eq!(second.path.to_string(), "m/1852'/1815'/1'");
        assert!(svc.add_account(wallet, 1).await.is_err());
        assert_eq!(svc.list_derivers(wallet).await.unwrap().len(), 2);

        let renamed = svc.rename_wallet(wallet, "savings").await.unwrap();
        assert_eq!(renamed.name, "savings");
        assert_eq!(d.conceptual.name, "main");

        svc.refresh(&d).await.unwrap();
        assert!(svc.scanner().is_tracking(d.id));

        svc.remove_wallet(wallet).await.unwrap();
        assert!(!svc.scanner().is_tracking(d.id));
        assert!(matches!(svc.load_deriver(second.id).await, Err(WalletError::StaleState { .. })));
        assert!(svc.add_account(wallet, 2).await.is_err());
    }

    #[tokio::test]
    async fn restore_is_deterministic() {
        let (svc, _) = service();
        let phrase = crate::mnemonic::seed_to_mnemonic(&Seed::from_bytes([6; 32])).unwrap();
        let scheme = DerivationScheme::Cip1852;
        let a = svc.restore_from_mnemonic(0, scheme, "a", &phrase).await.unwrap();
        let b = svc.restore_from_mnemonic(0, scheme, "b", &phrase).await.unwrap();
        assert_ne!(a.conceptual.id, b.conceptual.id);
        assert_eq!(a.account_key, b.account_key);
        assert!(svc.restore_from_mnemonic(0, scheme, "c", "not a phrase").await.is_err());
    }
}
