//! Shared fixtures and a scriptable ledger oracle.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tally_core::address::Address;
use tally_core::error::CollaboratorError;
use tally_core::multi_token::MultiToken;
use tally_core::network::NetworkDescriptor;
use tally_core::traits::{AccountState, RemoteUtxo, RewardEntry, StateFetcher};
use tally_core::types::{Hash256, OutPoint};
use tally_wallet::capability::DerivationScheme;
use tally_wallet::config::WalletConfig;
use tally_wallet::keys::{Seed, SeedKeyring};
use tally_wallet::model::PublicDeriver;
use tally_wallet::store::MemoryStore;
use tally_wallet::wallet::{NewWallet, WalletService};
use tokio::sync::Semaphore;

/// In-memory ledger answering [`StateFetcher`] queries.
///
/// Usage, UTXOs and account state are set by the test. Address checks can
/// be made to fail or to block until released.
#[derive(Default)]
pub struct MockFetcher {
    used: Mutex<HashSet<Address>>,
    /// UTXOs keyed by the address they are reported under.
    utxos: Mutex<Vec<(Address, RemoteUtxo)>>,
    accounts: Mutex<HashMap<Address, AccountState>>,
    rewards: Mutex<HashMap<Address, Vec<RewardEntry>>>,
    fail_countdown: Mutex<Option<usize>>,
    checks: AtomicUsize,
    queried: AtomicUsize,
    hold: Mutex<Option<Arc<Semaphore>>>,
}

impl MockFetcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn mark_used(&self, address: &Address) {
        self.used.lock().insert(address.clone());
    }

    /// Drop an address from the used set, as a rolled-back backend would.
    pub fn forget_used(&self, address: &Address) {
        self.used.lock().remove(address);
    }

    pub fn add_utxo(&self, out_point: OutPoint, address: &Address, value: MultiToken) {
        self.add_raw_utxo(address, RemoteUtxo { out_point, address: address.to_bytes(), value });
    }

    /// Report `utxo` when `owner` is queried, whatever address it sits at.
    /// This is how a backend indexing by payment key surfaces outputs sent
    /// to an address with a foreign staking part.
    pub fn add_raw_utxo(&self, owner: &Address, utxo: RemoteUtxo) {
        self.utxos.lock().push((owner.clone(), utxo));
    }

    pub fn set_account(&self, reward_address: &Address, state: AccountState) {
        self.accounts.lock().insert(reward_address.clone(), state);
    }

    pub fn set_rewards(&self, reward_address: &Address, history: Vec<RewardEntry>) {
        self.rewards.lock().insert(reward_address.clone(), history);
    }

    /// Let `successes` address checks through, then fail the next one.
    pub fn fail_after(&self, successes: usize) {
        *self.fail_countdown.lock() = Some(successes);
    }

    /// Number of address checks answered so far.
    pub fn check_calls(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    /// Addresses asked about across all answered checks.
    pub fn queried_total(&self) -> usize {
        self.queried.load(Ordering::SeqCst)
    }

    /// Block address checks until the returned semaphore gets permits.
    pub fn hold_checks(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.hold.lock() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl StateFetcher for MockFetcher {
    async fn check_addresses_in_use(
        &self,
        addresses: &[Address],
    ) -> Result<HashSet<Address>, CollaboratorError> {
        let hold = self.hold.lock().clone();
        if let Some(gate) = hold {
            let _permit = gate.acquire().await.map_err(|_| CollaboratorError::Cancelled)?;
        }
        {
            let mut countdown = self.fail_countdown.lock();
            match *countdown {
                Some(0) => {
                    *countdown = None;
                    return Err(CollaboratorError::Network("backend unavailable".into()));
                }
                Some(n) => *countdown = Some(n - 1),
                None => {}
            }
        }
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.queried.fetch_add(addresses.len(), Ordering::SeqCst);
        let used = self.used.lock();
        Ok(addresses.iter().filter(|a| used.contains(a)).cloned().collect())
    }

    async fn get_utxos_for_addresses(
        &self,
        addresses: &[Address],
    ) -> Result<Vec<RemoteUtxo>, CollaboratorError> {
        let wanted: HashSet<&Address> = addresses.iter().collect();
        let utxos = self.utxos.lock();
        Ok(utxos
            .iter()
            .filter(|(owner, _)| wanted.contains(owner))
            .map(|(_, u)| u.clone())
            .collect())
    }

    async fn get_account_state(
        &self,
        reward_address: &Address,
    ) -> Result<AccountState, CollaboratorError> {
        Ok(self.accounts.lock().get(reward_address).cloned().unwrap_or_default())
    }

    async fn get_reward_history(
        &self,
        reward_address: &Address,
    ) -> Result<Vec<RewardEntry>, CollaboratorError> {
        Ok(self.rewards.lock().get(reward_address).cloned().unwrap_or_default())
    }
}

pub fn keyring(seed: u8) -> Arc<SeedKeyring> {
    Arc::new(SeedKeyring::new(Seed::from_bytes([seed; 32])))
}

pub fn mainnet() -> NetworkDescriptor {
    NetworkDescriptor::cardano_mainnet().unwrap()
}

/// Distinct out point for test UTXO `n`.
pub fn out_point(n: u8) -> OutPoint {
    OutPoint { tx_id: Hash256([n; 32]), index: u32::from(n) }
}

pub fn service(gap_limit: u32, fetcher: Arc<MockFetcher>) -> WalletService {
    let config = WalletConfig { gap_limit, ..WalletConfig::default() };
    WalletService::new(&config, Arc::new(MemoryStore::new()), fetcher).unwrap()
}

/// Mainnet wallet with one account, keyed from `seed`.
pub async fn wallet(svc: &WalletService, scheme: DerivationScheme, seed: u8) -> Arc<PublicDeriver> {
    let name = format!("wallet-{seed}");
    let request = NewWallet { network_id: 0, scheme, name, hardware: None };
    svc.create_wallet(request, keyring(seed)).await.unwrap()
}
