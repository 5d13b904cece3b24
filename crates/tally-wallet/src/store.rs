//! Persistence contract and the in-memory store.
//!
//! All access goes through scoped transactions. A transaction names the
//! tables it touches up front; their locks are taken in canonical
//! [`Table`] order (so two transactions can never deadlock) and released
//! when the transaction is dropped, whatever the exit path.
//!
//! Write transactions stage every change and publish it only on
//! [`WriteTx::commit`]. Dropping an uncommitted write transaction discards
//! its changes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_core::address::Address;
use tally_core::multi_token::{MultiToken, NetworkId};
use tally_core::types::{Chain, DerivationPath, OutPoint, PublicKey};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

use crate::capability::DerivationScheme;
use crate::error::{StoreError, WalletError};
use crate::model::{DeriverId, HardwareIdentity, NodeId, WalletId};
use crate::scanner::AddressUsage;

/// Tables of the wallet store, in canonical lock order.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    ConceptualWallets,
    PublicDerivers,
    KeyDerivations,
    Addresses,
    Utxos,
}

impl Table {
    pub const ALL: [Table; 5] = [
        Table::ConceptualWallets,
        Table::PublicDerivers,
        Table::KeyDerivations,
        Table::Addresses,
        Table::Utxos,
    ];

    /// Human name of one row.
    pub fn entity(&self) -> &'static str {
        match self {
            Table::ConceptualWallets => "conceptual wallet",
            Table::PublicDerivers => "public deriver",
            Table::KeyDerivations => "key derivation",
            Table::Addresses => "address",
            Table::Utxos => "utxo",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Table::ConceptualWallets => "conceptual_wallets",
            Table::PublicDerivers => "public_derivers",
            Table::KeyDerivations => "key_derivations",
            Table::Addresses => "addresses",
            Table::Utxos => "utxos",
        };
        f.write_str(name)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ConceptualWalletRow {
    pub id: WalletId,
    pub network_id: NetworkId,
    pub scheme: DerivationScheme,
    pub name: String,
    pub hardware: Option<HardwareIdentity>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PublicDeriverRow {
    pub id: DeriverId,
    pub wallet: WalletId,
    pub path: DerivationPath,
    pub account_key: PublicKey,
    /// Key-derivation node of the account itself.
    pub root_node: NodeId,
    /// Highest external index already shown to the user.
    pub display_cutoff: Option<u32>,
}

/// One path segment; never mutated once written.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct KeyDerivationRow {
    pub id: NodeId,
    pub deriver: DeriverId,
    pub parent: Option<NodeId>,
    pub index: u32,
    pub public_key: Option<PublicKey>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct AddressRow {
    pub deriver: DeriverId,
    pub chain: Chain,
    pub index: u32,
    pub node: NodeId,
    pub address: Address,
    pub usage: AddressUsage,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UtxoRow {
    pub deriver: DeriverId,
    pub out_point: OutPoint,
    /// Raw address payload as reported by the ledger.
    pub address: Vec<u8>,
    pub value: MultiToken,
}

/// Read access to the tables a transaction holds.
pub trait ReadTx: Send {
    fn wallet(&self, id: WalletId) -> Result<ConceptualWalletRow, StoreError>;
    fn wallets(&self) -> Result<Vec<ConceptualWalletRow>, StoreError>;
    fn deriver(&self, id: DeriverId) -> Result<PublicDeriverRow, StoreError>;
    fn derivers_of(&self, wallet: WalletId) -> Result<Vec<PublicDeriverRow>, StoreError>;
    fn key_node(&self, id: NodeId) -> Result<KeyDerivationRow, StoreError>;
    fn key_nodes_of(&self, deriver: DeriverId) -> Result<Vec<KeyDerivationRow>, StoreError>;
    /// Addresses of a deriver ordered by `(chain, index)`, optionally for one chain.
    fn addresses(
        &self,
        deriver: DeriverId,
        chain: Option<Chain>,
    ) -> Result<Vec<AddressRow>, StoreError>;
    fn utxos(&self, deriver: DeriverId) -> Result<Vec<UtxoRow>, StoreError>;
}

/// Staged write access. Nothing is visible to other transactions before `commit`.
pub trait WriteTx: ReadTx {
    /// Next id from the store's allocator.
    fn allocate_id(&mut self) -> u64;
    fn insert_wallet(&mut self, row: ConceptualWalletRow) -> Result<(), StoreError>;
    fn rename_wallet(&mut self, id: WalletId, name: &str) -> Result<(), StoreError>;
    /// Remove a wallet and everything derived from it.
    fn remove_wallet(&mut self, id: WalletId) -> Result<(), StoreError>;
    fn insert_deriver(&mut self, row: PublicDeriverRow) -> Result<(), StoreError>;
    /// Remove a deriver with its key nodes, addresses and UTXOs.
    fn remove_deriver(&mut self, id: DeriverId) -> Result<(), StoreError>;
    fn set_display_cutoff(&mut self, id: DeriverId, cutoff: Option<u32>) -> Result<(), StoreError>;
    fn insert_key_node(&mut self, row: KeyDerivationRow) -> Result<(), StoreError>;
    fn insert_address(&mut self, row: AddressRow) -> Result<(), StoreError>;
    /// Merge an observed usage into an address row. `Used` is never undone.
    fn mark_address_usage(
        &mut self,
        deriver: DeriverId,
        chain: Chain,
        index: u32,
        observed: AddressUsage,
    ) -> Result<(), StoreError>;
    fn replace_utxos(&mut self, deriver: DeriverId, rows: Vec<UtxoRow>) -> Result<(), StoreError>;
    /// Publish staged changes and release the locks.
    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional store of wallet state.
#[async_trait]
pub trait WalletStore: Send + Sync {
    async fn begin_read(&self, tables: &[Table]) -> Result<Box<dyn ReadTx>, StoreError>;
    async fn begin_write(&self, tables: &[Table]) -> Result<Box<dyn WriteTx>, StoreError>;
}

/// Run `body` inside a read transaction over `tables`.
pub async fn scoped_read<R>(
    store: &dyn WalletStore,
    tables: &[Table],
    body: impl FnOnce(&dyn ReadTx) -> Result<R, WalletError>,
) -> Result<R, WalletError> {
    let tx = store.begin_read(tables).await?;
    body(tx.as_ref())
}

/// Run `body` inside a write transaction over `tables`, committing only if it succeeds.
pub async fn scoped_write<R>(
    store: &dyn WalletStore,
    tables: &[Table],
    body: impl FnOnce(&mut dyn WriteTx) -> Result<R, WalletError>,
) -> Result<R, WalletError> {
    let mut tx = store.begin_write(tables).await?;
    let out = body(tx.as_mut())?;
    tx.commit()?;
    Ok(out)
}

/// Monotonic id source owned by a store.
#[derive(Debug)]
pub struct IdAllocator {
    next: Mutex<u64>,
}

impl IdAllocator {
    pub fn starting_at(first: u64) -> Self {
        Self { next: Mutex::new(first) }
    }

    pub fn next(&self) -> u64 {
        let mut next = self.next.lock();
        let id = *next;
        *next += 1;
        id
    }
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}

type WalletTable = BTreeMap<WalletId, ConceptualWalletRow>;
type DeriverTable = BTreeMap<DeriverId, PublicDeriverRow>;
type NodeTable = BTreeMap<NodeId, KeyDerivationRow>;
type AddressTable = BTreeMap<(DeriverId, Chain, u32), AddressRow>;
type UtxoTable = BTreeMap<(DeriverId, OutPoint), UtxoRow>;

/// In-memory [`WalletStore`] with one async read/write lock per table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    wallets: Arc<RwLock<WalletTable>>,
    derivers: Arc<RwLock<DeriverTable>>,
    nodes: Arc<RwLock<NodeTable>>,
    addresses: Arc<RwLock<AddressTable>>,
    utxos: Arc<RwLock<UtxoTable>>,
    ids: Arc<IdAllocator>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store drawing row ids from a caller-supplied allocator.
    pub fn with_allocator(ids: Arc<IdAllocator>) -> Self {
        Self { ids, ..Self::default() }
    }

    async fn begin(&self, tables: &[Table], write: bool) -> MemoryTx {
        let mut ordered = tables.to_vec();
        ordered.sort();
        ordered.dedup();
        let mut tx = MemoryTx {
            wallets: None,
            derivers: None,
            nodes: None,
            addresses: None,
            utxos: None,
            ids: Arc::clone(&self.ids),
        };
        for table in &ordered {
            match table {
                Table::ConceptualWallets => {
                    tx.wallets = Some(Held::acquire(&self.wallets, write).await);
                }
                Table::PublicDerivers => {
                    tx.derivers = Some(Held::acquire(&self.derivers, write).await);
                }
                Table::KeyDerivations => tx.nodes = Some(Held::acquire(&self.nodes, write).await),
                Table::Addresses => {
                    tx.addresses = Some(Held::acquire(&self.addresses, write).await);
                }
                Table::Utxos => tx.utxos = Some(Held::acquire(&self.utxos, write).await),
            }
        }
        trace!(tables = ?ordered, write, "transaction begun");
        tx
    }
}

#[async_trait]
impl WalletStore for MemoryStore {
    async fn begin_read(&self, tables: &[Table]) -> Result<Box<dyn ReadTx>, StoreError> {
        Ok(Box::new(self.begin(tables, false).await))
    }

    async fn begin_write(&self, tables: &[Table]) -> Result<Box<dyn WriteTx>, StoreError> {
        Ok(Box::new(self.begin(tables, true).await))
    }
}

/// A table lock held by a transaction, with staged contents for writes.
enum Held<T> {
    Read(OwnedRwLockReadGuard<T>),
    Write { guard: OwnedRwLockWriteGuard<T>, staged: Option<T> },
}

impl<T: Clone> Held<T> {
    async fn acquire(lock: &Arc<RwLock<T>>, write: bool) -> Self {
        if write {
            Held::Write { guard: Arc::clone(lock).write_owned().await, staged: None }
        } else {
            Held::Read(Arc::clone(lock).read_owned().await)
        }
    }

    fn get(&self) -> &T {
        match self {
            Held::Read(guard) => guard,
            Held::Write { guard, staged } => staged.as_ref().unwrap_or(guard),
        }
    }

    fn get_mut(&mut self) -> Option<&mut T> {
        match self {
            Held::Read(_) => None,
            Held::Write { guard, staged } => Some(staged.get_or_insert_with(|| (**guard).clone())),
        }
    }

    fn publish(&mut self) {
        if let Held::Write { guard, staged } = self {
            if let Some(next) = staged.take() {
                **guard = next;
            }
        }
    }
}

fn read<T: Clone>(held: &Option<Held<T>>, table: Table) -> Result<&T, StoreError> {
    held.as_ref().map(Held::get).ok_or(StoreError::TableNotLocked(table))
}

fn write<T: Clone>(held: &mut Option<Held<T>>, table: Table) -> Result<&mut T, StoreError> {
    match held {
        None => Err(StoreError::TableNotLocked(table)),
        Some(h) => h.get_mut().ok_or(StoreError::ReadOnly(table)),
    }
}

struct MemoryTx {
    wallets: Option<Held<WalletTable>>,
    derivers: Option<Held<DeriverTable>>,
    nodes: Option<Held<NodeTable>>,
    addresses: Option<Held<AddressTable>>,
    utxos: Option<Held<UtxoTable>>,
    ids: Arc<IdAllocator>,
}

impl MemoryTx {
    fn require_deriver(&self, id: DeriverId) -> Result<(), StoreError> {
        if read(&self.derivers, Table::PublicDerivers)?.contains_key(&id) {
            Ok(())
        } else {
            Err(StoreError::Stale { table: Table::PublicDerivers, id: id.0 })
        }
    }
}

impl ReadTx for MemoryTx {
    fn wallet(&self, id: WalletId) -> Result<ConceptualWalletRow, StoreError> {
        read(&self.wallets, Table::ConceptualWallets)?
            .get(&id)
            .cloned()
            .ok_or(StoreError::Stale { table: Table::ConceptualWallets, id: id.0 })
    }

    fn wallets(&self) -> Result<Vec<ConceptualWalletRow>, StoreError> {
        Ok(read(&self.wallets, Table::ConceptualWallets)?.values().cloned().collect())
    }

    fn deriver(&self, id: DeriverId) -> Result<PublicDeriverRow, StoreError> {
        read(&self.derivers, Table::PublicDerivers)?
            .get(&id)
            .cloned()
            .ok_or(StoreError::Stale { table: Table::PublicDerivers, id: id.0 })
    }

    fn derivers_of(&self, wallet: WalletId) -> Result<Vec<PublicDeriverRow>, StoreError> {
        Ok(read(&self.derivers, Table::PublicDerivers)?
            .values()
            .filter(|d| d.wallet == wallet)
            .cloned()
            .collect())
    }

    fn key_node(&self, id: NodeId) -> Result<KeyDerivationRow, StoreError> {
        read(&self.nodes, Table::KeyDerivations)?
            .get(&id)
            .cloned()
            .ok_or(StoreError::Stale { table: Table::KeyDerivations, id: id.0 })
    }

    fn key_nodes_of(&self, deriver: DeriverId) -> Result<Vec<KeyDerivationRow>, StoreError> {
        Ok(read(&self.nodes, Table::KeyDerivations)?
            .values()
            .filter(|n| n.deriver == deriver)
            .cloned()
            .collect())
    }

    fn addresses(
        &self,
        deriver: DeriverId,
        chain: Option<Chain>,
    ) -> Result<Vec<AddressRow>, StoreError> {
        let table = read(&self.addresses, Table::Addresses)?;
        let rows = match chain {
            Some(chain) => table
                .range((deriver, chain, 0)..=(deriver, chain, u32::MAX))
                .map(|(_, row)| row.clone())
                .collect(),
            None => table
                .range((deriver, Chain::External, 0)..=(deriver, Chain::Staking, u32::MAX))
                .map(|(_, row)| row.clone())
                .collect(),
        };
        Ok(rows)
    }

    fn utxos(&self, deriver: DeriverId) -> Result<Vec<UtxoRow>, StoreError> {
        Ok(read(&self.utxos, Table::Utxos)?
            .iter()
            .filter(|((d, _), _)| *d == deriver)
            .map(|(_, row)| row.clone())
            .collect())
    }
}

fn duplicate(table: Table, key: &impl std::fmt::Display) -> StoreError {
    StoreError::Duplicate { table, key: key.to_string() }
}

impl WriteTx for MemoryTx {
    fn allocate_id(&mut self) -> u64 {
        self.ids.next()
    }

    fn insert_wallet(&mut self, row: ConceptualWalletRow) -> Result<(), StoreError> {
        let table = write(&mut self.wallets, Table::ConceptualWallets)?;
        if table.contains_key(&row.id) {
            return Err(duplicate(Table::ConceptualWallets, &row.id));
        }
        table.insert(row.id, row);
        Ok(())
    }

    fn rename_wallet(&mut self, id: WalletId, name: &str) -> Result<(), StoreError> {
        let row = write(&mut self.wallets, Table::ConceptualWallets)?
            .get_mut(&id)
            .ok_or(StoreError::Stale { table: Table::ConceptualWallets, id: id.0 })?;
        row.name = name.to_string();
        Ok(())
    }

    fn remove_wallet(&mut self, id: WalletId) -> Result<(), StoreError> {
        write(&mut self.wallets, Table::ConceptualWallets)?
            .remove(&id)
            .ok_or(StoreError::Stale { table: Table::ConceptualWallets, id: id.0 })?;
        let owned: Vec<DeriverId> = self.derivers_of(id)?.into_iter().map(|d| d.id).collect();
        for deriver in owned {
            self.remove_deriver(deriver)?;
        }
        Ok(())
    }

    fn insert_deriver(&mut self, row: PublicDeriverRow) -> Result<(), StoreError> {
        if !read(&self.wallets, Table::ConceptualWallets)?.contains_key(&row.wallet) {
            return Err(StoreError::Stale { table: Table::ConceptualWallets, id: row.wallet.0 });
        }
        let table = write(&mut self.derivers, Table::PublicDerivers)?;
        if table.contains_key(&row.id) {
            return Err(duplicate(Table::PublicDerivers, &row.id));
        }
        if table.values().any(|d| d.wallet == row.wallet && d.path == row.path) {
            return Err(duplicate(Table::PublicDerivers, &row.path));
        }
        table.insert(row.id, row);
        Ok(())
    }

    fn remove_deriver(&mut self, id: DeriverId) -> Result<(), StoreError> {
        write(&mut self.derivers, Table::PublicDerivers)?
            .remove(&id)
            .ok_or(StoreError::Stale { table: Table::PublicDerivers, id: id.0 })?;
        write(&mut self.nodes, Table::KeyDerivations)?.retain(|_, n| n.deriver != id);
        write(&mut self.addresses, Table::Addresses)?.retain(|(d, _, _), _| *d != id);
        write(&mut self.utxos, Table::Utxos)?.retain(|(d, _), _| *d != id);
        Ok(())
    }

    fn set_display_cutoff(&mut self, id: DeriverId, cutoff: Option<u32>) -> Result<(), StoreError> {
        let row = write(&mut self.derivers, Table::PublicDerivers)?
            .get_mut(&id)
            .ok_or(StoreError::Stale { table: Table::PublicDerivers, id: id.0 })?;
        row.display_cutoff = cutoff;
        Ok(())
    }

    fn insert_key_node(&mut self, row: KeyDerivationRow) -> Result<(), StoreError> {
        self.require_deriver(row.deriver)?;
        let table = write(&mut self.nodes, Table::KeyDerivations)?;
        if let Some(parent) = row.parent {
            if !table.contains_key(&parent) {
                return Err(StoreError::Stale { table: Table::KeyDerivations, id: parent.0 });
            }
        }
        if table.contains_key(&row.id) {
            return Err(duplicate(Table::KeyDerivations, &row.id));
        }
        table.insert(row.id, row);
        Ok(())
    }

    fn insert_address(&mut self, row: AddressRow) -> Result<(), StoreError> {
        self.require_deriver(row.deriver)?;
        let key = (row.deriver, row.chain, row.index);
        let table = write(&mut self.addresses, Table::Addresses)?;
        if table.contains_key(&key) {
            return Err(StoreError::Duplicate {
                table: Table::Addresses,
                key: format!("{}/{}/{}", row.deriver, row.chain, row.index),
            });
        }
        table.insert(key, row);
        Ok(())
    }

    fn mark_address_usage(
        &mut self,
        deriver: DeriverId,
        chain: Chain,
        index: u32,
        observed: AddressUsage,
    ) -> Result<(), StoreError> {
        let row = write(&mut self.addresses, Table::Addresses)?
            .get_mut(&(deriver, chain, index))
            .ok_or(StoreError::Stale { table: Table::Addresses, id: u64::from(index) })?;
        row.usage = row.usage.merge(observed);
        Ok(())
    }

    fn replace_utxos(&mut self, deriver: DeriverId, rows: Vec<UtxoRow>) -> Result<(), StoreError> {
        self.require_deriver(deriver)?;
        let table = write(&mut self.utxos, Table::Utxos)?;
        table.retain(|(d, _), _| *d != deriver);
        for row in rows {
            table.insert((deriver, row.out_point), UtxoRow { deriver, ..row });
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        if let Some(h) = self.wallets.as_mut() {
            h.publish();
        }
        if let Some(h) = self.derivers.as_mut() {
            h.publish();
        }
        if let Some(h) = self.nodes.as_mut() {
            h.publish();
        }
        if let Some(h) = self.addresses.as_mut() {
            h.publish();
        }
        if let Some(h) = self.utxos.as_mut() {
            h.publish();
        }
        trace!("transaction committed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::address::{ChainNetwork, Credential};
    use tally_core::multi_token::{DefaultToken, TokenId};
    use tally_core::types::{Hash256, Hash28};

    fn key() -> PublicKey {
        let signing = ed25519_dalek::SigningKey::from_bytes(&[7u8; 32]);
        PublicKey::from_verifying_key(signing.verifying_key())
    }

    fn wallet_row(id: u64) -> ConceptualWalletRow {
        ConceptualWalletRow {
            id: WalletId(id),
            network_id: NetworkId(0),
            scheme: DerivationScheme::Cip1852,
            name: format!("wallet {id}"),
            hardware: None,
        }
    }

    fn deriver_row(id: u64, wallet: u64, account: u32) -> PublicDeriverRow {
        PublicDeriverRow {
            id: DeriverId(id),
            wallet: WalletId(wallet),
            path: DerivationPath::account(1852, 1815, account),
            account_key: key(),
            root_node: NodeId(id * 100),
            display_cutoff: None,
        }
    }

    fn address_row(deriver: u64, chain: Chain, index: u32) -> AddressRow {
        AddressRow {
            deriver: DeriverId(deriver),
            chain,
            index,
            node: NodeId(1_000 + u64::from(index)),
            address: Address::Enterprise {
                network: ChainNetwork::Testnet,
                payment: Credential::Key(Hash28::digest(&index.to_le_bytes())),
            },
            usage: AddressUsage::Unchecked,
        }
    }

    fn utxo_row(deriver: u64, n: u8) -> UtxoRow {
        UtxoRow {
            deriver: DeriverId(deriver),
            out_point: OutPoint { tx_id: Hash256([n; 32]), index: 0 },
            address: vec![n],
            value: MultiToken::from_default(
                u64::from(n),
                DefaultToken::new(NetworkId(0), TokenId::default()),
            ),
        }
    }

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        scoped_write(&store, &Table::ALL, |tx| {
            tx.insert_wallet(wallet_row(1))?;
            tx.insert_deriver(deriver_row(10, 1, 0))?;
            tx.insert_address(address_row(10, Chain::External, 0))?;
            tx.insert_address(address_row(10, Chain::External, 1))?;
            tx.insert_address(address_row(10, Chain::Internal, 0))?;
            tx.replace_utxos(DeriverId(10), vec![utxo_row(10, 1), utxo_row(10, 2)])?;
            Ok(())
        })
        .await
        .unwrap();
        store
    }

    #[tokio::test]
    async fn committed_writes_are_visible() {
        let store = seeded().await;
        let rows =
            scoped_read(&store, &[Table::Addresses], |tx| Ok(tx.addresses(DeriverId(10), None)?))
                .await
                .unwrap();
        let keys: Vec<(Chain, u32)> = rows.iter().map(|r| (r.chain, r.index)).collect();
        assert_eq!(keys, vec![(Chain::External, 0), (Chain::External, 1), (Chain::Internal, 0)]);
    }

    #[tokio::test]
    async fn failed_body_commits_nothing() {
        let store = seeded().await;
        let tables = [Table::PublicDerivers, Table::Addresses];
        let result: Result<(), WalletError> = scoped_write(&store, &tables, |tx| {
            tx.insert_address(address_row(10, Chain::External, 2))?;
            Err(WalletError::KeyDerivation("boom".into()))
        })
        .await;
        assert!(result.is_err());
        let count = scoped_read(&store, &[Table::Addresses], |tx| {
            Ok(tx.addresses(DeriverId(10), Some(Chain::External))?.len())
        })
        .await
        .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn dropped_write_tx_discards_changes() {
        let store = seeded().await;
        {
            let mut tx = store.begin_write(&[Table::ConceptualWallets]).await.unwrap();
            tx.rename_wallet(WalletId(1), "renamed").unwrap();
            assert_eq!(tx.wallet(WalletId(1)).unwrap().name, "renamed");
        }
        let name =
            scoped_read(&store, &[Table::ConceptualWallets], |tx| Ok(tx.wallet(WalletId(1))?.name))
                .await
                .unwrap();
        assert_eq!(name, "wallet 1");
    }

    #[tokio::test]
    async fn untouched_table_is_not_locked() {
        let store = seeded().await;
        let tx = store.begin_read(&[Table::Addresses]).await.unwrap();
        assert_eq!(tx.utxos(DeriverId(10)).unwrap_err(), StoreError::TableNotLocked(Table::Utxos));
    }

    #[tokio::test]
    async fn address_insert_needs_deriver_table() {
        let store = seeded().await;
        let mut tx = store.begin_write(&[Table::Addresses]).await.unwrap();
        assert_eq!(
            tx.insert_address(address_row(10, Chain::External, 5)).unwrap_err(),
            StoreError::TableNotLocked(Table::PublicDerivers)
        );
    }

    #[tokio::test]
    async fn remove_wallet_cascades() {
        let store = seeded().await;
        scoped_write(&store, &Table::ALL, |tx| Ok(tx.remove_wallet(WalletId(1))?)).await.unwrap();
        let (derivers, addresses, utxos) = scoped_read(&store, &Table::ALL, |tx| {
            Ok((
                tx.derivers_of(WalletId(1))?.len(),
                tx.addresses(DeriverId(10), None)?.len(),
                tx.utxos(DeriverId(10))?.len(),
            ))
        })
        .await
        .unwrap();
        assert_eq!((derivers, addresses, utxos), (0, 0, 0));
    }

    #[tokio::test]
    async fn missing_deriver_is_stale() {
        let store = seeded().await;
        let err = scoped_read(&store, &[Table::PublicDerivers], |tx| Ok(tx.deriver(DeriverId(99))?))
            .await
            .unwrap_err();
        assert_eq!(err, WalletError::StaleState { entity: "public deriver", id: 99 });
    }

    #[tokio::test]
    async fn insert_for_removed_deriver_is_stale() {
        let store = seeded().await;
        scoped_write(&store, &Table::ALL, |tx| Ok(tx.remove_deriver(DeriverId(10))?)).await.unwrap();
        let err = scoped_write(&store, &[Table::PublicDerivers, Table::Addresses], |tx| {
            Ok(tx.insert_address(address_row(10, Chain::External, 9))?)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, WalletError::StaleState { entity: "public deriver", id: 10 }));
    }

    #[tokio::test]
    async fn usage_merge_is_monotonic() {
        let store = seeded().await;
        for observed in [AddressUsage::Used, AddressUsage::Unused, AddressUsage::Unchecked] {
            scoped_write(&store, &[Table::Addresses], |tx| {
                Ok(tx.mark_address_usage(DeriverId(10), Chain::External, 1, observed)?)
            })
            .await
            .unwrap();
        }
        let usage = scoped_read(&store, &[Table::Addresses], |tx| {
            Ok(tx.addresses(DeriverId(10), Some(Chain::External))?[1].usage)
        })
        .await
        .unwrap();
        assert_eq!(usage, AddressUsage::Used);
    }

    #[tokio::test]
    async fn duplicate_account_path_rejected() {
        let store = seeded().await;
        let err = scoped_write(&store, &[Table::ConceptualWallets, Table::PublicDerivers], |tx| {
            Ok(tx.insert_deriver(deriver_row(11, 1, 0))?)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, WalletError::Store(StoreError::Duplicate { table: Table::PublicDerivers, .. })));
    }

    #[tokio::test]
    async fn replace_utxos_swaps_whole_set() {
        let store = seeded().await;
        scoped_write(&store, &[Table::PublicDerivers, Table::Utxos], |tx| {
            Ok(tx.replace_utxos(DeriverId(10), vec![utxo_row(10, 9)])?)
        })
        .await
        .unwrap();
        let utxos = scoped_read(&store, &[Table::Utxos], |tx| Ok(tx.utxos(DeriverId(10))?)).await.unwrap();
        assert_eq!(utxos.len(), 1);
        assert_eq!(utxos[0].out_point.tx_id, Hash256([9; 32]));
    }

    #[tokio::test]
    async fn locks_released_after_scope() {
        let store = seeded().await;
        let _ = scoped_write(&store, &Table::ALL, |_| Err::<(), _>(WalletError::KeyDerivation("x".into()))).await;
        // A second writer would hang forever if the first had leaked its guards.
        let tx = tokio::time::timeout(std::time::Duration::from_secs(1), store.begin_write(&Table::ALL)).await;
        assert!(tx.is_ok());
    }

    #[test]
    fn allocator_is_monotonic() {
        let ids = IdAllocator::default();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        let shared = Arc::new(IdAllocator::starting_at(50));
        let store = MemoryStore::with_allocator(Arc::clone(&shared));
        drop(store);
        assert_eq!(shared.next(), 50);
    }
}
