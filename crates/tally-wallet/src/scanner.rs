//! Gap-limit address discovery.
//!
//! Addresses of one chain are derived in batches of `G` (the gap limit).
//! Each pass asks the network which addresses of the most recent batch
//! have been used. If any has, the next batch is derived and checked in
//! turn; the pass stops at the first batch with no usage. Every address not
//! yet seen used is re-checked on each pass, so usage reported late (below
//! or at the frontier) is recorded on the next run, and late usage in the
//! frontier batch pushes the frontier forward.
//!
//! A pass is staged entirely in memory and committed in one write
//! transaction. If any collaborator call fails, nothing is written.
//!
//! Passes over the same `(deriver, chain)` never overlap. A caller that
//! had to wait while another pass ran to completion receives that pass's
//! outcome instead of starting a new one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tally_core::address::Address;
use tally_core::constants::{HARDENED, MAX_GAP_LIMIT, STAKING_KEY_INDEX};
use tally_core::traits::{KeyDeriver, StateFetcher};
use tally_core::types::{Chain, PublicKey};
use tracing::{debug, info};

use crate::capability::{GetStakingKey, HasUtxoChains, WalletWith};
use crate::error::{ConfigError, WalletError};
use crate::model::{AddressBuilder, DeriverId, NodeId};
use crate::store::{
    scoped_read, scoped_write, AddressRow, KeyDerivationRow, PublicDeriverRow, ReadTx, Table,
    WalletStore, WriteTx,
};

/// On-chain usage of an address as last observed.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum AddressUsage {
    /// Derived but not yet checked.
    #[default]
    Unchecked,
    Unused,
    Used,
}

impl AddressUsage {
    /// Combine a stored usage with a new observation. `Used` absorbs.
    pub fn merge(self, observed: AddressUsage) -> AddressUsage {
        match (self, observed) {
            (AddressUsage::Used, _) | (_, AddressUsage::Used) => AddressUsage::Used,
            (AddressUsage::Unused, _) | (_, AddressUsage::Unused) => AddressUsage::Unused,
            _ => AddressUsage::Unchecked,
        }
    }

    pub fn is_used(&self) -> bool {
        matches!(self, AddressUsage::Used)
    }

    pub fn is_checked(&self) -> bool {
        !matches!(self, AddressUsage::Unchecked)
    }
}

/// Result of one discovery pass over a chain.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    pub chain: Chain,
    /// Addresses known on the chain after the pass.
    pub derived_total: u32,
    /// Addresses derived by this pass.
    pub newly_derived: u32,
    /// Addresses first seen used by this pass.
    pub newly_used: u32,
    /// Highest index such that every address up to it has been checked.
    pub checked_cutoff: Option<u32>,
    pub last_used: Option<u32>,
}

/// Highest index `i` such that addresses `0..=i` are all checked.
pub fn checked_cutoff(rows: &[AddressRow]) -> Option<u32> {
    match rows.iter().position(|r| !r.usage.is_checked()) {
        Some(0) => None,
        Some(first_unchecked) => Some(first_unchecked as u32 - 1),
        None => rows.last().map(|r| r.index),
    }
}

/// Tables touched when discovery commits.
const DISCOVERY_TABLES: [Table; 3] =
    [Table::PublicDerivers, Table::KeyDerivations, Table::Addresses];

struct ChainGate {
    started: AtomicU64,
    last: tokio::sync::Mutex<Option<(u64, DiscoveryOutcome)>>,
}

/// A derived address not yet written.
struct Derived {
    index: u32,
    key: PublicKey,
    address: Address,
}

/// Gap-limit discovery with per-chain pass serialization.
pub struct GapLimitScanner {
    gap_limit: u32,
    gates: Mutex<HashMap<(DeriverId, Chain), Arc<ChainGate>>>,
}

impl GapLimitScanner {
    pub fn new(gap_limit: u32) -> Result<Self, ConfigError> {
        if gap_limit == 0 || gap_limit > MAX_GAP_LIMIT {
            return Err(ConfigError::InvalidGapLimit { value: gap_limit, max: MAX_GAP_LIMIT });
        }
        Ok(Self { gap_limit, gates: Mutex::new(HashMap::new()) })
    }

    pub fn gap_limit(&self) -> u32 {
        self.gap_limit
    }

    /// Drop pass bookkeeping for a deriver that no longer exists.
    pub fn forget(&self, deriver: DeriverId) {
        self.gates.lock().retain(|(id, _), _| *id != deriver);
    }

    /// Whether any pass bookkeeping is held for `deriver`.
    pub fn is_tracking(&self, deriver: DeriverId) -> bool {
        self.gates.lock().keys().any(|(id, _)| *id == deriver)
    }

    fn gate(&self, deriver: DeriverId, chain: Chain) -> Arc<ChainGate> {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry((deriver, chain)).or_insert_with(|| {
            Arc::new(ChainGate { started: AtomicU64::new(0), last: tokio::sync::Mutex::new(None) })
        }))
    }

    /// Run (or join) a discovery pass over `chain`.
    pub async fn discover(
        &self,
        store: &dyn WalletStore,
        fetcher: &dyn StateFetcher,
        keys: &dyn KeyDeriver,
        wallet: &WalletWith<HasUtxoChains>,
        chain: Chain,
    ) -> Result<DiscoveryOutcome, WalletError> {
        if !Chain::UTXO_CHAINS.contains(&chain) {
            return Err(WalletError::UnsupportedChain(chain));
        }
        let gate = self.gate(wallet.id, chain);
        let arrival = gate.started.load(Ordering::Acquire);
        let mut last = gate.last.lock().await;
        if let Some((generation, outcome)) = last.as_ref() {
            if *generation > arrival {
                debug!(deriver = wallet.id.0, %chain, "joined concurrent discovery pass");
                return Ok(outcome.clone());
            }
        }
        let generation = gate.started.fetch_add(1, Ordering::AcqRel) + 1;
        *last = None;
        let outcome = self.run_pass(store, fetcher, keys, wallet, chain).await?;
        *last = Some((generation, outcome.clone()));
        Ok(outcome)
    }

    /// Discover the external chain, then the internal one.
    pub async fn discover_all(
        &self,
        store: &dyn WalletStore,
        fetcher: &dyn StateFetcher,
        keys: &dyn KeyDeriver,
        wallet: &WalletWith<HasUtxoChains>,
    ) -> Result<Vec<DiscoveryOutcome>, WalletError> {
        let mut outcomes = Vec::with_capacity(Chain::UTXO_CHAINS.len());
        for chain in Chain::UTXO_CHAINS {
            outcomes.push(self.discover(store, fetcher, keys, wallet, chain).await?);
        }
        Ok(outcomes)
    }

    async fn run_pass(
        &self,
        store: &dyn WalletStore,
        fetcher: &dyn StateFetcher,
        keys: &dyn KeyDeriver,
        wallet: &WalletWith<HasUtxoChains>,
        chain: Chain,
    ) -> Result<DiscoveryOutcome, WalletError> {
        let id = wallet.id;
        let batch = self.gap_limit as usize;
        let mut rows =
            scoped_read(store, &[Table::Addresses], |tx| Ok(tx.addresses(id, Some(chain))?)).await?;
        let before: Vec<_> = rows.iter().map(|r| r.usage).collect();
        let first_new = rows.len();
        let builder = AddressBuilder::new(wallet, keys)?;
        let mut derived: Vec<Derived> = Vec::new();
        let mut queried_this_pass = vec![false; rows.len()];

        if rows.is_empty() {
            self.derive_batch(&builder, chain, 0, &mut rows, &mut derived)?;
        }
        loop {
            let n = rows.len();
            let start = n.saturating_sub(batch);
            queried_this_pass.resize(n, false);
            // Each row not yet used is asked about once per pass.
            let to_check: Vec<usize> =
                (0..n).filter(|&i| !rows[i].usage.is_used() && !queried_this_pass[i]).collect();
            if !to_check.is_empty() {
                let queried: Vec<Address> =
                    to_check.iter().map(|&i| rows[i].address.clone()).collect();
                let used = fetcher.check_addresses_in_use(&queried).await?;
                for &i in &to_check {
                    let observed = if used.contains(&rows[i].address) {
                        AddressUsage::Used
                    } else {
                        AddressUsage::Unused
                    };
                    rows[i].usage = rows[i].usage.merge(observed);
                    queried_this_pass[i] = true;
                }
            }
            if !rows[start..].iter().any(|r| r.usage.is_used()) {
                break;
            }
            debug!(deriver = id.0, %chain, from = n, "batch in use, extending");
            self.derive_batch(&builder, chain, n as u32, &mut rows, &mut derived)?;
        }

        let updates: Vec<(u32, AddressUsage)> = rows[..first_new]
            .iter()
            .zip(&before)
            .filter(|(row, old)| row.usage != **old)
            .map(|(row, _)| (row.index, row.usage))
            .collect();
        let fresh_usage: Vec<AddressUsage> = rows[first_new..].iter().map(|r| r.usage).collect();
        let newly_derived = derived.len() as u32;

        scoped_write(store, &DISCOVERY_TABLES, |tx| {
            for (index, usage) in &updates {
                tx.mark_address_usage(id, chain, *index, *usage)?;
            }
            if derived.is_empty() {
                return Ok(());
            }
            let deriver = tx.deriver(id)?;
            let chain_node = ensure_chain_node(tx, &deriver, chain)?;
            for (new, usage) in derived.into_iter().zip(fresh_usage) {
                let node = insert_leaf(tx, id, chain_node, new.index, new.key)?;
                tx.insert_address(AddressRow {
                    deriver: id,
                    chain,
                    index: new.index,
                    node,
                    address: new.address,
                    usage,
                })?;
            }
            Ok(())
        })
        .await?;

        let newly_used = rows
            .iter()
            .enumerate()
            .filter(|(i, r)| r.usage.is_used() && before.get(*i).is_none_or(|b| !b.is_used()))
            .count() as u32;
        let outcome = DiscoveryOutcome {
            chain,
            derived_total: rows.len() as u32,
            newly_derived,
            newly_used,
            checked_cutoff: checked_cutoff(&rows),
            last_used: rows.iter().rposition(|r| r.usage.is_used()).map(|i| rows[i].index),
        };
        info!(
            deriver = id.0,
            %chain,
            derived = outcome.derived_total,
            new = outcome.newly_derived,
            used = outcome.newly_used,
            "discovery pass complete"
        );
        Ok(outcome)
    }

    fn derive_batch(
        &self,
        builder: &AddressBuilder<'_>,
        chain: Chain,
        from: u32,
        rows: &mut Vec<AddressRow>,
        derived: &mut Vec<Derived>,
    ) -> Result<(), WalletError> {
        let end = u64::from(from) + u64::from(self.gap_limit);
        if end > u64::from(HARDENED) {
            return Err(WalletError::KeyDerivation(format!(
                "{chain} chain exhausted the non-hardened index space"
            )));
        }
        for index in from..end as u32 {
            let (key, address) = builder.build(chain, index)?;
            rows.push(AddressRow {
                deriver: builder.deriver_id(),
                chain,
                index,
                node: NodeId(0),
                address: address.clone(),
                usage: AddressUsage::Unchecked,
            });
            derived.push(Derived { index, key, address });
        }
        Ok(())
    }

    /// Make sure the reward address row (staking chain, index 0) exists.
    pub async fn ensure_staking_address(
        &self,
        store: &dyn WalletStore,
        keys: &dyn KeyDeriver,
        wallet: &WalletWith<GetStakingKey>,
    ) -> Result<AddressRow, WalletError> {
        let id = wallet.id;
        let gate = self.gate(id, Chain::Staking);
        let _serialized = gate.last.lock().await;

        let existing = scoped_read(store, &[Table::Addresses], |tx| {
            Ok(tx.addresses(id, Some(Chain::Staking))?.into_iter().next())
        })
        .await?;
        if let Some(row) = existing {
            return Ok(row);
        }

        let staking = wallet.staking_key(keys)?;
        let address = wallet.reward_address(keys)?;
        let row = scoped_write(store, &DISCOVERY_TABLES, |tx| {
            let deriver = tx.deriver(id)?;
            let chain_node = ensure_chain_node(tx, &deriver, Chain::Staking)?;
            let index = STAKING_KEY_INDEX;
            let node = insert_leaf(tx, id, chain_node, index, staking.public_key)?;
            let row = AddressRow {
                deriver: id,
                chain: Chain::Staking,
                index,
                node,
                address,
                usage: AddressUsage::Unchecked,
            };
            tx.insert_address(row.clone())?;
            Ok(row)
        })
        .await?;
        debug!(deriver = id.0, address = %row.address, "staking address registered");
        Ok(row)
    }
}

fn find_chain_node<T: ReadTx + ?Sized>(
    tx: &T,
    deriver: &PublicDeriverRow,
    chain: Chain,
) -> Result<Option<NodeId>, WalletError> {
    Ok(tx
        .key_nodes_of(deriver.id)?
        .into_iter()
        .find(|n| n.parent == Some(deriver.root_node) && n.index == chain.index())
        .map(|n| n.id))
}

fn ensure_chain_node(
    tx: &mut dyn WriteTx,
    deriver: &PublicDeriverRow,
    chain: Chain,
) -> Result<NodeId, WalletError> {
    if let Some(node) = find_chain_node(&*tx, deriver, chain)? {
        return Ok(node);
    }
    let node = NodeId(tx.allocate_id());
    tx.insert_key_node(KeyDerivationRow {
        id: node,
        deriver: deriver.id,
        parent: Some(deriver.root_node),
        index: chain.index(),
        public_key: None,
    })?;
    Ok(node)
}

fn insert_leaf(
    tx: &mut dyn WriteTx,
    deriver: DeriverId,
    parent: NodeId,
    index: u32,
    key: PublicKey,
) -> Result<NodeId, WalletError> {
    let node = NodeId(tx.allocate_id());
    tx.insert_key_node(KeyDerivationRow {
        id: node,
        deriver,
        parent: Some(parent),
        index,
        public_key: Some(key),
    })?;
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn used_absorbs() {
        use AddressUsage::*;
        for other in [Unchecked, Unused, Used] {
            assert_eq!(Used.merge(other), Used);
            assert_eq!(other.merge(Used), Used);
        }
        assert_eq!(Unchecked.merge(Unused), Unused);
        assert_eq!(Unused.merge(Unchecked), Unused);
        assert_eq!(Unchecked.merge(Unchecked), Unchecked);
    }

    #[test]
    fn gap_limit_bounds() {
        assert!(GapLimitScanner::new(0).is_err());
        assert!(GapLimitScanner::new(MAX_GAP_LIMIT + 1).is_err());
        assert_eq!(GapLimitScanner::new(20).unwrap().gap_limit(), 20);
    }

    #[test]
    fn forget_drops_only_that_deriver() {
        let scanner = GapLimitScanner::new(5).unwrap();
        scanner.gate(DeriverId(1), Chain::External);
        scanner.gate(DeriverId(1), Chain::Staking);
        scanner.gate(DeriverId(2), Chain::External);

        scanner.forget(DeriverId(1));
        assert!(!scanner.is_tracking(DeriverId(1)));
        assert!(scanner.is_tracking(DeriverId(2)));
        let keys: Vec<_> = scanner.gates.lock().keys().copied().collect();
        assert_eq!(keys, vec![(DeriverId(2), Chain::External)]);
    }
}
