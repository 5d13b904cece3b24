//! Multi-asset value model.
//!
//! A [`MultiToken`] is a vector of `(asset identifier, amount)` entries that
//! all belong to one network, plus a designated default asset (ADA on
//! Cardano networks). Amounts are arbitrary-precision signed integers in
//! the asset's smallest unit.
//!
//! Arithmetic between two values is entry-wise over the union of their
//! identifiers; a missing identifier counts as zero. Entries that reach zero
//! are kept: callers that need a minimal form call
//! [`MultiToken::without_zero_entries`] explicitly.
//!
//! Mixing values with different default assets (network id or identifier)
//! is a programmer error and panics. Use [`MultiToken::is_compatible`] to
//! check beforehand.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Neg, Sub};

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

/// Identifier of an asset. The default asset of Cardano networks uses the empty string.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub String);

impl TokenId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            f.write_str("<default>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Numeric id of the network a token lives on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u32);

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One `(identifier, network, amount)` entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenEntry {
    pub identifier: TokenId,
    pub network_id: NetworkId,
    pub amount: BigInt,
}

impl TokenEntry {
    pub fn new(identifier: TokenId, network_id: NetworkId, amount: impl Into<BigInt>) -> Self {
        Self { identifier, network_id, amount: amount.into() }
    }
}

/// The designated default asset of a network.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct DefaultToken {
    pub network_id: NetworkId,
    pub identifier: TokenId,
}

impl DefaultToken {
    pub fn new(network_id: NetworkId, identifier: TokenId) -> Self {
        Self { network_id, identifier }
    }

    /// Build an entry of the default asset.
    pub fn entry(&self, amount: impl Into<BigInt>) -> TokenEntry {
        TokenEntry::new(self.identifier.clone(), self.network_id, amount)
    }
}

/// Multi-asset amount vector with a designated default entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "MultiTokenRepr", try_from = "MultiTokenRepr")]
pub struct MultiToken {
    values: BTreeMap<TokenId, BigInt>,
    defaults: DefaultToken,
}

impl MultiToken {
    /// Create a value from a list of entries. Duplicate identifiers are summed.
    ///
    /// # Panics
    ///
    /// Panics if an entry's network id differs from `defaults.network_id`.
    pub fn new(entries: impl IntoIterator<Item = TokenEntry>, defaults: DefaultToken) -> Self {
        let mut token = Self::zero(defaults);
        for entry in entries {
            token.add(entry);
        }
        token
    }

    /// A value holding only a zero default entry.
    pub fn zero(defaults: DefaultToken) -> Self {
        let mut values = BTreeMap::new();
        values.insert(defaults.identifier.clone(), BigInt::zero());
        Self { values, defaults }
    }

    /// A value holding `amount` of the default asset.
    pub fn from_default(amount: impl Into<BigInt>, defaults: DefaultToken) -> Self {
        let mut token = Self::zero(defaults);
        let entry = token.defaults.entry(amount);
        token.add(entry);
        token
    }

    /// Add `entry` in place.
    ///
    /// # Panics
    ///
    /// Panics on a network id mismatch.
    pub fn add(&mut self, entry: TokenEntry) -> &mut Self {
        self.check_network(entry.network_id);
        *self.values.entry(entry.identifier).or_insert_with(BigInt::zero) += entry.amount;
        self
    }

    /// Subtract `entry` in place.
    ///
    /// # Panics
    ///
    /// Panics on a network id mismatch.
    pub fn subtract(&mut self, entry: TokenEntry) -> &mut Self {
        self.check_network(entry.network_id);
        *self.values.entry(entry.identifier).or_insert_with(BigInt::zero) -= entry.amount;
        self
    }

    /// Entry-wise sum over the union of identifiers.
    ///
    /// # Panics
    ///
    /// Panics if `other` has a different default asset.
    pub fn join_add(&self, other: &MultiToken) -> MultiToken {
        self.check_compatible(other);
        let mut out = self.clone();
        for (id, amount) in &other.values {
            *out.values.entry(id.clone()).or_insert_with(BigInt::zero) += amount;
        }
        out
    }

    /// Entry-wise difference over the union of identifiers.
    ///
    /// # Panics
    ///
    /// Panics if `other` has a different default asset.
    pub fn join_subtract(&self, other: &MultiToken) -> MultiToken {
        self.check_compatible(other);
        let mut out = self.clone();
        for (id, amount) in &other.values {
            *out.values.entry(id.clone()).or_insert_with(BigInt::zero) -= amount;
        }
        out
    }

    /// Amount held for `identifier`, if an entry exists (possibly zero).
    pub fn get(&self, identifier: &TokenId) -> Option<&BigInt> {
        self.values.get(identifier)
    }

    /// Amount of the default asset.
    pub fn get_default(&self) -> &BigInt {
        // The default entry is inserted on construction and never removed.
        self.values
            .get(&self.defaults.identifier)
            .unwrap_or_else(|| unreachable!("default entry always present"))
    }

    pub fn default_entry(&self) -> TokenEntry {
        self.defaults.entry(self.get_default().clone())
    }

    /// All entries except the default asset, in identifier order.
    pub fn non_default_entries(&self) -> Vec<TokenEntry> {
        self.values
            .iter()
            .filter(|(id, _)| **id != self.defaults.identifier)
            .map(|(id, amount)| self.entry_for(id, amount))
            .collect()
    }

    /// All entries including the default asset, in identifier order.
    pub fn entries(&self) -> impl Iterator<Item = TokenEntry> + '_ {
        self.values.iter().map(|(id, amount)| self.entry_for(id, amount))
    }

    fn entry_for(&self, id: &TokenId, amount: &BigInt) -> TokenEntry {
        TokenEntry::new(id.clone(), self.defaults.network_id, amount.clone())
    }

    pub fn defaults(&self) -> &DefaultToken {
        &self.defaults
    }

    /// Number of entries, including zero-amount ones.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if every entry is zero.
    pub fn is_empty(&self) -> bool {
        self.values.values().all(Zero::is_zero)
    }

    /// True if any entry is negative.
    pub fn has_negative(&self) -> bool {
        self.values.values().any(Signed::is_negative)
    }

    pub fn negated(&self) -> MultiToken {
        MultiToken {
            values: self.values.iter().map(|(k, v)| (k.clone(), -v)).collect(),
            defaults: self.defaults.clone(),
        }
    }

    pub fn abs(&self) -> MultiToken {
        MultiToken {
            values: self.values.iter().map(|(k, v)| (k.clone(), v.abs())).collect(),
            defaults: self.defaults.clone(),
        }
    }

    /// Copy with zero-amount non-default entries removed.
    pub fn without_zero_entries(&self) -> MultiToken {
        MultiToken {
            values: self
                .values
                .iter()
                .filter(|(k, v)| **k == self.defaults.identifier || !v.is_zero())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            defaults: self.defaults.clone(),
        }
    }

    /// Whether arithmetic between `self` and `other` is legal: both must
    /// share the same default asset.
    pub fn is_compatible(&self, other: &MultiToken) -> bool {
        self.defaults == other.defaults
    }

    fn check_network(&self, network_id: NetworkId) {
        assert_eq!(
            network_id, self.defaults.network_id,
            "token entry network {network_id} does not match default network {}",
            self.defaults.network_id
        );
    }

    fn check_compatible(&self, other: &MultiToken) {
        assert!(
            self.is_compatible(other),
            "cannot combine MultiToken with default {}@{} and default {}@{}",
            self.defaults.identifier,
            self.defaults.network_id,
            other.defaults.identifier,
            other.defaults.network_id
        );
    }
}

impl fmt::Display for MultiToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (id, amount) in &self.values {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{id}: {amount}")?;
        }
        Ok(())
    }
}

// No `std::ops::Add`: it would shadow the inherent `add(entry)` in method
// lookup. Sums go through `join_add`.
impl Sub<&MultiToken> for &MultiToken {
    type Output = MultiToken;

    fn sub(self, rhs: &MultiToken) -> MultiToken {
        self.join_subtract(rhs)
    }
}

impl Sub for MultiToken {
    type Output = MultiToken;

    fn sub(self, rhs: MultiToken) -> MultiToken {
        self.join_subtract(&rhs)
    }
}

impl Neg for &MultiToken {
    type Output = MultiToken;

    fn neg(self) -> MultiToken {
        self.negated()
    }
}

/// Serialized form: amounts as decimal strings.
#[derive(Serialize, Deserialize)]
struct MultiTokenRepr {
    defaults: DefaultToken,
    entries: Vec<(TokenId, String)>,
}

impl From<MultiToken> for MultiTokenRepr {
    fn from(token: MultiToken) -> Self {
        Self {
            entries: token.values.iter().map(|(k, v)| (k.clone(), v.to_string())).collect(),
            defaults: token.defaults,
        }
    }
}

impl TryFrom<MultiTokenRepr> for MultiToken {
    type Error = String;

    fn try_from(repr: MultiTokenRepr) -> Result<Self, Self::Error> {
        let mut token = MultiToken::zero(repr.defaults);
        for (id, amount) in repr.entries {
            let amount: BigInt = amount.parse().map_err(|e| format!("amount for {id}: {e}"))?;
            *token.values.entry(id).or_insert_with(BigInt::zero) += amount;
        }
        Ok(token)
    }
}
