//! Core primitive types: hashes, keys, outpoints, derivation paths.

use ed25519_dalek::Verifier;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{CREDENTIAL_HASH_LEN, HARDENED};
use crate::error::CollaboratorError;

/// A 32-byte hash value. Used for transaction ids.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes).
    pub const ZERO: Self = Self([0u8; 32]);

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

/// A 28-byte hash identifying a key or script credential, or a stake pool.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash28(pub [u8; CREDENTIAL_HASH_LEN]);

impl Hash28 {
    /// Hash a public key into a 28-byte credential hash.
    pub fn of_key(key: &PublicKey) -> Self {
        Self::digest(&key.to_bytes())
    }

    /// BLAKE3 digest truncated to 28 bytes.
    pub fn digest(data: &[u8]) -> Self {
        let full = blake3::hash(data);
        let mut out = [0u8; CREDENTIAL_HASH_LEN];
        out.copy_from_slice(&full.as_bytes()[..CREDENTIAL_HASH_LEN]);
        Self(out)
    }

    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; CREDENTIAL_HASH_LEN] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; CREDENTIAL_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for Hash28 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// Identifier of a stake pool (hash of its operator key).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub Hash28);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool:{}", self.0)
    }
}

/// Reference to a specific output of a transaction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    /// Transaction id containing the referenced output.
    pub tx_id: Hash256,
    /// Index of the output within the transaction.
    pub index: u32,
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.tx_id, self.index)
    }
}

/// Ed25519 public key.
#[derive(Clone, Copy)]
pub struct PublicKey {
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicKey {
    /// Parse a public key from 32 compressed bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CollaboratorError> {
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(bytes)
            .map_err(|e| CollaboratorError::Derivation(format!("invalid public key: {e}")))?;
        Ok(Self { verifying_key })
    }

    pub fn from_verifying_key(verifying_key: ed25519_dalek::VerifyingKey) -> Self {
        Self { verifying_key }
    }

    /// Raw 32-byte encoding.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Credential hash of this key.
    pub fn hash(&self) -> Hash28 {
        Hash28::of_key(self)
    }

    /// Verify a signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let sig = ed25519_dalek::Signature::from_bytes(&signature.0);
        self.verifying_key.verify(message, &sig).is_ok()
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

impl std::hash::Hash for PublicKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.to_bytes()))
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("public key must be 32 bytes"))?;
        Self::from_bytes(&arr).map_err(serde::de::Error::custom)
    }
}

/// Ed25519 signature bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..8]))
    }
}

/// Address chain under an account: `m/purpose'/coin'/account'/<chain>/<index>`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Chain {
    /// Receiving addresses handed out to payers.
    External,
    /// Change addresses.
    Internal,
    /// The staking key chain (CIP-1852 only).
    Staking,
}

impl Chain {
    /// Path index of this chain.
    pub fn index(&self) -> u32 {
        match self {
            Chain::External => 0,
            Chain::Internal => 1,
            Chain::Staking => 2,
        }
    }

    pub fn from_index(index: u32) -> Option<Self> {
        match index {
            0 => Some(Chain::External),
            1 => Some(Chain::Internal),
            2 => Some(Chain::Staking),
            _ => None,
        }
    }

    /// Chains holding spendable UTXO addresses.
    pub const UTXO_CHAINS: [Chain; 2] = [Chain::External, Chain::Internal];
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Chain::External => f.write_str("external"),
            Chain::Internal => f.write_str("internal"),
            Chain::Staking => f.write_str("staking"),
        }
    }
}

/// A BIP-32 style derivation path. Hardened indices carry [`HARDENED`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DerivationPath(Vec<u32>);

impl DerivationPath {
    pub fn new(indices: Vec<u32>) -> Self {
        Self(indices)
    }

    /// Account path `m/purpose'/coin'/account'`.
    pub fn account(purpose: u32, coin_type: u32, account: u32) -> Self {
        Self(vec![purpose | HARDENED, coin_type | HARDENED, account | HARDENED])
    }

    /// Extend this path by one index.
    pub fn child(&self, index: u32) -> Self {
        let mut indices = self.0.clone();
        indices.push(index);
        Self(indices)
    }

    pub fn indices(&self) -> &[u32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `self` is a prefix of `other`.
    pub fn is_prefix_of(&self, other: &DerivationPath) -> bool {
        other.0.starts_with(&self.0)
    }
}

impl fmt::Display for DerivationPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("m")?;
        for &i in &self.0 {
            if i >= HARDENED {
                write!(f, "/{}'", i - HARDENED)?;
            } else {
                write!(f, "/{i}")?;
            }
        }
        Ok(())
    }
}

impl FromStr for DerivationPath {
    type Err = CollaboratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('/');
        if parts.next() != Some("m") {
            return Err(CollaboratorError::Derivation(format!("path must start with m: {s}")));
        }
        let mut indices = Vec::new();
        for part in parts {
            let (digits, hardened) = match part.strip_suffix('\'') {
                Some(d) => (d, true),
                None => (part, false),
            };
            let index: u32 = digits
                .parse()
                .map_err(|_| CollaboratorError::Derivation(format!("bad path segment: {part}")))?;
            if index >= HARDENED {
                return Err(CollaboratorError::Derivation(format!("index too large: {part}")));
            }
            indices.push(if hardened { index | HARDENED } else { index });
        }
        Ok(Self(indices))
    }
}

impl Serialize for DerivationPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DerivationPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
