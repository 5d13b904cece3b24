//! Seed management and deterministic key derivation.
//!
//! Uses BLAKE3 keyed derivation over the full derivation path to produce
//! Ed25519 keypairs from a 32-byte master seed. Every path maps to a unique,
//! recoverable key; the seed never leaves this module.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use ed25519_dalek::{Signer as _, SigningKey};
use parking_lot::Mutex;
use tally_core::error::CollaboratorError;
use tally_core::traits::{KeyDeriver, Signer};
use tally_core::types::{DerivationPath, PublicKey, Signature};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// BLAKE3 KDF context for path derivation.
const KDF_CONTEXT: &str = "tally-wallet-key-derivation-v1";

/// A 32-byte master seed.
///
/// Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Seed {
    bytes: [u8; 32],
}

impl Seed {
    /// Generate a random seed from the OS cryptographic RNG.
    pub fn generate() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self { bytes }
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Raw seed bytes. Handle with care.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl Clone for Seed {
    fn clone(&self) -> Self {
        Self { bytes: self.bytes }
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seed").field("bytes", &"[REDACTED]").finish()
    }
}

/// Software key holder: derives public keys and signs for any path.
pub struct SeedKeyring {
    seed: Seed,
    /// Public keys already derived, by path.
    public_cache: Mutex<HashMap<DerivationPath, PublicKey>>,
}

impl SeedKeyring {
    pub fn new(seed: Seed) -> Self {
        Self { seed, public_cache: Mutex::new(HashMap::new()) }
    }

    fn signing_key(&self, path: &DerivationPath) -> SigningKey {
        let mut material = Zeroizing::new(Vec::with_capacity(32 + 4 * path.len()));
        material.extend_from_slice(self.seed.as_bytes());
        for index in path.indices() {
            material.extend_from_slice(&index.to_le_bytes());
        }
        let secret = Zeroizing::new(blake3::derive_key(KDF_CONTEXT, &material));
        SigningKey::from_bytes(&secret)
    }

    /// Number of distinct paths derived so far.
    pub fn cached_paths(&self) -> usize {
        self.public_cache.lock().len()
    }
}

impl fmt::Debug for SeedKeyring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeedKeyring")
            .field("seed", &self.seed)
            .field("cached", &self.cached_paths())
            .finish()
    }
}

impl KeyDeriver for SeedKeyring {
    fn derive_public(&self, path: &DerivationPath) -> Result<PublicKey, CollaboratorError> {
        if path.is_empty() {
            return Err(CollaboratorError::Derivation("cannot derive the master key".into()));
        }
        if let Some(key) = self.public_cache.lock().get(path) {
            return Ok(*key);
        }
        let key = PublicKey::from_verifying_key(self.signing_key(path).verifying_key());
        self.public_cache.lock().insert(path.clone(), key);
        Ok(key)
    }
}

#[async_trait]
impl Signer for SeedKeyring {
    async fn sign(
        &self,
        path: &DerivationPath,
        payload: &[u8],
    ) -> Result<Signature, CollaboratorError> {
        if path.is_empty() {
            return Err(CollaboratorError::Signing("cannot sign with the master key".into()));
        }
        let signature = self.signing_key(path).sign(payload);
        Ok(Signature(signature.to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(indices: &[u32]) -> DerivationPath {
        DerivationPath::new(indices.to_vec())
    }

    #[test]
    fn deterministic_derivation() {
        let a = SeedKeyring::new(Seed::from_bytes([1; 32]));
        let b = SeedKeyring::new(Seed::from_bytes([1; 32]));
        let p = path(&[1852, 1815, 0, 0, 4]);
        assert_eq!(a.derive_public(&p).unwrap(), b.derive_public(&p).unwrap());
    }

    #[test]
    fn different_paths_different_keys() {
        let k = SeedKeyring::new(Seed::from_bytes([2; 32]));
        let x = k.derive_public(&path(&[0, 0])).unwrap();
        let y = k.derive_public(&path(&[0, 1])).unwrap();
        let z = k.derive_public(&path(&[1, 0])).unwrap();
        assert_ne!(x, y);
        assert_ne!(x, z);
        assert_eq!(k.cached_paths(), 3);
    }

    #[test]
    fn different_seeds_different_keys() {
        let p = path(&[44, 1815, 0]);
        let a = SeedKeyring::new(Seed::from_bytes([3; 32])).derive_public(&p).unwrap();
        let b = SeedKeyring::new(Seed::from_bytes([4; 32])).derive_public(&p).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_path_rejected() {
        let k = SeedKeyring::new(Seed::generate());
        assert!(matches!(k.derive_public(&DerivationPath::default()), Err(CollaboratorError::Derivation(_))));
    }

    #[tokio::test]
    async fn signature_verifies_under_derived_key() {
        let k = SeedKeyring::new(Seed::from_bytes([5; 32]));
        let p = path(&[1852, 1815, 0, 0, 0]);
        let sig = k.sign(&p, b"payload").await.unwrap();
        let pk = k.derive_public(&p).unwrap();
        assert!(pk.verify(b"payload", &sig));
        assert!(!pk.verify(b"other", &sig));
    }

    #[test]
    fn seed_debug_redacted() {
        let s = format!("{:?}", Seed::from_bytes([0xAB; 32]));
        assert!(s.contains("REDACTED"));
        assert!(!s.contains("171"));
    }
}
