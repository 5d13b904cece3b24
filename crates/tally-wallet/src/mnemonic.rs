//! BIP-39 mnemonic backup and restoration of wallet seeds.

use bip39::{Language, Mnemonic};

use crate::error::WalletError;
use crate::keys::Seed;

/// Convert a 32-byte seed to a 24-word BIP-39 phrase.
pub fn seed_to_mnemonic(seed: &Seed) -> Result<String, WalletError> {
    let m = Mnemonic::from_entropy_in(Language::English, seed.as_bytes())
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    Ok(m.to_string())
}

/// Parse a BIP-39 phrase back into its 32-byte seed.
///
/// Whitespace is collapsed and case folded before parsing.
pub fn mnemonic_to_seed(phrase: &str) -> Result<Seed, WalletError> {
    let normalized = phrase.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let m = Mnemonic::parse_in(Language::English, &normalized)
        .map_err(|e| WalletError::InvalidMnemonic(e.to_string()))?;
    let entropy = m.to_entropy();
    let bytes: [u8; 32] = entropy.as_slice().try_into().map_err(|_| {
        WalletError::InvalidMnemonic(format!("expected 32 bytes of entropy, got {}", entropy.len()))
    })?;
    Ok(Seed::from_bytes(bytes))
}

/// Fresh random seed together with its phrase.
pub fn generate_mnemonic() -> Result<(Seed, String), WalletError> {
    let seed = Seed::generate();
    let phrase = seed_to_mnemonic(&seed)?;
    Ok((seed, phrase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_generated() {
        let (seed, phrase) = generate_mnemonic().unwrap();
        let restored = mnemonic_to_seed(&phrase).unwrap();
        assert_eq!(seed.as_bytes(), restored.as_bytes());
    }

    #[test]
    fn twenty_four_words() {
        let phrase = seed_to_mnemonic(&Seed::from_bytes([0xAB; 32])).unwrap();
        assert_eq!(phrase.split_whitespace().count(), 24, "{phrase}");
    }

    #[test]
    fn invalid_word_rejected() {
        let err = mnemonic_to_seed("abandon abandon abandon invalidword").unwrap_err();
        assert!(err.to_string().contains("invalid mnemonic"), "{err}");
    }

    #[test]
    fn bad_checksum_rejected() {
        let mut phrase = vec!["abandon"; 23].join(" ");
        phrase.push_str(" zoo");
        assert!(mnemonic_to_seed(&phrase).is_err());
    }

    #[test]
    fn short_phrase_rejected() {
        // Valid 12-word phrase carries only 16 bytes of entropy.
        let twelve = "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";
        let err = mnemonic_to_seed(twelve).unwrap_err();
        assert!(err.to_string().contains("32 bytes"), "{err}");
    }

    #[test]
    fn messy_whitespace_and_case() {
        let seed = Seed::from_bytes([0x55; 32]);
        let phrase = seed_to_mnemonic(&seed).unwrap();
        let messy = phrase.split_whitespace().map(str::to_uppercase).collect::<Vec<_>>().join(" \t ");
        assert_eq!(mnemonic_to_seed(&messy).unwrap().as_bytes(), seed.as_bytes());
    }
}
