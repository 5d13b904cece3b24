//! Protocol and wallet constants. Monetary values are in lovelace (1 ADA = 10^6 lovelace).

pub const LOVELACE_PER_ADA: u64 = 1_000_000;

/// Offset marking a hardened derivation index.
pub const HARDENED: u32 = 0x8000_0000;

/// BIP-44 purpose (legacy Byron-era accounts).
pub const BIP44_PURPOSE: u32 = 44;

/// CIP-1852 purpose (Shelley-era accounts with a staking key).
pub const CIP1852_PURPOSE: u32 = 1852;

/// SLIP-44 coin type registered for Cardano.
pub const CARDANO_COIN_TYPE: u32 = 1815;

/// Default gap limit: number of consecutive unused addresses kept derived
/// past the last used one.
pub const DEFAULT_GAP_LIMIT: u32 = 20;

/// Maximum accepted gap limit.
pub const MAX_GAP_LIMIT: u32 = 1000;

/// Address index of the single staking key under the staking chain.
pub const STAKING_KEY_INDEX: u32 = 0;

/// Bytes of a credential hash (Blake2b-224 sized).
pub const CREDENTIAL_HASH_LEN: usize = 28;

/// Serialized size of one transaction input plus its vkey witness.
///
/// Used to price the extra fee of adding a single input to a transaction.
pub const SPEND_INPUT_BYTES: u64 = 138;

/// Constant per-entry overhead of a UTXO when computing the minimum
/// lovelace an output must carry.
pub const UTXO_ENTRY_OVERHEAD_BYTES: u64 = 160;

/// Serialized size of a base address inside an output.
pub const OUTPUT_ADDRESS_BYTES: u64 = 57;

/// Approximate serialized size of one native asset entry (policy + name + amount).
pub const ASSET_ENTRY_BYTES: u64 = 44;

/// Serialized size of the lovelace amount of an output.
pub const OUTPUT_COIN_BYTES: u64 = 9;

/// Byron genesis of Cardano mainnet (2017-09-23T21:44:51Z), seconds since Unix epoch.
pub const MAINNET_GENESIS_UNIX: i64 = 1_506_203_091;

/// First Shelley epoch on Cardano mainnet.
pub const MAINNET_SHELLEY_EPOCH: u64 = 208;

/// Byron era: slots per epoch.
pub const BYRON_SLOTS_PER_EPOCH: u64 = 21_600;

/// Byron era: slot duration in seconds.
pub const BYRON_SLOT_DURATION_SECS: u64 = 20;

/// Shelley era: slots per epoch.
pub const SHELLEY_SLOTS_PER_EPOCH: u64 = 432_000;

/// Shelley era: slot duration in seconds.
pub const SHELLEY_SLOT_DURATION_SECS: u64 = 1;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mainnet_shelley_boundary_slot() {
        assert_eq!(MAINNET_SHELLEY_EPOCH * BYRON_SLOTS_PER_EPOCH, 4_492_800);
    }

    #[test]
    fn byron_epoch_is_five_days() {
        assert_eq!(BYRON_SLOTS_PER_EPOCH * BYRON_SLOT_DURATION_SECS, 5 * 24 * 3600);
        assert_eq!(SHELLEY_SLOTS_PER_EPOCH * SHELLEY_SLOT_DURATION_SECS, 5 * 24 * 3600);
    }

    #[test]
    fn default_gap_limit_within_max() {
        assert!(DEFAULT_GAP_LIMIT > 0 && DEFAULT_GAP_LIMIT <= MAX_GAP_LIMIT);
    }
}
