//! Error types for the Tally wallet engine core.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EraError {
    #[error("era table is empty")] Empty,
    #[error("first era must start at epoch 0, got {0}")] FirstEraNotAtGenesis(u64),
    #[error("first era is missing {0}")] MissingGenesisParameter(&'static str),
    #[error("era {index} has {field} set to zero")] ZeroParameter { index: usize, field: &'static str },
    #[error("era start epochs not strictly increasing at index {index}: {previous} >= {current}")] Unsorted { index: usize, previous: u64, current: u64 },
    #[error("genesis timestamp only allowed on the first era (found on era {0})")] GenesisOnLaterEra(usize),
    #[error("slot {slot} out of range for epoch {epoch} ({slots_per_epoch} slots per epoch)")] SlotOutOfRange { epoch: u64, slot: u64, slots_per_epoch: u64 },
    #[error("time is before genesis")] BeforeGenesis,
    #[error("arithmetic overflow")] Overflow,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("empty address payload")] Empty,
    #[error("unknown address header type {0:#x}")] UnknownHeader(u8),
    #[error("invalid length for {kind}: {len}")] InvalidLength { kind: &'static str, len: usize },
    #[error("invalid HRP: {0}")] InvalidHrp(String),
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid character: {0}")] InvalidCharacter(char),
    #[error("invalid padding bits")] InvalidPadding,
    #[error("missing separator")] MissingSeparator,
    #[error("mixed case")] MixedCase,
    #[error("invalid base58: {0}")] InvalidBase58(String),
    #[error("truncated pointer")] TruncatedPointer,
    #[error("network tag {0} is not known")] UnknownNetworkTag(u8),
}

/// Opaque failure reported by a network, derivation or signing collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("network: {0}")] Network(String),
    #[error("cancelled")] Cancelled,
    #[error("derivation: {0}")] Derivation(String),
    #[error("signing: {0}")] Signing(String),
    #[error("malformed response: {0}")] MalformedResponse(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NetworkConfigError {
    #[error(transparent)] Era(#[from] EraError),
    #[error("unknown network family: {0}")] UnknownFamily(String),
    #[error("unknown chain network: {0}")] UnknownChainNetwork(String),
    #[error("network {0} declared twice")] DuplicateNetwork(u32),
}

#[derive(Error, Debug)]
pub enum TallyError {
    #[error(transparent)] Era(#[from] EraError),
    #[error(transparent)] Address(#[from] AddressError),
    #[error(transparent)] Collaborator(#[from] CollaboratorError),
    #[error(transparent)] NetworkConfig(#[from] NetworkConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_slot_out_of_range() {
        let e = EraError::SlotOutOfRange { epoch: 3, slot: 21600, slots_per_epoch: 21600 };
        assert_eq!(e.to_string(), "slot 21600 out of range for epoch 3 (21600 slots per epoch)");
    }

    #[test]
    fn display_missing_genesis_parameter() {
        let e = EraError::MissingGenesisParameter("genesis timestamp");
        assert_eq!(e.to_string(), "first era is missing genesis timestamp");
    }

    #[test]
    fn era_error_lifts_into_tally_error() {
        let e: TallyError = EraError::Empty.into();
        assert!(matches!(e, TallyError::Era(EraError::Empty)));
    }

    #[test]
    fn network_config_wraps_era_error() {
        let e: NetworkConfigError = EraError::BeforeGenesis.into();
        assert_eq!(e, NetworkConfigError::Era(EraError::BeforeGenesis));
    }
}
