//! Network descriptors: ledger family, era table, default asset and
//! protocol parameters of each supported network.

use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::address::ChainNetwork;
use crate::constants::{
    ASSET_ENTRY_BYTES, BYRON_SLOTS_PER_EPOCH, BYRON_SLOT_DURATION_SECS, MAINNET_GENESIS_UNIX,
    MAINNET_SHELLEY_EPOCH, OUTPUT_ADDRESS_BYTES, OUTPUT_COIN_BYTES, SHELLEY_SLOTS_PER_EPOCH,
    SHELLEY_SLOT_DURATION_SECS, SPEND_INPUT_BYTES, UTXO_ENTRY_OVERHEAD_BYTES,
};
use crate::era::{EraConfig, EraTimeline};
use crate::error::NetworkConfigError;
use crate::multi_token::{DefaultToken, MultiToken, NetworkId, TokenId};

/// Ledger family a network belongs to.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkFamily {
    /// Byron/Shelley-lineage Cardano ledger.
    CardanoHaskell,
    /// Incentivized testnet ledger.
    Jormungandr,
}

impl FromStr for NetworkFamily {
    type Err = NetworkConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cardano" | "cardano-haskell" | "cardanohaskell" => Ok(NetworkFamily::CardanoHaskell),
            "jormungandr" => Ok(NetworkFamily::Jormungandr),
            other => Err(NetworkConfigError::UnknownFamily(other.to_string())),
        }
    }
}

impl FromStr for ChainNetwork {
    type Err = NetworkConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mainnet" => Ok(ChainNetwork::Mainnet),
            "testnet" => Ok(ChainNetwork::Testnet),
            other => Err(NetworkConfigError::UnknownChainNetwork(other.to_string())),
        }
    }
}

/// `fee = constant + coefficient * tx_size_bytes`.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct LinearFee {
    pub coefficient: u64,
    pub constant: u64,
}

/// Fee and deposit parameters, all in lovelace.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(default)]
pub struct ProtocolParams {
    pub linear_fee: LinearFee,
    /// Flat lower bound on any output.
    pub min_utxo_value: u64,
    /// Per-byte price of keeping an output in the UTXO set.
    pub coins_per_utxo_byte: u64,
    pub key_deposit: u64,
    pub pool_deposit: u64,
}

impl ProtocolParams {
    /// Extra fee incurred by spending one more input.
    pub fn input_fee(&self) -> BigInt {
        BigInt::from(self.linear_fee.coefficient) * SPEND_INPUT_BYTES
    }

    /// Minimum lovelace an output carrying `value`'s non-default assets must hold.
    pub fn min_ada_required(&self, value: &MultiToken) -> BigInt {
        let assets = value
            .non_default_entries()
            .iter()
            .filter(|e| !e.amount.is_zero())
            .count() as u64;
        let size = UTXO_ENTRY_OVERHEAD_BYTES
            + OUTPUT_ADDRESS_BYTES
            + OUTPUT_COIN_BYTES
            + assets * ASSET_ENTRY_BYTES;
        let by_size = BigInt::from(self.coins_per_utxo_byte) * size;
        by_size.max(BigInt::from(self.min_utxo_value))
    }
}

/// Raw network configuration as read from config files.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfigRecord {
    pub network_id: u32,
    pub name: String,
    pub family: String,
    pub chain_network: String,
    pub eras: Vec<EraConfig>,
    /// Identifier of the default asset; empty for ADA.
    #[serde(default)]
    pub default_token: String,
    #[serde(default)]
    pub protocol: ProtocolParams,
}

fn mainnet_genesis() -> DateTime<Utc> {
    DateTime::from_timestamp(MAINNET_GENESIS_UNIX, 0).unwrap_or_default()
}

fn cardano_protocol() -> ProtocolParams {
    ProtocolParams {
        linear_fee: LinearFee { coefficient: 44, constant: 155_381 },
        min_utxo_value: 1_000_000,
        coins_per_utxo_byte: 4_310,
        key_deposit: 2_000_000,
        pool_deposit: 500_000_000,
    }
}

impl NetworkConfigRecord {
    pub fn cardano_mainnet() -> Self {
        Self {
            network_id: 0,
            name: "Cardano Mainnet".into(),
            family: "cardano".into(),
            chain_network: "mainnet".into(),
            eras: vec![
                EraConfig::genesis(
                    BYRON_SLOTS_PER_EPOCH,
                    BYRON_SLOT_DURATION_SECS,
                    mainnet_genesis(),
                ),
                EraConfig::fork(
                    MAINNET_SHELLEY_EPOCH,
                    SHELLEY_SLOTS_PER_EPOCH,
                    SHELLEY_SLOT_DURATION_SECS,
                ),
            ],
            default_token: String::new(),
            protocol: cardano_protocol(),
        }
    }

    pub fn cardano_preprod() -> Self {
        let genesis = Utc.with_ymd_and_hms(2022, 6, 1, 0, 0, 0).single().unwrap_or_default();
        Self {
            network_id: 250,
            name: "Cardano Preprod Testnet".into(),
            family: "cardano".into(),
            chain_network: "testnet".into(),
            eras: vec![
                EraConfig::genesis(BYRON_SLOTS_PER_EPOCH, BYRON_SLOT_DURATION_SECS, genesis),
                EraConfig::fork(4, SHELLEY_SLOTS_PER_EPOCH, SHELLEY_SLOT_DURATION_SECS),
            ],
            default_token: String::new(),
            protocol: cardano_protocol(),
        }
    }

    pub fn jormungandr_testnet() -> Self {
        let genesis = Utc.with_ymd_and_hms(2019, 12, 13, 19, 13, 37).single().unwrap_or_default();
        Self {
            network_id: 100,
            name: "Jormungandr Testnet".into(),
            family: "jormungandr".into(),
            chain_network: "testnet".into(),
            eras: vec![EraConfig::genesis(43_200, 2, genesis)],
            default_token: String::new(),
            protocol: ProtocolParams {
                linear_fee: LinearFee { coefficient: 100_000, constant: 200_000 },
                min_utxo_value: 1,
                coins_per_utxo_byte: 0,
                key_deposit: 0,
                pool_deposit: 0,
            },
        }
    }

    /// All built-in networks.
    pub fn presets() -> Vec<Self> {
        vec![Self::cardano_mainnet(), Self::cardano_preprod(), Self::jormungandr_testnet()]
    }
}

/// A validated network description.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkDescriptor {
    pub network_id: NetworkId,
    pub name: String,
    pub family: NetworkFamily,
    pub chain_network: ChainNetwork,
    pub eras: EraTimeline,
    pub default_token: DefaultToken,
    pub protocol: ProtocolParams,
}

impl NetworkDescriptor {
    /// Validate a raw record. Era tables are checked eagerly.
    pub fn from_record(record: &NetworkConfigRecord) -> Result<Self, NetworkConfigError> {
        let network_id = NetworkId(record.network_id);
        Ok(Self {
            network_id,
            name: record.name.clone(),
            family: record.family.parse()?,
            chain_network: record.chain_network.parse()?,
            eras: EraTimeline::new(&record.eras)?,
            default_token: DefaultToken::new(network_id, TokenId::new(&*record.default_token)),
            protocol: record.protocol,
        })
    }

    /// Validate a list of records, rejecting duplicate network ids.
    pub fn from_records(records: &[NetworkConfigRecord]) -> Result<Vec<Self>, NetworkConfigError> {
        let mut out: Vec<Self> = Vec::with_capacity(records.len());
        for record in records {
            if out.iter().any(|d| d.network_id.0 == record.network_id) {
                return Err(NetworkConfigError::DuplicateNetwork(record.network_id));
            }
            out.push(Self::from_record(record)?);
        }
        Ok(out)
    }

    pub fn cardano_mainnet() -> Result<Self, NetworkConfigError> {
        Self::from_record(&NetworkConfigRecord::cardano_mainnet())
    }

    pub fn cardano_preprod() -> Result<Self, NetworkConfigError> {
        Self::from_record(&NetworkConfigRecord::cardano_preprod())
    }

    pub fn jormungandr_testnet() -> Result<Self, NetworkConfigError> {
        Self::from_record(&NetworkConfigRecord::jormungandr_testnet())
    }

    /// A zero value in this network's default asset.
    pub fn zero(&self) -> MultiToken {
        MultiToken::zero(self.default_token.clone())
    }

    /// A value holding `amount` of the default asset.
    pub fn lovelace(&self, amount: impl Into<BigInt>) -> MultiToken {
        MultiToken::from_default(amount, self.default_token.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::era::RelativeSlot;
    use crate::multi_token::TokenEntry;

    #[test]
    fn mainnet_preset_resolves() {
        let net = NetworkDescriptor::cardano_mainnet().unwrap();
        assert_eq!(net.family, NetworkFamily::CardanoHaskell);
        assert_eq!(net.chain_network, ChainNetwork::Mainnet);
        assert_eq!(net.eras.eras().len(), 2);
        assert_eq!(
            net.eras.to_relative_slot(4_492_800).unwrap(),
            RelativeSlot { epoch: 208, slot: 0 }
        );
    }

    #[test]
    fn every_preset_resolves() {
        let all = NetworkDescriptor::from_records(&NetworkConfigRecord::presets()).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[2].family, NetworkFamily::Jormungandr);
    }

    #[test]
    fn duplicate_network_rejected() {
        let records = vec![NetworkConfigRecord::cardano_mainnet(), NetworkConfigRecord::cardano_mainnet()];
        assert_eq!(
            NetworkDescriptor::from_records(&records).unwrap_err(),
            NetworkConfigError::DuplicateNetwork(0)
        );
    }

    #[test]
    fn unknown_family_rejected() {
        let mut record = NetworkConfigRecord::cardano_mainnet();
        record.family = "ergo".into();
        assert_eq!(
            NetworkDescriptor::from_record(&record).unwrap_err(),
            NetworkConfigError::UnknownFamily("ergo".into())
        );
    }

    #[test]
    fn bad_era_table_is_config_error() {
        let mut record = NetworkConfigRecord::cardano_mainnet();
        record.eras[0].genesis = None;
        assert!(matches!(
            NetworkDescriptor::from_record(&record).unwrap_err(),
            NetworkConfigError::Era(_)
        ));
    }

    #[test]
    fn min_ada_floor_for_plain_output() {
        let net = NetworkDescriptor::cardano_mainnet().unwrap();
        let value = net.lovelace(5_000_000);
        // (160 + 57 + 9) * 4310 = 974_060 < 1 ADA floor
        assert_eq!(net.protocol.min_ada_required(&value), BigInt::from(1_000_000));
    }

    #[test]
    fn min_ada_grows_with_assets() {
        let net = NetworkDescriptor::cardano_mainnet().unwrap();
        let mut value = net.lovelace(5_000_000);
        value.add(TokenEntry::new(TokenId::new("policy.a"), net.network_id, 10));
        value.add(TokenEntry::new(TokenId::new("policy.b"), net.network_id, 3));
        let expected = BigInt::from(4_310u64 * (160 + 57 + 9 + 2 * 44));
        assert_eq!(net.protocol.min_ada_required(&value), expected);
    }

    #[test]
    fn zero_asset_entries_do_not_count() {
        let net = NetworkDescriptor::cardano_mainnet().unwrap();
        let mut value = net.lovelace(5_000_000);
        value.add(TokenEntry::new(TokenId::new("policy.a"), net.network_id, 0));
        assert_eq!(net.protocol.min_ada_required(&value), BigInt::from(1_000_000));
    }

    #[test]
    fn input_fee_uses_coefficient() {
        let params = NetworkDescriptor::cardano_mainnet().unwrap().protocol;
        assert_eq!(params.input_fee(), BigInt::from(44 * 138));
    }

    #[test]
    fn record_roundtrips_through_json() {
        let record = NetworkConfigRecord::cardano_preprod();
        let json = serde_json::to_string(&record).unwrap();
        let back: NetworkConfigRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
