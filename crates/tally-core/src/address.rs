//! Chain addresses and the credentials embedded in them.
//!
//! Binary layout follows [CIP-19]: the first byte is a header whose high
//! nibble is the address type and whose low nibble is the network tag.
//!
//! | type | meaning                         |
//! |------|---------------------------------|
//! | 0-3  | base (payment + staking)        |
//! | 4-5  | pointer (payment + cert pointer)|
//! | 6-7  | enterprise (payment only)       |
//! | 8    | legacy bootstrap                |
//! | 14-15| reward (staking only)           |
//!
//! Shelley-type addresses are rendered as Bech32 (`addr`, `addr_test`,
//! `stake`, `stake_test`); legacy addresses are rendered as Base58.
//!
//! Legacy addresses here use a compact bootstrap payload
//! `0x82 || network tag || root hash (28) || checksum (4)`.
//!
//! [CIP-19]: https://cips.cardano.org/cip/CIP-19

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::CREDENTIAL_HASH_LEN;
use crate::error::AddressError;
use crate::types::{Hash28, PublicKey};

/// Bech32 (BIP-173) checksum constant.
const BECH32_CONST: u32 = 1;

/// Bech32 character set for encoding 5-bit values.
const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

/// First byte of every legacy bootstrap payload.
const LEGACY_TAG: u8 = 0x82;

const LEGACY_LEN: usize = 2 + CREDENTIAL_HASH_LEN + 4;

/// Ledger network an address is valid on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChainNetwork {
    Mainnet,
    Testnet,
}

impl ChainNetwork {
    /// Low nibble of the address header.
    pub fn tag(&self) -> u8 {
        match self {
            ChainNetwork::Mainnet => 1,
            ChainNetwork::Testnet => 0,
        }
    }

    pub fn from_tag(tag: u8) -> Result<Self, AddressError> {
        match tag {
            1 => Ok(ChainNetwork::Mainnet),
            0 => Ok(ChainNetwork::Testnet),
            other => Err(AddressError::UnknownNetworkTag(other)),
        }
    }

    fn payment_hrp(&self) -> &'static str {
        match self {
            ChainNetwork::Mainnet => "addr",
            ChainNetwork::Testnet => "addr_test",
        }
    }

    fn reward_hrp(&self) -> &'static str {
        match self {
            ChainNetwork::Mainnet => "stake",
            ChainNetwork::Testnet => "stake_test",
        }
    }
}

/// A key or script credential.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Credential {
    Key(Hash28),
    Script(Hash28),
}

impl Credential {
    pub fn from_key(key: &PublicKey) -> Self {
        Credential::Key(key.hash())
    }

    pub fn hash(&self) -> &Hash28 {
        match self {
            Credential::Key(h) | Credential::Script(h) => h,
        }
    }

    pub fn is_script(&self) -> bool {
        matches!(self, Credential::Script(_))
    }

    fn with_flag(flag: bool, hash: Hash28) -> Self {
        if flag { Credential::Script(hash) } else { Credential::Key(hash) }
    }
}

impl fmt::Display for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Key(h) => write!(f, "key:{h}"),
            Credential::Script(h) => write!(f, "script:{h}"),
        }
    }
}

/// Location of a stake registration certificate on chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Pointer {
    pub slot: u64,
    pub tx_index: u64,
    pub cert_index: u64,
}

/// Coarse address category.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    Base,
    Pointer,
    Enterprise,
    Reward,
    Legacy,
}

/// A chain address.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Address {
    /// Payment credential plus embedded staking credential.
    Base { network: ChainNetwork, payment: Credential, stake: Credential },
    /// Payment credential plus a pointer to a stake registration.
    Pointer { network: ChainNetwork, payment: Credential, pointer: Pointer },
    /// Payment credential only; does not take part in staking.
    Enterprise { network: ChainNetwork, payment: Credential },
    /// Staking (reward account) address.
    Reward { network: ChainNetwork, stake: Credential },
    /// Legacy bootstrap address.
    Legacy { network: ChainNetwork, root: Hash28 },
}

impl Address {
    pub fn base(network: ChainNetwork, payment: &PublicKey, stake: &PublicKey) -> Self {
        Address::Base {
            network,
            payment: Credential::from_key(payment),
            stake: Credential::from_key(stake),
        }
    }

    pub fn enterprise(network: ChainNetwork, payment: &PublicKey) -> Self {
        Address::Enterprise { network, payment: Credential::from_key(payment) }
    }

    pub fn reward(network: ChainNetwork, stake: Credential) -> Self {
        Address::Reward { network, stake }
    }

    pub fn legacy_from_key(network: ChainNetwork, key: &PublicKey) -> Self {
        let preimage = [b"bootstrap".as_slice(), &key.to_bytes()].concat();
        Address::Legacy { network, root: Hash28::digest(&preimage) }
    }

    pub fn network(&self) -> ChainNetwork {
        match self {
            Address::Base { network, .. }
            | Address::Pointer { network, .. }
            | Address::Enterprise { network, .. }
            | Address::Reward { network, .. }
            | Address::Legacy { network, .. } => *network,
        }
    }

    pub fn kind(&self) -> AddressKind {
        match self {
            Address::Base { .. } => AddressKind::Base,
            Address::Pointer { .. } => AddressKind::Pointer,
            Address::Enterprise { .. } => AddressKind::Enterprise,
            Address::Reward { .. } => AddressKind::Reward,
            Address::Legacy { .. } => AddressKind::Legacy,
        }
    }

    /// Staking credential embedded in the address, if any.
    ///
    /// Only base and reward addresses embed one; pointer addresses reference
    /// a certificate instead.
    pub fn staking_credential(&self) -> Option<&Credential> {
        match self {
            Address::Base { stake, .. } | Address::Reward { stake, .. } => Some(stake),
            _ => None,
        }
    }

    pub fn payment_credential(&self) -> Option<&Credential> {
        match self {
            Address::Base { payment, .. }
            | Address::Pointer { payment, .. }
            | Address::Enterprise { payment, .. } => Some(payment),
            _ => None,
        }
    }

    /// Raw binary form.
    pub fn to_bytes(&self) -> Vec<u8> {
        let net = self.network().tag();
        match self {
            Address::Base { payment, stake, .. } => {
                let kind = (payment.is_script() as u8) | ((stake.is_script() as u8) << 1);
                let mut out = vec![(kind << 4) | net];
                out.extend_from_slice(payment.hash().as_bytes());
                out.extend_from_slice(stake.hash().as_bytes());
                out
            }
            Address::Pointer { payment, pointer, .. } => {
                let mut out = vec![((4 | payment.is_script() as u8) << 4) | net];
                out.extend_from_slice(payment.hash().as_bytes());
                encode_nat(pointer.slot, &mut out);
                encode_nat(pointer.tx_index, &mut out);
                encode_nat(pointer.cert_index, &mut out);
                out
            }
            Address::Enterprise { payment, .. } => {
                let mut out = vec![((6 | payment.is_script() as u8) << 4) | net];
                out.extend_from_slice(payment.hash().as_bytes());
                out
            }
            Address::Reward { stake, .. } => {
                let mut out = vec![((14 | stake.is_script() as u8) << 4) | net];
                out.extend_from_slice(stake.hash().as_bytes());
                out
            }
            Address::Legacy { root, .. } => {
                let mut out = Vec::with_capacity(LEGACY_LEN);
                out.push(LEGACY_TAG);
                out.push(net);
                out.extend_from_slice(root.as_bytes());
                let checksum = legacy_checksum(&out);
                out.extend_from_slice(&checksum);
                out
            }
        }
    }

    /// Parse the raw binary form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AddressError> {
        let header = *bytes.first().ok_or(AddressError::Empty)?;
        let kind = header >> 4;
        let body = &bytes[1..];
        let h = CREDENTIAL_HASH_LEN;
        let hash_at = |offset: usize| {
            Hash28::from_slice(&body[offset..offset + h]).ok_or(AddressError::Empty)
        };

        match kind {
            0..=3 => {
                expect_len("base", body.len(), 2 * h)?;
                let network = ChainNetwork::from_tag(header & 0x0f)?;
                let payment = Credential::with_flag(kind & 1 == 1, hash_at(0)?);
                let stake = Credential::with_flag(kind & 2 == 2, hash_at(h)?);
                Ok(Address::Base { network, payment, stake })
            }
            4 | 5 => {
                if body.len() < h + 3 {
                    return Err(AddressError::InvalidLength { kind: "pointer", len: body.len() });
                }
                let network = ChainNetwork::from_tag(header & 0x0f)?;
                let payment = Credential::with_flag(kind == 5, hash_at(0)?);
                let mut rest = &body[h..];
                let slot = decode_nat(&mut rest)?;
                let tx_index = decode_nat(&mut rest)?;
                let cert_index = decode_nat(&mut rest)?;
                if !rest.is_empty() {
                    return Err(AddressError::InvalidLength { kind: "pointer", len: body.len() });
                }
                let pointer = Pointer { slot, tx_index, cert_index };
                Ok(Address::Pointer { network, payment, pointer })
            }
            6 | 7 => {
                expect_len("enterprise", body.len(), h)?;
                let network = ChainNetwork::from_tag(header & 0x0f)?;
                let payment = Credential::with_flag(kind == 7, hash_at(0)?);
                Ok(Address::Enterprise { network, payment })
            }
            8 => {
                if header != LEGACY_TAG {
                    return Err(AddressError::UnknownHeader(header));
                }
                expect_len("legacy", bytes.len(), LEGACY_LEN)?;
                let (payload, checksum) = bytes.split_at(LEGACY_LEN - 4);
                if legacy_checksum(payload) != checksum {
                    return Err(AddressError::InvalidChecksum);
                }
                let network = ChainNetwork::from_tag(payload[1])?;
                let root = Hash28::from_slice(&payload[2..]).ok_or(AddressError::Empty)?;
                Ok(Address::Legacy { network, root })
            }
            14 | 15 => {
                expect_len("reward", body.len(), h)?;
                let network = ChainNetwork::from_tag(header & 0x0f)?;
                let stake = Credential::with_flag(kind == 15, hash_at(0)?);
                Ok(Address::Reward { network, stake })
            }
            _ => Err(AddressError::UnknownHeader(header)),
        }
    }

    /// Human-readable form: Bech32 for Shelley-type addresses, Base58 for legacy ones.
    pub fn encode(&self) -> String {
        let bytes = self.to_bytes();
        match self {
            Address::Legacy { .. } => bs58::encode(bytes).into_string(),
            Address::Reward { network, .. } => bech32_encode(network.reward_hrp(), &bytes),
            _ => bech32_encode(self.network().payment_hrp(), &bytes),
        }
    }

    /// Parse either textual form.
    pub fn decode(s: &str) -> Result<Self, AddressError> {
        let lower = s.to_ascii_lowercase();
        if lower.starts_with("addr") || lower.starts_with("stake") {
            let (hrp, bytes) = bech32_decode(s)?;
            let address = Self::from_bytes(&bytes)?;
            let expected = match &address {
                Address::Reward { network, .. } => network.reward_hrp(),
                Address::Legacy { .. } => return Err(AddressError::InvalidHrp(hrp)),
                other => other.network().payment_hrp(),
            };
            if hrp != expected {
                return Err(AddressError::InvalidHrp(hrp));
            }
            Ok(address)
        } else {
            let bytes = bs58::decode(s)
                .into_vec()
                .map_err(|e| AddressError::InvalidBase58(e.to_string()))?;
            match Self::from_bytes(&bytes)? {
                legacy @ Address::Legacy { .. } => Ok(legacy),
                _ => Err(AddressError::InvalidBase58("not a legacy address".into())),
            }
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::decode(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.encode())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::decode(&s).map_err(serde::de::Error::custom)
    }
}

fn expect_len(kind: &'static str, len: usize, expected: usize) -> Result<(), AddressError> {
    if len != expected {
        return Err(AddressError::InvalidLength { kind, len });
    }
    Ok(())
}

fn legacy_checksum(payload: &[u8]) -> [u8; 4] {
    let digest = blake3::hash(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest.as_bytes()[..4]);
    out
}

// --- Pointer naturals: big-endian base-128, high bit marks continuation ---

fn encode_nat(mut value: u64, out: &mut Vec<u8>) {
    let mut groups = vec![(value & 0x7f) as u8];
    value >>= 7;
    while value > 0 {
        groups.push(((value & 0x7f) as u8) | 0x80);
        value >>= 7;
    }
    groups.reverse();
    out.extend_from_slice(&groups);
}

fn decode_nat(input: &mut &[u8]) -> Result<u64, AddressError> {
    let mut value: u64 = 0;
    loop {
        let (&byte, rest) = input.split_first().ok_or(AddressError::TruncatedPointer)?;
        *input = rest;
        if value > (u64::MAX >> 7) {
            return Err(AddressError::TruncatedPointer);
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return Ok(value);
        }
    }
}

// --- Bech32 internals ---

/// Compute the Bech32 polymod over a sequence of 5-bit values.
fn bech32_polymod(values: &[u8]) -> u32 {
    const GEN: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];
    let mut chk: u32 = 1;
    for &v in values {
        let b = chk >> 25;
        chk = ((chk & 0x1ffffff) << 5) ^ (v as u32);
        for (i, &g) in GEN.iter().enumerate() {
            if (b >> i) & 1 != 0 {
                chk ^= g;
            }
        }
    }
    chk
}

fn bech32_hrp_expand(hrp: &str) -> Vec<u8> {
    let mut ret = Vec::with_capacity(hrp.len() * 2 + 1);
    for c in hrp.bytes() {
        ret.push(c >> 5);
    }
    ret.push(0);
    for c in hrp.bytes() {
        ret.push(c & 31);
    }
    ret
}

fn bech32_create_checksum(hrp: &str, data: &[u8]) -> Vec<u8> {
    let mut values = bech32_hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0, 0, 0, 0, 0, 0]);
    let polymod = bech32_polymod(&values) ^ BECH32_CONST;
    (0..6)
        .map(|i| ((polymod >> (5 * (5 - i))) & 31) as u8)
        .collect()
}

fn bech32_verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = bech32_hrp_expand(hrp);
    values.extend_from_slice(data);
    bech32_polymod(&values) == BECH32_CONST
}

fn bech32_encode(hrp: &str, bytes: &[u8]) -> String {
    // 8-bit to 5-bit with padding never fails.
    let data = convert_bits(bytes, 8, 5, true).unwrap_or_default();
    let checksum = bech32_create_checksum(hrp, &data);
    let mut result = String::with_capacity(hrp.len() + 1 + data.len() + 6);
    result.push_str(hrp);
    result.push('1');
    for &d in data.iter().chain(checksum.iter()) {
        result.push(CHARSET[d as usize] as char);
    }
    result
}

fn bech32_decode(s: &str) -> Result<(String, Vec<u8>), AddressError> {
    // Bech32 requires all alphabetic characters to share one case.
    let has_lower = s.chars().any(|c| c.is_ascii_lowercase());
    let has_upper = s.chars().any(|c| c.is_ascii_uppercase());
    if has_lower && has_upper {
        return Err(AddressError::MixedCase);
    }
    let s_lower = s.to_ascii_lowercase();
    let sep_pos = s_lower.rfind('1').ok_or(AddressError::MissingSeparator)?;
    if sep_pos == 0 {
        return Err(AddressError::InvalidHrp(String::new()));
    }
    if sep_pos + 7 > s_lower.len() {
        return Err(AddressError::InvalidLength { kind: "bech32", len: s_lower.len() });
    }
    let hrp = &s_lower[..sep_pos];
    let mut data = Vec::with_capacity(s_lower.len() - sep_pos - 1);
    for c in s_lower[sep_pos + 1..].chars() {
        let pos = CHARSET
            .iter()
            .position(|&ch| ch as char == c)
            .ok_or(AddressError::InvalidCharacter(c))?;
        data.push(pos as u8);
    }
    if !bech32_verify_checksum(hrp, &data) {
        return Err(AddressError::InvalidChecksum);
    }
    let payload = &data[..data.len() - 6];
    let bytes = convert_bits(payload, 5, 8, false).ok_or(AddressError::InvalidPadding)?;
    Ok((hrp.to_string(), bytes))
}

/// Convert between bit widths (e.g. 8-bit bytes to 5-bit Bech32 groups).
fn convert_bits(data: &[u8], from_bits: u32, to_bits: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let mut ret = Vec::new();
    let maxv = (1u32 << to_bits) - 1;
    for &value in data {
        let v = value as u32;
        if v >> from_bits != 0 {
            return None;
        }
        acc = (acc << from_bits) | v;
        bits += from_bits;
        while bits >= to_bits {
            bits -= to_bits;
            ret.push(((acc >> bits) & maxv) as u8);
        }
    }
    if pad {
        if bits > 0 {
            ret.push(((acc << (to_bits - bits)) & maxv) as u8);
        }
    } else if bits >= from_bits || ((acc << (to_bits - bits)) & maxv) != 0 {
        return None;
    }
    Some(ret)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(b: u8) -> Hash28 {
        Hash28([b; CREDENTIAL_HASH_LEN])
    }

    fn base() -> Address {
        Address::Base {
            network: ChainNetwork::Mainnet,
            payment: Credential::Key(hash(1)),
            stake: Credential::Key(hash(2)),
        }
    }

    #[test]
    fn base_header_and_length() {
        let bytes = base().to_bytes();
        assert_eq!(bytes[0], 0x01);
        assert_eq!(bytes.len(), 57);
    }

    #[test]
    fn script_flags_in_header() {
        let a = Address::Base {
            network: ChainNetwork::Testnet,
            payment: Credential::Script(hash(1)),
            stake: Credential::Key(hash(2)),
        };
        assert_eq!(a.to_bytes()[0], 0x10);
        let r = Address::reward(ChainNetwork::Mainnet, Credential::Script(hash(3)));
        assert_eq!(r.to_bytes()[0], 0xF1);
        assert_eq!(Address::from_bytes(&r.to_bytes()).unwrap(), r);
    }

    #[test]
    fn bech32_prefixes() {
        assert!(base().encode().starts_with("addr1"));
        let r = Address::reward(ChainNetwork::Testnet, Credential::Key(hash(9)));
        assert!(r.encode().starts_with("stake_test1"));
        assert_eq!(Address::decode(&r.encode()).unwrap(), r);
    }

    #[test]
    fn decode_roundtrips_every_kind() {
        let addrs = vec![
            base(),
            Address::Pointer {
                network: ChainNetwork::Testnet,
                payment: Credential::Key(hash(4)),
                pointer: Pointer { slot: 2_498_243, tx_index: 27, cert_index: 3 },
            },
            Address::Enterprise { network: ChainNetwork::Mainnet, payment: Credential::Script(hash(5)) },
            Address::Legacy { network: ChainNetwork::Mainnet, root: hash(6) },
        ];
        for a in addrs {
            assert_eq!(Address::decode(&a.encode()).unwrap(), a, "{a:?}");
        }
    }

    #[test]
    fn pointer_nat_encoding_matches_cip19() {
        let mut out = Vec::new();
        encode_nat(2_498_243, &mut out);
        assert_eq!(out, vec![0x81, 0x98, 0xbd, 0x43]);
        let mut input: &[u8] = &out;
        assert_eq!(decode_nat(&mut input).unwrap(), 2_498_243);
        assert!(input.is_empty());
    }

    #[test]
    fn truncated_pointer_rejected() {
        let mut bytes = vec![0x40];
        bytes.extend_from_slice(&[7u8; CREDENTIAL_HASH_LEN]);
        bytes.extend_from_slice(&[0x81, 0x02, 0x83]);
        assert_eq!(Address::from_bytes(&bytes).unwrap_err(), AddressError::TruncatedPointer);
    }

    #[test]
    fn staking_credential_only_on_base_and_reward() {
        assert_eq!(base().staking_credential(), Some(&Credential::Key(hash(2))));
        let ent = Address::Enterprise { network: ChainNetwork::Mainnet, payment: Credential::Key(hash(1)) };
        assert_eq!(ent.staking_credential(), None);
        let legacy = Address::Legacy { network: ChainNetwork::Mainnet, root: hash(1) };
        assert_eq!(legacy.staking_credential(), None);
        assert_eq!(legacy.payment_credential(), None);
    }

    #[test]
    fn corrupted_bech32_rejected() {
        let mut s = base().encode();
        let last = s.pop().unwrap();
        s.push(if last == 'q' { 'p' } else { 'q' });
        assert_eq!(Address::decode(&s).unwrap_err(), AddressError::InvalidChecksum);
    }

    #[test]
    fn corrupted_legacy_checksum_rejected() {
        let mut bytes = Address::Legacy { network: ChainNetwork::Testnet, root: hash(8) }.to_bytes();
        bytes[5] ^= 0xff;
        assert_eq!(Address::from_bytes(&bytes).unwrap_err(), AddressError::InvalidChecksum);
    }

    #[test]
    fn wrong_hrp_rejected() {
        let bytes = base().to_bytes();
        let s = bech32_encode("stake", &bytes);
        assert!(matches!(Address::decode(&s).unwrap_err(), AddressError::InvalidHrp(_)));
    }

    #[test]
    fn unknown_header_rejected() {
        assert_eq!(Address::from_bytes(&[0x90, 1, 2]).unwrap_err(), AddressError::UnknownHeader(0x90));
        assert_eq!(Address::from_bytes(&[]).unwrap_err(), AddressError::Empty);
    }

    #[test]
    fn uppercase_bech32_accepted() {
        let s = base().encode().to_ascii_uppercase();
        assert_eq!(Address::decode(&s).unwrap(), base());
    }

    #[test]
    fn serde_as_string() {
        let json = serde_json::to_string(&base()).unwrap();
        assert!(json.starts_with("\"addr1"));
        let back: Address = serde_json::from_str(&json).unwrap();
        assert_eq!(back, base());
    }
}
