//! Address encodings
//!
//! Transparent addresses are base58check encoded with a two byte network prefix. Shielded addresses, unified
//! addresses and unified viewing keys are bech32m encoded with a network specific human readable part. Unified
//! encodings carry a sequence of `(typecode, length, bytes)` items, one per pool.

use bech32::{Bech32m, Hrp};
use serde::{Deserialize, Serialize};

use crate::keys::shielded::PaymentAddress;
use crate::keys::transparent::TransparentAddress;
use crate::primitives::{PoolType, ShieldedProtocol};

/// Errors associated with address encodings
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    /// Not a valid base58check or bech32m string
    #[error("invalid encoding. {0}")]
    InvalidEncoding(String),
    /// Valid encoding for another chain or another kind of key
    #[error("unexpected prefix {0}")]
    UnknownPrefix(String),
    /// Payload length does not match the encoded item
    #[error("invalid payload length")]
    InvalidLength,
    /// Unified encoding contains an unknown item
    #[error("unsupported typecode {0}")]
    UnsupportedTypecode(u8),
    /// Unified encoding contains the same item twice
    #[error("duplicate typecode {0}")]
    DuplicateTypecode(u8),
    /// Unified address without receivers
    #[error("unified address has no receivers")]
    NoReceivers,
}

/// Chain the wallet operates on. Selects address prefixes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChainType {
    /// Public mainnet
    Mainnet,
    /// Public testnet
    Testnet,
    /// Local regtest network
    #[default]
    Regtest,
}

impl ChainType {
    fn transparent_prefix(&self) -> [u8; 2] {
        match self {
            ChainType::Mainnet => [0x1c, 0xb8],
            ChainType::Testnet | ChainType::Regtest => [0x1d, 0x25],
        }
    }

    fn shielded_hrp(&self, protocol: ShieldedProtocol) -> &'static str {
        match (self, protocol) {
            (ChainType::Mainnet, ShieldedProtocol::Sapling) => "zs",
            (ChainType::Testnet, ShieldedProtocol::Sapling) => "ztestsapling",
            (ChainType::Regtest, ShieldedProtocol::Sapling) => "zregtestsapling",
            (ChainType::Mainnet, ShieldedProtocol::Orchard) => "zo",
            (ChainType::Testnet, ShieldedProtocol::Orchard) => "ztestorchard",
            (ChainType::Regtest, ShieldedProtocol::Orchard) => "zregtestorchard",
        }
    }

    fn unified_hrp(&self) -> &'static str {
        match self {
            ChainType::Mainnet => "u",
            ChainType::Testnet => "utest",
            ChainType::Regtest => "uregtest",
        }
    }

    pub(crate) fn ufvk_hrp(&self) -> &'static str {
        match self {
            ChainType::Mainnet => "uview",
            ChainType::Testnet => "uviewtest",
            ChainType::Regtest => "uviewregtest",
        }
    }
}

impl std::fmt::Display for ChainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ChainType::Mainnet => "main",
            ChainType::Testnet => "test",
            ChainType::Regtest => "regtest",
        };
        write!(f, "{name}")
    }
}

pub(crate) fn encode_bech32m(hrp: &str, data: &[u8]) -> Result<String, AddressError> {
    let hrp = Hrp::parse(hrp).map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;

    bech32::encode::<Bech32m>(hrp, data).map_err(|e| AddressError::InvalidEncoding(e.to_string()))
}

pub(crate) fn decode_bech32m(expected_hrp: &str, encoded: &str) -> Result<Vec<u8>, AddressError> {
    let (hrp, data) =
        bech32::decode(encoded).map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
    if hrp.as_str() != expected_hrp {
        return Err(AddressError::UnknownPrefix(hrp.to_string()));
    }

    Ok(data)
}

/// Splits a unified encoding into its `(typecode, bytes)` items.
pub(crate) fn parse_tlv(data: &[u8]) -> Result<Vec<(u8, &[u8])>, AddressError> {
    let mut items: Vec<(u8, &[u8])> = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        if rest.len() < 2 {
            return Err(AddressError::InvalidLength);
        }
        let typecode = rest[0];
        let len = usize::from(rest[1]);
        if rest.len() < 2 + len {
            return Err(AddressError::InvalidLength);
        }
        if items.iter().any(|(code, _)| *code == typecode) {
            return Err(AddressError::DuplicateTypecode(typecode));
        }
        items.push((typecode, &rest[2..2 + len]));
        rest = &rest[2 + len..];
    }

    Ok(items)
}

const P2PKH_TYPECODE: u8 = 0x00;
const SAPLING_TYPECODE: u8 = 0x02;
const ORCHARD_TYPECODE: u8 = 0x03;

/// A receiver of funds in a single pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Receiver {
    /// Transparent receiver
    Transparent(TransparentAddress),
    /// Shielded receiver
    Shielded(PaymentAddress),
}

impl Receiver {
    /// Pool this receiver belongs to.
    pub fn pool(&self) -> PoolType {
        match self {
            Receiver::Transparent(_) => PoolType::Transparent,
            Receiver::Shielded(address) => PoolType::Shielded(address.protocol()),
        }
    }
}

/// Address with receivers for one or more pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnifiedAddress {
    transparent: Option<TransparentAddress>,
    sapling: Option<PaymentAddress>,
    orchard: Option<PaymentAddress>,
}

impl UnifiedAddress {
    /// Creates a unified address from its receivers.
    pub fn from_receivers(
        transparent: Option<TransparentAddress>,
        sapling: Option<PaymentAddress>,
        orchard: Option<PaymentAddress>,
    ) -> Self {
        UnifiedAddress {
            transparent,
            sapling,
            orchard,
        }
    }

    /// Returns the receiver for the given pool if the address has one.
    pub fn receiver(&self, pool: PoolType) -> Option<Receiver> {
        match pool {
            PoolType::Transparent => self.transparent.map(Receiver::Transparent),
            PoolType::Shielded(ShieldedProtocol::Sapling) => self.sapling.map(Receiver::Shielded),
            PoolType::Shielded(ShieldedProtocol::Orchard) => self.orchard.map(Receiver::Shielded),
        }
    }

    fn encode(&self, chain: ChainType) -> Result<String, AddressError> {
        let mut data = Vec::new();
        if let Some(address) = &self.transparent {
            data.extend_from_slice(&[P2PKH_TYPECODE, 20]);
            data.extend_from_slice(&address.0);
        }
        for (typecode, address) in [
            (SAPLING_TYPECODE, &self.sapling),
            (ORCHARD_TYPECODE, &self.orchard),
        ] {
            if let Some(address) = address {
                data.extend_from_slice(&[typecode, 32]);
                data.extend_from_slice(address.pk_d());
            }
        }

        encode_bech32m(chain.unified_hrp(), &data)
    }

    fn decode(data: &[u8]) -> Result<Self, AddressError> {
        let mut address = UnifiedAddress::from_receivers(None, None, None);
        for (typecode, bytes) in parse_tlv(data)? {
            match typecode {
                P2PKH_TYPECODE => {
                    address.transparent = Some(TransparentAddress(
                        bytes.try_into().map_err(|_| AddressError::InvalidLength)?,
                    ))
                }
                SAPLING_TYPECODE => {
                    address.sapling = Some(PaymentAddress::from_parts(
                        ShieldedProtocol::Sapling,
                        bytes.try_into().map_err(|_| AddressError::InvalidLength)?,
                    ))
                }
                ORCHARD_TYPECODE => {
                    address.orchard = Some(PaymentAddress::from_parts(
                        ShieldedProtocol::Orchard,
                        bytes.try_into().map_err(|_| AddressError::InvalidLength)?,
                    ))
                }
                other => return Err(AddressError::UnsupportedTypecode(other)),
            }
        }
        if address.transparent.is_none() && address.sapling.is_none() && address.orchard.is_none()
        {
            return Err(AddressError::NoReceivers);
        }

        Ok(address)
    }
}

/// Any address the wallet can send to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Address {
    /// Transparent address
    Transparent(TransparentAddress),
    /// Single pool shielded address
    Shielded(PaymentAddress),
    /// Unified address
    Unified(UnifiedAddress),
}

impl Address {
    /// Returns the receiver for the given pool if the address has one.
    pub fn receiver(&self, pool: PoolType) -> Option<Receiver> {
        match self {
            Address::Transparent(address) => {
                (pool == PoolType::Transparent).then_some(Receiver::Transparent(*address))
            }
            Address::Shielded(address) => (pool == PoolType::Shielded(address.protocol()))
                .then_some(Receiver::Shielded(*address)),
            Address::Unified(address) => address.receiver(pool),
        }
    }

    /// Receiver of the most private pool the address supports: orchard, then sapling, then transparent.
    pub fn preferred_receiver(&self) -> Option<Receiver> {
        [PoolType::ORCHARD, PoolType::SAPLING, PoolType::TRANSPARENT]
            .into_iter()
            .find_map(|pool| self.receiver(pool))
    }

    /// Encodes the address for the given chain.
    pub fn encode(&self, chain: ChainType) -> Result<String, AddressError> {
        match self {
            Address::Transparent(address) => {
                let mut data = chain.transparent_prefix().to_vec();
                data.extend_from_slice(&address.0);
                Ok(bs58::encode(data).with_check().into_string())
            }
            Address::Shielded(address) => {
                encode_bech32m(chain.shielded_hrp(address.protocol()), address.pk_d())
            }
            Address::Unified(address) => address.encode(chain),
        }
    }

    /// Decodes an address of any kind for the given chain.
    pub fn decode(chain: ChainType, encoded: &str) -> Result<Self, AddressError> {
        if let Ok(data) = bs58::decode(encoded).with_check(None).into_vec() {
            if data.len() != 22 {
                return Err(AddressError::InvalidLength);
            }
            if data[..2] != chain.transparent_prefix() {
                return Err(AddressError::UnknownPrefix(hex::encode(&data[..2])));
            }
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&data[2..]);
            return Ok(Address::Transparent(TransparentAddress(hash)));
        }

        let (hrp, data) =
            bech32::decode(encoded).map_err(|e| AddressError::InvalidEncoding(e.to_string()))?;
        let hrp = hrp.as_str();

        if hrp == chain.unified_hrp() {
            return UnifiedAddress::decode(&data).map(Address::Unified);
        }
        for protocol in [ShieldedProtocol::Sapling, ShieldedProtocol::Orchard] {
            if hrp == chain.shielded_hrp(protocol) {
                let pk_d: [u8; 32] = data
                    .as_slice()
                    .try_into()
                    .map_err(|_| AddressError::InvalidLength)?;
                return Ok(Address::Shielded(PaymentAddress::from_parts(protocol, pk_d)));
            }
        }

        Err(AddressError::UnknownPrefix(hrp.to_string()))
    }
}

impl From<Receiver> for Address {
    fn from(receiver: Receiver) -> Self {
        match receiver {
            Receiver::Transparent(address) => Address::Transparent(address),
            Receiver::Shielded(address) => Address::Shielded(address),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn shielded(protocol: ShieldedProtocol) -> PaymentAddress {
        PaymentAddress::from_parts(protocol, [5u8; 32])
    }

    #[test_case(ChainType::Mainnet, "t1" ; "mainnet transparent")]
    #[test_case(ChainType::Testnet, "tm" ; "testnet transparent")]
    #[test_case(ChainType::Regtest, "tm" ; "regtest transparent")]
    fn transparent_round_trip(chain: ChainType, prefix: &str) {
        let address = Address::Transparent(TransparentAddress([7u8; 20]));
        let encoded = address.encode(chain).unwrap();
        assert!(encoded.starts_with(prefix));
        assert_eq!(Address::decode(chain, &encoded).unwrap(), address);
    }

    #[test_case(ChainType::Mainnet, ShieldedProtocol::Sapling, "zs1")]
    #[test_case(ChainType::Regtest, ShieldedProtocol::Sapling, "zregtestsapling1")]
    #[test_case(ChainType::Testnet, ShieldedProtocol::Orchard, "ztestorchard1")]
    #[test_case(ChainType::Regtest, ShieldedProtocol::Orchard, "zregtestorchard1")]
    fn shielded_round_trip(chain: ChainType, protocol: ShieldedProtocol, prefix: &str) {
        let address = Address::Shielded(shielded(protocol));
        let encoded = address.encode(chain).unwrap();
        assert!(encoded.starts_with(prefix));
        assert_eq!(Address::decode(chain, &encoded).unwrap(), address);
    }

    #[test]
    fn unified_receivers_and_preference() {
        let address = Address::Unified(UnifiedAddress::from_receivers(
            Some(TransparentAddress([1u8; 20])),
            Some(shielded(ShieldedProtocol::Sapling)),
            None,
        ));
        let encoded = address.encode(ChainType::Regtest).unwrap();
        assert!(encoded.starts_with("uregtest1"));
        let decoded = Address::decode(ChainType::Regtest, &encoded).unwrap();
        assert_eq!(decoded, address);
        assert_eq!(
            decoded.preferred_receiver().map(|receiver| receiver.pool()),
            Some(PoolType::SAPLING)
        );
        assert!(decoded.receiver(PoolType::ORCHARD).is_none());
    }

    #[test]
    fn wrong_network_is_rejected() {
        let encoded = Address::Shielded(shielded(ShieldedProtocol::Orchard))
            .encode(ChainType::Mainnet)
            .unwrap();
        assert!(matches!(
            Address::decode(ChainType::Regtest, &encoded),
            Err(AddressError::UnknownPrefix(_))
        ));
    }

    #[test]
    fn empty_unified_address_is_rejected() {
        assert_eq!(UnifiedAddress::decode(&[]), Err(AddressError::NoReceivers));
    }
}
