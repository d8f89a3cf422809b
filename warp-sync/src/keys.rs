//! Key derivation for wallet accounts. All keys of an account are derived from the wallet seed and the account index:
//! one spending key per shielded pool and one transparent account key from which transparent addresses are derived by
//! address index.

use bip0039::{English, Mnemonic};
use serde::{Deserialize, Serialize};

use crate::keys::address::{AddressError, ChainType, UnifiedAddress};
use crate::keys::shielded::{FullViewingKey, SpendingKey};
use crate::keys::transparent::TransparentAccountKey;
use crate::primitives::ShieldedProtocol;
use crate::utils::blake2b_32;

pub mod address;
pub mod shielded;
pub mod transparent;

/// Errors associated with key derivation and key encodings
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// Mnemonic phrase failed to parse
    #[error("invalid mnemonic phrase. {0}")]
    InvalidMnemonic(String),
    /// Key bytes do not form a valid key
    #[error("invalid key. {0}")]
    InvalidKey(&'static str),
    /// Error from the secp256k1 library
    #[error("secp256k1 error. {0}")]
    Secp256k1(#[from] secp256k1::Error),
    /// Key encoding error
    #[error("key encoding error. {0}")]
    Encoding(#[from] AddressError),
}

/// Parses a BIP-39 mnemonic phrase and returns the 64 byte seed with an empty passphrase.
pub fn seed_from_phrase(phrase: &str) -> Result<[u8; 64], KeyError> {
    let mnemonic = Mnemonic::<English>::from_phrase(phrase)
        .map_err(|e| KeyError::InvalidMnemonic(e.to_string()))?;

    Ok(mnemonic.to_seed(""))
}

fn account_key(seed: &[u8], account_index: u32) -> [u8; 32] {
    blake2b_32(b"Warp_AccountKey_", &[seed, &account_index.to_le_bytes()])
}

/// All spending keys of an account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedSpendingKey {
    sapling: SpendingKey,
    orchard: SpendingKey,
    transparent: TransparentAccountKey,
}

impl UnifiedSpendingKey {
    /// Derives the spending keys of the account at `account_index` from the wallet seed.
    pub fn from_seed(seed: &[u8], account_index: u32) -> Result<Self, KeyError> {
        if seed.len() < 32 {
            return Err(KeyError::InvalidKey("seed must be at least 32 bytes"));
        }
        let account_key = account_key(seed, account_index);

        Ok(UnifiedSpendingKey {
            sapling: SpendingKey::from_account_key(ShieldedProtocol::Sapling, &account_key),
            orchard: SpendingKey::from_account_key(ShieldedProtocol::Orchard, &account_key),
            transparent: TransparentAccountKey::from_account_key(&account_key),
        })
    }

    /// Spending key of the given shielded pool.
    pub fn spending_key(&self, protocol: ShieldedProtocol) -> &SpendingKey {
        match protocol {
            ShieldedProtocol::Sapling => &self.sapling,
            ShieldedProtocol::Orchard => &self.orchard,
        }
    }

    /// Transparent account key.
    pub fn transparent(&self) -> &TransparentAccountKey {
        &self.transparent
    }

    /// Derives the viewing keys of both shielded pools.
    pub fn to_unified_full_viewing_key(&self) -> Result<UnifiedFullViewingKey, KeyError> {
        Ok(UnifiedFullViewingKey {
            sapling: Some(self.sapling.to_full_viewing_key()?),
            orchard: Some(self.orchard.to_full_viewing_key()?),
        })
    }
}

const SAPLING_FVK_TYPECODE: u8 = 0x02;
const ORCHARD_FVK_TYPECODE: u8 = 0x03;

/// Viewing keys of an account for each shielded pool it can receive in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedFullViewingKey {
    sapling: Option<FullViewingKey>,
    orchard: Option<FullViewingKey>,
}

impl UnifiedFullViewingKey {
    /// Creates a unified viewing key from its per-pool parts. At least one part is required.
    pub fn from_parts(
        sapling: Option<FullViewingKey>,
        orchard: Option<FullViewingKey>,
    ) -> Result<Self, KeyError> {
        if sapling.is_none() && orchard.is_none() {
            return Err(KeyError::InvalidKey("unified viewing key has no components"));
        }

        Ok(UnifiedFullViewingKey { sapling, orchard })
    }

    /// Viewing key of the given shielded pool.
    pub fn fvk(&self, protocol: ShieldedProtocol) -> Option<&FullViewingKey> {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.as_ref(),
            ShieldedProtocol::Orchard => self.orchard.as_ref(),
        }
    }

    /// Default unified address with a receiver for each shielded pool of this key.
    pub fn default_address(&self) -> UnifiedAddress {
        UnifiedAddress::from_receivers(
            None,
            self.sapling.as_ref().map(|fvk| fvk.default_address()),
            self.orchard.as_ref().map(|fvk| fvk.default_address()),
        )
    }

    /// Encodes the key as a bech32m string for the given chain.
    pub fn encode(&self, chain: ChainType) -> Result<String, KeyError> {
        let mut data = Vec::new();
        for (typecode, fvk) in [
            (SAPLING_FVK_TYPECODE, &self.sapling),
            (ORCHARD_FVK_TYPECODE, &self.orchard),
        ] {
            if let Some(fvk) = fvk {
                let bytes = fvk.to_bytes();
                data.push(typecode);
                data.push(bytes.len() as u8);
                data.extend_from_slice(&bytes);
            }
        }

        Ok(address::encode_bech32m(chain.ufvk_hrp(), &data)?)
    }

    /// Decodes a key encoded with [`Self::encode`].
    pub fn decode(chain: ChainType, encoded: &str) -> Result<Self, KeyError> {
        let data = address::decode_bech32m(chain.ufvk_hrp(), encoded)?;

        let mut sapling = None;
        let mut orchard = None;
        for (typecode, bytes) in address::parse_tlv(&data)? {
            match typecode {
                SAPLING_FVK_TYPECODE => {
                    sapling = Some(FullViewingKey::from_bytes(ShieldedProtocol::Sapling, bytes)?)
                }
                ORCHARD_FVK_TYPECODE => {
                    orchard = Some(FullViewingKey::from_bytes(ShieldedProtocol::Orchard, bytes)?)
                }
                other => return Err(AddressError::UnsupportedTypecode(other).into()),
            }
        }

        Self::from_parts(sapling, orchard)
    }
}
