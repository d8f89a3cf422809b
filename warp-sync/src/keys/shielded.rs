//! Shielded pool keys

use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use x25519_dalek::StaticSecret;

use crate::keys::KeyError;
use crate::primitives::{Nullifier, ShieldedProtocol};
use crate::utils::blake2b_32;

fn protocol_tag(protocol: ShieldedProtocol) -> u8 {
    match protocol {
        ShieldedProtocol::Sapling => 0x02,
        ShieldedProtocol::Orchard => 0x03,
    }
}

/// Spending key of one shielded pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendingKey {
    protocol: ShieldedProtocol,
    sk: [u8; 32],
}

impl SpendingKey {
    pub(crate) fn from_account_key(protocol: ShieldedProtocol, account_key: &[u8; 32]) -> Self {
        SpendingKey {
            protocol,
            sk: blake2b_32(b"Warp_ShieldedSK_", &[account_key, &[protocol_tag(protocol)]]),
        }
    }

    /// Pool of this key.
    pub fn protocol(&self) -> ShieldedProtocol {
        self.protocol
    }

    /// Spend authorizing key, signs the spends of this pool's notes.
    pub fn ask(&self) -> Result<SecretKey, KeyError> {
        Ok(SecretKey::from_slice(&blake2b_32(
            b"Warp_SpendAuthSK",
            &[&self.sk],
        ))?)
    }

    fn nk(&self) -> [u8; 32] {
        blake2b_32(b"Warp_NullifierK_", &[&self.sk])
    }

    /// Derives the full viewing key.
    pub fn to_full_viewing_key(&self) -> Result<FullViewingKey, KeyError> {
        let secp = Secp256k1::signing_only();
        let ak = PublicKey::from_secret_key(&secp, &self.ask()?);

        Ok(FullViewingKey {
            protocol: self.protocol,
            ak,
            nk: self.nk(),
        })
    }
}

/// Full viewing key of one shielded pool. Detects incoming notes and their spends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullViewingKey {
    protocol: ShieldedProtocol,
    ak: PublicKey,
    nk: [u8; 32],
}

impl FullViewingKey {
    const ENCODED_LEN: usize = 33 + 32;

    /// Pool of this key.
    pub fn protocol(&self) -> ShieldedProtocol {
        self.protocol
    }

    /// Spend validating key.
    pub fn ak(&self) -> &PublicKey {
        &self.ak
    }

    /// Nullifier deriving key.
    pub fn nk(&self) -> &[u8; 32] {
        &self.nk
    }

    /// Incoming viewing key used for trial decryption.
    pub fn to_ivk(&self) -> IncomingViewingKey {
        IncomingViewingKey {
            protocol: self.protocol,
            ivk: blake2b_32(b"Warp_IncomingVK_", &[&self.ak.serialize(), &self.nk]),
        }
    }

    /// Default payment address of this key.
    pub fn default_address(&self) -> PaymentAddress {
        self.to_ivk().address()
    }

    /// Derives the nullifier of a note with commitment `cmx` at `position` in the tree.
    ///
    /// Sapling nullifiers commit to the note position, orchard nullifiers only to the note itself.
    pub fn derive_nullifier(&self, cmx: &[u8; 32], position: u64) -> Nullifier {
        let nf = match self.protocol {
            ShieldedProtocol::Sapling => blake2b_32(
                b"Warp_SaplingNf__",
                &[&self.nk, cmx, &position.to_le_bytes()],
            ),
            ShieldedProtocol::Orchard => blake2b_32(b"Warp_OrchardNf__", &[&self.nk, cmx]),
        };

        Nullifier::from_bytes(nf)
    }

    /// Serializes the key to bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::ENCODED_LEN);
        bytes.extend_from_slice(&self.ak.serialize());
        bytes.extend_from_slice(&self.nk);
        bytes
    }

    /// Deserializes a key from bytes.
    pub fn from_bytes(protocol: ShieldedProtocol, bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() != Self::ENCODED_LEN {
            return Err(KeyError::InvalidKey("full viewing key has wrong length"));
        }
        let ak = PublicKey::from_slice(&bytes[..33])?;
        let mut nk = [0u8; 32];
        nk.copy_from_slice(&bytes[33..]);

        Ok(FullViewingKey { protocol, ak, nk })
    }
}

/// Incoming viewing key of one shielded pool.
#[derive(Clone, PartialEq, Eq)]
pub struct IncomingViewingKey {
    protocol: ShieldedProtocol,
    ivk: [u8; 32],
}

impl std::fmt::Debug for IncomingViewingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncomingViewingKey")
            .field("protocol", &self.protocol)
            .finish_non_exhaustive()
    }
}

impl IncomingViewingKey {
    /// Pool of this key.
    pub fn protocol(&self) -> ShieldedProtocol {
        self.protocol
    }

    pub(crate) fn secret(&self) -> StaticSecret {
        StaticSecret::from(self.ivk)
    }

    /// Payment address of this key.
    pub fn address(&self) -> PaymentAddress {
        PaymentAddress {
            protocol: self.protocol,
            pk_d: x25519_dalek::PublicKey::from(&self.secret()).to_bytes(),
        }
    }
}

/// Shielded payment address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PaymentAddress {
    protocol: ShieldedProtocol,
    pk_d: [u8; 32],
}

impl PaymentAddress {
    /// Creates an address from its transmission key.
    pub fn from_parts(protocol: ShieldedProtocol, pk_d: [u8; 32]) -> Self {
        PaymentAddress { protocol, pk_d }
    }

    /// Pool of this address.
    pub fn protocol(&self) -> ShieldedProtocol {
        self.protocol
    }

    /// Transmission key.
    pub fn pk_d(&self) -> &[u8; 32] {
        &self.pk_d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spending_key(protocol: ShieldedProtocol) -> SpendingKey {
        SpendingKey::from_account_key(protocol, &[9u8; 32])
    }

    #[test]
    fn fvk_bytes_round_trip() {
        let fvk = spending_key(ShieldedProtocol::Orchard)
            .to_full_viewing_key()
            .unwrap();
        let decoded = FullViewingKey::from_bytes(ShieldedProtocol::Orchard, &fvk.to_bytes()).unwrap();
        assert_eq!(decoded, fvk);
        assert!(FullViewingKey::from_bytes(ShieldedProtocol::Orchard, &[0u8; 10]).is_err());
    }

    #[test]
    fn sapling_nullifier_depends_on_position() {
        let fvk = spending_key(ShieldedProtocol::Sapling)
            .to_full_viewing_key()
            .unwrap();
        let cmx = [3u8; 32];
        assert_ne!(fvk.derive_nullifier(&cmx, 1), fvk.derive_nullifier(&cmx, 2));
    }

    #[test]
    fn orchard_nullifier_ignores_position() {
        let fvk = spending_key(ShieldedProtocol::Orchard)
            .to_full_viewing_key()
            .unwrap();
        let cmx = [3u8; 32];
        assert_eq!(fvk.derive_nullifier(&cmx, 1), fvk.derive_nullifier(&cmx, 2));
    }

    #[test]
    fn pools_have_distinct_addresses() {
        let sapling = spending_key(ShieldedProtocol::Sapling)
            .to_full_viewing_key()
            .unwrap()
            .default_address();
        let orchard = spending_key(ShieldedProtocol::Orchard)
            .to_full_viewing_key()
            .unwrap()
            .default_address();
        assert_ne!(sapling.pk_d(), orchard.pk_d());
    }
}
