//! Transparent keys and addresses

use ripemd::Ripemd160;
use secp256k1::{PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::keys::KeyError;
use crate::primitives::AccountId;
use crate::utils::blake2b_32;

/// Index of a transparent address within an account and scope.
pub type AddressIndex = u32;

/// Pay-to-public-key-hash address.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransparentAddress(pub [u8; 20]);

impl TransparentAddress {
    /// Address of a public key. Hash160 of the compressed encoding.
    pub fn from_pubkey(pubkey: &PublicKey) -> Self {
        let sha = Sha256::digest(pubkey.serialize());
        let hash = Ripemd160::digest(sha);
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&hash);

        TransparentAddress(bytes)
    }
}

impl std::fmt::Debug for TransparentAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransparentAddress({})", hex::encode(self.0))
    }
}

/// Unique ID for transparent addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransparentAddressId {
    account_id: AccountId,
    scope: TransparentScope,
    address_index: AddressIndex,
}

impl TransparentAddressId {
    /// Creates an address ID from its parts
    pub fn from_parts(
        account_id: AccountId,
        scope: TransparentScope,
        address_index: AddressIndex,
    ) -> Self {
        Self {
            account_id,
            scope,
            address_index,
        }
    }

    /// Gets address account ID
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Gets address scope
    pub fn scope(&self) -> TransparentScope {
        self.scope
    }

    /// Gets address index
    pub fn address_index(&self) -> AddressIndex {
        self.address_index
    }
}

/// Child index for the `change` path level (a.k.a. scope/chain).
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransparentScope {
    /// External scope
    External,
    /// Internal scope (a.k.a. change)
    Internal,
}

impl TransparentScope {
    fn tag(&self) -> u8 {
        match self {
            TransparentScope::External => 0,
            TransparentScope::Internal => 1,
        }
    }
}

/// Transparent key of an account. Address keys are derived by scope and address index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransparentAccountKey {
    key: [u8; 32],
}

impl TransparentAccountKey {
    pub(crate) fn from_account_key(account_key: &[u8; 32]) -> Self {
        TransparentAccountKey {
            key: blake2b_32(b"Warp_Transparent", &[account_key]),
        }
    }

    /// Secret key of the address at `address_index` in `scope`.
    pub fn derive_secret_key(
        &self,
        scope: TransparentScope,
        address_index: AddressIndex,
    ) -> Result<SecretKey, KeyError> {
        Ok(SecretKey::from_slice(&blake2b_32(
            b"Warp_TAddressKey",
            &[&self.key, &[scope.tag()], &address_index.to_le_bytes()],
        ))?)
    }

    /// Public key of the address at `address_index` in `scope`.
    pub fn derive_pubkey(
        &self,
        scope: TransparentScope,
        address_index: AddressIndex,
    ) -> Result<PublicKey, KeyError> {
        let secp = Secp256k1::signing_only();

        Ok(PublicKey::from_secret_key(
            &secp,
            &self.derive_secret_key(scope, address_index)?,
        ))
    }

    /// Derives the address at `address_index` in `scope`.
    pub fn derive_address(
        &self,
        scope: TransparentScope,
        address_index: AddressIndex,
    ) -> Result<TransparentAddress, KeyError> {
        Ok(TransparentAddress::from_pubkey(
            &self.derive_pubkey(scope, address_index)?,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_derive_distinct_addresses() {
        let key = TransparentAccountKey::from_account_key(&[1u8; 32]);
        let external = key.derive_address(TransparentScope::External, 0).unwrap();
        let internal = key.derive_address(TransparentScope::Internal, 0).unwrap();
        let next = key.derive_address(TransparentScope::External, 1).unwrap();
        assert_ne!(external, internal);
        assert_ne!(external, next);
        assert_eq!(
            external,
            key.derive_address(TransparentScope::External, 0).unwrap()
        );
    }

    #[test]
    fn address_matches_pubkey() {
        let key = TransparentAccountKey::from_account_key(&[1u8; 32]);
        let pubkey = key.derive_pubkey(TransparentScope::External, 3).unwrap();
        assert_eq!(
            TransparentAddress::from_pubkey(&pubkey),
            key.derive_address(TransparentScope::External, 3).unwrap()
        );
    }
}
