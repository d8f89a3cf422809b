//! Wallet accounts

use std::collections::BTreeMap;

use getset::Getters;
use secp256k1::SecretKey;
use serde::{Deserialize, Serialize};

use warp_sync::keys::address::{Address, Receiver, UnifiedAddress};
use warp_sync::keys::transparent::{
    AddressIndex, TransparentAddress, TransparentAddressId, TransparentScope,
};
use warp_sync::keys::{UnifiedFullViewingKey, UnifiedSpendingKey};
use warp_sync::primitives::{AccountId, PoolType, ShieldedProtocol};
use warp_sync::vec_map;

use super::error::WalletError;

/// Account of the wallet. Accounts created from a seed can spend, imported viewing keys are watch-only.
#[derive(Debug, Clone, PartialEq, Eq, Getters, Serialize, Deserialize)]
pub struct Account {
    #[getset(get = "pub")]
    name: String,
    /// Derivation index for accounts created from a seed
    index: Option<u32>,
    spending_key: Option<UnifiedSpendingKey>,
    #[getset(get = "pub")]
    ufvk: UnifiedFullViewingKey,
    #[getset(get = "pub")]
    #[serde(with = "vec_map")]
    transparent_addresses: BTreeMap<TransparentAddressId, TransparentAddress>,
}

impl Account {
    /// Derives an account from the wallet seed. The first external transparent address is derived with it.
    pub(crate) fn from_seed(
        account_id: AccountId,
        name: String,
        seed: &[u8],
        index: u32,
    ) -> Result<Self, WalletError> {
        let spending_key = UnifiedSpendingKey::from_seed(seed, index)?;
        let ufvk = spending_key.to_unified_full_viewing_key()?;
        let first_address = spending_key
            .transparent()
            .derive_address(TransparentScope::External, 0)?;

        Ok(Account {
            name,
            index: Some(index),
            spending_key: Some(spending_key),
            ufvk,
            transparent_addresses: BTreeMap::from([(
                TransparentAddressId::from_parts(account_id, TransparentScope::External, 0),
                first_address,
            )]),
        })
    }

    pub(crate) fn from_ufvk(name: String, ufvk: UnifiedFullViewingKey) -> Self {
        Account {
            name,
            index: None,
            spending_key: None,
            ufvk,
            transparent_addresses: BTreeMap::new(),
        }
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = name;
    }

    /// Derivation index, `None` for imported viewing keys.
    pub fn index(&self) -> Option<u32> {
        self.index
    }

    /// Spending keys, `None` for watch-only accounts.
    pub fn spending_key(&self) -> Option<&UnifiedSpendingKey> {
        self.spending_key.as_ref()
    }

    /// Returns true if the account can not authorize spends.
    pub fn is_watch_only(&self) -> bool {
        self.spending_key.is_none()
    }

    /// Receiver of this account in the given pool.
    ///
    /// Shielded receivers are the default addresses of the pool's viewing key. The transparent receiver is the first
    /// derived transparent address.
    pub fn receiver(&self, pool: PoolType) -> Option<Receiver> {
        match pool {
            PoolType::Transparent => self
                .transparent_addresses
                .values()
                .next()
                .map(|address| Receiver::Transparent(*address)),
            PoolType::Shielded(protocol) => self
                .ufvk
                .fvk(protocol)
                .map(|fvk| Receiver::Shielded(fvk.default_address())),
        }
    }

    /// Unified address with a receiver for every pool the account can receive in.
    pub fn unified_address(&self) -> UnifiedAddress {
        let shielded = |protocol| {
            self.ufvk
                .fvk(protocol)
                .map(|fvk| fvk.default_address())
        };

        UnifiedAddress::from_receivers(
            self.transparent_addresses.values().next().copied(),
            shielded(ShieldedProtocol::Sapling),
            shielded(ShieldedProtocol::Orchard),
        )
    }

    /// Address of the account. `None` selects the unified address.
    pub fn address(&self, pool: Option<PoolType>) -> Option<Address> {
        match pool {
            Some(pool) => self.receiver(pool).map(Address::from),
            None => Some(Address::Unified(self.unified_address())),
        }
    }

    /// Derives the next external transparent address.
    pub(crate) fn new_transparent_address(
        &mut self,
        account_id: AccountId,
    ) -> Result<TransparentAddress, WalletError> {
        let spending_key = self
            .spending_key
            .as_ref()
            .ok_or(WalletError::NoSpendingKey(account_id))?;
        let next_index: AddressIndex = self
            .transparent_addresses
            .keys()
            .filter(|address_id| address_id.scope() == TransparentScope::External)
            .map(|address_id| address_id.address_index() + 1)
            .max()
            .unwrap_or(0);
        let address = spending_key
            .transparent()
            .derive_address(TransparentScope::External, next_index)?;
        self.transparent_addresses.insert(
            TransparentAddressId::from_parts(account_id, TransparentScope::External, next_index),
            address,
        );

        Ok(address)
    }

    /// Secret key of a transparent address of this account.
    pub(crate) fn transparent_secret_key(
        &self,
        address: &TransparentAddress,
    ) -> Result<Option<SecretKey>, WalletError> {
        let (Some(spending_key), Some(address_id)) = (
            self.spending_key.as_ref(),
            self.transparent_addresses
                .iter()
                .find(|(_, known)| *known == address)
                .map(|(address_id, _)| *address_id),
        ) else {
            return Ok(None);
        };

        Ok(Some(spending_key.transparent().derive_secret_key(
            address_id.scope(),
            address_id.address_index(),
        )?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        Account::from_seed(AccountId::ZERO, "main".to_string(), &[1u8; 32], 0).unwrap()
    }

    #[test]
    fn transparent_addresses_are_derived_in_order() {
        let mut account = account();
        assert_eq!(account.transparent_addresses().len(), 1);
        let second = account.new_transparent_address(AccountId::ZERO).unwrap();
        assert_eq!(account.transparent_addresses().len(), 2);
        assert!(account.transparent_secret_key(&second).unwrap().is_some());
        assert_eq!(
            account.receiver(PoolType::TRANSPARENT),
            Some(Receiver::Transparent(
                *account.transparent_addresses().values().next().unwrap()
            ))
        );
    }

    #[test]
    fn imported_account_is_watch_only() {
        let ufvk = account().ufvk().clone();
        let mut imported = Account::from_ufvk("watch".to_string(), ufvk.clone());
        assert!(imported.is_watch_only());
        assert!(imported.receiver(PoolType::TRANSPARENT).is_none());
        assert_eq!(
            imported.receiver(PoolType::ORCHARD),
            account().receiver(PoolType::ORCHARD)
        );
        assert!(matches!(
            imported.new_transparent_address(AccountId::ZERO),
            Err(WalletError::NoSpendingKey(_))
        ));
    }

    #[test]
    fn unified_address_prefers_orchard() {
        let address = account().address(None).unwrap();
        assert_eq!(
            address.preferred_receiver().map(|receiver| receiver.pool()),
            Some(PoolType::ORCHARD)
        );
        assert!(address.receiver(PoolType::TRANSPARENT).is_some());
    }
}
