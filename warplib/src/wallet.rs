//! In-memory wallet state store
//!
//! Holds the accounts, notes, transactions, checkpoints and commitment trees of one wallet. The sync engine writes to
//! the store through the [`warp_sync::traits`] implementations below. Accounts are kept in an arena indexed by
//! [`AccountId`] so ids stay valid when other accounts are deleted.

use std::collections::BTreeMap;
use std::path::PathBuf;

use getset::Getters;
use serde::{Deserialize, Serialize};

use warp_sync::keys::address::{Address, ChainType};
use warp_sync::keys::transparent::{TransparentAddress, TransparentAddressId};
use warp_sync::keys::UnifiedFullViewingKey;
use warp_sync::primitives::{
    AccountId, BlockHeight, NoteId, PoolType, SyncState, TxId, WalletNote, WalletTransaction,
};
use warp_sync::traits::{SyncCommitmentTrees, SyncNotes, SyncTransactions, SyncWallet};
use warp_sync::vec_map;
use warp_sync::witness::CommitmentTrees;

use account::Account;
use error::WalletError;

pub mod account;
pub mod balance;
pub mod disk;
pub mod error;
pub mod fees;
pub mod propose;
pub mod send;
pub mod summary;

/// Wallet state store
#[derive(Debug, Clone, Getters, Serialize, Deserialize)]
pub struct LightWallet {
    /// Chain the wallet operates on
    #[getset(get = "pub")]
    chain: ChainType,
    /// Height of the first block that may contain wallet transactions
    birthday: BlockHeight,
    accounts: Vec<Option<Account>>,
    /// Notes received by all accounts
    #[getset(get = "pub")]
    #[serde(with = "vec_map")]
    notes: BTreeMap<NoteId, WalletNote>,
    /// Transactions receiving or spending wallet notes
    #[getset(get = "pub")]
    #[serde(with = "vec_map")]
    transactions: BTreeMap<TxId, WalletTransaction>,
    /// Checkpoints
    #[getset(get = "pub")]
    sync_state: SyncState,
    /// Note commitment trees and witnesses
    #[getset(get = "pub")]
    commitment_trees: CommitmentTrees,
    /// File the wallet is saved to after each synced batch
    #[serde(skip)]
    wallet_path: Option<PathBuf>,
}

impl LightWallet {
    /// Creates a wallet without accounts.
    pub fn new(chain: ChainType, birthday: BlockHeight) -> Self {
        LightWallet {
            chain,
            birthday: birthday.max(BlockHeight::from_u32(1)),
            accounts: Vec::new(),
            notes: BTreeMap::new(),
            transactions: BTreeMap::new(),
            sync_state: SyncState::new(),
            commitment_trees: CommitmentTrees::default(),
            wallet_path: None,
        }
    }

    /// Height of the first block that may contain wallet transactions.
    pub fn birthday(&self) -> BlockHeight {
        self.birthday
    }

    /// Height of the latest checkpoint, `None` before the first sync.
    pub fn wallet_height(&self) -> Option<BlockHeight> {
        self.sync_state.wallet_height()
    }

    /// Sets the file the wallet is saved to after each synced batch.
    pub fn set_wallet_path(&mut self, wallet_path: Option<PathBuf>) {
        self.wallet_path = wallet_path;
    }

    /// File the wallet is saved to after each synced batch.
    pub fn wallet_path(&self) -> Option<&PathBuf> {
        self.wallet_path.as_ref()
    }

    fn next_account_id(&self) -> AccountId {
        AccountId::from_index(self.accounts.len() as u32)
    }

    fn push_account(&mut self, account: Account) -> AccountId {
        let account_id = self.next_account_id();
        self.accounts.push(Some(account));
        account_id
    }

    /// Derives the account at `index` from `seed` and adds it to the wallet.
    ///
    /// Notes the account received before it was added are only found after a rescan.
    pub fn add_account_from_seed(
        &mut self,
        name: impl Into<String>,
        seed: &[u8],
        index: u32,
    ) -> Result<AccountId, WalletError> {
        let account = Account::from_seed(self.next_account_id(), name.into(), seed, index)?;
        if self.accounts().any(|(_, existing)| existing.ufvk() == account.ufvk()) {
            return Err(WalletError::DuplicateAccount(index));
        }
        let account_id = self.push_account(account);
        tracing::info!("Added account {} at index {}.", account_id, index);

        Ok(account_id)
    }

    /// Adds a watch-only account from a unified full viewing key.
    pub fn import_viewing_key(
        &mut self,
        name: impl Into<String>,
        ufvk: UnifiedFullViewingKey,
    ) -> Result<AccountId, WalletError> {
        if let Some((account_id, _)) = self.accounts().find(|(_, existing)| *existing.ufvk() == ufvk) {
            return Err(WalletError::DuplicateViewingKey(account_id));
        }
        let account_id = self.push_account(Account::from_ufvk(name.into(), ufvk));
        tracing::info!("Imported watch-only account {}.", account_id);

        Ok(account_id)
    }

    /// All accounts in id order.
    pub fn accounts(&self) -> impl Iterator<Item = (AccountId, &Account)> + '_ {
        self.accounts
            .iter()
            .enumerate()
            .filter_map(|(index, account)| {
                account
                    .as_ref()
                    .map(|account| (AccountId::from_index(index as u32), account))
            })
    }

    /// Account with the given id.
    pub fn account(&self, account_id: AccountId) -> Result<&Account, WalletError> {
        self.accounts
            .get(account_id.index() as usize)
            .and_then(Option::as_ref)
            .ok_or(WalletError::UnknownAccount(account_id))
    }

    fn account_mut(&mut self, account_id: AccountId) -> Result<&mut Account, WalletError> {
        self.accounts
            .get_mut(account_id.index() as usize)
            .and_then(Option::as_mut)
            .ok_or(WalletError::UnknownAccount(account_id))
    }

    /// Renames an account.
    pub fn rename_account(
        &mut self,
        account_id: AccountId,
        name: impl Into<String>,
    ) -> Result<(), WalletError> {
        self.account_mut(account_id)?.set_name(name.into());

        Ok(())
    }

    /// Deletes an account with its notes. The ids of other accounts are unchanged.
    pub fn delete_account(&mut self, account_id: AccountId) -> Result<(), WalletError> {
        self.account(account_id)?;
        self.accounts[account_id.index() as usize] = None;

        let removed: Vec<NoteId> = self
            .notes
            .values()
            .filter(|note| note.account_id() == account_id)
            .map(WalletNote::id)
            .collect();
        for note_id in &removed {
            if let Some(note) = self.notes.remove(note_id) {
                if let NoteId::Shielded { protocol, position } = note.id() {
                    self.commitment_trees.remove_witness(protocol, position);
                }
            }
        }
        let notes = &self.notes;
        self.transactions.retain(|_, transaction| {
            transaction
                .received_notes()
                .iter()
                .chain(transaction.spent_notes().iter())
                .any(|note_id| notes.contains_key(note_id))
        });
        tracing::info!("Deleted account {} and {} notes.", account_id, removed.len());

        Ok(())
    }

    /// Derives the next external transparent address of an account.
    ///
    /// Outputs to the address are detected from the next synced block.
    pub fn new_transparent_address(
        &mut self,
        account_id: AccountId,
    ) -> Result<TransparentAddress, WalletError> {
        self.account_mut(account_id)?
            .new_transparent_address(account_id)
    }

    /// Address of an account in the given pool. `None` selects the unified address.
    pub fn address(
        &self,
        account_id: AccountId,
        pool: Option<PoolType>,
    ) -> Result<Option<Address>, WalletError> {
        Ok(self.account(account_id)?.address(pool))
    }

    /// Notes of an account.
    pub fn account_notes(&self, account_id: AccountId) -> impl Iterator<Item = &WalletNote> + '_ {
        self.notes
            .values()
            .filter(move |note| note.account_id() == account_id)
    }

    /// Transactions receiving or spending notes of an account.
    pub fn account_transactions(
        &self,
        account_id: AccountId,
    ) -> impl Iterator<Item = &WalletTransaction> + '_ {
        self.transactions.values().filter(move |transaction| {
            transaction
                .received_notes()
                .iter()
                .chain(transaction.spent_notes().iter())
                .any(|note_id| {
                    self.notes
                        .get(note_id)
                        .is_some_and(|note| note.account_id() == account_id)
                })
        })
    }

    /// Excludes a note from transaction planning, or includes it again.
    pub fn exclude_note(
        &mut self,
        account_id: AccountId,
        note_id: NoteId,
        excluded: bool,
    ) -> Result<(), WalletError> {
        self.account(account_id)?;
        let note = self
            .notes
            .get_mut(&note_id)
            .filter(|note| note.account_id() == account_id)
            .ok_or(WalletError::UnknownNote(note_id))?;
        note.set_excluded(excluded);

        Ok(())
    }

    /// Unified full viewing keys of all accounts.
    pub fn unified_full_viewing_keys(&self) -> BTreeMap<AccountId, UnifiedFullViewingKey> {
        self.accounts()
            .map(|(account_id, account)| (account_id, account.ufvk().clone()))
            .collect()
    }

    /// Transparent addresses of all accounts.
    pub fn transparent_addresses(&self) -> BTreeMap<TransparentAddressId, TransparentAddress> {
        self.accounts()
            .flat_map(|(_, account)| account.transparent_addresses().clone())
            .collect()
    }

    pub(crate) fn notes_mut(&mut self) -> &mut BTreeMap<NoteId, WalletNote> {
        &mut self.notes
    }
}

impl SyncWallet for LightWallet {
    type Error = WalletError;

    fn get_birthday(&self) -> Result<BlockHeight, Self::Error> {
        Ok(self.birthday)
    }

    fn get_sync_state(&self) -> Result<&SyncState, Self::Error> {
        Ok(&self.sync_state)
    }

    fn get_sync_state_mut(&mut self) -> Result<&mut SyncState, Self::Error> {
        Ok(&mut self.sync_state)
    }

    fn get_unified_full_viewing_keys(
        &self,
    ) -> Result<BTreeMap<AccountId, UnifiedFullViewingKey>, Self::Error> {
        Ok(self.unified_full_viewing_keys())
    }

    fn get_transparent_addresses(
        &self,
    ) -> Result<BTreeMap<TransparentAddressId, TransparentAddress>, Self::Error> {
        Ok(self.transparent_addresses())
    }

    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        match &self.wallet_path {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }
}

impl SyncNotes for LightWallet {
    fn get_notes(&self) -> Result<&BTreeMap<NoteId, WalletNote>, Self::Error> {
        Ok(&self.notes)
    }

    fn get_notes_mut(&mut self) -> Result<&mut BTreeMap<NoteId, WalletNote>, Self::Error> {
        Ok(&mut self.notes)
    }
}

impl SyncTransactions for LightWallet {
    fn get_wallet_transactions(
        &self,
    ) -> Result<&BTreeMap<TxId, WalletTransaction>, Self::Error> {
        Ok(&self.transactions)
    }

    fn get_wallet_transactions_mut(
        &mut self,
    ) -> Result<&mut BTreeMap<TxId, WalletTransaction>, Self::Error> {
        Ok(&mut self.transactions)
    }
}

impl SyncCommitmentTrees for LightWallet {
    fn get_commitment_trees(&self) -> Result<&CommitmentTrees, Self::Error> {
        Ok(&self.commitment_trees)
    }

    fn get_commitment_trees_mut(&mut self) -> Result<&mut CommitmentTrees, Self::Error> {
        Ok(&mut self.commitment_trees)
    }
}
