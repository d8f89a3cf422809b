//! Traits for interfacing a wallet with the sync engine

use std::collections::BTreeMap;
use std::fmt::Debug;

use crate::keys::transparent::{TransparentAddress, TransparentAddressId};
use crate::keys::UnifiedFullViewingKey;
use crate::primitives::{
    AccountId, BlockHeight, NoteId, NoteStatus, PoolValues, SyncState, TxId, WalletNote,
    WalletTransaction,
};
use crate::witness::CommitmentTrees;

/// Core wallet functionality required by the sync engine
pub trait SyncWallet {
    /// Errors associated with interfacing the sync engine with wallet data
    type Error: Debug;

    /// Returns the block height wallet was created.
    fn get_birthday(&self) -> Result<BlockHeight, Self::Error>;

    /// Returns a reference to wallet sync state.
    fn get_sync_state(&self) -> Result<&SyncState, Self::Error>;

    /// Returns a mutable reference to wallet sync state.
    fn get_sync_state_mut(&mut self) -> Result<&mut SyncState, Self::Error>;

    /// Returns the unified full viewing keys of all accounts.
    fn get_unified_full_viewing_keys(
        &self,
    ) -> Result<BTreeMap<AccountId, UnifiedFullViewingKey>, Self::Error>;

    /// Returns all the transparent addresses known to this wallet.
    fn get_transparent_addresses(
        &self,
    ) -> Result<BTreeMap<TransparentAddressId, TransparentAddress>, Self::Error>;

    /// Called after each checkpoint so the wallet can persist the synced batch atomically.
    fn commit_batch(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Trait for interfacing [`crate::primitives::WalletNote`]s with wallet data
pub trait SyncNotes: SyncWallet {
    /// Get reference to wallet notes
    fn get_notes(&self) -> Result<&BTreeMap<NoteId, WalletNote>, Self::Error>;

    /// Get mutable reference to wallet notes
    fn get_notes_mut(&mut self) -> Result<&mut BTreeMap<NoteId, WalletNote>, Self::Error>;

    /// Inserts a received note. Notes already known keep their status.
    fn insert_note(&mut self, note: WalletNote) -> Result<(), Self::Error> {
        self.get_notes_mut()?.entry(note.id()).or_insert(note);

        Ok(())
    }

    /// Sums the values of notes that are unspent on chain, per account and pool.
    ///
    /// Notes pending a spend are included as the spending transaction is not mined.
    fn get_confirmed_balances(&self) -> Result<BTreeMap<AccountId, PoolValues>, Self::Error> {
        let mut balances: BTreeMap<AccountId, PoolValues> = BTreeMap::new();
        for note in self.get_notes()?.values() {
            if !matches!(note.status(), NoteStatus::Spent { .. }) {
                *balances
                    .entry(note.account_id())
                    .or_default()
                    .get_mut(note.pool()) += note.value();
            }
        }

        Ok(balances)
    }

    /// Removes all notes received above the given `truncate_height` and reverts spends above it.
    fn truncate_notes(&mut self, truncate_height: BlockHeight) -> Result<(), Self::Error> {
        let notes = self.get_notes_mut()?;
        notes.retain(|_, note| note.height() <= truncate_height);
        for note in notes.values_mut() {
            if let NoteStatus::Spent { height, .. } = note.status() {
                if height > truncate_height {
                    note.set_status(NoteStatus::Unspent);
                }
            }
        }

        Ok(())
    }
}

/// Trait for interfacing [`crate::primitives::WalletTransaction`]s with wallet data
pub trait SyncTransactions: SyncWallet {
    /// Get reference to wallet transactions
    fn get_wallet_transactions(
        &self,
    ) -> Result<&BTreeMap<TxId, WalletTransaction>, Self::Error>;

    /// Get mutable reference to wallet transactions
    fn get_wallet_transactions_mut(
        &mut self,
    ) -> Result<&mut BTreeMap<TxId, WalletTransaction>, Self::Error>;

    /// Removes all wallet transactions above the given `truncate_height`.
    fn truncate_wallet_transactions(
        &mut self,
        truncate_height: BlockHeight,
    ) -> Result<(), Self::Error> {
        self.get_wallet_transactions_mut()?
            .retain(|_, transaction| transaction.height() <= truncate_height);

        Ok(())
    }
}

/// Trait for interfacing shielded note commitment trees with wallet data
pub trait SyncCommitmentTrees: SyncWallet {
    /// Get reference to the commitment trees
    fn get_commitment_trees(&self) -> Result<&CommitmentTrees, Self::Error>;

    /// Get mutable reference to the commitment trees
    fn get_commitment_trees_mut(&mut self) -> Result<&mut CommitmentTrees, Self::Error>;
}
