//! Account balances

use serde::{Deserialize, Serialize};

use warp_sync::primitives::{AccountId, BlockHeight, NoteStatus, PoolValues, WalletNote};

use super::error::WalletError;
use super::LightWallet;

/// Balance of an account per pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Unspent notes with enough confirmations that are not excluded
    pub spendable: PoolValues,
    /// Unspent notes without enough confirmations that are not excluded
    pub unconfirmed: PoolValues,
    /// Unspent notes excluded from transaction planning
    pub excluded: PoolValues,
    /// Notes spent by a broadcast transaction that is not yet mined
    pub pending_spend: PoolValues,
}

impl AccountBalance {
    /// Sums `notes` into balance categories. Notes above `confirmed_height` are unconfirmed.
    pub fn from_notes<'a>(
        notes: impl IntoIterator<Item = &'a WalletNote>,
        confirmed_height: BlockHeight,
    ) -> Self {
        let mut balance = AccountBalance::default();
        for note in notes {
            let category = match note.status() {
                NoteStatus::Spent { .. } => continue,
                NoteStatus::PendingSpend { .. } => &mut balance.pending_spend,
                NoteStatus::Unspent if note.excluded() => &mut balance.excluded,
                NoteStatus::Unspent if note.height() > confirmed_height => {
                    &mut balance.unconfirmed
                }
                NoteStatus::Unspent => &mut balance.spendable,
            };
            *category.get_mut(note.pool()) += note.value();
        }

        balance
    }

    /// Value of all notes not spent on chain.
    pub fn total(&self) -> PoolValues {
        self.spendable + self.unconfirmed + self.excluded + self.pending_spend
    }
}

impl LightWallet {
    /// Balance of an account counting notes mined at or below `confirmed_height` as confirmed.
    pub fn account_balance(
        &self,
        account_id: AccountId,
        confirmed_height: BlockHeight,
    ) -> Result<AccountBalance, WalletError> {
        self.account(account_id)?;

        Ok(AccountBalance::from_notes(
            self.account_notes(account_id),
            confirmed_height,
        ))
    }

    /// Balance of an account counting notes with at least `min_confirmations` blocks on top as confirmed.
    pub fn balance_with_confirmations(
        &self,
        account_id: AccountId,
        min_confirmations: u32,
    ) -> Result<AccountBalance, WalletError> {
        let wallet_height = self
            .wallet_height()
            .unwrap_or_else(|| self.birthday().saturating_sub(1));

        self.account_balance(account_id, wallet_height.saturating_sub(min_confirmations))
    }
}

#[cfg(test)]
mod tests {
    use warp_sync::primitives::{NoteData, NoteId, OutPoint, PoolType, TxId};
    use warp_sync::keys::transparent::TransparentAddress;

    use super::*;

    fn note(index: u32, value: u64, height: u32) -> WalletNote {
        let outpoint = OutPoint {
            txid: TxId::from_bytes([index as u8; 32]),
            index,
        };
        WalletNote::from_parts(
            NoteId::Transparent(outpoint),
            AccountId::ZERO,
            value,
            BlockHeight::from_u32(height),
            outpoint.txid,
            NoteData::Transparent {
                address: TransparentAddress([0u8; 20]),
                address_index: 0,
            },
        )
    }

    #[test]
    fn notes_are_sorted_into_categories() {
        let confirmed = note(0, 100, 10);
        let unconfirmed = note(1, 20, 12);
        let mut excluded = note(2, 5, 9);
        excluded.set_excluded(true);
        let mut pending = note(3, 7, 9);
        pending.set_status(NoteStatus::PendingSpend {
            txid: TxId::from_bytes([9u8; 32]),
            expiry_height: BlockHeight::from_u32(50),
        });
        let mut spent = note(4, 1000, 9);
        spent.set_status(NoteStatus::Spent {
            txid: TxId::from_bytes([8u8; 32]),
            height: BlockHeight::from_u32(11),
        });

        let balance = AccountBalance::from_notes(
            [&confirmed, &unconfirmed, &excluded, &pending, &spent],
            BlockHeight::from_u32(10),
        );
        assert_eq!(balance.spendable.get(PoolType::TRANSPARENT), 100);
        assert_eq!(balance.unconfirmed.get(PoolType::TRANSPARENT), 20);
        assert_eq!(balance.excluded.get(PoolType::TRANSPARENT), 5);
        assert_eq!(balance.pending_spend.get(PoolType::TRANSPARENT), 7);
        assert_eq!(balance.total().total(), 132);
    }
}
