//! Summaries of wallet data for display

use serde::{Deserialize, Serialize};

use warp_sync::primitives::{
    AccountId, BlockHeight, NoteId, PoolValues, TxId, WalletTransaction,
};

use super::error::WalletError;
use super::LightWallet;

/// Effect of a transaction on one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionSummary {
    /// Transaction id
    pub txid: TxId,
    /// Height of the block the transaction was mined in
    pub height: BlockHeight,
    /// Block time
    pub time: u32,
    /// Value of the account's notes created by the transaction
    pub received: PoolValues,
    /// Value of the account's notes spent by the transaction
    pub spent: PoolValues,
}

impl TransactionSummary {
    /// Received minus spent value over all pools.
    pub fn net_value(&self) -> i64 {
        self.received.total() as i64 - self.spent.total() as i64
    }
}

impl LightWallet {
    fn summarize(&self, account_id: AccountId, transaction: &WalletTransaction) -> TransactionSummary {
        let sum = |note_ids: &[NoteId]| {
            let mut values = PoolValues::default();
            for note in note_ids
                .iter()
                .filter_map(|note_id| self.notes().get(note_id))
                .filter(|note| note.account_id() == account_id)
            {
                *values.get_mut(note.pool()) += note.value();
            }
            values
        };

        TransactionSummary {
            txid: transaction.txid(),
            height: transaction.height(),
            time: transaction.time(),
            received: sum(transaction.received_notes().as_slice()),
            spent: sum(transaction.spent_notes().as_slice()),
        }
    }

    /// Summaries of an account's transactions ordered by height.
    pub fn transaction_summaries(
        &self,
        account_id: AccountId,
    ) -> Result<Vec<TransactionSummary>, WalletError> {
        self.account(account_id)?;
        let mut summaries: Vec<TransactionSummary> = self
            .account_transactions(account_id)
            .map(|transaction| self.summarize(account_id, transaction))
            .collect();
        summaries.sort_by_key(|summary| (summary.height, summary.txid));

        Ok(summaries)
    }
}
