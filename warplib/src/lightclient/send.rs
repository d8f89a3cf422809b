//! Planning, signing and broadcasting of transactions through [`LightClient`]

use warp_sync::client::BlockSource;
use warp_sync::keys::address::Address;
use warp_sync::primitives::{AccountId, NoteId, NoteStatus, PoolType, ShieldedProtocol, TxId};
use warp_sync::transaction::Transaction;

use crate::wallet::propose::{FundingPolicy, Recipient, TransactionPlan};
use crate::wallet::send::{LocalProver, SignedTransaction};
use crate::wallet::LightWallet;

use super::{persist, LightClient, LightClientError};

// marks the wallet notes spent by `transaction` as pending until the transaction is mined or expires
fn mark_pending_spends(wallet: &mut LightWallet, transaction: &Transaction, txid: TxId) -> usize {
    let mut spent: Vec<NoteId> = transaction
        .transparent_inputs
        .iter()
        .map(|input| NoteId::Transparent(input.prevout))
        .collect();
    spent.extend(
        wallet
            .notes()
            .values()
            .filter(|note| {
                note.nullifier().is_some_and(|nullifier| {
                    transaction
                        .shielded_spends
                        .iter()
                        .any(|spend| spend.nullifier == nullifier)
                })
            })
            .map(|note| note.id()),
    );

    let mut marked = 0;
    for note_id in spent {
        if let Some(note) = wallet.notes_mut().get_mut(&note_id) {
            if note.is_unspent() {
                note.set_status(NoteStatus::PendingSpend {
                    txid,
                    expiry_height: transaction.expiry_height,
                });
                marked += 1;
            }
        }
    }

    marked
}

impl<S: BlockSource> LightClient<S> {
    /// Decodes an address for this client's chain into a recipient of `value`.
    pub fn recipient(&self, address: &str, value: u64) -> Result<Recipient, LightClientError> {
        Ok(Recipient::new(
            Address::decode(self.config.chain, address)?,
            value,
        ))
    }

    /// Plans a payment from an account. The wallet is not changed.
    pub async fn plan_payment(
        &self,
        account_id: AccountId,
        recipients: &[Recipient],
        anchor_offset: u32,
        policy: &FundingPolicy,
    ) -> Result<TransactionPlan, LightClientError> {
        Ok(self.wallet.read().await.create_payment_plan(
            &self.config,
            account_id,
            recipients,
            anchor_offset,
            policy,
        )?)
    }

    /// Plans a transfer between pools of an account. Without `value` the whole balance of `from` is moved.
    pub async fn transfer_pools(
        &self,
        account_id: AccountId,
        from: PoolType,
        to: PoolType,
        value: Option<u64>,
        min_confirmations: u32,
    ) -> Result<TransactionPlan, LightClientError> {
        Ok(self.wallet.read().await.create_transfer_plan(
            &self.config,
            account_id,
            from,
            to,
            value,
            self.config.default_anchor_offset,
            min_confirmations,
        )?)
    }

    /// Plans moving all transparent coins of an account to a shielded pool.
    pub async fn shield_taddr(
        &self,
        account_id: AccountId,
        to: ShieldedProtocol,
        min_confirmations: u32,
    ) -> Result<TransactionPlan, LightClientError> {
        Ok(self.wallet.read().await.create_shield_plan(
            &self.config,
            account_id,
            to,
            min_confirmations,
        )?)
    }

    /// Signs a plan. Fails if the wallet synced since the plan was created.
    pub async fn sign(&self, plan: &TransactionPlan) -> Result<SignedTransaction, LightClientError> {
        Ok(self.wallet.read().await.sign_plan(plan, &LocalProver)?)
    }

    /// Submits a signed transaction to the block source and marks the notes it spends as pending.
    pub async fn broadcast(&self, raw_transaction: Vec<u8>) -> Result<TxId, LightClientError> {
        let _sync_guard = self.sync_lock.lock().await;
        self.broadcast_inner(raw_transaction).await
    }

    async fn broadcast_inner(&self, raw_transaction: Vec<u8>) -> Result<TxId, LightClientError> {
        let transaction = Transaction::from_bytes(&raw_transaction)?;
        let txid = self.source.send_transaction(raw_transaction).await?;
        if txid != transaction.txid() {
            tracing::warn!(
                "Block source returned txid {} for transaction {}.",
                txid,
                transaction.txid()
            );
        }

        let mut wallet = self.wallet.write().await;
        let marked = mark_pending_spends(&mut wallet, &transaction, transaction.txid());
        persist(&wallet)?;
        tracing::info!(
            "Broadcast transaction {}. {} notes pending spend.",
            transaction.txid(),
            marked
        );

        Ok(transaction.txid())
    }

    /// Plans, signs and broadcasts a payment anchored at the configured anchor offset.
    pub async fn send(
        &self,
        account_id: AccountId,
        recipients: &[Recipient],
        policy: &FundingPolicy,
    ) -> Result<TxId, LightClientError> {
        let _sync_guard = self.sync_lock.lock().await;
        let signed = {
            let wallet = self.wallet.read().await;
            let plan = wallet.create_payment_plan(
                &self.config,
                account_id,
                recipients,
                self.config.default_anchor_offset,
                policy,
            )?;
            wallet.sign_plan(&plan, &LocalProver)?
        };

        self.broadcast_inner(signed.raw).await
    }
}
