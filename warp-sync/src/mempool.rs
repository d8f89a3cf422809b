//! Mempool monitor
//!
//! Polls the unconfirmed transaction set of the block source and records the provisional effect of each transaction
//! on account balances. Entries are never merged into wallet notes and are rebuilt from scratch on every poll.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use getset::{CopyGetters, Getters};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{BlockSource, ClientError};
use crate::note_encryption::try_compact_note_decryption;
use crate::primitives::{
    AccountId, BlockId, MempoolEntry, NoteId, NoteStatus, Nullifier, OutPoint, PoolType,
    WalletNote,
};
use crate::scan::ScanningKeys;
use crate::transaction::Transaction;

/// Value and owner of a wallet note that a mempool transaction may spend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SpendableValue {
    account_id: AccountId,
    pool: PoolType,
    value: u64,
}

/// Nullifiers and outpoints of wallet notes not yet spent on chain.
#[derive(Debug, Clone, Default)]
pub struct UnspentIndex {
    nullifiers: HashMap<Nullifier, SpendableValue>,
    outpoints: HashMap<OutPoint, SpendableValue>,
}

impl UnspentIndex {
    /// Indexes unspent notes and notes pending a spend.
    pub fn from_notes<'a>(notes: impl IntoIterator<Item = &'a WalletNote>) -> Self {
        let mut index = UnspentIndex::default();
        for note in notes {
            if matches!(note.status(), NoteStatus::Spent { .. }) {
                continue;
            }
            let spendable = SpendableValue {
                account_id: note.account_id(),
                pool: note.pool(),
                value: note.value(),
            };
            match note.id() {
                NoteId::Shielded { .. } => {
                    if let Some(nullifier) = note.nullifier() {
                        index.nullifiers.insert(nullifier, spendable);
                    }
                }
                NoteId::Transparent(outpoint) => {
                    index.outpoints.insert(outpoint, spendable);
                }
            }
        }

        index
    }
}

/// Wallet data the mempool monitor reads at each poll.
pub trait MempoolWallet: Send + Sync + 'static {
    /// Returns the current scanning keys and unspent notes, or `None` if the wallet has no accounts.
    fn scanning_data(&self) -> impl Future<Output = Option<(ScanningKeys, UnspentIndex)>> + Send;
}

/// Computes the provisional balance deltas of unconfirmed transactions.
///
/// Received outputs add to the receiving account and spends of wallet notes subtract from the owning account. One
/// entry is produced per transaction, account and pool with a non-zero delta.
pub fn scan_mempool(
    transactions: &[Transaction],
    keys: &ScanningKeys,
    unspent: &UnspentIndex,
) -> Vec<MempoolEntry> {
    let mut entries = Vec::new();

    for transaction in transactions {
        let txid = transaction.txid();
        let compact = transaction.to_compact(0);
        let mut deltas: BTreeMap<(AccountId, PoolType), i64> = BTreeMap::new();

        for output in &compact.outputs {
            let received = keys.keys(output.protocol).iter().find_map(|key| {
                try_compact_note_decryption(key.ivk(), output)
                    .map(|note| (key.account_id(), note.value()))
            });
            if let Some((account_id, value)) = received {
                let delta = deltas
                    .entry((account_id, PoolType::Shielded(output.protocol)))
                    .or_default();
                *delta = delta.saturating_add(signed_value(value));
            }
        }
        for output in &compact.vout {
            if let Some(address_id) = keys.transparent_address_id(&output.address) {
                let delta = deltas
                    .entry((address_id.account_id(), PoolType::Transparent))
                    .or_default();
                *delta = delta.saturating_add(signed_value(output.value));
            }
        }
        let spent = compact
            .spends
            .iter()
            .filter_map(|spend| unspent.nullifiers.get(&spend.nf))
            .chain(
                compact
                    .vin
                    .iter()
                    .filter_map(|prevout| unspent.outpoints.get(prevout)),
            );
        for spendable in spent {
            let delta = deltas
                .entry((spendable.account_id, spendable.pool))
                .or_default();
            *delta = delta.saturating_sub(signed_value(spendable.value));
        }

        entries.extend(
            deltas
                .into_iter()
                .filter(|(_, value_delta)| *value_delta != 0)
                .map(|((account_id, pool), value_delta)| MempoolEntry {
                    txid,
                    account_id,
                    pool,
                    value_delta,
                }),
        );
    }

    entries
}

// values above i64::MAX clamp
fn signed_value(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Provisional mempool entries as of the last poll.
#[derive(Debug, Clone, Default, Getters, CopyGetters)]
pub struct MempoolState {
    /// Chain tip observed at the last poll
    #[getset(get_copy = "pub")]
    chain_tip: Option<BlockId>,
    /// Entries of the last poll
    #[getset(get = "pub")]
    entries: Vec<MempoolEntry>,
}

impl MempoolState {
    /// Discards all provisional entries.
    pub fn reset(&mut self) {
        self.entries.clear();
    }

    /// Sums provisional deltas per account and pool.
    pub fn deltas(&self) -> BTreeMap<(AccountId, PoolType), i64> {
        let mut deltas: BTreeMap<(AccountId, PoolType), i64> = BTreeMap::new();
        for entry in &self.entries {
            let delta = deltas.entry((entry.account_id, entry.pool)).or_default();
            *delta = delta.saturating_add(entry.value_delta);
        }

        deltas
    }
}

/// Handle to a running mempool monitor task.
#[derive(Debug)]
pub struct MempoolMonitor {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl MempoolMonitor {
    /// Spawns a task polling the mempool of `source` every `poll_interval` until `cancel` is triggered.
    pub fn spawn<S, M>(
        source: Arc<S>,
        wallet: Arc<M>,
        state: Arc<RwLock<MempoolState>>,
        poll_interval: Duration,
        cancel: CancellationToken,
    ) -> Self
    where
        S: BlockSource,
        M: MempoolWallet,
    {
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move {
            tracing::info!("Mempool monitor started.");
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    _ = interval.tick() => (),
                }
                if let Err(e) = poll_mempool(source.as_ref(), wallet.as_ref(), &state).await {
                    tracing::warn!("Mempool poll failed. {}", e);
                }
            }
            tracing::info!("Mempool monitor stopped.");
        });

        MempoolMonitor { cancel, handle }
    }

    /// Returns true if the monitor task has stopped.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the monitor and waits for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("Mempool monitor task failed. {}", e);
        }
    }
}

/// Polls the mempool once and replaces the provisional entries.
///
/// All entries are dropped when the chain tip changes. Entries scanned against a chain tip that changed during the
/// poll are discarded.
pub async fn poll_mempool<S, M>(
    source: &S,
    wallet: &M,
    state: &RwLock<MempoolState>,
) -> Result<(), ClientError>
where
    S: BlockSource,
    M: MempoolWallet,
{
    let chain_tip = source.get_latest_block().await?;
    {
        let mut state = state.write().await;
        if state.chain_tip != Some(chain_tip) {
            if state.chain_tip.is_some() {
                tracing::debug!("New block at height {}. Mempool reset.", chain_tip.height);
            }
            state.chain_tip = Some(chain_tip);
            state.reset();
        }
    }

    let Some((keys, unspent)) = wallet.scanning_data().await else {
        return Ok(());
    };
    let transactions = source.get_mempool().await?;
    let entries = scan_mempool(&transactions, &keys, &unspent);
    tracing::debug!(
        "Mempool poll found {} entries in {} transactions.",
        entries.len(),
        transactions.len()
    );

    let mut state = state.write().await;
    if state.chain_tip == Some(chain_tip) {
        state.entries = entries;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::UnifiedSpendingKey;
    use crate::note_encryption::{encrypt_note, Note};
    use crate::primitives::{BlockHeight, Memo, NoteData, ShieldedProtocol, TxId};
    use crate::transaction::{ShieldedOutput, ShieldedSpend, TX_VERSION};

    fn keys() -> (ScanningKeys, UnifiedSpendingKey) {
        let usk = UnifiedSpendingKey::from_seed(&[3u8; 32], 0).unwrap();
        let ufvk = usk.to_unified_full_viewing_key().unwrap();
        (
            ScanningKeys::from_account_ufvks(&BTreeMap::from([(AccountId::ZERO, ufvk)])),
            usk,
        )
    }

    fn output_to(usk: &UnifiedSpendingKey, value: u64) -> ShieldedOutput {
        let recipient = usk
            .to_unified_full_viewing_key()
            .unwrap()
            .fvk(ShieldedProtocol::Orchard)
            .unwrap()
            .default_address();
        let encrypted =
            encrypt_note(&Note::from_parts(recipient, value, [9; 32]), &Memo::Empty).unwrap();
        ShieldedOutput {
            protocol: ShieldedProtocol::Orchard,
            cmx: encrypted.cmx,
            ephemeral_key: encrypted.ephemeral_key,
            enc_ciphertext: encrypted.enc_ciphertext,
            memo_ciphertext: encrypted.memo_ciphertext,
        }
    }

    #[test]
    fn spend_with_change_nets_to_negative_delta() {
        let (keys, usk) = keys();
        let nullifier = Nullifier::from_bytes([42; 32]);
        let note = WalletNote::from_parts(
            NoteId::Shielded {
                protocol: ShieldedProtocol::Orchard,
                position: 3,
            },
            AccountId::ZERO,
            1_000,
            BlockHeight::from_u32(50),
            TxId::from_bytes([1; 32]),
            NoteData::Shielded {
                recipient: [0; 32],
                rseed: [0; 32],
                cmx: [0; 32],
                nullifier,
            },
        );
        let unspent = UnspentIndex::from_notes([&note]);
        let transaction = Transaction {
            version: TX_VERSION,
            expiry_height: BlockHeight::from_u32(90),
            fee: 10,
            transparent_inputs: Vec::new(),
            transparent_outputs: Vec::new(),
            shielded_spends: vec![ShieldedSpend {
                protocol: ShieldedProtocol::Orchard,
                anchor: [0; 32],
                nullifier,
                ak: Vec::new(),
                proof: Vec::new(),
                spend_auth_sig: Vec::new(),
            }],
            shielded_outputs: vec![output_to(&usk, 590)],
        };

        let entries = scan_mempool(&[transaction.clone()], &keys, &unspent);
        assert_eq!(
            entries,
            vec![MempoolEntry {
                txid: transaction.txid(),
                account_id: AccountId::ZERO,
                pool: PoolType::Shielded(ShieldedProtocol::Orchard),
                value_delta: -410,
            }]
        );
    }

    #[test]
    fn unrelated_transactions_produce_no_entries() {
        let (keys, _) = keys();
        let stranger = UnifiedSpendingKey::from_seed(&[4u8; 32], 0).unwrap();
        let transaction = Transaction {
            version: TX_VERSION,
            expiry_height: BlockHeight::from_u32(90),
            fee: 10,
            transparent_inputs: Vec::new(),
            transparent_outputs: Vec::new(),
            shielded_spends: Vec::new(),
            shielded_outputs: vec![output_to(&stranger, 25)],
        };

        assert!(scan_mempool(&[transaction], &keys, &UnspentIndex::default()).is_empty());
    }

    #[test]
    fn deltas_sum_per_account_and_pool() {
        let pool = PoolType::Shielded(ShieldedProtocol::Sapling);
        let entry = |txid: u8, value_delta: i64| MempoolEntry {
            txid: TxId::from_bytes([txid; 32]),
            account_id: AccountId::ZERO,
            pool,
            value_delta,
        };
        let state = MempoolState {
            chain_tip: None,
            entries: vec![entry(1, 50), entry(2, -20)],
        };

        assert_eq!(state.deltas(), BTreeMap::from([((AccountId::ZERO, pool), 30)]));
    }

    #[test]
    fn deltas_saturate_instead_of_wrapping() {
        let pool = PoolType::Shielded(ShieldedProtocol::Orchard);
        let entry = |txid: u8, value_delta: i64| MempoolEntry {
            txid: TxId::from_bytes([txid; 32]),
            account_id: AccountId::ZERO,
            pool,
            value_delta,
        };
        let state = MempoolState {
            chain_tip: None,
            entries: vec![entry(1, i64::MAX), entry(2, i64::MAX), entry(3, 1)],
        };
        assert_eq!(state.deltas()[&(AccountId::ZERO, pool)], i64::MAX);

        let state = MempoolState {
            chain_tip: None,
            entries: vec![entry(1, i64::MIN), entry(2, -1)],
        };
        assert_eq!(state.deltas()[&(AccountId::ZERO, pool)], i64::MIN);

        assert_eq!(signed_value(u64::MAX), i64::MAX);
        assert_eq!(signed_value(410), 410);
    }
}
