//! Module for detecting spends of wallet notes and updating their spend status

use std::collections::{BTreeMap, HashMap};

use crate::primitives::{
    BlockHeight, CompactBlock, NoteId, NoteStatus, Nullifier, OutPoint, WalletNote,
    WalletTransaction,
};
use crate::traits::{SyncCommitmentTrees, SyncNotes, SyncTransactions};

/// Nullifiers and outpoints of wallet notes that may still be spent on chain.
#[derive(Debug, Default)]
pub(crate) struct SpendIndex {
    nullifiers: HashMap<Nullifier, NoteId>,
    outpoints: HashMap<OutPoint, NoteId>,
}

impl SpendIndex {
    /// Indexes all notes that are not yet spent by a mined transaction.
    pub(crate) fn from_notes(notes: &BTreeMap<NoteId, WalletNote>) -> Self {
        let mut spend_index = SpendIndex::default();
        notes
            .values()
            .filter(|note| !matches!(note.status(), NoteStatus::Spent { .. }))
            .for_each(|note| spend_index.insert(note));

        spend_index
    }

    pub(crate) fn insert(&mut self, note: &WalletNote) {
        match note.id() {
            NoteId::Shielded { .. } => {
                if let Some(nullifier) = note.nullifier() {
                    self.nullifiers.insert(nullifier, note.id());
                }
            }
            NoteId::Transparent(outpoint) => {
                self.outpoints.insert(outpoint, note.id());
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.nullifiers.is_empty() && self.outpoints.is_empty()
    }

    fn remove_nullifier(&mut self, nullifier: &Nullifier) -> Option<NoteId> {
        self.nullifiers.remove(nullifier)
    }

    fn remove_outpoint(&mut self, outpoint: &OutPoint) -> Option<NoteId> {
        self.outpoints.remove(outpoint)
    }
}

/// Collects the wallet notes spent in `block`. Matched notes are removed from the spend index.
pub(crate) fn collect_spends(
    block: &CompactBlock,
    spend_index: &mut SpendIndex,
) -> Vec<(usize, NoteId)> {
    if spend_index.is_empty() {
        return Vec::new();
    }

    let mut spends = Vec::new();
    for (tx_index, transaction) in block.vtx.iter().enumerate() {
        for spend in &transaction.spends {
            if let Some(note_id) = spend_index.remove_nullifier(&spend.nf) {
                spends.push((tx_index, note_id));
            }
        }
        for prevout in &transaction.vin {
            if let Some(note_id) = spend_index.remove_outpoint(prevout) {
                spends.push((tx_index, note_id));
            }
        }
    }

    spends
}

/// Marks notes spent in `block` as spent, stops tracking their witnesses and records the spending transactions.
pub(crate) fn update_spent_notes<W>(
    wallet: &mut W,
    block: &CompactBlock,
    spend_index: &mut SpendIndex,
) -> Result<(), W::Error>
where
    W: SyncNotes + SyncTransactions + SyncCommitmentTrees,
{
    for (tx_index, note_id) in collect_spends(block, spend_index) {
        let txid = block.vtx[tx_index].txid;
        if let Some(note) = wallet.get_notes_mut()?.get_mut(&note_id) {
            tracing::debug!("Note {:?} spent in transaction {}.", note_id, txid);
            note.set_status(NoteStatus::Spent {
                txid,
                height: block.height,
            });
        }
        if let NoteId::Shielded { protocol, position } = note_id {
            wallet
                .get_commitment_trees_mut()?
                .remove_witness(protocol, position);
        }
        wallet
            .get_wallet_transactions_mut()?
            .entry(txid)
            .or_insert_with(|| WalletTransaction::new(txid, block.height, block.time))
            .spent_notes_mut()
            .push(note_id);
    }

    Ok(())
}

/// Reverts notes pending a spend whose transaction expired before `height` to unspent.
pub(crate) fn expire_pending_spends(notes: &mut BTreeMap<NoteId, WalletNote>, height: BlockHeight) {
    for note in notes.values_mut() {
        if let NoteStatus::PendingSpend { txid, expiry_height } = note.status() {
            if expiry_height < height {
                tracing::debug!("Pending spend {} expired at height {}.", txid, expiry_height);
                note.set_status(NoteStatus::Unspent);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::transparent::TransparentAddress;
    use crate::primitives::{
        AccountId, BlockHash, ChainMetadata, CompactSpend, CompactTx, NoteData, ShieldedProtocol,
        TxId,
    };

    fn shielded_note(position: u64, nullifier: u8, status: NoteStatus) -> WalletNote {
        let mut note = WalletNote::from_parts(
            NoteId::Shielded {
                protocol: ShieldedProtocol::Orchard,
                position,
            },
            AccountId::ZERO,
            100,
            BlockHeight::from_u32(10),
            TxId::from_bytes([1; 32]),
            NoteData::Shielded {
                recipient: [0; 32],
                rseed: [0; 32],
                cmx: [0; 32],
                nullifier: Nullifier::from_bytes([nullifier; 32]),
            },
        );
        note.set_status(status);
        note
    }

    fn transparent_note(outpoint: OutPoint) -> WalletNote {
        WalletNote::from_parts(
            NoteId::Transparent(outpoint),
            AccountId::ZERO,
            100,
            BlockHeight::from_u32(10),
            outpoint.txid,
            NoteData::Transparent {
                address: TransparentAddress([3; 20]),
                address_index: 0,
            },
        )
    }

    #[test]
    fn collects_nullifier_and_outpoint_spends() {
        let outpoint = OutPoint {
            txid: TxId::from_bytes([5; 32]),
            index: 1,
        };
        let notes: BTreeMap<NoteId, WalletNote> = [
            shielded_note(0, 7, NoteStatus::Unspent),
            shielded_note(
                1,
                8,
                NoteStatus::Spent {
                    txid: TxId::from_bytes([2; 32]),
                    height: BlockHeight::from_u32(11),
                },
            ),
            transparent_note(outpoint),
        ]
        .into_iter()
        .map(|note| (note.id(), note))
        .collect();
        let mut spend_index = SpendIndex::from_notes(&notes);

        let block = CompactBlock {
            height: BlockHeight::from_u32(12),
            hash: BlockHash::from_bytes([12; 32]),
            prev_hash: BlockHash::from_bytes([11; 32]),
            time: 0,
            vtx: vec![CompactTx {
                index: 0,
                txid: TxId::from_bytes([9; 32]),
                spends: vec![
                    CompactSpend {
                        protocol: ShieldedProtocol::Orchard,
                        nf: Nullifier::from_bytes([7; 32]),
                    },
                    CompactSpend {
                        protocol: ShieldedProtocol::Orchard,
                        nf: Nullifier::from_bytes([8; 32]),
                    },
                ],
                outputs: Vec::new(),
                vin: vec![outpoint],
                vout: Vec::new(),
            }],
            chain_metadata: ChainMetadata::default(),
        };

        let spends = collect_spends(&block, &mut spend_index);
        assert_eq!(
            spends,
            vec![
                (
                    0,
                    NoteId::Shielded {
                        protocol: ShieldedProtocol::Orchard,
                        position: 0
                    }
                ),
                (0, NoteId::Transparent(outpoint)),
            ]
        );
        assert!(spend_index.is_empty());
    }

    #[test]
    fn expired_pending_spends_revert() {
        let pending = |expiry: u32| NoteStatus::PendingSpend {
            txid: TxId::from_bytes([4; 32]),
            expiry_height: BlockHeight::from_u32(expiry),
        };
        let mut notes: BTreeMap<NoteId, WalletNote> = [
            shielded_note(0, 1, pending(20)),
            shielded_note(1, 2, pending(25)),
        ]
        .into_iter()
        .map(|note| (note.id(), note))
        .collect();

        expire_pending_spends(&mut notes, BlockHeight::from_u32(21));
        let statuses: Vec<NoteStatus> = notes.values().map(|note| note.status()).collect();
        assert_eq!(statuses, vec![NoteStatus::Unspent, pending(25)]);
    }
}
