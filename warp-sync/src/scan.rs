//! Trial decryption of compact blocks
//!
//! Trial decryption is a pure function of a block and a set of viewing keys, so blocks of a batch are decrypted in
//! parallel and the results are restored to block order before they are applied to the wallet.

use std::collections::BTreeMap;

use crate::keys::shielded::{FullViewingKey, IncomingViewingKey};
use crate::keys::transparent::{TransparentAddress, TransparentAddressId};
use crate::keys::UnifiedFullViewingKey;
use crate::note_encryption::{try_compact_note_decryption, Note};
use crate::primitives::{AccountId, BlockHeight, CompactBlock, ShieldedProtocol, TxId};

/// Viewing key of one account in one shielded pool.
#[derive(Debug, Clone)]
pub struct ScanningKey {
    account_id: AccountId,
    fvk: FullViewingKey,
    ivk: IncomingViewingKey,
}

impl ScanningKey {
    /// Account owning the key
    pub fn account_id(&self) -> AccountId {
        self.account_id
    }

    /// Full viewing key, derives nullifiers of decrypted notes
    pub fn fvk(&self) -> &FullViewingKey {
        &self.fvk
    }

    /// Incoming viewing key, decrypts notes
    pub fn ivk(&self) -> &IncomingViewingKey {
        &self.ivk
    }
}

/// All keys used to detect wallet outputs.
#[derive(Debug, Clone, Default)]
pub struct ScanningKeys {
    sapling: Vec<ScanningKey>,
    orchard: Vec<ScanningKey>,
    transparent: BTreeMap<TransparentAddress, TransparentAddressId>,
}

impl ScanningKeys {
    /// Creates scanning keys from the unified full viewing keys of all accounts.
    pub fn from_account_ufvks(ufvks: &BTreeMap<AccountId, UnifiedFullViewingKey>) -> Self {
        let mut scanning_keys = ScanningKeys::default();
        for (account_id, ufvk) in ufvks {
            for protocol in [ShieldedProtocol::Sapling, ShieldedProtocol::Orchard] {
                if let Some(fvk) = ufvk.fvk(protocol) {
                    let key = ScanningKey {
                        account_id: *account_id,
                        fvk: fvk.clone(),
                        ivk: fvk.to_ivk(),
                    };
                    match protocol {
                        ShieldedProtocol::Sapling => scanning_keys.sapling.push(key),
                        ShieldedProtocol::Orchard => scanning_keys.orchard.push(key),
                    }
                }
            }
        }

        scanning_keys
    }

    /// Adds transparent addresses to detect outputs to.
    pub fn with_transparent_addresses(
        mut self,
        addresses: BTreeMap<TransparentAddressId, TransparentAddress>,
    ) -> Self {
        self.transparent = addresses
            .into_iter()
            .map(|(address_id, address)| (address, address_id))
            .collect();
        self
    }

    /// Viewing keys of the given pool.
    pub fn keys(&self, protocol: ShieldedProtocol) -> &[ScanningKey] {
        match protocol {
            ShieldedProtocol::Sapling => &self.sapling,
            ShieldedProtocol::Orchard => &self.orchard,
        }
    }

    /// Returns the ID of a tracked transparent address.
    pub fn transparent_address_id(
        &self,
        address: &TransparentAddress,
    ) -> Option<TransparentAddressId> {
        self.transparent.get(address).copied()
    }

    /// Returns the viewing key of an account in the given pool.
    pub fn account_key(
        &self,
        account_id: AccountId,
        protocol: ShieldedProtocol,
    ) -> Option<&ScanningKey> {
        self.keys(protocol)
            .iter()
            .find(|key| key.account_id == account_id)
    }

    /// Trial decryption cost of a block. One unit per output and viewing key of the output's pool.
    pub fn block_cost(&self, block: &CompactBlock) -> u64 {
        [ShieldedProtocol::Sapling, ShieldedProtocol::Orchard]
            .into_iter()
            .map(|protocol| (block.output_count(protocol) * self.keys(protocol).len()) as u64)
            .sum()
    }
}

/// Number of leading `blocks` to trial decrypt with `cost` already spent on `blocks_processed` blocks.
///
/// A block is taken while the cost spent before it is below `cost_budget`. The first block of an invocation is always
/// taken, so the decrypted cost never exceeds the budget by more than one block.
pub fn blocks_within_budget(
    blocks: &[CompactBlock],
    keys: &ScanningKeys,
    mut cost: u64,
    mut blocks_processed: u64,
    cost_budget: Option<u64>,
) -> usize {
    let Some(budget) = cost_budget else {
        return blocks.len();
    };

    let mut count = 0;
    for block in blocks {
        if blocks_processed > 0 && cost >= budget {
            break;
        }
        cost = cost.saturating_add(keys.block_cost(block));
        blocks_processed += 1;
        count += 1;
    }

    count
}

/// Note decrypted from a compact output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptedNote {
    /// Transaction containing the output
    pub txid: TxId,
    /// Account the note belongs to
    pub account_id: AccountId,
    /// Decrypted note
    pub note: Note,
}

/// Trial decryption results of one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptedBlock {
    /// Height of the block
    pub height: BlockHeight,
    /// Decrypted notes keyed by transaction index in the block and output index in the transaction
    pub notes: BTreeMap<(usize, usize), DecryptedNote>,
    /// Trial decryption cost of the block
    pub cost: u64,
}

/// Trial decrypts every shielded output of a block with every viewing key of the output's pool.
pub fn trial_decrypt_block(block: &CompactBlock, keys: &ScanningKeys) -> DecryptedBlock {
    let mut notes = BTreeMap::new();

    for (tx_index, transaction) in block.vtx.iter().enumerate() {
        for (output_index, output) in transaction.outputs.iter().enumerate() {
            let decrypted = keys.keys(output.protocol).iter().find_map(|key| {
                try_compact_note_decryption(&key.ivk, output).map(|note| DecryptedNote {
                    txid: transaction.txid,
                    account_id: key.account_id,
                    note,
                })
            });
            if let Some(decrypted) = decrypted {
                notes.insert((tx_index, output_index), decrypted);
            }
        }
    }

    DecryptedBlock {
        height: block.height,
        notes,
        cost: keys.block_cost(block),
    }
}

/// Trial decrypts a batch of blocks in parallel. Results are returned in block order.
pub fn trial_decrypt_batch(blocks: &[CompactBlock], keys: &ScanningKeys) -> Vec<DecryptedBlock> {
    let (sender, receiver) = crossbeam_channel::unbounded();
    rayon::scope_fifo(|scope| {
        for (index, block) in blocks.iter().enumerate() {
            let sender = sender.clone();
            scope.spawn_fifo(move |_scope| {
                // receiver outlives the scope
                let _ = sender.send((index, trial_decrypt_block(block, keys)));
            })
        }
    });
    drop(sender);

    let mut decrypted_blocks: Vec<(usize, DecryptedBlock)> = receiver.iter().collect();
    decrypted_blocks.sort_by_key(|(index, _)| *index);

    decrypted_blocks
        .into_iter()
        .map(|(_, decrypted_block)| decrypted_block)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::UnifiedSpendingKey;
    use crate::note_encryption::encrypt_note;
    use crate::primitives::{BlockHash, ChainMetadata, CompactOutput, CompactTx, Memo};

    fn ufvk(account: u32) -> UnifiedFullViewingKey {
        UnifiedSpendingKey::from_seed(&[7u8; 32], account)
            .unwrap()
            .to_unified_full_viewing_key()
            .unwrap()
    }

    fn output(ufvk: &UnifiedFullViewingKey, protocol: ShieldedProtocol, value: u64) -> CompactOutput {
        let recipient = ufvk.fvk(protocol).unwrap().default_address();
        let encrypted =
            encrypt_note(&Note::from_parts(recipient, value, [value as u8; 32]), &Memo::Empty)
                .unwrap();
        CompactOutput {
            protocol,
            cmx: encrypted.cmx,
            ephemeral_key: encrypted.ephemeral_key,
            ciphertext: encrypted.enc_ciphertext,
        }
    }

    fn block(height: u32, outputs: Vec<CompactOutput>) -> CompactBlock {
        CompactBlock {
            height: BlockHeight::from_u32(height),
            hash: BlockHash::from_bytes([height as u8; 32]),
            prev_hash: BlockHash::from_bytes([height as u8 - 1; 32]),
            time: 0,
            vtx: vec![CompactTx {
                index: 0,
                txid: TxId::from_bytes([height as u8; 32]),
                spends: Vec::new(),
                outputs,
                vin: Vec::new(),
                vout: Vec::new(),
            }],
            chain_metadata: ChainMetadata::default(),
        }
    }

    #[test]
    fn decrypts_outputs_of_tracked_accounts() {
        let ufvks = BTreeMap::from([(AccountId::ZERO, ufvk(0)), (AccountId::from_index(1), ufvk(1))]);
        let keys = ScanningKeys::from_account_ufvks(&ufvks);
        let stranger = ufvk(9);
        let block = block(
            10,
            vec![
                output(&stranger, ShieldedProtocol::Orchard, 5),
                output(&ufvks[&AccountId::from_index(1)], ShieldedProtocol::Orchard, 50),
                output(&ufvks[&AccountId::ZERO], ShieldedProtocol::Sapling, 70),
            ],
        );

        let decrypted = trial_decrypt_block(&block, &keys);
        assert_eq!(decrypted.notes.len(), 2);
        assert_eq!(decrypted.notes[&(0, 1)].account_id, AccountId::from_index(1));
        assert_eq!(decrypted.notes[&(0, 1)].note.value(), 50);
        assert_eq!(decrypted.notes[&(0, 2)].account_id, AccountId::ZERO);
        assert_eq!(decrypted.cost, 6);
    }

    #[test]
    fn batch_results_keep_block_order() {
        let ufvks = BTreeMap::from([(AccountId::ZERO, ufvk(0))]);
        let keys = ScanningKeys::from_account_ufvks(&ufvks);
        let blocks: Vec<CompactBlock> = (1..40)
            .map(|height| {
                block(
                    height,
                    vec![output(&ufvks[&AccountId::ZERO], ShieldedProtocol::Orchard, height as u64)],
                )
            })
            .collect();

        let decrypted = trial_decrypt_batch(&blocks, &keys);
        let heights: Vec<u32> = decrypted.iter().map(|block| u32::from(block.height)).collect();
        assert_eq!(heights, (1..40).collect::<Vec<u32>>());
        assert!(decrypted
            .iter()
            .all(|block| block.notes[&(0, 0)].note.value() == u64::from(u32::from(block.height))));
    }

    #[test]
    fn budget_limits_decrypted_blocks() {
        let ufvks = BTreeMap::from([(AccountId::ZERO, ufvk(0))]);
        let keys = ScanningKeys::from_account_ufvks(&ufvks);
        let ufvk = &ufvks[&AccountId::ZERO];
        let blocks: Vec<CompactBlock> = (1..=10)
            .map(|height| {
                let outputs = (0..height % 3)
                    .map(|_| output(ufvk, ShieldedProtocol::Orchard, 1))
                    .collect();
                block(height, outputs)
            })
            .collect();
        let max_block_cost = blocks.iter().map(|block| keys.block_cost(block)).max().unwrap();

        for budget in 0..12 {
            let count = blocks_within_budget(&blocks, &keys, 0, 0, Some(budget));
            assert!(count >= 1);
            let decrypted_cost: u64 = trial_decrypt_batch(&blocks[..count], &keys)
                .iter()
                .map(|block| block.cost)
                .sum();
            assert!(decrypted_cost <= budget + max_block_cost, "budget {budget}");
        }
        assert_eq!(blocks_within_budget(&blocks, &keys, 0, 0, None), blocks.len());
        // costs 1 and 2 are spent after the first two blocks
        assert_eq!(blocks_within_budget(&blocks, &keys, 0, 0, Some(3)), 2);
        assert_eq!(blocks_within_budget(&blocks, &keys, 5, 1, Some(5)), 0);
    }
}
