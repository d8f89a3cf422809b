//! In-memory block source for tests
//!
//! Blocks are mined on demand. Transactions submitted with [`BlockSource::send_transaction`] wait in the mempool
//! until the next block is mined. Re-orgs replace the top of the chain with new empty blocks.

use std::collections::BTreeSet;
use std::ops::Range;

use blake2b_simd::Params;
use tokio::sync::RwLock;

use testvectors::mock_chain::{BLOCK_INTERVAL, GENESIS_TIME};
use warp_sync::client::{BlockSource, ClientError};
use warp_sync::keys::address::Receiver;
use warp_sync::note_encryption::{encrypt_note, Note};
use warp_sync::primitives::{
    BlockHash, BlockHeight, BlockId, ChainMetadata, CompactBlock, Memo, Nullifier, OutPoint,
    ShieldedProtocol, TreeState, TxId, TxOut,
};
use warp_sync::transaction::{ShieldedOutput, Transaction, TX_VERSION};
use warp_sync::tree::{CommitmentTree, OrchardNode, SaplingNode, TreeNode};

fn hash(personal: &[u8; 16], parts: &[&[u8]]) -> [u8; 32] {
    let mut state = Params::new().hash_length(32).personal(personal).to_state();
    for part in parts {
        state.update(part);
    }
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(state.finalize().as_bytes());

    bytes
}

#[derive(Debug, Clone)]
struct MinedBlock {
    block: CompactBlock,
    transactions: Vec<Transaction>,
    sapling_tree: CommitmentTree<SaplingNode>,
    orchard_tree: CommitmentTree<OrchardNode>,
}

impl MinedBlock {
    fn tree_state(&self) -> TreeState {
        TreeState {
            height: self.block.height,
            hash: self.block.hash,
            time: self.block.time,
            sapling_tree: self.sapling_tree.clone(),
            orchard_tree: self.orchard_tree.clone(),
        }
    }

    fn anchor(&self, protocol: ShieldedProtocol) -> [u8; 32] {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling_tree.root().to_bytes(),
            ShieldedProtocol::Orchard => self.orchard_tree.root().to_bytes(),
        }
    }
}

#[derive(Debug)]
struct ChainState {
    // indexed by height
    blocks: Vec<MinedBlock>,
    mempool: Vec<Transaction>,
    nonce: u32,
    rseed_counter: u64,
    unavailable: bool,
}

impl ChainState {
    fn tip(&self) -> &MinedBlock {
        // the genesis block is never removed
        &self.blocks[self.blocks.len() - 1]
    }

    fn tip_height(&self) -> BlockHeight {
        self.tip().block.height
    }

    fn check_available(&self) -> Result<(), ClientError> {
        if self.unavailable {
            Err(ClientError::Unavailable("mock chain is offline".to_string()))
        } else {
            Ok(())
        }
    }

    fn mine_block(&mut self, transactions: Vec<Transaction>) -> BlockHeight {
        let (height, prev_hash, mut sapling_tree, mut orchard_tree) = match self.blocks.last() {
            Some(previous) => (
                previous.block.height + 1,
                previous.block.hash,
                previous.sapling_tree.clone(),
                previous.orchard_tree.clone(),
            ),
            None => (
                BlockHeight::from_u32(0),
                BlockHash::default(),
                CommitmentTree::empty(),
                CommitmentTree::empty(),
            ),
        };

        let mut vtx = Vec::with_capacity(transactions.len());
        for (index, transaction) in transactions.iter().enumerate() {
            for output in &transaction.shielded_outputs {
                let appended = match output.protocol {
                    ShieldedProtocol::Sapling => {
                        sapling_tree.append(SaplingNode::from_bytes(output.cmx))
                    }
                    ShieldedProtocol::Orchard => {
                        orchard_tree.append(OrchardNode::from_bytes(output.cmx))
                    }
                };
                appended.expect("mock chain trees have room");
            }
            vtx.push(transaction.to_compact(index as u64));
        }

        let height_bytes = u32::from(height).to_le_bytes();
        let nonce_bytes = self.nonce.to_le_bytes();
        let mut parts: Vec<&[u8]> = Vec::new();
        parts.push(&height_bytes);
        parts.push(&prev_hash.0);
        parts.push(&nonce_bytes);
        parts.extend(vtx.iter().map(|tx| tx.txid.0.as_slice()));
        let block_hash = BlockHash::from_bytes(hash(b"Warp_BlockHash__", &parts));

        let chain_metadata = ChainMetadata {
            sapling_commitment_tree_size: sapling_tree.size(),
            orchard_commitment_tree_size: orchard_tree.size(),
        };
        self.blocks.push(MinedBlock {
            block: CompactBlock {
                height,
                hash: block_hash,
                prev_hash,
                time: GENESIS_TIME + u32::from(height) * BLOCK_INTERVAL,
                vtx,
                chain_metadata,
            },
            transactions,
            sapling_tree,
            orchard_tree,
        });

        height
    }

    fn find_transaction(&self, txid: &TxId) -> Option<(&Transaction, BlockHeight)> {
        self.blocks.iter().find_map(|mined| {
            mined
                .transactions
                .iter()
                .find(|transaction| transaction.txid() == *txid)
                .map(|transaction| (transaction, mined.block.height))
        })
    }

    fn all_transactions(&self) -> impl Iterator<Item = &Transaction> + '_ {
        self.blocks
            .iter()
            .flat_map(|mined| mined.transactions.iter())
            .chain(self.mempool.iter())
    }

    fn validate(&self, transaction: &Transaction) -> Result<(), ClientError> {
        let next_height = self.tip_height() + 1;
        if transaction.expiry_height < next_height {
            return Err(ClientError::Rejected(format!(
                "transaction expired at height {}",
                transaction.expiry_height
            )));
        }
        if self
            .all_transactions()
            .any(|other| other.txid() == transaction.txid())
        {
            return Err(ClientError::Rejected("duplicate transaction".to_string()));
        }

        let spent_nullifiers: BTreeSet<Nullifier> = self
            .all_transactions()
            .flat_map(|other| other.shielded_spends.iter().map(|spend| spend.nullifier))
            .collect();
        for spend in &transaction.shielded_spends {
            if spent_nullifiers.contains(&spend.nullifier) {
                return Err(ClientError::Rejected(format!(
                    "nullifier {} already spent",
                    spend.nullifier
                )));
            }
            if !self
                .blocks
                .iter()
                .any(|mined| mined.anchor(spend.protocol) == spend.anchor)
            {
                return Err(ClientError::Rejected("unknown anchor".to_string()));
            }
        }

        let spent_outpoints: BTreeSet<OutPoint> = self
            .all_transactions()
            .flat_map(|other| other.transparent_inputs.iter().map(|input| input.prevout))
            .collect();
        for input in &transaction.transparent_inputs {
            if spent_outpoints.contains(&input.prevout) {
                return Err(ClientError::Rejected(format!(
                    "coin {}:{} already spent",
                    input.prevout.txid, input.prevout.index
                )));
            }
            let exists = self
                .find_transaction(&input.prevout.txid)
                .and_then(|(funding, _)| {
                    funding
                        .transparent_outputs
                        .get(input.prevout.index as usize)
                })
                .is_some_and(|output| output.value == input.value);
            if !exists {
                return Err(ClientError::Rejected(format!(
                    "unknown coin {}:{}",
                    input.prevout.txid, input.prevout.index
                )));
            }
        }

        Ok(())
    }
}

/// Block source backed by an in-memory chain.
///
/// A new chain holds only the genesis block at height 0.
#[derive(Debug)]
pub struct MockChain {
    state: RwLock<ChainState>,
}

impl Default for MockChain {
    fn default() -> Self {
        Self::new()
    }
}

impl MockChain {
    /// Creates a chain with the genesis block.
    pub fn new() -> Self {
        let mut state = ChainState {
            blocks: Vec::new(),
            mempool: Vec::new(),
            nonce: 0,
            rseed_counter: 0,
            unavailable: false,
        };
        state.mine_block(Vec::new());

        MockChain {
            state: RwLock::new(state),
        }
    }

    /// Height of the chain tip.
    pub async fn tip_height(&self) -> BlockHeight {
        self.state.read().await.tip_height()
    }

    /// Mines `count` blocks. The first block includes the mempool. Returns the new tip height.
    pub async fn mine_blocks(&self, count: u32) -> BlockHeight {
        let mut state = self.state.write().await;
        for _ in 0..count {
            let next_height = state.tip_height() + 1;
            let transactions = std::mem::take(&mut state.mempool)
                .into_iter()
                .filter(|transaction| transaction.expiry_height >= next_height)
                .collect();
            state.mine_block(transactions);
        }

        state.tip_height()
    }

    /// Mines blocks until the tip is at `height`.
    pub async fn mine_to(&self, height: BlockHeight) -> BlockHeight {
        let tip = self.tip_height().await;
        if height > tip {
            self.mine_blocks(height - tip).await
        } else {
            tip
        }
    }

    /// Mines a block with a single transaction paying `value` to `receiver` out of thin air.
    ///
    /// Returns the txid of the payment.
    pub async fn mine_payment(&self, receiver: Receiver, value: u64, memo: Memo) -> TxId {
        let mut state = self.state.write().await;
        let next_height = state.tip_height() + 1;

        let mut transaction = Transaction {
            version: TX_VERSION,
            expiry_height: next_height,
            fee: 0,
            transparent_inputs: Vec::new(),
            transparent_outputs: Vec::new(),
            shielded_spends: Vec::new(),
            shielded_outputs: Vec::new(),
        };
        match receiver {
            Receiver::Transparent(address) => {
                transaction
                    .transparent_outputs
                    .push(TxOut { value, address });
            }
            Receiver::Shielded(address) => {
                state.rseed_counter += 1;
                let rseed = hash(
                    b"Warp_MockRseed__",
                    &[&state.rseed_counter.to_le_bytes(), &state.nonce.to_le_bytes()],
                );
                let encrypted = encrypt_note(&Note::from_parts(address, value, rseed), &memo)
                    .expect("mock notes encrypt");
                transaction.shielded_outputs.push(ShieldedOutput {
                    protocol: address.protocol(),
                    cmx: encrypted.cmx,
                    ephemeral_key: encrypted.ephemeral_key,
                    enc_ciphertext: encrypted.enc_ciphertext,
                    memo_ciphertext: encrypted.memo_ciphertext,
                });
            }
        }
        let txid = transaction.txid();
        state.mine_block(vec![transaction]);

        txid
    }

    /// Replaces the blocks from `height` to the tip with the same number of new empty blocks.
    ///
    /// Transactions of the replaced blocks are dropped. The mempool is kept.
    pub async fn reorg(&self, height: BlockHeight) {
        let mut state = self.state.write().await;
        let tip = state.tip_height();
        let keep = u32::from(height).max(1) as usize;
        if keep > state.blocks.len() {
            return;
        }
        state.blocks.truncate(keep);
        state.nonce += 1;
        while state.tip_height() < tip {
            state.mine_block(Vec::new());
        }
    }

    /// Makes every request fail with [`ClientError::Unavailable`] while set.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Transactions waiting in the mempool.
    pub async fn mempool_txids(&self) -> Vec<TxId> {
        self.state
            .read()
            .await
            .mempool
            .iter()
            .map(Transaction::txid)
            .collect()
    }
}

impl BlockSource for MockChain {
    async fn get_latest_block(&self) -> Result<BlockId, ClientError> {
        let state = self.state.read().await;
        state.check_available()?;

        Ok(state.tip().block.block_id())
    }

    async fn get_block_range(
        &self,
        block_range: Range<BlockHeight>,
    ) -> Result<Vec<CompactBlock>, ClientError> {
        let state = self.state.read().await;
        state.check_available()?;

        Ok(state
            .blocks
            .iter()
            .filter(|mined| block_range.contains(&mined.block.height))
            .map(|mined| mined.block.clone())
            .collect())
    }

    async fn get_tree_state(&self, block_height: BlockHeight) -> Result<TreeState, ClientError> {
        let state = self.state.read().await;
        state.check_available()?;

        state
            .blocks
            .get(u32::from(block_height) as usize)
            .map(MinedBlock::tree_state)
            .ok_or_else(|| ClientError::NotFound(format!("no block at height {block_height}")))
    }

    async fn get_transaction(&self, txid: TxId) -> Result<(Transaction, BlockHeight), ClientError> {
        let state = self.state.read().await;
        state.check_available()?;

        state
            .find_transaction(&txid)
            .map(|(transaction, height)| (transaction.clone(), height))
            .ok_or_else(|| ClientError::NotFound(format!("transaction {txid}")))
    }

    async fn get_mempool(&self) -> Result<Vec<Transaction>, ClientError> {
        let state = self.state.read().await;
        state.check_available()?;

        Ok(state.mempool.clone())
    }

    async fn send_transaction(&self, raw_transaction: Vec<u8>) -> Result<TxId, ClientError> {
        let mut state = self.state.write().await;
        state.check_available()?;

        let transaction = Transaction::from_bytes(&raw_transaction)
            .map_err(|e| ClientError::Rejected(e.to_string()))?;
        state.validate(&transaction)?;
        let txid = transaction.txid();
        state.mempool.push(transaction);

        Ok(txid)
    }
}
