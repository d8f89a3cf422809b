//! Module for primitive structs associated with the sync engine

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{Add, Sub};

use getset::{CopyGetters, Getters, MutGetters, Setters};
use serde::{Deserialize, Serialize};

use crate::keys::transparent::TransparentAddress;
use crate::tree::{CommitmentTree, OrchardNode, SaplingNode};
use crate::utils::vec_map;

/// Height of a block in the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockHeight(u32);

impl BlockHeight {
    pub const fn from_u32(height: u32) -> Self {
        BlockHeight(height)
    }

    pub fn saturating_sub(self, rhs: u32) -> Self {
        BlockHeight(self.0.saturating_sub(rhs))
    }
}

impl From<u32> for BlockHeight {
    fn from(height: u32) -> Self {
        BlockHeight(height)
    }
}

impl From<BlockHeight> for u32 {
    fn from(height: BlockHeight) -> Self {
        height.0
    }
}

impl From<BlockHeight> for u64 {
    fn from(height: BlockHeight) -> Self {
        height.0 as u64
    }
}

impl Add<u32> for BlockHeight {
    type Output = BlockHeight;

    fn add(self, rhs: u32) -> Self::Output {
        BlockHeight(self.0 + rhs)
    }
}

impl Sub<u32> for BlockHeight {
    type Output = BlockHeight;

    fn sub(self, rhs: u32) -> Self::Output {
        BlockHeight(self.0.saturating_sub(rhs))
    }
}

impl Sub<BlockHeight> for BlockHeight {
    type Output = u32;

    fn sub(self, rhs: BlockHeight) -> Self::Output {
        self.0.saturating_sub(rhs.0)
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! hash_newtype {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            pub const fn from_bytes(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }
        }

        impl AsRef<[u8; 32]> for $name {
            fn as_ref(&self) -> &[u8; 32] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

hash_newtype!(BlockHash, "Hash of a block header.");
hash_newtype!(TxId, "Transaction id.");
hash_newtype!(Nullifier, "Nullifier revealed when a shielded note is spent.");

/// A shielded value pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShieldedProtocol {
    /// The first generation shielded pool
    Sapling,
    /// The second generation shielded pool
    Orchard,
}

/// A value pool. One transparent pool and two shielded pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PoolType {
    /// Transparent pool
    Transparent,
    /// Shielded pool
    Shielded(ShieldedProtocol),
}

impl PoolType {
    pub const TRANSPARENT: PoolType = PoolType::Transparent;
    pub const SAPLING: PoolType = PoolType::Shielded(ShieldedProtocol::Sapling);
    pub const ORCHARD: PoolType = PoolType::Shielded(ShieldedProtocol::Orchard);

    /// All pools in index order.
    pub const ALL: [PoolType; 3] = [Self::TRANSPARENT, Self::SAPLING, Self::ORCHARD];

    /// Index of the pool in per-pool arrays.
    pub fn index(&self) -> usize {
        match self {
            PoolType::Transparent => 0,
            PoolType::Shielded(ShieldedProtocol::Sapling) => 1,
            PoolType::Shielded(ShieldedProtocol::Orchard) => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn is_shielded(&self) -> bool {
        matches!(self, PoolType::Shielded(_))
    }
}

impl From<ShieldedProtocol> for PoolType {
    fn from(protocol: ShieldedProtocol) -> Self {
        PoolType::Shielded(protocol)
    }
}

impl fmt::Display for PoolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolType::Transparent => f.write_str("Transparent"),
            PoolType::Shielded(ShieldedProtocol::Sapling) => f.write_str("Sapling"),
            PoolType::Shielded(ShieldedProtocol::Orchard) => f.write_str("Orchard"),
        }
    }
}

/// Values indexed by pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolValues(pub [u64; 3]);

impl PoolValues {
    pub fn get(&self, pool: PoolType) -> u64 {
        self.0[pool.index()]
    }

    pub fn get_mut(&mut self, pool: PoolType) -> &mut u64 {
        &mut self.0[pool.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }
}

impl Add for PoolValues {
    type Output = PoolValues;

    fn add(self, rhs: Self) -> Self::Output {
        PoolValues([self.0[0] + rhs.0[0], self.0[1] + rhs.0[1], self.0[2] + rhs.0[2]])
    }
}

impl Sub for PoolValues {
    type Output = PoolValues;

    fn sub(self, rhs: Self) -> Self::Output {
        PoolValues([
            self.0[0].saturating_sub(rhs.0[0]),
            self.0[1].saturating_sub(rhs.0[1]),
            self.0[2].saturating_sub(rhs.0[2]),
        ])
    }
}

/// Height and hash of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    pub height: BlockHeight,
    pub hash: BlockHash,
}

/// Reference to a transparent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutPoint {
    pub txid: TxId,
    pub index: u32,
}

/// Transparent output. Only pay-to-public-key-hash outputs are supported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOut {
    pub value: u64,
    pub address: TransparentAddress,
}

/// Compact representation of a shielded spend. Only the revealed nullifier is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactSpend {
    pub protocol: ShieldedProtocol,
    pub nf: Nullifier,
}

/// Compact representation of a shielded output, enough for trial decryption and tree updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactOutput {
    pub protocol: ShieldedProtocol,
    pub cmx: [u8; 32],
    pub ephemeral_key: [u8; 32],
    pub ciphertext: Vec<u8>,
}

/// Compact representation of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactTx {
    /// Index of the transaction within the block
    pub index: u64,
    pub txid: TxId,
    pub spends: Vec<CompactSpend>,
    pub outputs: Vec<CompactOutput>,
    pub vin: Vec<OutPoint>,
    pub vout: Vec<TxOut>,
}

/// Commitment tree sizes at the end of a block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainMetadata {
    pub sapling_commitment_tree_size: u64,
    pub orchard_commitment_tree_size: u64,
}

/// Compact block as served by the block source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactBlock {
    pub height: BlockHeight,
    pub hash: BlockHash,
    pub prev_hash: BlockHash,
    pub time: u32,
    pub vtx: Vec<CompactTx>,
    pub chain_metadata: ChainMetadata,
}

impl CompactBlock {
    pub fn block_id(&self) -> BlockId {
        BlockId {
            height: self.height,
            hash: self.hash,
        }
    }

    /// Number of shielded outputs in the block for the given protocol.
    pub fn output_count(&self, protocol: ShieldedProtocol) -> usize {
        self.vtx
            .iter()
            .flat_map(|tx| tx.outputs.iter())
            .filter(|output| output.protocol == protocol)
            .count()
    }
}

/// Commitment tree frontiers at the end of a block, used to start scanning from a wallet birthday.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeState {
    pub height: BlockHeight,
    pub hash: BlockHash,
    pub time: u32,
    pub sapling_tree: CommitmentTree<SaplingNode>,
    pub orchard_tree: CommitmentTree<OrchardNode>,
}

/// Index of an account in the wallet's account table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(u32);

impl AccountId {
    pub const ZERO: AccountId = AccountId(0);

    pub const fn from_index(index: u32) -> Self {
        AccountId(index)
    }

    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique reference to a note. Shielded notes are keyed by their position in the pool's commitment tree and
/// transparent coins by their outpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NoteId {
    Shielded {
        protocol: ShieldedProtocol,
        position: u64,
    },
    Transparent(OutPoint),
}

impl NoteId {
    pub fn pool(&self) -> PoolType {
        match self {
            NoteId::Shielded { protocol, .. } => PoolType::Shielded(*protocol),
            NoteId::Transparent(_) => PoolType::Transparent,
        }
    }
}

/// Spend status of a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteStatus {
    /// Not spent
    Unspent,
    /// Spent by a broadcast transaction that is not yet mined
    PendingSpend {
        txid: TxId,
        expiry_height: BlockHeight,
    },
    /// Spent by a mined transaction
    Spent { txid: TxId, height: BlockHeight },
}

/// Plaintext memo attached to a shielded output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Memo {
    Empty,
    Text(String),
    Arbitrary(Vec<u8>),
}

pub const MEMO_SIZE: usize = 512;

impl Memo {
    pub fn to_bytes(&self) -> [u8; MEMO_SIZE] {
        let mut bytes = [0u8; MEMO_SIZE];
        match self {
            Memo::Empty => bytes[0] = 0xF6,
            Memo::Text(text) => {
                let text = text.as_bytes();
                let len = text.len().min(MEMO_SIZE);
                bytes[..len].copy_from_slice(&text[..len]);
            }
            Memo::Arbitrary(data) => {
                bytes[0] = 0xFF;
                let len = data.len().min(MEMO_SIZE - 1);
                bytes[1..len + 1].copy_from_slice(&data[..len]);
            }
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Memo {
        match bytes.first() {
            None => Memo::Empty,
            Some(0xF6) if bytes[1..].iter().all(|b| *b == 0) => Memo::Empty,
            Some(first) if *first <= 0xF4 => {
                let end = bytes
                    .iter()
                    .rposition(|b| *b != 0)
                    .map_or(0, |position| position + 1);
                match String::from_utf8(bytes[..end].to_vec()) {
                    Ok(text) => Memo::Text(text),
                    Err(_) => Memo::Arbitrary(bytes.to_vec()),
                }
            }
            Some(0xFF) => Memo::Arbitrary(bytes[1..].to_vec()),
            Some(_) => Memo::Arbitrary(bytes.to_vec()),
        }
    }
}

/// Note data specific to the note's pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteData {
    Shielded {
        /// Transmission key of the receiving address
        recipient: [u8; 32],
        rseed: [u8; 32],
        cmx: [u8; 32],
        nullifier: Nullifier,
    },
    Transparent {
        address: TransparentAddress,
        address_index: u32,
    },
}

/// A note or transparent coin received by a wallet account.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, MutGetters, Setters, Serialize, Deserialize)]
pub struct WalletNote {
    #[getset(get_copy = "pub")]
    id: NoteId,
    #[getset(get_copy = "pub")]
    account_id: AccountId,
    #[getset(get_copy = "pub")]
    value: u64,
    #[getset(get_copy = "pub")]
    height: BlockHeight,
    #[getset(get_copy = "pub")]
    txid: TxId,
    #[getset(get_copy = "pub", set = "pub")]
    status: NoteStatus,
    #[getset(get_copy = "pub", set = "pub")]
    excluded: bool,
    #[getset(get = "pub", set = "pub")]
    memo: Option<Memo>,
    #[getset(get = "pub")]
    data: NoteData,
}

impl WalletNote {
    pub fn from_parts(
        id: NoteId,
        account_id: AccountId,
        value: u64,
        height: BlockHeight,
        txid: TxId,
        data: NoteData,
    ) -> Self {
        Self {
            id,
            account_id,
            value,
            height,
            txid,
            status: NoteStatus::Unspent,
            excluded: false,
            memo: None,
            data,
        }
    }

    pub fn pool(&self) -> PoolType {
        self.id.pool()
    }

    pub fn nullifier(&self) -> Option<Nullifier> {
        match &self.data {
            NoteData::Shielded { nullifier, .. } => Some(*nullifier),
            NoteData::Transparent { .. } => None,
        }
    }

    pub fn is_unspent(&self) -> bool {
        self.status == NoteStatus::Unspent
    }

    /// Returns true if the note may be selected as a transaction input.
    pub fn is_spendable(&self) -> bool {
        self.is_unspent() && !self.excluded
    }
}

/// Transaction relevant to the wallet, either receiving or spending wallet notes.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, MutGetters, Serialize, Deserialize)]
pub struct WalletTransaction {
    #[getset(get_copy = "pub")]
    txid: TxId,
    #[getset(get_copy = "pub")]
    height: BlockHeight,
    #[getset(get_copy = "pub")]
    time: u32,
    #[getset(get = "pub", get_mut = "pub")]
    received_notes: Vec<NoteId>,
    #[getset(get = "pub", get_mut = "pub")]
    spent_notes: Vec<NoteId>,
}

impl WalletTransaction {
    pub fn new(txid: TxId, height: BlockHeight, time: u32) -> Self {
        Self {
            txid,
            height,
            time,
            received_notes: Vec::new(),
            spent_notes: Vec::new(),
        }
    }
}

/// Snapshot of the wallet at a block boundary.
#[derive(Debug, Clone, PartialEq, Eq, Getters, CopyGetters, Serialize, Deserialize)]
pub struct Checkpoint {
    #[getset(get_copy = "pub")]
    height: BlockHeight,
    #[getset(get_copy = "pub")]
    hash: BlockHash,
    #[getset(get_copy = "pub")]
    time: u32,
    #[getset(get_copy = "pub")]
    sapling_tree_size: u64,
    #[getset(get_copy = "pub")]
    orchard_tree_size: u64,
    #[getset(get = "pub")]
    #[serde(with = "vec_map")]
    balances: BTreeMap<AccountId, PoolValues>,
}

impl Checkpoint {
    pub fn from_parts(
        block_id: BlockId,
        time: u32,
        sapling_tree_size: u64,
        orchard_tree_size: u64,
        balances: BTreeMap<AccountId, PoolValues>,
    ) -> Self {
        Self {
            height: block_id.height,
            hash: block_id.hash,
            time,
            sapling_tree_size,
            orchard_tree_size,
            balances,
        }
    }

    pub fn block_id(&self) -> BlockId {
        BlockId {
            height: self.height,
            hash: self.hash,
        }
    }

    pub fn tree_size(&self, protocol: ShieldedProtocol) -> u64 {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling_tree_size,
            ShieldedProtocol::Orchard => self.orchard_tree_size,
        }
    }
}

/// Encapsulates the current state of sync
#[derive(Debug, Clone, Default, Getters, MutGetters, Serialize, Deserialize)]
#[getset(get = "pub", get_mut = "pub")]
pub struct SyncState {
    /// Checkpoints ordered by height. The highest is the resume point for the next sync.
    #[serde(with = "vec_map")]
    checkpoints: BTreeMap<BlockHeight, Checkpoint>,
}

impl SyncState {
    /// Create new SyncState
    pub fn new() -> Self {
        SyncState {
            checkpoints: BTreeMap::new(),
        }
    }

    /// Returns the latest checkpoint, the sync resume point.
    pub fn last_checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoints.values().next_back()
    }

    /// Returns the height of the latest checkpoint.
    pub fn wallet_height(&self) -> Option<BlockHeight> {
        self.last_checkpoint().map(|checkpoint| checkpoint.height())
    }

    /// Returns the highest checkpoint at or below `height`.
    pub fn checkpoint_at_or_below(&self, height: BlockHeight) -> Option<&Checkpoint> {
        self.checkpoints
            .range(..=height)
            .next_back()
            .map(|(_, checkpoint)| checkpoint)
    }
}

/// Provisional effect of an unconfirmed transaction on an account's balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MempoolEntry {
    pub txid: TxId,
    pub account_id: AccountId,
    pub pool: PoolType,
    pub value_delta: i64,
}
