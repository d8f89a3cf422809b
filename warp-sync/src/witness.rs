//! Module for note commitment tree witnesses
//!
//! Witnesses are advanced incrementally as leaves are appended to the tree. Leaves appended since the last flush are
//! buffered so that witnesses that are not needed immediately can be caught up in one parallel pass at the end of a
//! batch.

use std::collections::BTreeMap;

use getset::{Getters, MutGetters};
use incrementalmerkletree::Level;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::primitives::{BlockHeight, ShieldedProtocol, TreeState};
use crate::tree::{
    AuthPath, CommitmentTree, OrchardNode, PathFiller, SaplingNode, TreeNode,
    NOTE_COMMITMENT_TREE_DEPTH,
};
use crate::utils::vec_map;

pub use crate::tree::TreeError;

/// Authentication path of a single leaf that is advanced as the tree grows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncrementalWitness<H> {
    tree: CommitmentTree<H>,
    filled: Vec<H>,
    cursor_depth: u8,
    cursor: Option<CommitmentTree<H>>,
    tree_size: u64,
}

impl<H: TreeNode> IncrementalWitness<H> {
    /// Creates a witness for the last leaf of `tree`. Returns `None` if the tree is empty.
    pub fn from_tree(tree: CommitmentTree<H>) -> Option<Self> {
        if tree.is_empty() {
            return None;
        }
        let tree_size = tree.size();

        Some(IncrementalWitness {
            tree,
            filled: Vec::new(),
            cursor_depth: 0,
            cursor: None,
            tree_size,
        })
    }

    /// Position of the witnessed leaf.
    pub fn position(&self) -> u64 {
        self.tree.size() - 1
    }

    /// Size of the tree this witness is currently valid for.
    pub fn tree_size(&self) -> u64 {
        self.tree_size
    }

    /// Returns the witnessed leaf.
    pub fn leaf(&self) -> Option<H> {
        self.tree.right().or(self.tree.left())
    }

    fn filler(&self) -> PathFiller<H> {
        let cursor_root = self.cursor.as_ref().map(|cursor| {
            cursor.root_inner(self.cursor_depth, &mut PathFiller::empty())
        });

        PathFiller::new(self.filled.iter().copied().chain(cursor_root).collect())
    }

    /// Finds the level of the next subtree to be filled by appended leaves.
    fn next_depth(&self) -> u8 {
        let mut skip = self.filled.len();

        if self.tree.left().is_none() {
            if skip > 0 {
                skip -= 1;
            } else {
                return 0;
            }
        }
        if self.tree.right().is_none() {
            if skip > 0 {
                skip -= 1;
            } else {
                return 0;
            }
        }

        let mut depth = 1u8;
        for parent in self.tree.parents() {
            if parent.is_none() {
                if skip > 0 {
                    skip -= 1;
                } else {
                    return depth;
                }
            }
            depth += 1;
        }

        depth.saturating_add(skip as u8)
    }

    /// Tracks a leaf appended to the tree after the witnessed leaf.
    pub fn append(&mut self, node: H) -> Result<(), TreeError> {
        if let Some(mut cursor) = self.cursor.take() {
            cursor.append(node)?;
            if cursor.is_complete(self.cursor_depth) {
                self.filled
                    .push(cursor.root_inner(self.cursor_depth, &mut PathFiller::empty()));
            } else {
                self.cursor = Some(cursor);
            }
        } else {
            self.cursor_depth = self.next_depth();
            if self.cursor_depth >= NOTE_COMMITMENT_TREE_DEPTH {
                return Err(TreeError::TreeFull);
            }

            if self.cursor_depth == 0 {
                self.filled.push(node);
            } else {
                let mut cursor = CommitmentTree::empty();
                cursor.append(node)?;
                self.cursor = Some(cursor);
            }
        }
        self.tree_size += 1;

        Ok(())
    }

    /// Root of the tree at the size this witness is valid for.
    pub fn root(&self) -> H {
        self.tree
            .root_inner(NOTE_COMMITMENT_TREE_DEPTH, &mut self.filler())
    }

    /// Authentication path of the witnessed leaf.
    pub fn path(&self) -> Result<AuthPath, TreeError> {
        let mut filler = self.filler();
        let mut path = Vec::with_capacity(usize::from(NOTE_COMMITMENT_TREE_DEPTH));

        match (self.tree.left(), self.tree.right()) {
            (Some(left), Some(_)) => path.push(left.to_bytes()),
            (Some(_), None) => path.push(filler.next(Level::from(0)).to_bytes()),
            (None, _) => return Err(TreeError::InvalidPath(self.tree_size)),
        }

        for (parent, i) in self
            .tree
            .parents()
            .iter()
            .chain(std::iter::repeat(&None))
            .take(usize::from(NOTE_COMMITMENT_TREE_DEPTH - 1))
            .zip(1u8..)
        {
            let node = match parent {
                Some(node) => *node,
                None => filler.next(Level::from(i)),
            };
            path.push(node.to_bytes());
        }

        Ok(AuthPath::from_parts(self.position(), path))
    }
}

/// Frontier and witnesses at a checkpointed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TreeCheckpoint<H> {
    frontier: CommitmentTree<H>,
    #[serde(with = "vec_map")]
    witnesses: BTreeMap<u64, IncrementalWitness<H>>,
}

/// Note commitment tree of one shielded pool with the witnesses of the wallet's notes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCommitmentTree<H> {
    frontier: CommitmentTree<H>,
    /// Leaves appended since the last flush
    pending: Vec<H>,
    /// Tree size at the last flush
    flushed_size: u64,
    #[serde(with = "vec_map")]
    witnesses: BTreeMap<u64, IncrementalWitness<H>>,
    #[serde(with = "vec_map")]
    checkpoints: BTreeMap<BlockHeight, TreeCheckpoint<H>>,
}

impl<H: TreeNode> Default for NoteCommitmentTree<H> {
    fn default() -> Self {
        Self::from_frontier(CommitmentTree::empty())
    }
}

fn catch_up<H: TreeNode>(
    witness: &mut IncrementalWitness<H>,
    pending: &[H],
    flushed_size: u64,
) -> Result<(), TreeError> {
    let skip = (witness.tree_size() - flushed_size) as usize;
    for leaf in pending.iter().skip(skip) {
        witness.append(*leaf)?;
    }

    Ok(())
}

impl<H: TreeNode> NoteCommitmentTree<H> {
    /// Creates a tree starting from a frontier, for example the tree state at the wallet birthday.
    pub fn from_frontier(frontier: CommitmentTree<H>) -> Self {
        let flushed_size = frontier.size();

        NoteCommitmentTree {
            frontier,
            pending: Vec::new(),
            flushed_size,
            witnesses: BTreeMap::new(),
            checkpoints: BTreeMap::new(),
        }
    }

    /// Number of leaves in the tree.
    pub fn size(&self) -> u64 {
        self.frontier.size()
    }

    /// Current root of the tree.
    pub fn root(&self) -> H {
        self.frontier.root()
    }

    /// Current frontier of the tree.
    pub fn frontier(&self) -> &CommitmentTree<H> {
        &self.frontier
    }

    /// Appends a leaf and returns its position. If `mark` is set a witness is tracked for the leaf.
    pub fn append(&mut self, leaf: H, mark: bool) -> Result<u64, TreeError> {
        self.frontier.append(leaf)?;
        let position = self.frontier.size() - 1;

        if mark {
            if let Some(witness) = IncrementalWitness::from_tree(self.frontier.clone()) {
                self.witnesses.insert(position, witness);
            }
        }
        self.pending.push(leaf);

        Ok(position)
    }

    /// Returns true if a witness is tracked for `position`.
    pub fn is_marked(&self, position: u64) -> bool {
        self.witnesses.contains_key(&position)
    }

    /// Positions of all tracked witnesses.
    pub fn marked_positions(&self) -> impl Iterator<Item = u64> + '_ {
        self.witnesses.keys().copied()
    }

    /// Returns the authentication path of the leaf at `position` against the current root.
    ///
    /// The witness is advanced over the leaves appended since it was last updated.
    pub fn witness_for(&mut self, position: u64) -> Result<AuthPath, TreeError> {
        let witness = self
            .witnesses
            .get_mut(&position)
            .ok_or(TreeError::UnknownWitness(position))?;
        catch_up(witness, &self.pending, self.flushed_size)?;

        witness.path()
    }

    /// Stops tracking the witness for `position`, for example once the note is spent.
    pub fn remove_witness(&mut self, position: u64) {
        self.witnesses.remove(&position);
    }

    /// Advances all witnesses over the pending leaves.
    pub fn flush(&mut self) -> Result<(), TreeError> {
        let pending = &self.pending;
        let flushed_size = self.flushed_size;
        self.witnesses
            .par_iter_mut()
            .try_for_each(|(_, witness)| catch_up(witness, pending, flushed_size))?;

        self.pending.clear();
        self.flushed_size = self.frontier.size();

        Ok(())
    }

    /// Records the frontier and witnesses at the end of the block at `height`.
    pub fn checkpoint(&mut self, height: BlockHeight) -> Result<(), TreeError> {
        self.flush()?;
        self.checkpoints.insert(
            height,
            TreeCheckpoint {
                frontier: self.frontier.clone(),
                witnesses: self.witnesses.clone(),
            },
        );

        Ok(())
    }

    /// Heights of the recorded checkpoints.
    pub fn checkpoint_heights(&self) -> impl Iterator<Item = BlockHeight> + '_ {
        self.checkpoints.keys().copied()
    }

    /// Tree size at the checkpoint recorded at `height`.
    pub fn size_at_checkpoint(&self, height: BlockHeight) -> Option<u64> {
        self.checkpoints
            .get(&height)
            .map(|checkpoint| checkpoint.frontier.size())
    }

    /// Tree root at the checkpoint recorded at `height`.
    pub fn root_at_checkpoint(&self, height: BlockHeight) -> Option<H> {
        self.checkpoints
            .get(&height)
            .map(|checkpoint| checkpoint.frontier.root())
    }

    /// Authentication path of the leaf at `position` against the root at the checkpoint recorded at `height`.
    pub fn witness_at_checkpoint(
        &self,
        position: u64,
        height: BlockHeight,
    ) -> Result<AuthPath, TreeError> {
        let checkpoint = self
            .checkpoints
            .get(&height)
            .ok_or(TreeError::MissingCheckpointHeight(u32::from(height)))?;

        checkpoint
            .witnesses
            .get(&position)
            .ok_or(TreeError::UnknownWitness(position))?
            .path()
    }

    /// Truncates the tree back to `size` leaves.
    ///
    /// Fails if no checkpoint recorded exactly this size. Checkpoints above the restored one are discarded.
    pub fn rewind_to(&mut self, size: u64) -> Result<(), TreeError> {
        let height = self
            .checkpoints
            .iter()
            .rev()
            .find(|(_, checkpoint)| checkpoint.frontier.size() == size)
            .map(|(height, _)| *height)
            .ok_or(TreeError::MissingCheckpoint(size))?;

        self.rewind_to_checkpoint(height)
    }

    /// Restores the frontier and witnesses recorded at `height` and discards all later checkpoints.
    pub fn rewind_to_checkpoint(&mut self, height: BlockHeight) -> Result<(), TreeError> {
        let checkpoint = self
            .checkpoints
            .get(&height)
            .cloned()
            .ok_or(TreeError::MissingCheckpointHeight(u32::from(height)))?;

        self.frontier = checkpoint.frontier;
        self.witnesses = checkpoint.witnesses;
        self.pending.clear();
        self.flushed_size = self.frontier.size();
        self.checkpoints
            .retain(|checkpoint_height, _| *checkpoint_height <= height);

        Ok(())
    }

    /// Removes a checkpoint without changing the tree.
    pub fn remove_checkpoint(&mut self, height: BlockHeight) {
        self.checkpoints.remove(&height);
    }

    /// Keeps only the `max_checkpoints` highest checkpoints.
    pub fn prune_checkpoints(&mut self, max_checkpoints: usize) {
        while self.checkpoints.len() > max_checkpoints {
            self.checkpoints.pop_first();
        }
    }
}

/// Note commitment trees of both shielded pools.
#[derive(Debug, Clone, Default, PartialEq, Eq, Getters, MutGetters, Serialize, Deserialize)]
#[getset(get = "pub", get_mut = "pub")]
pub struct CommitmentTrees {
    /// Sapling note commitment tree
    sapling: NoteCommitmentTree<SaplingNode>,
    /// Orchard note commitment tree
    orchard: NoteCommitmentTree<OrchardNode>,
}

impl CommitmentTrees {
    /// Creates the trees from the frontiers of a tree state.
    pub fn from_tree_state(tree_state: &TreeState) -> Self {
        CommitmentTrees {
            sapling: NoteCommitmentTree::from_frontier(tree_state.sapling_tree.clone()),
            orchard: NoteCommitmentTree::from_frontier(tree_state.orchard_tree.clone()),
        }
    }

    /// Tree size of the given pool.
    pub fn size(&self, protocol: ShieldedProtocol) -> u64 {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.size(),
            ShieldedProtocol::Orchard => self.orchard.size(),
        }
    }

    /// Current root of the given pool's tree.
    pub fn root(&self, protocol: ShieldedProtocol) -> [u8; 32] {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.root().to_bytes(),
            ShieldedProtocol::Orchard => self.orchard.root().to_bytes(),
        }
    }

    /// Appends a note commitment to the given pool's tree and returns its position.
    pub fn append(
        &mut self,
        protocol: ShieldedProtocol,
        cmx: [u8; 32],
        mark: bool,
    ) -> Result<u64, TreeError> {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.append(SaplingNode::from_bytes(cmx), mark),
            ShieldedProtocol::Orchard => self.orchard.append(OrchardNode::from_bytes(cmx), mark),
        }
    }

    /// Returns the current authentication path of a wallet note.
    pub fn witness_for(
        &mut self,
        protocol: ShieldedProtocol,
        position: u64,
    ) -> Result<AuthPath, TreeError> {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.witness_for(position),
            ShieldedProtocol::Orchard => self.orchard.witness_for(position),
        }
    }

    /// Returns the authentication path of a wallet note at a checkpoint.
    pub fn witness_at_checkpoint(
        &self,
        protocol: ShieldedProtocol,
        position: u64,
        height: BlockHeight,
    ) -> Result<AuthPath, TreeError> {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.witness_at_checkpoint(position, height),
            ShieldedProtocol::Orchard => self.orchard.witness_at_checkpoint(position, height),
        }
    }

    /// Root of the given pool's tree at a checkpoint.
    pub fn root_at_checkpoint(
        &self,
        protocol: ShieldedProtocol,
        height: BlockHeight,
    ) -> Option<[u8; 32]> {
        match protocol {
            ShieldedProtocol::Sapling => self
                .sapling
                .root_at_checkpoint(height)
                .map(|root| root.to_bytes()),
            ShieldedProtocol::Orchard => self
                .orchard
                .root_at_checkpoint(height)
                .map(|root| root.to_bytes()),
        }
    }

    /// Stops tracking the witness of a spent note.
    pub fn remove_witness(&mut self, protocol: ShieldedProtocol, position: u64) {
        match protocol {
            ShieldedProtocol::Sapling => self.sapling.remove_witness(position),
            ShieldedProtocol::Orchard => self.orchard.remove_witness(position),
        }
    }

    /// Checkpoints both trees at `height`.
    pub fn checkpoint(&mut self, height: BlockHeight) -> Result<(), TreeError> {
        self.sapling.checkpoint(height)?;
        self.orchard.checkpoint(height)
    }

    /// Rewinds both trees to the checkpoint at `height`.
    pub fn rewind_to_checkpoint(&mut self, height: BlockHeight) -> Result<(), TreeError> {
        self.sapling.rewind_to_checkpoint(height)?;
        self.orchard.rewind_to_checkpoint(height)
    }

    /// Removes the checkpoint at `height` from both trees.
    pub fn remove_checkpoint(&mut self, height: BlockHeight) {
        self.sapling.remove_checkpoint(height);
        self.orchard.remove_checkpoint(height);
    }

    /// Prunes both trees to the `max_checkpoints` highest checkpoints.
    pub fn prune_checkpoints(&mut self, max_checkpoints: usize) {
        self.sapling.prune_checkpoints(max_checkpoints);
        self.orchard.prune_checkpoints(max_checkpoints);
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::tree::tests::leaf;

    fn tree_with_leaves(count: u64, marked: &[u64]) -> NoteCommitmentTree<SaplingNode> {
        let mut tree = NoteCommitmentTree::default();
        for i in 0..count {
            tree.append(leaf(i), marked.contains(&i)).unwrap();
        }
        tree
    }

    #[test]
    fn unmarked_leaf_has_no_witness() {
        let mut tree = tree_with_leaves(5, &[2]);
        assert_eq!(tree.witness_for(3), Err(TreeError::UnknownWitness(3)));
        assert!(tree.witness_for(2).is_ok());
    }

    #[test]
    fn rewind_requires_exact_checkpoint_size() {
        let mut tree = tree_with_leaves(4, &[]);
        tree.checkpoint(BlockHeight::from_u32(10)).unwrap();
        let root = tree.root();
        tree.append(leaf(4), false).unwrap();
        tree.append(leaf(5), false).unwrap();

        assert_eq!(tree.rewind_to(5), Err(TreeError::MissingCheckpoint(5)));
        tree.rewind_to(4).unwrap();
        assert_eq!(tree.size(), 4);
        assert_eq!(tree.root(), root);
    }

    #[test]
    fn rewind_restores_witnesses() {
        let mut tree = tree_with_leaves(3, &[1]);
        tree.checkpoint(BlockHeight::from_u32(1)).unwrap();
        let path = tree.witness_for(1).unwrap();

        tree.append(leaf(3), true).unwrap();
        tree.append(leaf(4), false).unwrap();
        tree.checkpoint(BlockHeight::from_u32(2)).unwrap();

        tree.rewind_to_checkpoint(BlockHeight::from_u32(1)).unwrap();
        assert!(!tree.is_marked(3));
        assert_eq!(tree.witness_for(1).unwrap(), path);
        assert_eq!(tree.checkpoint_heights().count(), 1);
    }

    #[test]
    fn checkpoint_witness_matches_checkpoint_root() {
        let mut tree = tree_with_leaves(7, &[0, 6]);
        let height = BlockHeight::from_u32(50);
        tree.checkpoint(height).unwrap();
        for i in 7..20 {
            tree.append(leaf(i), false).unwrap();
        }

        let path = tree.witness_at_checkpoint(6, height).unwrap();
        assert_eq!(path.root(leaf(6)), tree.root_at_checkpoint(height).unwrap());
        assert_ne!(tree.root_at_checkpoint(height).unwrap(), tree.root());
    }

    #[test]
    fn prune_keeps_latest_checkpoints() {
        let mut tree = tree_with_leaves(1, &[]);
        for height in 1..=5 {
            tree.checkpoint(BlockHeight::from_u32(height)).unwrap();
        }
        tree.prune_checkpoints(2);
        let heights: Vec<u32> = tree.checkpoint_heights().map(u32::from).collect();
        assert_eq!(heights, vec![4, 5]);
    }

    proptest! {
        #[test]
        fn witness_advances_with_tree(
            before in 1u64..70,
            after in 0u64..130,
            mark in 0u64..70,
            flush_at in 0u64..130,
        ) {
            let mark = mark % before;
            let mut tree = tree_with_leaves(before, &[mark]);
            for i in before..before + after {
                if i - before == flush_at {
                    tree.flush().unwrap();
                }
                tree.append(leaf(i), false).unwrap();
            }

            let path = tree.witness_for(mark).unwrap();
            prop_assert_eq!(path.position(), mark);
            prop_assert_eq!(path.root(leaf(mark)), tree.root());
        }
    }
}
