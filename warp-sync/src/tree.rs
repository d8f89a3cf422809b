//! Incremental note commitment trees
//!
//! Each shielded pool has an append-only Merkle tree of depth [`NOTE_COMMITMENT_TREE_DEPTH`] over its note
//! commitments. The wallet only keeps the frontier of the tree: the rightmost leaves and the roots of the completed
//! subtrees to their left. This is enough to append leaves in amortized O(1) and to compute the current root.

use std::collections::VecDeque;
use std::fmt::Debug;
use std::iter;

use incrementalmerkletree::{Hashable, Level};
use serde::{Deserialize, Serialize};

use crate::primitives::ShieldedProtocol;
use crate::utils::blake2b_32;

/// Depth of the note commitment trees of both shielded pools.
pub const NOTE_COMMITMENT_TREE_DEPTH: u8 = 32;

/// Errors associated with commitment trees and witnesses
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    /// The tree has no room for another leaf
    #[error("commitment tree is full")]
    TreeFull,
    /// Rewinding requires a checkpoint recorded at exactly the target size
    #[error("no checkpoint recorded at tree size {0}")]
    MissingCheckpoint(u64),
    /// Rewinding requires a checkpoint recorded at the target height
    #[error("no tree checkpoint recorded at height {0}")]
    MissingCheckpointHeight(u32),
    /// No witness is tracked for this position
    #[error("no witness tracked for position {0}")]
    UnknownWitness(u64),
    /// Witnesses can not be created for the first leaf of an empty tree without its right sibling
    #[error("can not create authentication path for position {0}")]
    InvalidPath(u64),
}

/// Node of a note commitment tree for a specific shielded pool.
pub trait TreeNode: Hashable + Copy + PartialEq + Debug + Send + Sync + 'static {
    /// Pool this node type belongs to
    const PROTOCOL: ShieldedProtocol;

    /// Creates a node from its 32 byte encoding.
    fn from_bytes(bytes: [u8; 32]) -> Self;

    /// Returns the 32 byte encoding of the node.
    fn to_bytes(&self) -> [u8; 32];
}

const fn empty_leaf_bytes(tag: u8) -> [u8; 32] {
    let mut bytes = [0u8; 32];
    bytes[0] = tag;
    bytes
}

macro_rules! tree_node {
    ($name:ident, $protocol:expr, $personal:literal, $empty_tag:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl Hashable for $name {
            fn empty_leaf() -> Self {
                $name(empty_leaf_bytes($empty_tag))
            }

            fn combine(level: Level, a: &Self, b: &Self) -> Self {
                $name(blake2b_32($personal, &[&[u8::from(level)], &a.0, &b.0]))
            }
        }

        impl TreeNode for $name {
            const PROTOCOL: ShieldedProtocol = $protocol;

            fn from_bytes(bytes: [u8; 32]) -> Self {
                $name(bytes)
            }

            fn to_bytes(&self) -> [u8; 32] {
                self.0
            }
        }

        impl Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({})", stringify!($name), hex::encode(self.0))
            }
        }
    };
}

tree_node!(
    SaplingNode,
    ShieldedProtocol::Sapling,
    b"Warp_Sapling_MH_",
    1,
    "Node of the sapling note commitment tree."
);
tree_node!(
    OrchardNode,
    ShieldedProtocol::Orchard,
    b"Warp_Orchard_MH_",
    2,
    "Node of the orchard note commitment tree."
);

/// Supplies the right siblings of a path that are not part of a frontier.
///
/// Nodes are taken from the queue in order and empty subtree roots are used once the queue is exhausted.
pub(crate) struct PathFiller<H> {
    queue: VecDeque<H>,
}

impl<H: Hashable> PathFiller<H> {
    pub(crate) fn empty() -> Self {
        PathFiller {
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn new(queue: VecDeque<H>) -> Self {
        PathFiller { queue }
    }

    pub(crate) fn next(&mut self, level: Level) -> H {
        self.queue
            .pop_front()
            .unwrap_or_else(|| H::empty_root(level))
    }
}

/// Frontier of an append-only Merkle tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitmentTree<H> {
    left: Option<H>,
    right: Option<H>,
    parents: Vec<Option<H>>,
    size: u64,
}

impl<H: TreeNode> Default for CommitmentTree<H> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<H: TreeNode> CommitmentTree<H> {
    /// Creates an empty tree.
    pub fn empty() -> Self {
        CommitmentTree {
            left: None,
            right: None,
            parents: Vec::new(),
            size: 0,
        }
    }

    /// Number of leaves appended to the tree.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Returns true if no leaves have been appended.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub(crate) fn left(&self) -> Option<H> {
        self.left
    }

    pub(crate) fn right(&self) -> Option<H> {
        self.right
    }

    pub(crate) fn parents(&self) -> &[Option<H>] {
        &self.parents
    }

    /// Appends a leaf to the tree.
    pub fn append(&mut self, node: H) -> Result<(), TreeError> {
        self.append_inner(node, NOTE_COMMITMENT_TREE_DEPTH)
    }

    pub(crate) fn append_inner(&mut self, node: H, depth: u8) -> Result<(), TreeError> {
        if self.is_complete(depth) {
            return Err(TreeError::TreeFull);
        }

        match (self.left, self.right) {
            (None, _) => self.left = Some(node),
            (_, None) => self.right = Some(node),
            (Some(left), Some(right)) => {
                let mut combined = H::combine(Level::from(0), &left, &right);
                self.left = Some(node);
                self.right = None;

                for i in 0..depth {
                    let index = usize::from(i);
                    if index < self.parents.len() {
                        if let Some(parent) = self.parents[index] {
                            combined = H::combine(Level::from(i + 1), &parent, &combined);
                            self.parents[index] = None;
                        } else {
                            self.parents[index] = Some(combined);
                            break;
                        }
                    } else {
                        self.parents.push(Some(combined));
                        break;
                    }
                }
            }
        }
        self.size += 1;

        Ok(())
    }

    /// Returns true if the tree has no room left at the given depth.
    pub(crate) fn is_complete(&self, depth: u8) -> bool {
        if depth == 0 {
            self.left.is_some() && self.right.is_none() && self.parents.is_empty()
        } else {
            self.left.is_some()
                && self.right.is_some()
                && self
                    .parents
                    .iter()
                    .chain(iter::repeat(&None))
                    .take(usize::from(depth - 1))
                    .all(|parent| parent.is_some())
        }
    }

    /// Current root of the tree.
    pub fn root(&self) -> H {
        self.root_inner(NOTE_COMMITMENT_TREE_DEPTH, &mut PathFiller::empty())
    }

    pub(crate) fn root_inner(&self, depth: u8, filler: &mut PathFiller<H>) -> H {
        let left = self
            .left
            .unwrap_or_else(|| filler.next(Level::from(0)));
        let right = self
            .right
            .unwrap_or_else(|| filler.next(Level::from(0)));
        let leaf_root = H::combine(Level::from(0), &left, &right);

        self.parents
            .iter()
            .chain(iter::repeat(&None))
            .take(usize::from(depth - 1))
            .zip(1u8..)
            .fold(leaf_root, |root, (parent, i)| {
                let level = Level::from(i);
                match parent {
                    Some(node) => H::combine(level, node, &root),
                    None => H::combine(level, &root, &filler.next(level)),
                }
            })
    }
}

/// Authentication path from a leaf to a tree root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthPath {
    position: u64,
    path: Vec<[u8; 32]>,
}

impl AuthPath {
    pub(crate) fn from_parts(position: u64, path: Vec<[u8; 32]>) -> Self {
        AuthPath { position, path }
    }

    /// Position of the authenticated leaf.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Sibling nodes from the leaf level upwards.
    pub fn path(&self) -> &[[u8; 32]] {
        &self.path
    }

    /// Computes the root obtained by hashing `leaf` up the path.
    pub fn root<H: TreeNode>(&self, leaf: H) -> H {
        self.path
            .iter()
            .enumerate()
            .fold(leaf, |node, (i, sibling)| {
                let level = Level::from(i as u8);
                let sibling = H::from_bytes(*sibling);
                if (self.position >> i) & 1 == 0 {
                    H::combine(level, &node, &sibling)
                } else {
                    H::combine(level, &sibling, &node)
                }
            })
    }
}
