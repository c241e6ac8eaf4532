use std::sync::LazyLock;

use ethereum_hashing::hash32_concat;
use thiserror::Error;

use types::phase0::{consts::DEPOSIT_CONTRACT_TREE_DEPTH, primitives::H256};

pub const MAX_TREE_DEPTH: usize = DEPOSIT_CONTRACT_TREE_DEPTH;

const EMPTY_SLICE: &[H256] = &[];

static ZERO_HASHES: LazyLock<Vec<H256>> = LazyLock::new(|| {
    let mut hashes = vec![H256::ZERO];

    for depth in 0..MAX_TREE_DEPTH {
        let child = hashes[depth];
        hashes.push(H256::new(hash32_concat(
            child.as_slice(),
            child.as_slice(),
        )));
    }

    hashes
});

static ZERO_NODES: LazyLock<Vec<MerkleTree>> =
    LazyLock::new(|| (0..=MAX_TREE_DEPTH).map(MerkleTree::Zero).collect());

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum MerkleTreeError {
    #[error("attempted to push into a leaf")]
    LeafReached,
    #[error("no more space in the tree")]
    MerkleTreeFull,
    #[error("tree is in an invalid state")]
    Invalid,
    #[error("depth too small for the requested operation")]
    DepthTooSmall,
    #[error("leaf index {index} is beyond the number of leaves")]
    IndexOutOfBounds { index: u64 },
}

/// Right-sparse Merkle tree of fixed depth.
///
/// Only the first N indices are populated by non-zero leaves, which is
/// exactly the shape of the deposit contract tree.
#[derive(Clone, PartialEq, Debug)]
pub enum MerkleTree {
    Zero(usize),
    Leaf(H256),
    Node(H256, Box<Self>, Box<Self>),
}

impl Default for MerkleTree {
    fn default() -> Self {
        Self::Zero(MAX_TREE_DEPTH)
    }
}

impl MerkleTree {
    #[must_use]
    pub fn create(leaves: &[H256], depth: usize) -> Self {
        use MerkleTree::{Leaf, Node, Zero};

        if leaves.is_empty() {
            return Zero(depth);
        }

        match depth {
            0 => {
                debug_assert_eq!(leaves.len(), 1);
                Leaf(leaves[0])
            }
            _ => {
                let subtree_capacity = 2_usize.pow(depth as u32 - 1);

                let (left_leaves, right_leaves) = if leaves.len() <= subtree_capacity {
                    (leaves, EMPTY_SLICE)
                } else {
                    leaves.split_at(subtree_capacity)
                };

                let left_subtree = Self::create(left_leaves, depth - 1);
                let right_subtree = Self::create(right_leaves, depth - 1);
                let hash = hash_children(&left_subtree, &right_subtree);

                Node(hash, Box::new(left_subtree), Box::new(right_subtree))
            }
        }
    }

    pub fn push_leaf(&mut self, elem: H256, depth: usize) -> Result<(), MerkleTreeError> {
        use MerkleTree::{Leaf, Node, Zero};

        if depth == 0 {
            return Err(MerkleTreeError::DepthTooSmall);
        }

        match self {
            Leaf(_) => return Err(MerkleTreeError::LeafReached),
            Zero(_) => *self = Self::create(&[elem], depth),
            Node(ref mut hash, ref mut left, ref mut right) => {
                let left: &mut Self = left;
                let right: &mut Self = right;

                match (&*left, &*right) {
                    (Leaf(_), Leaf(_)) => return Err(MerkleTreeError::MerkleTreeFull),
                    (Node(..), Node(..)) => right.push_leaf(elem, depth - 1)?,
                    (Zero(_), Zero(_)) => *left = Self::create(&[elem], depth - 1),
                    (Leaf(_), Zero(_)) => *right = Self::create(&[elem], depth - 1),
                    (Node(..), Zero(_)) => match left.push_leaf(elem, depth - 1) {
                        Ok(()) => {}
                        Err(MerkleTreeError::MerkleTreeFull) => {
                            *right = Self::create(&[elem], depth - 1);
                        }
                        Err(error) => return Err(error),
                    },
                    (_, _) => return Err(MerkleTreeError::Invalid),
                }

                *hash = hash_children(left, right);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn hash(&self) -> H256 {
        use MerkleTree::{Leaf, Node, Zero};

        match *self {
            Zero(depth) => ZERO_HASHES[depth],
            Leaf(hash) | Node(hash, _, _) => hash,
        }
    }

    #[must_use]
    pub fn left_and_right_branches(&self) -> Option<(&Self, &Self)> {
        use MerkleTree::{Leaf, Node, Zero};

        match *self {
            Leaf(_) | Zero(0) => None,
            Node(_, ref left, ref right) => Some((left, right)),
            Zero(depth) => Some((&ZERO_NODES[depth - 1], &ZERO_NODES[depth - 1])),
        }
    }

    /// Return the leaf at `index` and a Merkle proof of its inclusion.
    ///
    /// The proof is in bottom-up order, starting with the leaf's sibling.
    /// Its length is exactly `depth`.
    pub fn generate_proof(
        &self,
        index: u64,
        depth: usize,
    ) -> Result<(H256, Vec<H256>), MerkleTreeError> {
        let mut proof = Vec::with_capacity(depth);
        let mut current = self;

        for level in (0..depth).rev() {
            let (left, right) = current
                .left_and_right_branches()
                .ok_or(MerkleTreeError::Invalid)?;

            if index & (1 << level) == 0 {
                proof.push(right.hash());
                current = left;
            } else {
                proof.push(left.hash());
                current = right;
            }
        }

        proof.reverse();

        Ok((current.hash(), proof))
    }
}

fn hash_children(left: &MerkleTree, right: &MerkleTree) -> H256 {
    H256::new(hash32_concat(
        left.hash().as_slice(),
        right.hash().as_slice(),
    ))
}

/// Recomputes the root implied by `leaf` at `index` and `branch`.
#[must_use]
pub fn merkle_root_from_branch(leaf: H256, branch: &[H256], index: u64) -> H256 {
    let mut root = leaf;

    for (level, sibling) in branch.iter().enumerate() {
        root = if index & (1 << level) == 0 {
            H256::new(hash32_concat(root.as_slice(), sibling.as_slice()))
        } else {
            H256::new(hash32_concat(sibling.as_slice(), root.as_slice()))
        };
    }

    root
}
