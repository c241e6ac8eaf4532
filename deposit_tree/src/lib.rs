pub mod deposit_tree;
pub mod merkle_tree;

pub use deposit_tree::{DepositTree, DepositTreeSnapshot};
pub use merkle_tree::{merkle_root_from_branch, MerkleTree, MerkleTreeError, MAX_TREE_DEPTH};
