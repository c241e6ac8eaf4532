use anyhow::{ensure, Result};
use ssz_derive::{Decode, Encode};
use thiserror::Error;
use tree_hash::{mix_in_length, TreeHash as _};

use types::phase0::{
    consts::DEPOSIT_CONTRACT_TREE_DEPTH,
    containers::DepositData,
    primitives::{DepositIndex, ExecutionBlockNumber, H256},
};

use crate::merkle_tree::{MerkleTree, MAX_TREE_DEPTH};

const MAX_DEPOSITS: DepositIndex = 1 << DEPOSIT_CONTRACT_TREE_DEPTH;

#[derive(Debug, Error)]
enum Error {
    #[error("attempted to add deposit with index {index} to full deposit tree")]
    Full { index: DepositIndex },
    #[error("expected deposit with index {expected}, received deposit with index {actual}")]
    UnexpectedIndex {
        expected: DepositIndex,
        actual: DepositIndex,
    },
    #[error("no deposit with index {index} in tree of {count} deposits")]
    MissingLeaf {
        index: DepositIndex,
        count: DepositIndex,
    },
}

/// The append-only Merkle list of deposit data roots.
///
/// Indexed by `eth1_deposit_index`. The hash-tree-root of the list mixes the
/// leaf count into the root of the underlying fixed-depth tree, matching the
/// `List[DepositData, 2**DEPOSIT_CONTRACT_TREE_DEPTH]` SSZ type.
#[derive(Clone, Default, Debug)]
pub struct DepositTree {
    tree: MerkleTree,
    leaves: Vec<H256>,
    pub deposit_count: DepositIndex,
    pub last_added_block_number: ExecutionBlockNumber,
}

impl DepositTree {
    pub fn push(&mut self, index: DepositIndex, data: &DepositData) -> Result<()> {
        self.validate_index(index)?;

        let chunk = data.tree_hash_root();

        self.tree.push_leaf(chunk, MAX_TREE_DEPTH)?;
        self.leaves.push(chunk);
        self.deposit_count += 1;

        Ok(())
    }

    pub fn push_and_compute_root(
        &mut self,
        index: DepositIndex,
        data: &DepositData,
    ) -> Result<H256> {
        self.push(index, data)?;
        Ok(self.root())
    }

    /// The root of the deposit list with the length mixed in.
    #[must_use]
    pub fn root(&self) -> H256 {
        mix_in_length(
            &self.tree.hash(),
            usize::try_from(self.deposit_count).expect("deposit count fits in usize"),
        )
    }

    /// Return the leaf at `index` and a proof of its inclusion in [`root`].
    ///
    /// The proof is in bottom-up order and contains
    /// `DEPOSIT_CONTRACT_TREE_DEPTH + 1` hashes; the final one is the
    /// little-endian leaf count, accounting for the length mix-in.
    ///
    /// [`root`]: Self::root
    pub fn generate_proof(&self, index: DepositIndex) -> Result<(H256, Vec<H256>)> {
        ensure!(
            index < self.deposit_count,
            Error::MissingLeaf {
                index,
                count: self.deposit_count,
            },
        );

        let (leaf, mut proof) = self.tree.generate_proof(index, MAX_TREE_DEPTH)?;

        proof.push(length_leaf(self.deposit_count));

        Ok((leaf, proof))
    }

    #[must_use]
    pub fn snapshot(&self) -> DepositTreeSnapshot {
        DepositTreeSnapshot {
            leaves: self.leaves.clone(),
            deposit_count: self.deposit_count,
            last_added_block_number: self.last_added_block_number,
        }
    }

    #[must_use]
    pub fn from_snapshot(snapshot: DepositTreeSnapshot) -> Self {
        let DepositTreeSnapshot {
            leaves,
            deposit_count,
            last_added_block_number,
        } = snapshot;

        Self {
            tree: MerkleTree::create(&leaves, MAX_TREE_DEPTH),
            leaves,
            deposit_count,
            last_added_block_number,
        }
    }

    fn validate_index(&self, index: DepositIndex) -> Result<()> {
        ensure!(index < MAX_DEPOSITS, Error::Full { index });

        let expected = self.deposit_count;

        ensure!(
            index == expected,
            Error::UnexpectedIndex {
                expected,
                actual: index,
            },
        );

        Ok(())
    }
}

/// Persistable form of [`DepositTree`].
#[derive(Clone, Default, Debug, Encode, Decode)]
pub struct DepositTreeSnapshot {
    pub leaves: Vec<H256>,
    pub deposit_count: DepositIndex,
    pub last_added_block_number: ExecutionBlockNumber,
}

fn length_leaf(count: DepositIndex) -> H256 {
    let mut leaf = [0; 32];
    leaf[..8].copy_from_slice(&count.to_le_bytes());
    H256::new(leaf)
}
