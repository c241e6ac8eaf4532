use tree_hash::TreeHash as _;

use crate::phase0::{
    containers::{BeaconBlock, BeaconBlockHeader, SignedBeaconBlock},
    primitives::{SignatureBytes, H256},
};

impl BeaconBlock {
    #[must_use]
    pub fn with_state_root(mut self, state_root: H256) -> Self {
        self.state_root = state_root;
        self
    }

    #[must_use]
    pub fn with_zero_signature(self) -> SignedBeaconBlock {
        SignedBeaconBlock {
            message: self,
            signature: SignatureBytes::default(),
        }
    }

    #[must_use]
    pub fn to_header(&self) -> BeaconBlockHeader {
        BeaconBlockHeader {
            slot: self.slot,
            proposer_index: self.proposer_index,
            parent_root: self.parent_root,
            state_root: self.state_root,
            body_root: self.body.tree_hash_root(),
        }
    }
}

impl SignedBeaconBlock {
    #[must_use]
    pub fn block_root(&self) -> H256 {
        self.message.tree_hash_root()
    }
}
