use std::sync::Arc;

use types::phase0::{
    beacon_state::BeaconState,
    containers::{Checkpoint, SignedBeaconBlock},
    primitives::{Epoch, Slot, ValidatorIndex, H256},
};

/// One unfinalized block as seen by the fork choice rule.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct ForkChoiceNode {
    pub slot: Slot,
    pub block_root: H256,
    pub state_root: H256,
    pub parent_root: H256,
    pub justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}

/// The most recent vote seen from a validator.
///
/// The epoch is strictly non-decreasing; older votes are ignored.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct LatestMessage {
    pub epoch: Epoch,
    pub root: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BlockOrigin {
    Gossip,
    Requested,
    Own,
    Persisted,
}

impl BlockOrigin {
    #[must_use]
    pub const fn verify_signatures(self) -> bool {
        match self {
            Self::Gossip | Self::Requested => true,
            Self::Own | Self::Persisted => false,
        }
    }
}

/// Outcome of validating a block against a store snapshot.
pub enum BlockAction {
    Accept {
        node: ForkChoiceNode,
        block: Arc<SignedBeaconBlock>,
        post_state: Arc<BeaconState>,
    },
    /// The block is already known. Nothing is written and no events are emitted.
    Ignore,
    /// Transient: park the block until its parent is applied.
    DelayUntilParent { block: Arc<SignedBeaconBlock> },
}

/// Outcome of validating an attestation against a store snapshot.
pub enum AttestationAction {
    Accept {
        beacon_block_root: H256,
        target_epoch: Epoch,
        attesting_indices: Vec<ValidatorIndex>,
    },
    Ignore,
}

#[derive(Clone, Debug)]
pub enum ApplyBlockChanges {
    CanonicalChainExtended {
        justified_checkpoint_updated: bool,
        finalized_checkpoint_updated: bool,
    },
    AlternateChainExtended {
        justified_checkpoint_updated: bool,
        finalized_checkpoint_updated: bool,
    },
    Reorganized {
        old_head: ForkChoiceNode,
        justified_checkpoint_updated: bool,
        finalized_checkpoint_updated: bool,
    },
}

impl ApplyBlockChanges {
    #[must_use]
    pub const fn is_head_updated(&self) -> bool {
        matches!(
            self,
            Self::CanonicalChainExtended { .. } | Self::Reorganized { .. },
        )
    }

    #[must_use]
    pub const fn is_justified_checkpoint_updated(&self) -> bool {
        match *self {
            Self::CanonicalChainExtended {
                justified_checkpoint_updated,
                ..
            }
            | Self::AlternateChainExtended {
                justified_checkpoint_updated,
                ..
            }
            | Self::Reorganized {
                justified_checkpoint_updated,
                ..
            } => justified_checkpoint_updated,
        }
    }

    #[must_use]
    pub const fn is_finalized_checkpoint_updated(&self) -> bool {
        match *self {
            Self::CanonicalChainExtended {
                finalized_checkpoint_updated,
                ..
            }
            | Self::AlternateChainExtended {
                finalized_checkpoint_updated,
                ..
            }
            | Self::Reorganized {
                finalized_checkpoint_updated,
                ..
            } => finalized_checkpoint_updated,
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ApplyTickChanges {
    TickUpdated,
    SlotUpdated,
}

impl ApplyTickChanges {
    #[must_use]
    pub const fn is_slot_updated(self) -> bool {
        matches!(self, Self::SlotUpdated)
    }
}
