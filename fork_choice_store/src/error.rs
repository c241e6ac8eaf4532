use thiserror::Error;

use types::phase0::primitives::{Epoch, Slot, Version, H256};

#[derive(Debug, Error)]
pub enum Error {
    #[error("block {block_root:?} has unknown parent {parent_root:?}")]
    UnknownParent { block_root: H256, parent_root: H256 },
    #[error(
        "block {block_root:?} is not later than its parent \
         (slot: {slot}, parent_slot: {parent_slot})"
    )]
    SlotNotLaterThanParent {
        block_root: H256,
        slot: Slot,
        parent_slot: Slot,
    },
    #[error(
        "block {block_root:?} is too far in the future \
         (slot: {slot}, current_slot: {current_slot})"
    )]
    FutureSlot {
        block_root: H256,
        slot: Slot,
        current_slot: Slot,
    },
    #[error("state {state_root:?} referenced by block {block_root:?} is not in storage")]
    MissingState { block_root: H256, state_root: H256 },
    #[error("attestation votes for unknown block {beacon_block_root:?}")]
    AttestationForUnknownBlock { beacon_block_root: H256 },
    #[error(
        "attestation targets an epoch too far in the future \
         (target_epoch: {target_epoch}, current_epoch: {current_epoch})"
    )]
    AttestationTargetsFutureEpoch {
        target_epoch: Epoch,
        current_epoch: Epoch,
    },
    #[error(
        "attestation data is inconsistent \
         (slot: {slot}, target_epoch: {target_epoch})"
    )]
    AttestationTargetsWrongEpoch { slot: Slot, target_epoch: Epoch },
    #[error("attestation has an invalid signature")]
    InvalidAttestationSignature,
    #[error("checkpoint root {checkpoint_root:?} is not in the block tree")]
    UnknownCheckpoint { checkpoint_root: H256 },
    #[error(
        "existing genesis block has a different state root \
         (existing: {existing:?}, computed: {computed:?}); \
         the node was previously initialized with a different configuration, \
         wipe the store directory to switch networks"
    )]
    GenesisMismatch { existing: H256, computed: H256 },
    #[error(
        "stored chain does not match the configuration \
         (config: {config_name}, expected fork version: {expected:?}, stored: {actual:?})"
    )]
    ConfigMismatch {
        config_name: String,
        expected: Version,
        actual: Version,
    },
}
