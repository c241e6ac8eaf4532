use thiserror::Error;

use types::phase0::primitives::{CommitteeIndex, Epoch, Slot};

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum Error {
    #[error("no active validators at epoch {epoch}")]
    NoActiveValidators { epoch: Epoch },
    #[error(
        "committee index is out of bounds \
         (slot: {slot}, index: {index}, committees_per_slot: {committees_per_slot})"
    )]
    CommitteeIndexOutOfBounds {
        slot: Slot,
        index: CommitteeIndex,
        committees_per_slot: u64,
    },
    #[error(
        "aggregation bitlist length does not match committee size \
         (bits: {bits}, committee: {committee})"
    )]
    AggregationBitlistLengthMismatch { bits: usize, committee: usize },
}
