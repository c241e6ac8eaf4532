//! LMD-GHOST fork choice.
//!
//! Unfinalized blocks are kept in an explicit node map rooted at the latest
//! finalized block. The head rule descends from the justified checkpoint,
//! at each step picking the child whose subtree carries the greatest latest-
//! message attesting weight; ties go to the larger block root interpreted as
//! a big-endian integer. Both rules are part of the protocol, not options.
//!
//! The store is owned by a single writer. Persistent maps make cloning the
//! whole store cheap, which is what query snapshots rely on.

pub use crate::{
    error::Error,
    misc::{
        ApplyBlockChanges, ApplyTickChanges, AttestationAction, BlockAction, BlockOrigin,
        ForkChoiceNode, LatestMessage,
    },
    store::{Storage, Store},
};

mod error;
mod misc;
mod store;

/// Blocks further in the future than this are rejected outright.
///
/// The rejection is transient: the same bytes become acceptable once the
/// clock catches up, but the block is not parked and retried automatically.
pub const MAX_FUTURE_SLOTS: u64 = 32;
