//! Single-writer control layer around the fork choice store.
//!
//! The `on_*` methods of [`Controller`] spawn tasks that validate objects
//! against a recent snapshot of the store and send the results to a mutator
//! thread, which owns the store and serialises every mutation. Query methods
//! read the latest snapshot and never wait.

pub use crate::{
    attestation_processor::AttestationProcessor,
    block_processor::BlockProcessor,
    controller::{Controller, MutatorHandle},
    events::{
        BlockEvent, CheckpointEvent, Event, EventChannels, ForkDigestEvent, HeadEvent, Topic,
        DEFAULT_MAX_EVENTS,
    },
    storage::{ChainHeadRecord, Storage},
    wait::Wait,
};

mod attestation_processor;
mod block_processor;
mod controller;
mod events;
mod messages;
mod mutator;
mod storage;
mod tasks;
mod thread_pool;
mod wait;

#[cfg(test)]
mod helpers;
