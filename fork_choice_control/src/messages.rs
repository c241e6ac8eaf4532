use std::sync::mpsc::Sender;

use anyhow::Result;
use log::debug;

use clock::Tick;
use fork_choice_store::{AttestationAction, BlockAction, BlockOrigin};
use types::phase0::primitives::H256;

pub enum MutatorMessage<W> {
    Tick {
        wait_group: W,
        tick: Tick,
    },
    Block {
        wait_group: W,
        result: Result<BlockAction>,
        origin: BlockOrigin,
        block_root: H256,
    },
    Attestation {
        wait_group: W,
        result: Result<AttestationAction>,
    },
    BlockAttestations {
        wait_group: W,
        results: Vec<Result<AttestationAction>>,
    },
    // Dropping `Controller.mutator_tx` is not enough to stop the mutator
    // thread because tasks hold their own senders.
    Stop,
}

impl<W> MutatorMessage<W> {
    pub(crate) fn send(self, tx: &Sender<Self>) {
        // Don't log the value because it can contain entire `BeaconState`s.
        if tx.send(self).is_err() {
            // This can happen if the mutator thread exits early due to failure
            // or if a task completes after the `Controller` is dropped.
            debug!("send to mutator failed because the receiver was dropped");
        }
    }
}
