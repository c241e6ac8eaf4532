use std::sync::{mpsc::Sender, Arc};

use fork_choice_store::{BlockOrigin, Store};
use types::phase0::containers::{Attestation, SignedBeaconBlock};

use crate::{
    attestation_processor::AttestationProcessor,
    block_processor::BlockProcessor,
    messages::MutatorMessage,
    storage::Storage,
    thread_pool::Run,
    wait::Wait,
};

pub struct BlockTask<W> {
    pub store_snapshot: Arc<Store<Storage>>,
    pub block_processor: Arc<BlockProcessor>,
    pub mutator_tx: Sender<MutatorMessage<W>>,
    pub wait_group: W,
    pub block: Arc<SignedBeaconBlock>,
    pub origin: BlockOrigin,
}

impl<W: Wait> Run for BlockTask<W> {
    fn run(self: Box<Self>) {
        let Self {
            store_snapshot,
            block_processor,
            mutator_tx,
            wait_group,
            block,
            origin,
        } = *self;

        let block_root = block.block_root();
        let result = block_processor.validate_block(&store_snapshot, &block, origin);

        MutatorMessage::Block {
            wait_group,
            result,
            origin,
            block_root,
        }
        .send(&mutator_tx);
    }
}

pub struct AttestationTask<W> {
    pub store_snapshot: Arc<Store<Storage>>,
    pub attestation_processor: Arc<AttestationProcessor>,
    pub mutator_tx: Sender<MutatorMessage<W>>,
    pub wait_group: W,
    pub attestation: Arc<Attestation>,
}

impl<W: Wait> Run for AttestationTask<W> {
    fn run(self: Box<Self>) {
        let Self {
            store_snapshot,
            attestation_processor,
            mutator_tx,
            wait_group,
            attestation,
        } = *self;

        let result = attestation_processor.validate_attestation(&store_snapshot, &attestation);

        MutatorMessage::Attestation { wait_group, result }.send(&mutator_tx);
    }
}

/// Validates the attestations embedded in a block body.
///
/// Spawned only after the block itself has been stored.
pub struct BlockAttestationsTask<W> {
    pub store_snapshot: Arc<Store<Storage>>,
    pub attestation_processor: Arc<AttestationProcessor>,
    pub mutator_tx: Sender<MutatorMessage<W>>,
    pub wait_group: W,
    pub block: Arc<SignedBeaconBlock>,
}

impl<W: Wait> Run for BlockAttestationsTask<W> {
    fn run(self: Box<Self>) {
        let Self {
            store_snapshot,
            attestation_processor,
            mutator_tx,
            wait_group,
            block,
        } = *self;

        let results = block
            .message
            .body
            .attestations
            .iter()
            .map(|attestation| {
                attestation_processor.validate_attestation(&store_snapshot, attestation)
            })
            .collect();

        MutatorMessage::BlockAttestations {
            wait_group,
            results,
        }
        .send(&mutator_tx);
    }
}
