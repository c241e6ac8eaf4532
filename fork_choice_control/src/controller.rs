use core::panic::AssertUnwindSafe;
use std::{
    sync::{mpsc::Sender, Arc},
    thread::{Builder, JoinHandle},
};

use anyhow::{anyhow, Context as _, Result};
use arc_swap::{ArcSwap, Guard};
use crossbeam_utils::sync::WaitGroup;
use thiserror::Error;

use clock::Tick;
use fork_choice_store::{BlockOrigin, ForkChoiceNode, Store};
use helper_functions::verifier::Verifier;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::{Attestation, Checkpoint, SignedBeaconBlock},
        primitives::{Slot, H256},
    },
    traits::StateTransition,
};

use crate::{
    attestation_processor::AttestationProcessor,
    block_processor::BlockProcessor,
    events::EventChannels,
    messages::MutatorMessage,
    mutator::Mutator,
    storage::Storage,
    tasks::{AttestationTask, BlockTask},
    thread_pool::ThreadPool,
    wait::Wait,
};

/// The public face of the fork choice machinery.
///
/// `on_*` methods return quickly: they spawn validation tasks or enqueue
/// messages for the mutator thread. Query methods read a recent, consistent
/// snapshot of the store. There is no back-pressure on the mutator queue;
/// bounding ingress is the caller's concern.
pub struct Controller<W: Wait> {
    store_snapshot: Arc<ArcSwap<Store<Storage>>>,
    block_processor: Arc<BlockProcessor>,
    attestation_processor: Arc<AttestationProcessor>,
    storage: Arc<Storage>,
    thread_pool: ThreadPool,
    wait_group: W::Swappable,
    mutator_tx: Sender<MutatorMessage<W>>,
}

impl<W: Wait> Drop for Controller<W> {
    fn drop(&mut self) {
        MutatorMessage::Stop.send(&self.mutator_tx);
    }
}

impl<W: Wait> Controller<W> {
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        storage: Arc<Storage>,
        state_transition: Arc<dyn StateTransition>,
        verifier: Arc<dyn Verifier>,
        anchor_block: &SignedBeaconBlock,
        anchor_state: &BeaconState,
        tick: Tick,
        event_channels: Arc<EventChannels>,
        unfinalized_blocks: Vec<Arc<SignedBeaconBlock>>,
    ) -> Result<(Arc<Self>, MutatorHandle<W>)> {
        let anchor = ForkChoiceNode {
            slot: anchor_block.message.slot,
            block_root: anchor_block.block_root(),
            state_root: anchor_block.message.state_root,
            parent_root: anchor_block.message.parent_root,
            justified_checkpoint: anchor_state.current_justified_checkpoint,
            finalized_checkpoint: anchor_state.finalized_checkpoint,
        };

        let mut store = Store::new(
            config.clone(),
            storage.clone(),
            anchor,
            anchor_state,
            Tick::start_of_slot(anchor.slot),
        );

        store.apply_tick(tick)?;

        let store_snapshot = Arc::new(ArcSwap::from_pointee(store));
        let thread_pool = ThreadPool::new()?;
        let (mutator_tx, mutator_rx) = std::sync::mpsc::channel();

        let block_processor = Arc::new(BlockProcessor::new(
            config.clone(),
            storage.clone(),
            state_transition,
        ));

        let attestation_processor = Arc::new(AttestationProcessor::new(
            config,
            storage.clone(),
            verifier,
        ));

        let mut mutator = Mutator::new(
            store_snapshot.clone(),
            storage.clone(),
            block_processor.clone(),
            attestation_processor.clone(),
            thread_pool.clone(),
            event_channels,
            mutator_tx.clone(),
            mutator_rx,
        );

        mutator.process_unfinalized_blocks(unfinalized_blocks)?;

        let join_handle = Builder::new().name("store-mutator".to_owned()).spawn(|| {
            // The closure should be unwind safe. The instance of `Store` used
            // by the mutator may become inconsistent on a panic but cannot be
            // observed because the shared snapshot is only updated with
            // values that are consistent.
            std::panic::catch_unwind(AssertUnwindSafe(move || mutator.run()))
                .map_err(|_| anyhow!(Error::MutatorPanicked))?
                .context(Error::MutatorFailed)
        })?;

        let controller = Arc::new(Self {
            store_snapshot,
            block_processor,
            attestation_processor,
            storage,
            thread_pool,
            wait_group: W::Swappable::default(),
            mutator_tx: mutator_tx.clone(),
        });

        let mutator_handle = MutatorHandle {
            join_handle: Some(join_handle),
            mutator_tx,
        };

        Ok((controller, mutator_handle))
    }

    // This should be called at the start of every slot.
    pub fn on_tick(&self, tick: Tick) {
        // Don't spawn a task because it would have very little to do.
        MutatorMessage::Tick {
            wait_group: self.owned_wait_group(),
            tick,
        }
        .send(&self.mutator_tx);
    }

    pub fn on_gossip_block(&self, block: Arc<SignedBeaconBlock>) {
        self.spawn_block_task(block, BlockOrigin::Gossip);
    }

    pub fn on_requested_block(&self, block: Arc<SignedBeaconBlock>) {
        self.spawn_block_task(block, BlockOrigin::Requested);
    }

    pub fn on_own_block(&self, block: Arc<SignedBeaconBlock>) {
        self.spawn_block_task(block, BlockOrigin::Own);
    }

    pub fn on_block(&self, block: Arc<SignedBeaconBlock>, origin: BlockOrigin) {
        self.spawn_block_task(block, origin);
    }

    pub fn on_attestation(&self, attestation: Arc<Attestation>) {
        self.thread_pool.spawn(AttestationTask {
            store_snapshot: self.owned_store_snapshot(),
            attestation_processor: self.attestation_processor.clone(),
            mutator_tx: self.mutator_tx.clone(),
            wait_group: self.owned_wait_group(),
            attestation,
        });
    }

    pub fn stop(&self) {
        MutatorMessage::Stop.send(&self.mutator_tx);
    }

    #[must_use]
    pub fn head(&self) -> ForkChoiceNode {
        self.store_snapshot().head()
    }

    #[must_use]
    pub fn head_state_root(&self) -> H256 {
        self.store_snapshot().head_state_root()
    }

    #[must_use]
    pub fn justified_checkpoint(&self) -> Checkpoint {
        self.store_snapshot().justified_checkpoint()
    }

    #[must_use]
    pub fn finalized_checkpoint(&self) -> Checkpoint {
        self.store_snapshot().finalized_checkpoint()
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.store_snapshot().contains_block(block_root)
    }

    #[must_use]
    pub fn slot(&self) -> Slot {
        self.store_snapshot().slot()
    }

    pub(crate) fn store_snapshot(&self) -> Guard<Arc<Store<Storage>>> {
        self.store_snapshot.load()
    }

    pub(crate) fn owned_store_snapshot(&self) -> Arc<Store<Storage>> {
        self.store_snapshot.load_full()
    }

    fn spawn_block_task(&self, block: Arc<SignedBeaconBlock>, origin: BlockOrigin) {
        self.thread_pool.spawn(BlockTask {
            store_snapshot: self.owned_store_snapshot(),
            block_processor: self.block_processor.clone(),
            mutator_tx: self.mutator_tx.clone(),
            wait_group: self.owned_wait_group(),
            block,
            origin,
        });
    }

    fn owned_wait_group(&self) -> W {
        Wait::load_and_clone(&self.wait_group)
    }
}

impl Controller<WaitGroup> {
    /// Blocks until every task spawned so far and every message it produced
    /// has been processed by the mutator. Only used in tests.
    pub fn wait_for_tasks(&self) {
        let old = {
            let mut guard = self
                .wait_group
                .lock()
                .expect("wait group mutex is poisoned");

            core::mem::take(&mut *guard)
        };

        old.wait();
    }
}

/// A wrapper over [`JoinHandle`] that can be used to wait for the mutator
/// thread to finish.
pub struct MutatorHandle<W> {
    join_handle: Option<JoinHandle<Result<()>>>,
    mutator_tx: Sender<MutatorMessage<W>>,
}

impl<W> Drop for MutatorHandle<W> {
    fn drop(&mut self) {
        // Stop the mutator thread to avoid a deadlock if the corresponding
        // `Controller` hasn't been dropped yet.
        self.stop();

        let result = self.join_internal();

        if !std::thread::panicking() {
            result.expect("mutator thread should succeed when joined implicitly");
        }
    }
}

impl<W> MutatorHandle<W> {
    pub fn join(mut self) -> Result<()> {
        self.join_internal()
    }

    fn stop(&self) {
        MutatorMessage::Stop.send(&self.mutator_tx);
    }

    fn join_internal(&mut self) -> Result<()> {
        // `MutatorHandle::join_internal` is called twice in normal operation.
        match self.join_handle.take() {
            Some(join_handle) => join_handle
                .join()
                .expect("mutator thread handles panics internally"),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
enum Error {
    #[error("mutator panicked")]
    MutatorPanicked,
    #[error("mutator failed")]
    MutatorFailed,
}
