use std::{
    collections::HashMap,
    sync::{
        mpsc::{Receiver, Sender},
        Arc,
    },
};

use anyhow::{anyhow, Result};
use arc_swap::ArcSwap;
use log::{debug, warn};

use clock::Tick;
use fork_choice_store::{
    ApplyBlockChanges, AttestationAction, BlockAction, BlockOrigin, ForkChoiceNode, Store,
};
use types::phase0::{
    beacon_state::BeaconState, containers::SignedBeaconBlock, primitives::H256,
};

use crate::{
    attestation_processor::AttestationProcessor,
    block_processor::BlockProcessor,
    events::EventChannels,
    messages::MutatorMessage,
    storage::Storage,
    tasks::{BlockAttestationsTask, BlockTask},
    thread_pool::ThreadPool,
    wait::Wait,
};

struct PendingBlock {
    block: Arc<SignedBeaconBlock>,
    origin: BlockOrigin,
}

/// The single writer of the fork choice store.
///
/// All mutations arrive over one queue, which is what provides the FIFO
/// ordering between blocks with the same parent and the serialisation of
/// attestation votes.
pub struct Mutator<W: Wait> {
    store: Arc<Store<Storage>>,
    store_snapshot: Arc<ArcSwap<Store<Storage>>>,
    storage: Arc<Storage>,
    block_processor: Arc<BlockProcessor>,
    attestation_processor: Arc<AttestationProcessor>,
    thread_pool: ThreadPool,
    event_channels: Arc<EventChannels>,
    delayed_until_block: HashMap<H256, Vec<PendingBlock>>,
    mutator_tx: Sender<MutatorMessage<W>>,
    mutator_rx: Receiver<MutatorMessage<W>>,
}

impl<W: Wait> Mutator<W> {
    #[expect(clippy::too_many_arguments)]
    pub fn new(
        store_snapshot: Arc<ArcSwap<Store<Storage>>>,
        storage: Arc<Storage>,
        block_processor: Arc<BlockProcessor>,
        attestation_processor: Arc<AttestationProcessor>,
        thread_pool: ThreadPool,
        event_channels: Arc<EventChannels>,
        mutator_tx: Sender<MutatorMessage<W>>,
        mutator_rx: Receiver<MutatorMessage<W>>,
    ) -> Self {
        Self {
            store: store_snapshot.load_full(),
            store_snapshot,
            storage,
            block_processor,
            attestation_processor,
            thread_pool,
            event_channels,
            delayed_until_block: HashMap::new(),
            mutator_tx,
            mutator_rx,
        }
    }

    pub fn run(&mut self) -> Result<()> {
        loop {
            match self
                .mutator_rx
                .recv()
                .expect("sender in Controller is not dropped until mutator thread exits")
            {
                MutatorMessage::Tick { wait_group, tick } => {
                    self.handle_tick(&wait_group, tick)?;
                }
                MutatorMessage::Block {
                    wait_group,
                    result,
                    origin,
                    block_root,
                } => self.handle_block(&wait_group, result, origin, block_root)?,
                MutatorMessage::Attestation { wait_group, result } => {
                    self.handle_attestation(&wait_group, result)?;
                }
                MutatorMessage::BlockAttestations {
                    wait_group,
                    results,
                } => self.handle_block_attestations(&wait_group, results)?,
                MutatorMessage::Stop => {
                    // Pending blocks in the orphan pool are dropped.
                    break Ok(());
                }
            }
        }
    }

    /// Replays persisted blocks above the anchor through the normal pipeline.
    pub fn process_unfinalized_blocks(
        &mut self,
        blocks: impl IntoIterator<Item = Arc<SignedBeaconBlock>>,
    ) -> Result<()> {
        let wait_group = W::default();

        for block in blocks {
            let origin = BlockOrigin::Persisted;
            let block_root = block.block_root();

            // State transitions within a single fork must be performed
            // sequentially, so there is no point in spawning tasks here.
            let result = self.block_processor.validate_block(&self.store, &block, origin);

            self.handle_block(&wait_group, result, origin, block_root)?;
        }

        Ok(())
    }

    fn handle_tick(&mut self, _wait_group: &W, tick: Tick) -> Result<()> {
        if let Some(changes) = self.store_mut().apply_tick(tick)? {
            if changes.is_slot_updated() {
                debug!("slot updated (slot: {})", tick.slot);
            }

            self.update_store_snapshot();
        }

        Ok(())
    }

    fn handle_block(
        &mut self,
        wait_group: &W,
        result: Result<BlockAction>,
        origin: BlockOrigin,
        block_root: H256,
    ) -> Result<()> {
        match result {
            Ok(BlockAction::Accept {
                node,
                block,
                post_state,
            }) => self.accept_block(wait_group, node, &block, &post_state)?,
            Ok(BlockAction::Ignore) => {
                debug!("block ignored (block_root: {block_root:?}, origin: {origin:?})");
            }
            Ok(BlockAction::DelayUntilParent { block }) => {
                let parent_root = block.message.parent_root;

                if self.store.contains_block(parent_root) {
                    // The parent arrived while the block was being validated.
                    self.retry_block(wait_group.clone(), PendingBlock { block, origin });
                } else {
                    debug!(
                        "block delayed until parent \
                         (block_root: {block_root:?}, parent_root: {parent_root:?})",
                    );

                    self.delayed_until_block
                        .entry(parent_root)
                        .or_default()
                        .push(PendingBlock { block, origin });
                }
            }
            Err(error) => {
                warn!(
                    "block rejected \
                     (block_root: {block_root:?}, error: {error:#}, origin: {origin:?})",
                );
            }
        }

        Ok(())
    }

    fn handle_attestation(
        &mut self,
        _wait_group: &W,
        result: Result<AttestationAction>,
    ) -> Result<()> {
        self.apply_attestation_result(result);
        self.refresh_head_after_votes()
    }

    fn handle_block_attestations(
        &mut self,
        _wait_group: &W,
        results: Vec<Result<AttestationAction>>,
    ) -> Result<()> {
        for result in results {
            self.apply_attestation_result(result);
        }

        self.refresh_head_after_votes()
    }

    fn apply_attestation_result(&mut self, result: Result<AttestationAction>) {
        match result {
            Ok(AttestationAction::Accept {
                beacon_block_root,
                target_epoch,
                attesting_indices,
            }) => {
                for validator_index in attesting_indices {
                    self.store_mut()
                        .apply_attestation(validator_index, beacon_block_root, target_epoch);
                }
            }
            Ok(AttestationAction::Ignore) => {}
            Err(error) => warn!("attestation rejected (error: {error:#})"),
        }
    }

    fn refresh_head_after_votes(&mut self) -> Result<()> {
        let old_head = self.store_mut().refresh_head()?;

        self.update_store_snapshot();

        if let Some(old_head) = old_head {
            let head = self.store.head();

            debug!(
                "head changed by attestations \
                 (old: {:?}, new: {:?})",
                old_head.block_root, head.block_root,
            );

            self.persist_chain_head(&head)?;
            self.event_channels
                .send_head_event(self.store.config(), &head);
        }

        Ok(())
    }

    fn accept_block(
        &mut self,
        wait_group: &W,
        node: ForkChoiceNode,
        block: &Arc<SignedBeaconBlock>,
        post_state: &Arc<BeaconState>,
    ) -> Result<()> {
        // The same block may have been validated twice in parallel.
        if self.store.contains_block(node.block_root) {
            debug!("block ignored as a duplicate (block_root: {:?})", node.block_root);
            return Ok(());
        }

        // A block may become orphaned while being processed, either by
        // falling behind the finalized slot or by its parent being pruned.
        if node.slot <= self.store.finalized_slot()
            || !self.store.contains_block(node.parent_root)
        {
            debug!(
                "block became orphaned while being processed \
                 (block_root: {:?}, finalized_slot: {})",
                node.block_root,
                self.store.finalized_slot(),
            );

            return Ok(());
        }

        // Stored: one committed batch for the block, its post-state,
        // and the canonical slot index.
        self.storage
            .append_block_and_state(block, node.block_root, post_state, node.state_root)?;

        let changes = self.store_mut().apply_block(node)?;

        // The snapshot must be updated before spawning tasks to retry delayed
        // blocks or notifying other components, so that they cannot observe
        // the store in an inconsistent state.
        self.update_store_snapshot();

        debug!("block accepted (block_root: {:?}, slot: {})", node.block_root, node.slot);

        // Notified: the block event always precedes the head event,
        // and checkpoint events follow the block that carried them.
        self.event_channels
            .send_block_event(node.slot, node.block_root);

        if changes.is_head_updated() {
            let head = self.store.head();
            self.persist_chain_head(&head)?;
            self.event_channels
                .send_head_event(self.store.config(), &head);
        }

        if changes.is_justified_checkpoint_updated() {
            let checkpoint = self.store.justified_checkpoint();
            let state_root = self.checkpoint_state_root(checkpoint.root)?;

            self.storage
                .update_justified_checkpoint(checkpoint.root, state_root)?;
            self.event_channels
                .send_justified_checkpoint_event(checkpoint, state_root);
        }

        if changes.is_finalized_checkpoint_updated() {
            let checkpoint = self.store.finalized_checkpoint();
            let state_root = self.checkpoint_state_root(checkpoint.root)?;

            self.storage
                .update_finalized_checkpoint(checkpoint.root, state_root)?;
            self.event_channels
                .send_finalized_checkpoint_event(checkpoint, state_root);
        }

        if let ApplyBlockChanges::Reorganized { old_head, .. } = changes {
            debug!(
                "chain reorganized (old_head: {:?}, new_head: {:?})",
                old_head.block_root,
                self.store.head().block_root,
            );
        }

        // Attestations from the block body are forwarded only after the
        // block has been stored.
        if !block.message.body.attestations.is_empty() {
            self.thread_pool.spawn(BlockAttestationsTask {
                store_snapshot: self.owned_store(),
                attestation_processor: self.attestation_processor.clone(),
                mutator_tx: self.mutator_tx.clone(),
                wait_group: wait_group.clone(),
                block: block.clone(),
            });
        }

        // Re-drain the orphan pool now that this block is stored.
        if let Some(pending_blocks) = self.delayed_until_block.remove(&node.block_root) {
            debug!("retrying blocks delayed until block {:?}", node.block_root);

            for pending_block in pending_blocks {
                self.retry_block(wait_group.clone(), pending_block);
            }
        }

        Ok(())
    }

    fn retry_block(&self, wait_group: W, pending_block: PendingBlock) {
        let PendingBlock { block, origin } = pending_block;

        self.thread_pool.spawn(BlockTask {
            store_snapshot: self.owned_store(),
            block_processor: self.block_processor.clone(),
            mutator_tx: self.mutator_tx.clone(),
            wait_group,
            block,
            origin,
        });
    }

    fn persist_chain_head(&self, head: &ForkChoiceNode) -> Result<()> {
        let block = self
            .storage
            .block_by_root(head.block_root)?
            .ok_or_else(|| anyhow!("head block {:?} is not in storage", head.block_root))?;

        let state = self
            .storage
            .state_by_state_root(head.state_root)?
            .ok_or_else(|| anyhow!("head state {:?} is not in storage", head.state_root))?;

        self.storage
            .store_chain_head(&block, head.block_root, &state, head.state_root)
    }

    fn checkpoint_state_root(&self, block_root: H256) -> Result<H256> {
        self.store
            .node(block_root)
            .map(|node| node.state_root)
            .ok_or_else(|| anyhow!("checkpoint block {block_root:?} is not in the block tree"))
    }

    fn update_store_snapshot(&self) {
        self.store_snapshot.store(self.store.clone());
    }

    fn store_mut(&mut self) -> &mut Store<Storage> {
        Arc::make_mut(&mut self.store)
    }

    fn owned_store(&self) -> Arc<Store<Storage>> {
        self.store.clone()
    }
}
