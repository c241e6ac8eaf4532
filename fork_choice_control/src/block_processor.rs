use std::sync::Arc;

use anyhow::{ensure, Context as _, Result};

use fork_choice_store::{
    BlockAction, BlockOrigin, Error, ForkChoiceNode, Store, MAX_FUTURE_SLOTS,
};
use types::{
    config::Config,
    phase0::containers::SignedBeaconBlock,
    traits::{StateTransition, StateTransitionOptions},
};

use crate::storage::Storage;

/// Validates blocks against a store snapshot and applies the state
/// transition. Runs on worker threads; never mutates the store.
pub struct BlockProcessor {
    config: Arc<Config>,
    storage: Arc<Storage>,
    state_transition: Arc<dyn StateTransition>,
}

impl BlockProcessor {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        storage: Arc<Storage>,
        state_transition: Arc<dyn StateTransition>,
    ) -> Self {
        Self {
            config,
            storage,
            state_transition,
        }
    }

    pub fn validate_block(
        &self,
        store: &Store<Storage>,
        block: &Arc<SignedBeaconBlock>,
        origin: BlockOrigin,
    ) -> Result<BlockAction> {
        let block_root = block.block_root();
        let slot = block.message.slot;
        let parent_root = block.message.parent_root;

        // Re-applying an already stored block is a no-op.
        if store.contains_block(block_root) || self.storage.contains_block(block_root)? {
            return Ok(BlockAction::Ignore);
        }

        ensure!(
            slot <= store.slot() + MAX_FUTURE_SLOTS,
            Error::FutureSlot {
                block_root,
                slot,
                current_slot: store.slot(),
            },
        );

        let Some(parent) = store.node(parent_root) else {
            return Ok(BlockAction::DelayUntilParent {
                block: block.clone(),
            });
        };

        ensure!(
            slot > parent.slot,
            Error::SlotNotLaterThanParent {
                block_root,
                slot,
                parent_slot: parent.slot,
            },
        );

        let parent_state = self
            .storage
            .state_by_state_root(parent.state_root)?
            .ok_or(Error::MissingState {
                block_root: parent.block_root,
                state_root: parent.state_root,
            })?;

        let options = StateTransitionOptions {
            verify_signatures: origin.verify_signatures(),
        };

        // Errors are permanent for these exact block bytes.
        let post_state = self
            .state_transition
            .state_transition(&self.config, &parent_state, block, options)
            .context("block failed the state transition")?;

        let node = ForkChoiceNode {
            slot,
            block_root,
            state_root: block.message.state_root,
            parent_root,
            justified_checkpoint: post_state.current_justified_checkpoint,
            finalized_checkpoint: post_state.finalized_checkpoint,
        };

        Ok(BlockAction::Accept {
            node,
            block: block.clone(),
            post_state: Arc::new(post_state),
        })
    }
}
