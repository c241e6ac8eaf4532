use std::{collections::HashSet, sync::Arc};

use anyhow::{ensure, Result};
use im::{HashMap, Vector};
use log::debug;

use clock::Tick;
use helper_functions::predicates;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::Checkpoint,
        primitives::{Epoch, Gwei, Slot, ValidatorIndex, H256},
    },
};

use crate::{
    error::Error,
    misc::{ApplyBlockChanges, ApplyTickChanges, ForkChoiceNode, LatestMessage},
};

/// State lookups the store needs when checkpoints advance.
pub trait Storage: Send + Sync {
    fn stored_state_by_state_root(&self, state_root: H256) -> Result<Option<Arc<BeaconState>>>;
}

/// The fork choice store.
///
/// Owned by a single writer. Cloning is cheap thanks to the persistent maps,
/// which is how consistent query snapshots are published.
#[derive(Clone)]
pub struct Store<S> {
    config: Arc<Config>,
    storage: Arc<S>,
    tick: Tick,
    justified_checkpoint: Checkpoint,
    finalized_checkpoint: Checkpoint,
    // Effective balances of validators active at the justified checkpoint,
    // indexed by validator index. Vote weights are computed from these.
    justified_balances: Arc<Vec<Gwei>>,
    nodes: HashMap<H256, ForkChoiceNode>,
    children: HashMap<H256, Vector<H256>>,
    latest_messages: HashMap<ValidatorIndex, LatestMessage>,
    head: ForkChoiceNode,
}

impl<S: Storage> Store<S> {
    pub fn new(
        config: Arc<Config>,
        storage: Arc<S>,
        anchor: ForkChoiceNode,
        anchor_state: &BeaconState,
        tick: Tick,
    ) -> Self {
        // The anchor doubles as both checkpoints. Its embedded checkpoints may
        // reference blocks older than the anchor, which are not in the tree.
        let checkpoint = Checkpoint {
            epoch: config.epoch_at_slot(anchor.slot),
            root: anchor.block_root,
        };

        let justified_balances =
            Arc::new(active_effective_balances(anchor_state, checkpoint.epoch));

        let mut nodes = HashMap::new();
        nodes.insert(anchor.block_root, anchor);

        Self {
            config,
            storage,
            tick,
            justified_checkpoint: checkpoint,
            finalized_checkpoint: checkpoint,
            justified_balances,
            nodes,
            children: HashMap::new(),
            latest_messages: HashMap::new(),
            head: anchor,
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub const fn slot(&self) -> Slot {
        self.tick.slot
    }

    #[must_use]
    pub fn current_epoch(&self) -> Epoch {
        self.config.epoch_at_slot(self.slot())
    }

    #[must_use]
    pub const fn head(&self) -> ForkChoiceNode {
        self.head
    }

    #[must_use]
    pub const fn head_state_root(&self) -> H256 {
        self.head.state_root
    }

    #[must_use]
    pub const fn justified_checkpoint(&self) -> Checkpoint {
        self.justified_checkpoint
    }

    #[must_use]
    pub const fn finalized_checkpoint(&self) -> Checkpoint {
        self.finalized_checkpoint
    }

    #[must_use]
    pub fn finalized_slot(&self) -> Slot {
        self.nodes
            .get(&self.finalized_checkpoint.root)
            .map(|node| node.slot)
            .unwrap_or_else(|| {
                self.config
                    .start_slot_at_epoch(self.finalized_checkpoint.epoch)
            })
    }

    #[must_use]
    pub fn contains_block(&self, block_root: H256) -> bool {
        self.nodes.contains_key(&block_root)
    }

    #[must_use]
    pub fn node(&self, block_root: H256) -> Option<ForkChoiceNode> {
        self.nodes.get(&block_root).copied()
    }

    #[must_use]
    pub fn latest_message(&self, validator_index: ValidatorIndex) -> Option<LatestMessage> {
        self.latest_messages.get(&validator_index).copied()
    }

    /// Whether `descendant_root` is `ancestor_root` or in its subtree.
    #[must_use]
    pub fn is_ancestor_or_equal(&self, ancestor_root: H256, mut descendant_root: H256) -> bool {
        let Some(ancestor) = self.nodes.get(&ancestor_root) else {
            return false;
        };

        loop {
            if descendant_root == ancestor_root {
                break true;
            }

            let Some(descendant) = self.nodes.get(&descendant_root) else {
                break false;
            };

            if descendant.slot <= ancestor.slot {
                break false;
            }

            descendant_root = descendant.parent_root;
        }
    }

    /// Advances internal time. Performs no state transitions.
    pub fn apply_tick(&mut self, tick: Tick) -> Result<Option<ApplyTickChanges>> {
        if tick <= self.tick {
            return Ok(None);
        }

        let slot_updated = tick.slot > self.tick.slot;

        self.tick = tick;

        let changes = if slot_updated {
            ApplyTickChanges::SlotUpdated
        } else {
            ApplyTickChanges::TickUpdated
        };

        Ok(Some(changes))
    }

    /// Inserts a validated block and advances the checkpoints it carries.
    ///
    /// The parent must already be present. Blocks are write-once; the caller
    /// filters out roots that are already in the store.
    pub fn apply_block(&mut self, node: ForkChoiceNode) -> Result<ApplyBlockChanges> {
        let ForkChoiceNode {
            block_root,
            parent_root,
            ..
        } = node;

        ensure!(
            self.nodes.contains_key(&parent_root),
            Error::UnknownParent {
                block_root,
                parent_root,
            },
        );

        self.nodes.insert(block_root, node);

        let mut siblings = self.children.get(&parent_root).cloned().unwrap_or_default();
        siblings.push_back(block_root);
        self.children.insert(parent_root, siblings);

        let justified_checkpoint_updated =
            node.justified_checkpoint.epoch > self.justified_checkpoint.epoch;

        if justified_checkpoint_updated {
            self.update_justified_checkpoint(node.justified_checkpoint)?;
        }

        let finalized_checkpoint_updated =
            node.finalized_checkpoint.epoch > self.finalized_checkpoint.epoch;

        if finalized_checkpoint_updated {
            self.update_finalized_checkpoint(node.finalized_checkpoint);
        }

        let old_head = self.head;
        self.head = self.compute_head()?;

        let changes = if self.head.block_root == old_head.block_root {
            ApplyBlockChanges::AlternateChainExtended {
                justified_checkpoint_updated,
                finalized_checkpoint_updated,
            }
        } else if self.head.block_root == block_root && parent_root == old_head.block_root {
            ApplyBlockChanges::CanonicalChainExtended {
                justified_checkpoint_updated,
                finalized_checkpoint_updated,
            }
        } else {
            ApplyBlockChanges::Reorganized {
                old_head,
                justified_checkpoint_updated,
                finalized_checkpoint_updated,
            }
        };

        Ok(changes)
    }

    /// Records a validator's vote if it is newer than the stored one.
    ///
    /// Returns whether the latest message was overwritten.
    pub fn apply_attestation(
        &mut self,
        validator_index: ValidatorIndex,
        beacon_block_root: H256,
        target_epoch: Epoch,
    ) -> bool {
        match self.latest_messages.get(&validator_index) {
            Some(message) if target_epoch <= message.epoch => false,
            _ => {
                self.latest_messages.insert(
                    validator_index,
                    LatestMessage {
                        epoch: target_epoch,
                        root: beacon_block_root,
                    },
                );

                true
            }
        }
    }

    /// Recomputes the head after attestations changed the vote weights.
    ///
    /// Returns the previous head if the head moved.
    pub fn refresh_head(&mut self) -> Result<Option<ForkChoiceNode>> {
        let old_head = self.head;
        self.head = self.compute_head()?;

        Ok((self.head.block_root != old_head.block_root).then_some(old_head))
    }

    /// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/fork-choice.md#get_head>
    fn compute_head(&self) -> Result<ForkChoiceNode> {
        let mut current = self.justified_checkpoint.root;

        loop {
            let children = self.children.get(&current);

            let best_child = children.into_iter().flatten().copied().max_by_key(|child| {
                (self.attesting_weight(*child), *child)
            });

            match best_child {
                Some(child) => current = child,
                None => break,
            }
        }

        self.nodes
            .get(&current)
            .copied()
            .ok_or_else(|| {
                Error::UnknownCheckpoint {
                    checkpoint_root: current,
                }
                .into()
            })
    }

    /// Total effective balance of validators whose latest message is in the
    /// subtree rooted at `root`.
    fn attesting_weight(&self, root: H256) -> Gwei {
        self.latest_messages
            .iter()
            .filter(|(_, message)| self.is_ancestor_or_equal(root, message.root))
            .map(|(validator_index, _)| {
                usize::try_from(*validator_index)
                    .ok()
                    .and_then(|index| self.justified_balances.get(index))
                    .copied()
                    .unwrap_or_default()
            })
            .sum()
    }

    fn update_justified_checkpoint(&mut self, checkpoint: Checkpoint) -> Result<()> {
        let node = self
            .nodes
            .get(&checkpoint.root)
            .copied()
            .ok_or(Error::UnknownCheckpoint {
                checkpoint_root: checkpoint.root,
            })?;

        let state = self
            .storage
            .stored_state_by_state_root(node.state_root)?
            .ok_or(Error::MissingState {
                block_root: node.block_root,
                state_root: node.state_root,
            })?;

        self.justified_balances = Arc::new(active_effective_balances(&state, checkpoint.epoch));
        self.justified_checkpoint = checkpoint;

        debug!("justified checkpoint updated: {checkpoint:?}");

        Ok(())
    }

    fn update_finalized_checkpoint(&mut self, checkpoint: Checkpoint) {
        self.finalized_checkpoint = checkpoint;

        debug!("finalized checkpoint updated: {checkpoint:?}");

        self.prune_orphaned(checkpoint.root);
    }

    // Keeps the tree a rooted DAG with the latest finalized block as its only root.
    fn prune_orphaned(&mut self, finalized_root: H256) {
        if !self.nodes.contains_key(&finalized_root) {
            return;
        }

        let mut keep = HashSet::from([finalized_root]);
        let mut frontier = vec![finalized_root];

        while let Some(root) = frontier.pop() {
            for child in self.children.get(&root).into_iter().flatten() {
                if keep.insert(*child) {
                    frontier.push(*child);
                }
            }
        }

        self.nodes.retain(|root, _| keep.contains(root));
        self.children.retain(|root, _| keep.contains(root));
    }
}

fn active_effective_balances(state: &BeaconState, epoch: Epoch) -> Vec<Gwei> {
    state
        .validators
        .iter()
        .map(|validator| {
            if predicates::is_active_validator(validator, epoch) {
                validator.effective_balance
            } else {
                0
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use types::phase0::{
        consts::{FAR_FUTURE_EPOCH, GENESIS_SLOT},
        containers::Validator,
    };

    use super::*;

    #[derive(Default)]
    struct TestStorage {
        states: Mutex<std::collections::HashMap<H256, Arc<BeaconState>>>,
    }

    impl TestStorage {
        fn insert(&self, state_root: H256, state: Arc<BeaconState>) {
            self.states.lock().insert(state_root, state);
        }
    }

    impl Storage for TestStorage {
        fn stored_state_by_state_root(
            &self,
            state_root: H256,
        ) -> Result<Option<Arc<BeaconState>>> {
            Ok(self.states.lock().get(&state_root).cloned())
        }
    }

    fn state_with_validators(count: u64) -> BeaconState {
        let mut state = BeaconState::default();

        for _ in 0..count {
            state
                .validators
                .push(Validator {
                    effective_balance: 32_000_000_000,
                    exit_epoch: FAR_FUTURE_EPOCH,
                    ..Validator::default()
                })
                .expect("validator registry limit is not reached");
        }

        state
    }

    fn root(byte: u8) -> H256 {
        H256::repeat_byte(byte)
    }

    fn anchor_node() -> ForkChoiceNode {
        ForkChoiceNode {
            slot: GENESIS_SLOT,
            block_root: root(0xa0),
            state_root: root(0xa1),
            parent_root: H256::ZERO,
            justified_checkpoint: Checkpoint::default(),
            finalized_checkpoint: Checkpoint::default(),
        }
    }

    fn child_of(store: &Store<TestStorage>, parent_root: H256, slot: Slot, byte: u8) -> ForkChoiceNode {
        ForkChoiceNode {
            slot,
            block_root: root(byte),
            state_root: root(byte.wrapping_add(1)),
            parent_root,
            justified_checkpoint: store.justified_checkpoint(),
            finalized_checkpoint: store.finalized_checkpoint(),
        }
    }

    fn new_store(validator_count: u64) -> (Store<TestStorage>, Arc<TestStorage>) {
        let config = Arc::new(Config::minimal());
        let storage = Arc::new(TestStorage::default());
        let anchor_state = state_with_validators(validator_count);

        storage.insert(anchor_node().state_root, Arc::new(anchor_state.clone()));

        let store = Store::new(
            config,
            storage.clone(),
            anchor_node(),
            &anchor_state,
            Tick::start_of_slot(GENESIS_SLOT),
        );

        (store, storage)
    }

    #[test]
    fn head_starts_at_the_anchor() {
        let (store, _storage) = new_store(8);

        assert_eq!(store.head(), anchor_node());
        assert_eq!(store.justified_checkpoint().root, anchor_node().block_root);
        assert_eq!(store.finalized_checkpoint().root, anchor_node().block_root);
    }

    #[test]
    fn canonical_extension_moves_the_head() -> Result<()> {
        let (mut store, _storage) = new_store(8);
        let anchor = anchor_node();

        let child = child_of(&store, anchor.block_root, 1, 0x10);
        let changes = store.apply_block(child)?;

        assert!(matches!(
            changes,
            ApplyBlockChanges::CanonicalChainExtended { .. },
        ));
        assert_eq!(store.head(), child);

        Ok(())
    }

    #[test]
    fn sibling_ties_are_broken_by_the_larger_root() -> Result<()> {
        let (mut store, _storage) = new_store(8);
        let anchor = anchor_node();

        let low = child_of(&store, anchor.block_root, 5, 0x01);
        let high = child_of(&store, anchor.block_root, 5, 0x02);

        store.apply_block(high)?;
        let changes = store.apply_block(low)?;

        assert!(matches!(
            changes,
            ApplyBlockChanges::AlternateChainExtended { .. },
        ));
        assert_eq!(store.head(), high);

        // Insertion order does not matter.
        let (mut reversed, _storage_2) = new_store(8);
        reversed.apply_block(low)?;
        reversed.apply_block(high)?;

        assert_eq!(reversed.head(), high);

        Ok(())
    }

    #[test]
    fn votes_outweigh_the_root_tie_break() -> Result<()> {
        let (mut store, _storage) = new_store(8);
        let anchor = anchor_node();

        let low = child_of(&store, anchor.block_root, 5, 0x01);
        let high = child_of(&store, anchor.block_root, 5, 0x02);

        store.apply_block(low)?;
        store.apply_block(high)?;
        assert_eq!(store.head(), high);

        assert!(store.apply_attestation(0, low.block_root, 1));
        let old_head = store.refresh_head()?;

        assert_eq!(old_head, Some(high));
        assert_eq!(store.head(), low);

        Ok(())
    }

    #[test]
    fn votes_count_for_whole_subtrees() -> Result<()> {
        let (mut store, _storage) = new_store(8);
        let anchor = anchor_node();

        let left = child_of(&store, anchor.block_root, 1, 0x10);
        let right = child_of(&store, anchor.block_root, 1, 0x20);
        let left_child = child_of(&store, left.block_root, 2, 0x11);

        store.apply_block(left)?;
        store.apply_block(right)?;
        store.apply_block(left_child)?;

        // Two votes deep in the left subtree beat one vote for the right tip.
        store.apply_attestation(0, left_child.block_root, 1);
        store.apply_attestation(1, left.block_root, 1);
        store.apply_attestation(2, right.block_root, 1);
        store.refresh_head()?;

        assert_eq!(store.head(), left_child);

        Ok(())
    }

    #[test]
    fn latest_message_epochs_are_monotone() {
        let (mut store, _storage) = new_store(8);
        let anchor = anchor_node();

        assert!(store.apply_attestation(3, anchor.block_root, 5));
        assert!(!store.apply_attestation(3, root(0x99), 5));
        assert!(!store.apply_attestation(3, root(0x99), 4));
        assert!(store.apply_attestation(3, root(0x99), 6));

        let mut last_epoch = 0;

        for target_epoch in [1, 7, 3, 7, 8, 2, 9] {
            store.apply_attestation(4, anchor.block_root, target_epoch);

            let message = store
                .latest_message(4)
                .expect("validator 4 has attested at least once");

            assert!(message.epoch >= last_epoch);
            last_epoch = message.epoch;
        }
    }

    #[test]
    fn checkpoints_advance_only_forward_and_prune_orphans() -> Result<()> {
        let (mut store, storage) = new_store(8);
        let anchor = anchor_node();

        let fork_a = child_of(&store, anchor.block_root, 1, 0x10);
        let fork_b = child_of(&store, anchor.block_root, 2, 0x20);
        let b_child = child_of(&store, fork_b.block_root, 3, 0x21);

        // The justified balance reload fetches fork B's post-state.
        storage.insert(fork_b.state_root, Arc::new(state_with_validators(8)));

        store.apply_block(fork_a)?;
        store.apply_block(fork_b)?;
        store.apply_block(b_child)?;

        // A block carrying advanced checkpoints finalizes fork B's root.
        let finalizing = ForkChoiceNode {
            slot: 16,
            block_root: root(0x22),
            state_root: root(0x23),
            parent_root: b_child.block_root,
            justified_checkpoint: Checkpoint {
                epoch: 1,
                root: fork_b.block_root,
            },
            finalized_checkpoint: Checkpoint {
                epoch: 1,
                root: fork_b.block_root,
            },
        };

        let changes = store.apply_block(finalizing)?;

        assert!(changes.is_justified_checkpoint_updated());
        assert!(changes.is_finalized_checkpoint_updated());
        assert_eq!(store.justified_checkpoint().epoch, 1);
        assert_eq!(store.finalized_checkpoint().epoch, 1);

        // The orphaned fork and the old root are gone; the tree is rooted at
        // the finalized block.
        assert!(!store.contains_block(fork_a.block_root));
        assert!(!store.contains_block(anchor.block_root));
        assert!(store.contains_block(fork_b.block_root));
        assert!(store.contains_block(finalizing.block_root));

        // A block carrying older checkpoints does not move them back.
        let stale = ForkChoiceNode {
            slot: 17,
            block_root: root(0x30),
            state_root: root(0x31),
            parent_root: finalizing.block_root,
            justified_checkpoint: Checkpoint::default(),
            finalized_checkpoint: Checkpoint::default(),
        };

        let changes = store.apply_block(stale)?;

        assert!(!changes.is_justified_checkpoint_updated());
        assert!(!changes.is_finalized_checkpoint_updated());
        assert_eq!(store.finalized_checkpoint().epoch, 1);

        Ok(())
    }

    #[test]
    fn head_is_a_descendant_of_the_finalized_block_after_every_insert() -> Result<()> {
        let (mut store, _storage) = new_store(8);
        let anchor = anchor_node();

        let mut parents = vec![anchor.block_root];

        for byte in 0x10..0x30_u8 {
            let parent_index = usize::from(byte) % parents.len();
            let parent_root = parents[parent_index];
            let parent_slot = store
                .node(parent_root)
                .expect("parent was inserted earlier")
                .slot;

            let node = child_of(&store, parent_root, parent_slot + 1, byte);
            store.apply_block(node)?;
            parents.push(node.block_root);

            assert!(store.is_ancestor_or_equal(
                store.finalized_checkpoint().root,
                store.head().block_root,
            ));
        }

        Ok(())
    }

    #[test]
    fn blocks_with_unknown_parents_are_rejected() {
        let (mut store, _storage) = new_store(8);

        let orphan = ForkChoiceNode {
            slot: 1,
            block_root: root(0x10),
            state_root: root(0x11),
            parent_root: root(0x99),
            justified_checkpoint: Checkpoint::default(),
            finalized_checkpoint: Checkpoint::default(),
        };

        store
            .apply_block(orphan)
            .expect_err("block with unknown parent should be rejected");
    }

    #[test]
    fn ticks_only_advance() -> Result<()> {
        let (mut store, _storage) = new_store(8);

        let changes = store.apply_tick(Tick::start_of_slot(3))?;
        assert!(changes.is_some_and(ApplyTickChanges::is_slot_updated));
        assert_eq!(store.slot(), 3);

        assert!(store.apply_tick(Tick::start_of_slot(2))?.is_none());
        assert_eq!(store.slot(), 3);

        Ok(())
    }
}
