use core::fmt::Display;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use derive_more::Display;
use ssz::{Decode, Encode};
use ssz_derive::{Decode, Encode};

use database::Database;
use deposit_tree::{DepositTree, DepositTreeSnapshot};
use fork_choice_store::ForkChoiceNode;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::SignedBeaconBlock,
        primitives::{DepositIndex, Slot, H256},
    },
};

/// The typed storage namespaces of the consensus core.
///
/// All multi-key updates go through [`Database::put_batch`], which commits
/// them in a single transaction. Reads observe the last committed batch.
#[derive(Clone)]
pub struct Storage {
    config: Arc<Config>,
    database: Arc<Database>,
}

impl Storage {
    #[must_use]
    pub fn new(config: Arc<Config>, database: Database) -> Self {
        Self {
            config,
            database: Arc::new(database),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn contains_block(&self, block_root: H256) -> Result<bool> {
        self.database.contains_key(BlockByRoot(block_root).to_string())
    }

    pub fn block_by_root(&self, block_root: H256) -> Result<Option<Arc<SignedBeaconBlock>>> {
        Ok(self
            .get::<SignedBeaconBlock>(BlockByRoot(block_root))?
            .map(Arc::new))
    }

    pub fn state_by_state_root(&self, state_root: H256) -> Result<Option<Arc<BeaconState>>> {
        Ok(self
            .get::<BeaconState>(StateByStateRoot(state_root))?
            .map(Arc::new))
    }

    pub fn block_root_by_slot(&self, slot: Slot) -> Result<Option<H256>> {
        self.get(BlockRootBySlot(slot))
    }

    pub fn chain_head(&self) -> Result<Option<ChainHeadRecord>> {
        self.get(CHAIN_HEAD_KEY)
    }

    pub fn justified_block_root(&self) -> Result<Option<H256>> {
        self.get(JUSTIFIED_BLOCK_ROOT_KEY)
    }

    pub fn justified_state_root(&self) -> Result<Option<H256>> {
        self.get(JUSTIFIED_STATE_ROOT_KEY)
    }

    pub fn finalized_block_root(&self) -> Result<Option<H256>> {
        self.get(FINALIZED_BLOCK_ROOT_KEY)
    }

    pub fn finalized_state_root(&self) -> Result<Option<H256>> {
        self.get(FINALIZED_STATE_ROOT_KEY)
    }

    pub fn deposit_tree(&self, deposit_index: DepositIndex) -> Result<Option<DepositTree>> {
        let snapshot: Option<DepositTreeSnapshot> = self.get(DepositTreeByIndex(deposit_index))?;
        Ok(snapshot.map(DepositTree::from_snapshot))
    }

    /// Blocks with slots strictly greater than `slot`, ascending.
    pub fn blocks_after_slot(&self, slot: Slot) -> Result<Vec<Arc<SignedBeaconBlock>>> {
        let start = BlockRootBySlot(slot.checked_add(1).unwrap_or(Slot::MAX)).to_string();

        let mut blocks = vec![];

        for result in self.database.iterator_ascending(start..)? {
            let (key_bytes, value_bytes) = result?;

            if !key_bytes.starts_with(BlockRootBySlot::PREFIX.as_bytes()) {
                break;
            }

            let block_root = decode::<H256>(&value_bytes)?;

            let block = self
                .block_by_root(block_root)?
                .ok_or_else(|| anyhow!("canonical block {block_root:?} is not in storage"))?;

            blocks.push(block);
        }

        Ok(blocks)
    }

    /// The atomic write of the block-processing `Stored` stage:
    /// `block[root]`, `state[state_root]`, and `block_by_slot[slot]`.
    pub fn append_block_and_state(
        &self,
        block: &SignedBeaconBlock,
        block_root: H256,
        state: &BeaconState,
        state_root: H256,
    ) -> Result<()> {
        self.database.put_batch([
            serialize(BlockByRoot(block_root), block),
            serialize(StateByStateRoot(state_root), state),
            serialize(BlockRootBySlot(block.message.slot), &block_root),
        ])
    }

    /// Atomically updates the `{block, state, chain.head}` triple.
    pub fn store_chain_head(
        &self,
        block: &SignedBeaconBlock,
        block_root: H256,
        state: &BeaconState,
        state_root: H256,
    ) -> Result<()> {
        let record = ChainHeadRecord {
            slot: block.message.slot,
            block_root,
            state_root,
        };

        self.database.put_batch([
            serialize(BlockByRoot(block_root), block),
            serialize(StateByStateRoot(state_root), state),
            serialize(CHAIN_HEAD_KEY, &record),
        ])
    }

    pub fn update_justified_checkpoint(&self, block_root: H256, state_root: H256) -> Result<()> {
        self.database.put_batch([
            serialize(JUSTIFIED_BLOCK_ROOT_KEY, &block_root),
            serialize(JUSTIFIED_STATE_ROOT_KEY, &state_root),
        ])
    }

    pub fn update_finalized_checkpoint(&self, block_root: H256, state_root: H256) -> Result<()> {
        self.database.put_batch([
            serialize(FINALIZED_BLOCK_ROOT_KEY, &block_root),
            serialize(FINALIZED_STATE_ROOT_KEY, &state_root),
        ])
    }

    /// Seeds storage with a genesis chain in one committed batch.
    pub fn store_genesis(
        &self,
        block: &SignedBeaconBlock,
        block_root: H256,
        state: &BeaconState,
        state_root: H256,
        deposit_tree: &DepositTree,
    ) -> Result<()> {
        let record = ChainHeadRecord {
            slot: block.message.slot,
            block_root,
            state_root,
        };

        self.database.put_batch([
            serialize(BlockByRoot(block_root), block),
            serialize(StateByStateRoot(state_root), state),
            serialize(BlockRootBySlot(block.message.slot), &block_root),
            serialize(CHAIN_HEAD_KEY, &record),
            serialize(JUSTIFIED_BLOCK_ROOT_KEY, &block_root),
            serialize(JUSTIFIED_STATE_ROOT_KEY, &state_root),
            serialize(FINALIZED_BLOCK_ROOT_KEY, &block_root),
            serialize(FINALIZED_STATE_ROOT_KEY, &state_root),
            serialize(
                DepositTreeByIndex(state.eth1_deposit_index),
                &deposit_tree.snapshot(),
            ),
        ])
    }

    fn get<V: Decode>(&self, key: impl Display) -> Result<Option<V>> {
        self.database
            .get(key.to_string())?
            .map(|bytes| decode(&bytes))
            .transpose()
    }
}

impl fork_choice_store::Storage for Storage {
    fn stored_state_by_state_root(&self, state_root: H256) -> Result<Option<Arc<BeaconState>>> {
        self.state_by_state_root(state_root)
    }
}

/// The single-slot mutable `chain.head` cell.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Encode, Decode)]
pub struct ChainHeadRecord {
    pub slot: Slot,
    pub block_root: H256,
    pub state_root: H256,
}

impl ChainHeadRecord {
    #[must_use]
    pub fn of(node: &ForkChoiceNode) -> Self {
        Self {
            slot: node.slot,
            block_root: node.block_root,
            state_root: node.state_root,
        }
    }
}

const CHAIN_HEAD_KEY: &str = "chain_head";
const FINALIZED_BLOCK_ROOT_KEY: &str = "finalized_block_root";
const FINALIZED_STATE_ROOT_KEY: &str = "finalized_state_root";
const JUSTIFIED_BLOCK_ROOT_KEY: &str = "justified_block_root";
const JUSTIFIED_STATE_ROOT_KEY: &str = "justified_state_root";

#[derive(Display)]
#[display("{}{_0:020}", Self::PREFIX)]
struct BlockRootBySlot(Slot);

impl BlockRootBySlot {
    const PREFIX: &'static str = "r";
}

#[derive(Display)]
#[display("{}{_0:x}", Self::PREFIX)]
struct BlockByRoot(H256);

impl BlockByRoot {
    const PREFIX: &'static str = "b";
}

#[derive(Display)]
#[display("{}{_0:x}", Self::PREFIX)]
struct StateByStateRoot(H256);

impl StateByStateRoot {
    const PREFIX: &'static str = "s";
}

#[derive(Display)]
#[display("{}{_0:020}", Self::PREFIX)]
struct DepositTreeByIndex(DepositIndex);

impl DepositTreeByIndex {
    const PREFIX: &'static str = "d";
}

fn serialize(key: impl Display, value: &impl Encode) -> (String, Vec<u8>) {
    (key.to_string(), value.as_ssz_bytes())
}

fn decode<V: Decode>(bytes: &[u8]) -> Result<V> {
    V::from_ssz_bytes(bytes).map_err(|error| anyhow!("SSZ decoding failed: {error:?}"))
}

#[cfg(test)]
mod tests {
    use types::phase0::containers::BeaconBlock;

    use super::*;

    fn in_memory_storage() -> Storage {
        Storage::new(Arc::new(Config::minimal()), Database::in_memory())
    }

    #[test]
    fn chain_head_round_trips_through_the_database() -> Result<()> {
        let storage = in_memory_storage();

        assert!(storage.chain_head()?.is_none());

        let block = BeaconBlock {
            slot: 3,
            ..BeaconBlock::default()
        }
        .with_zero_signature();

        let block_root = block.block_root();
        let state = BeaconState::default();
        let state_root = H256::repeat_byte(0x22);

        storage.store_chain_head(&block, block_root, &state, state_root)?;

        let record = storage.chain_head()?.expect("chain head was just stored");

        assert_eq!(record.slot, 3);
        assert_eq!(record.block_root, block_root);
        assert_eq!(record.state_root, state_root);

        assert_eq!(
            storage
                .block_by_root(block_root)?
                .expect("head block was stored in the same batch")
                .as_ref(),
            &block,
        );

        Ok(())
    }

    #[test]
    fn blocks_after_slot_returns_canonical_blocks_in_order() -> Result<()> {
        let storage = in_memory_storage();
        let state = BeaconState::default();

        for slot in [1, 2, 5, 9] {
            let block = BeaconBlock {
                slot,
                ..BeaconBlock::default()
            }
            .with_zero_signature();

            storage.append_block_and_state(
                &block,
                block.block_root(),
                &state,
                H256::repeat_byte(slot as u8),
            )?;
        }

        let slots = |blocks: Vec<Arc<SignedBeaconBlock>>| {
            blocks
                .iter()
                .map(|block| block.message.slot)
                .collect::<Vec<_>>()
        };

        assert_eq!(slots(storage.blocks_after_slot(0)?), [1, 2, 5, 9]);
        assert_eq!(slots(storage.blocks_after_slot(2)?), [5, 9]);
        assert_eq!(slots(storage.blocks_after_slot(9)?), Vec::<Slot>::new());

        Ok(())
    }

    #[test]
    fn reloading_a_state_preserves_its_hash_tree_root() -> Result<()> {
        use tree_hash::TreeHash as _;
        use types::phase0::containers::Validator;

        let storage = in_memory_storage();

        let mut state = BeaconState::default();
        state.slot = 17;
        state.genesis_time = 1_600_000_000;

        for index in 0..5_u8 {
            state
                .validators
                .push(Validator {
                    withdrawal_credentials: H256::repeat_byte(index),
                    effective_balance: 32_000_000_000,
                    ..Validator::default()
                })
                .expect("validator registry limit is not reached");

            state
                .balances
                .push(32_000_000_000)
                .expect("balances grow in lockstep with the validator registry");
        }

        let state_root = state.tree_hash_root();
        let block = BeaconBlock::default().with_zero_signature();

        storage.append_block_and_state(&block, block.block_root(), &state, state_root)?;

        let reloaded = storage
            .state_by_state_root(state_root)?
            .expect("state was stored under its own root");

        assert_eq!(reloaded.tree_hash_root(), state_root);
        assert_eq!(reloaded.as_ref(), &state);

        Ok(())
    }

    #[test]
    fn deposit_tree_snapshots_round_trip() -> Result<()> {
        let storage = in_memory_storage();

        let mut deposit_tree = DepositTree::default();
        deposit_tree.push(0, &Default::default())?;
        deposit_tree.last_added_block_number = 7;

        let block = BeaconBlock::default().with_zero_signature();
        let mut state = BeaconState::default();
        state.eth1_deposit_index = 1;

        storage.store_genesis(
            &block,
            block.block_root(),
            &state,
            H256::repeat_byte(0x01),
            &deposit_tree,
        )?;

        let restored = storage
            .deposit_tree(1)?
            .expect("deposit tree was stored under the state's deposit index");

        assert_eq!(restored.root(), deposit_tree.root());
        assert_eq!(restored.last_added_block_number, 7);

        Ok(())
    }
}
