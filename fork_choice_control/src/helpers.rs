use std::{collections::HashMap, sync::Arc};

use anyhow::{ensure, Result};
use crossbeam_utils::sync::WaitGroup;
use parking_lot::Mutex;
use tokio::sync::broadcast::{error::TryRecvError, Receiver};
use tree_hash::TreeHash as _;

use clock::Tick;
use database::Database;
use genesis::Incremental;
use helper_functions::verifier::NullVerifier;
use ssz_types::FixedVector;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::{
            BeaconBlock, BeaconBlockBody, Checkpoint, DepositData, SignedBeaconBlock,
        },
        primitives::{PublicKeyBytes, Slot, H256},
    },
    traits::{StateTransition, StateTransitionOptions},
};

use crate::{
    controller::{Controller, MutatorHandle},
    events::{Event, EventChannels, Topic},
    storage::Storage,
};

/// Deterministic header-chain transition for driving the pipeline in tests.
///
/// The post-state advances the slot and the latest block header. Checkpoint
/// advancement is scripted per graffiti value so tests can decide which
/// blocks carry justification and finalization.
#[derive(Default)]
pub struct TestStateTransition {
    scripted_checkpoints: Mutex<HashMap<H256, (Checkpoint, Checkpoint)>>,
}

impl TestStateTransition {
    pub fn script_checkpoints(&self, graffiti: H256, justified: Checkpoint, finalized: Checkpoint) {
        self.scripted_checkpoints
            .lock()
            .insert(graffiti, (justified, finalized));
    }

    /// The state root the transition expects for `block`.
    pub fn post_state_root(&self, pre_state: &BeaconState, block: &BeaconBlock) -> H256 {
        self.apply(pre_state, block).tree_hash_root()
    }

    fn apply(&self, pre_state: &BeaconState, block: &BeaconBlock) -> BeaconState {
        let mut state = pre_state.clone();

        state.slot = block.slot;
        state.latest_block_header = block.to_header();
        // The header's state root is filled in lazily by the real transition.
        state.latest_block_header.state_root = H256::ZERO;

        if let Some((justified, finalized)) =
            self.scripted_checkpoints.lock().get(&block.body.graffiti)
        {
            state.current_justified_checkpoint = *justified;
            state.finalized_checkpoint = *finalized;
        }

        state
    }
}

impl StateTransition for TestStateTransition {
    fn state_transition(
        &self,
        _config: &Config,
        pre_state: &BeaconState,
        block: &SignedBeaconBlock,
        _options: StateTransitionOptions,
    ) -> Result<BeaconState> {
        ensure!(
            block.message.slot > pre_state.slot,
            "block slot {} is not later than the pre-state slot {}",
            block.message.slot,
            pre_state.slot,
        );

        let state = self.apply(pre_state, &block.message);

        ensure!(
            block.message.state_root == state.tree_hash_root(),
            "block state root does not match the post-state",
        );

        Ok(state)
    }
}

pub struct Setup {
    pub config: Arc<Config>,
    pub storage: Arc<Storage>,
    pub state_transition: Arc<TestStateTransition>,
    pub event_channels: Arc<EventChannels>,
    pub controller: Arc<Controller<WaitGroup>>,
    pub genesis_block: Arc<SignedBeaconBlock>,
    pub genesis_state: Arc<BeaconState>,
    _mutator_handle: MutatorHandle<WaitGroup>,
}

impl Setup {
    pub fn new() -> Result<Self> {
        let config = Arc::new(Config::minimal());
        let (genesis_state, deposit_tree) = minimal_genesis(&config)?;

        let genesis_block = Arc::new(genesis::beacon_block(&genesis_state));
        let genesis_block_root = genesis_block.block_root();
        let genesis_state_root = genesis_block.message.state_root;
        let genesis_state = Arc::new(genesis_state);

        let storage = Arc::new(Storage::new(config.clone(), Database::in_memory()));

        storage.store_genesis(
            &genesis_block,
            genesis_block_root,
            &genesis_state,
            genesis_state_root,
            &deposit_tree,
        )?;

        let state_transition = Arc::new(TestStateTransition::default());
        let event_channels = Arc::new(EventChannels::default());

        let (controller, mutator_handle) = Controller::new(
            config.clone(),
            storage.clone(),
            state_transition.clone(),
            Arc::new(NullVerifier),
            &genesis_block,
            &genesis_state,
            Tick::start_of_slot(0),
            event_channels.clone(),
            vec![],
        )?;

        Ok(Self {
            config,
            storage,
            state_transition,
            event_channels,
            controller,
            genesis_block,
            genesis_state,
            _mutator_handle: mutator_handle,
        })
    }

    /// Builds a block whose state root matches the test transition.
    pub fn build_block(
        &self,
        parent_state: &BeaconState,
        parent_root: H256,
        slot: Slot,
        graffiti: H256,
    ) -> (Arc<SignedBeaconBlock>, Arc<BeaconState>) {
        let mut block = BeaconBlock {
            slot,
            proposer_index: 0,
            parent_root,
            state_root: H256::ZERO,
            body: BeaconBlockBody {
                graffiti,
                ..BeaconBlockBody::default()
            },
        };

        let post_state = self.state_transition.apply(parent_state, &block);
        block.state_root = post_state.tree_hash_root();

        (
            Arc::new(block.with_zero_signature()),
            Arc::new(post_state),
        )
    }

    pub fn receiver(&self, topic: Topic) -> Receiver<Event> {
        self.event_channels.receiver_for(topic)
    }
}

pub fn minimal_genesis(config: &Config) -> Result<(BeaconState, deposit_tree::DepositTree)> {
    let mut incremental = Incremental::new(config);

    incremental.set_eth1_timestamp(config.min_genesis_time);

    for index in 0..config.min_genesis_active_validator_count.get() {
        let mut pubkey_bytes = [0; 48];
        pubkey_bytes[..8].copy_from_slice(&(index + 1).to_le_bytes());

        let data = DepositData {
            pubkey: PublicKeyBytes::new(pubkey_bytes.to_vec())
                .expect("pubkey byte array has the correct length"),
            withdrawal_credentials: H256::repeat_byte(0x11),
            amount: config.max_effective_balance,
            signature: FixedVector::default(),
        };

        incremental.add_deposit_data(&data, index, &NullVerifier)?;
    }

    incremental.validate()?;
    incremental.finish(H256::repeat_byte(0xaa))
}

pub fn drain(receiver: &mut Receiver<Event>) -> Vec<Event> {
    let mut events = vec![];

    loop {
        match receiver.try_recv() {
            Ok(event) => events.push(event),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }

    events
}
