use std::sync::Arc;

use anyhow::{anyhow, bail, ensure, Result};
use arc_swap::ArcSwap;
use futures::StreamExt as _;
use log::{info, warn};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use clock::Tick;
use deposit_tree::DepositTree;
use eth1::Eth1Chain;
use fork_choice_control::{
    Controller, Event, EventChannels, MutatorHandle, Storage, Topic, Wait,
};
use fork_choice_store::{BlockOrigin, Error, ForkChoiceNode};
use helper_functions::{misc, verifier::Verifier};
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::GENESIS_SLOT,
        containers::{Attestation, SignedBeaconBlock},
        primitives::{ForkDigest, UnixSeconds, Version, H256},
    },
    traits::StateTransition,
};

/// The chain coordinator.
///
/// Wires the clock, the eth1 follower, the block and attestation pipelines,
/// and the fork choice controller together, and owns the cached fork digest.
pub struct BeaconChain<W: Wait> {
    config: Arc<Config>,
    storage: Arc<Storage>,
    eth1_chain: Arc<dyn Eth1Chain>,
    state_transition: Arc<dyn StateTransition>,
    verifier: Arc<dyn Verifier>,
    event_channels: Arc<EventChannels>,
    controller: Option<Arc<Controller<W>>>,
    mutator_handle: Option<MutatorHandle<W>>,
    clock_task: Option<JoinHandle<()>>,
    fork_digest_task: Option<JoinHandle<()>>,
    current_fork_digest: Arc<ArcSwap<ForkDigest>>,
}

impl<W: Wait> BeaconChain<W> {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        storage: Arc<Storage>,
        eth1_chain: Arc<dyn Eth1Chain>,
        state_transition: Arc<dyn StateTransition>,
        verifier: Arc<dyn Verifier>,
        event_channels: Arc<EventChannels>,
    ) -> Self {
        Self {
            config,
            storage,
            eth1_chain,
            state_transition,
            verifier,
            event_channels,
            controller: None,
            mutator_handle: None,
            clock_task: None,
            fork_digest_task: None,
            current_fork_digest: Arc::new(ArcSwap::from_pointee(ForkDigest::ZERO)),
        }
    }

    /// Waits for a state, then starts fork choice, the clock, and block
    /// processing. Resolves only once the chain is live.
    pub async fn start(&mut self) -> Result<()> {
        let (anchor_block, anchor_state) = self.wait_for_state().await?;

        let state_epoch = self.config.epoch_at_slot(anchor_state.slot);
        let expected_version = self.config.fork_version_at_epoch(state_epoch);

        ensure!(
            anchor_state.fork.current_version == expected_version,
            Error::ConfigMismatch {
                config_name: self.config.config_name.to_string(),
                expected: expected_version,
                actual: anchor_state.fork.current_version,
            },
        );

        let genesis_time = anchor_state.genesis_time;
        let genesis_validators_root = anchor_state.genesis_validators_root;
        let tick = Tick::current(&self.config, genesis_time)?;

        let unfinalized_blocks = self
            .storage
            .blocks_after_slot(anchor_block.message.slot)?;

        let (controller, mutator_handle) = Controller::new(
            self.config.clone(),
            self.storage.clone(),
            self.state_transition.clone(),
            self.verifier.clone(),
            &anchor_block,
            &anchor_state,
            tick,
            self.event_channels.clone(),
            unfinalized_blocks,
        )?;

        let current_version = self.config.fork_version_at_epoch(tick.epoch(&self.config));

        self.current_fork_digest
            .store(Arc::new(misc::compute_fork_digest(
                current_version,
                genesis_validators_root,
            )));

        self.clock_task = Some(Self::spawn_clock_task(
            self.config.clone(),
            genesis_time,
            controller.clone(),
        ));

        self.fork_digest_task = Some(self.spawn_fork_digest_task(
            current_version,
            genesis_validators_root,
        ));

        self.controller = Some(controller);
        self.mutator_handle = Some(mutator_handle);

        info!(
            "beacon chain started (config: {}, slot: {})",
            self.config.config_name, tick.slot,
        );

        Ok(())
    }

    /// Stops fork choice, the clock, and block processing, in that order.
    pub fn stop(&mut self) -> Result<()> {
        if let Some(controller) = self.controller.take() {
            controller.stop();
        }

        if let Some(clock_task) = self.clock_task.take() {
            clock_task.abort();
        }

        if let Some(fork_digest_task) = self.fork_digest_task.take() {
            fork_digest_task.abort();
        }

        if let Some(mutator_handle) = self.mutator_handle.take() {
            mutator_handle.join()?;
        }

        info!("beacon chain stopped");

        Ok(())
    }

    pub fn receive_block(&self, block: Arc<SignedBeaconBlock>, origin: BlockOrigin) -> Result<()> {
        self.running_controller()?.on_block(block, origin);
        Ok(())
    }

    pub fn receive_attestation(&self, attestation: Arc<Attestation>) -> Result<()> {
        self.running_controller()?.on_attestation(attestation);
        Ok(())
    }

    pub fn head(&self) -> Result<ForkChoiceNode> {
        Ok(self.running_controller()?.head())
    }

    #[must_use]
    pub fn current_fork_digest(&self) -> ForkDigest {
        **self.current_fork_digest.load()
    }

    pub fn controller(&self) -> Result<&Arc<Controller<W>>> {
        self.running_controller()
    }

    /// Computes the genesis block for `state` and seeds storage and fork
    /// choice with it atomically.
    ///
    /// A pre-existing genesis block with a different state root is fatal:
    /// the operator must wipe the store directory to switch configurations.
    pub fn initialize_beacon_chain(
        &self,
        state: BeaconState,
        deposit_tree: &DepositTree,
    ) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
        let genesis_block = genesis::beacon_block(&state);
        let state_root = genesis_block.message.state_root;

        if let Some(existing_root) = self.storage.block_root_by_slot(GENESIS_SLOT)? {
            let existing = self
                .storage
                .block_by_root(existing_root)?
                .ok_or_else(|| anyhow!("genesis block {existing_root:?} is not in storage"))?;

            ensure!(
                existing.message.state_root == state_root,
                Error::GenesisMismatch {
                    existing: existing.message.state_root,
                    computed: state_root,
                },
            );

            let state = self
                .storage
                .state_by_state_root(state_root)?
                .ok_or_else(|| anyhow!("genesis state {state_root:?} is not in storage"))?;

            return Ok((existing, state));
        }

        let block_root = genesis_block.block_root();

        self.storage
            .store_genesis(&genesis_block, block_root, &state, state_root, deposit_tree)?;

        info!("beacon chain initialized (genesis block root: {block_root:?})");

        Ok((Arc::new(genesis_block), Arc::new(state)))
    }

    async fn wait_for_state(&self) -> Result<(Arc<SignedBeaconBlock>, Arc<BeaconState>)> {
        // Resume from the latest finalized anchor if there is one. Blocks
        // past the anchor are replayed through the pipeline on startup.
        if let Some(finalized_root) = self.storage.finalized_block_root()? {
            let block = self
                .storage
                .block_by_root(finalized_root)?
                .ok_or_else(|| anyhow!("finalized block {finalized_root:?} is not in storage"))?;

            let state_root = self
                .storage
                .finalized_state_root()?
                .ok_or_else(|| anyhow!("finalized state root is missing"))?;

            let state = self
                .storage
                .state_by_state_root(state_root)?
                .ok_or_else(|| anyhow!("finalized state {state_root:?} is not in storage"))?;

            info!("loaded stored state (slot: {})", state.slot);

            return Ok((block, state));
        }

        // Otherwise stay subscribed to the eth1 follower until a block
        // produces a valid genesis state. Dropping this future (for example
        // on `stop`) drops the subscription.
        let (state, deposit_tree) =
            eth1::genesis::wait(&self.config, &*self.eth1_chain, &*self.verifier).await?;

        self.eth1_chain.init_block_cache(&self.config, &state)?;

        self.initialize_beacon_chain(state, &deposit_tree)
    }

    fn running_controller(&self) -> Result<&Arc<Controller<W>>> {
        match &self.controller {
            Some(controller) => Ok(controller),
            None => bail!("beacon chain is not running"),
        }
    }

    fn spawn_clock_task(
        config: Arc<Config>,
        genesis_time: UnixSeconds,
        controller: Arc<Controller<W>>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticks = match clock::ticks(&config, genesis_time) {
                Ok(ticks) => ticks,
                Err(error) => {
                    warn!("failed to start the slot clock: {error:#}");
                    return;
                }
            };

            while let Some(result) = ticks.next().await {
                match result {
                    Ok(tick) => controller.on_tick(tick),
                    Err(error) => {
                        warn!("slot clock failed: {error:#}");
                        break;
                    }
                }
            }
        })
    }

    // Recomputes the cached fork digest when a head event crosses a
    // scheduled fork boundary.
    fn spawn_fork_digest_task(
        &self,
        initial_version: Version,
        genesis_validators_root: H256,
    ) -> JoinHandle<()> {
        let config = self.config.clone();
        let event_channels = self.event_channels.clone();
        let current_fork_digest = self.current_fork_digest.clone();
        let mut heads = event_channels.receiver_for(Topic::Head);

        tokio::spawn(async move {
            let mut last_version = initial_version;

            loop {
                match heads.recv().await {
                    Ok(Event::Head(head)) => {
                        let epoch = config.epoch_at_slot(head.slot);
                        let version = config.fork_version_at_epoch(epoch);

                        if version != last_version {
                            let fork_digest =
                                misc::compute_fork_digest(version, genesis_validators_root);

                            current_fork_digest.store(Arc::new(fork_digest));
                            event_channels.send_fork_digest_event(version, fork_digest, epoch);

                            info!(
                                "fork digest changed \
                                 (epoch: {epoch}, version: {version:?}, digest: {fork_digest:?})",
                            );

                            last_version = version;
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

impl<W: Wait> Drop for BeaconChain<W> {
    fn drop(&mut self) {
        if let Err(error) = self.stop() {
            warn!("failed to stop the beacon chain cleanly: {error:#}");
        }
    }
}
