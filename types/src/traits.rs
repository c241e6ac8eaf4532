use anyhow::Result;

use crate::{
    config::Config,
    phase0::{beacon_state::BeaconState, containers::SignedBeaconBlock},
};

#[derive(Clone, Copy, Debug)]
pub struct StateTransitionOptions {
    pub verify_signatures: bool,
}

/// The pure state-transition function.
///
/// The consensus core treats the transition as an external collaborator:
/// implementations must be deterministic, must not mutate the pre-state, and
/// must fail on any rule violation, including a `state_root` mismatch.
pub trait StateTransition: Send + Sync {
    fn state_transition(
        &self,
        config: &Config,
        pre_state: &BeaconState,
        block: &SignedBeaconBlock,
        options: StateTransitionOptions,
    ) -> Result<BeaconState>;
}
