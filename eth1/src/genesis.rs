use anyhow::{bail, Result};
use futures::TryStreamExt as _;
use log::info;
use thiserror::Error;

use deposit_tree::DepositTree;
use genesis::Incremental;
use helper_functions::verifier::Verifier;
use types::{config::Config, phase0::beacon_state::BeaconState};

use crate::eth1_chain::{DepositEvent, Eth1Chain};

#[derive(Debug, Error)]
enum Error {
    #[error("blocks ran out without triggering genesis")]
    BlocksRanOut,
}

/// Waits for the first eth1 block that produces a valid genesis state.
///
/// Blocks are consumed in arrival order, so when several candidates would
/// validate, the first observed one wins. Dropping the returned future
/// unsubscribes from the eth1 follower.
pub async fn wait(
    config: &Config,
    eth1_chain: &dyn Eth1Chain,
    verifier: &dyn Verifier,
) -> Result<(BeaconState, DepositTree)> {
    let mut blocks = eth1_chain.block_stream()?;
    let mut incremental = Incremental::new(config);
    let mut next_deposit_index = 0;

    while let Some(block) = blocks.try_next().await? {
        incremental.set_eth1_timestamp(block.timestamp);

        for DepositEvent { data, index } in
            eth1_chain.process_past_deposits(Some(next_deposit_index), block.number)?
        {
            incremental.add_deposit_data(&data, index, verifier)?;
            next_deposit_index = index + 1;
        }

        if let Err(error) = incremental.validate() {
            info!("genesis not triggered: {error}");
            continue;
        }

        let (genesis_state, mut deposit_tree) = incremental.finish(block.hash)?;

        // Don't log the whole state. It's huge even with the minimal configuration.
        info!(
            "genesis triggered with genesis time {}",
            genesis_state.genesis_time,
        );

        deposit_tree.last_added_block_number = block.number;

        return Ok((genesis_state, deposit_tree));
    }

    bail!(Error::BlocksRanOut);
}
