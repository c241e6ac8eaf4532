use core::num::NonZeroU64;

use anyhow::{ensure, Result};
use ssz_types::{typenum::Unsigned as _, FixedVector};
use thiserror::Error;
use tree_hash::TreeHash as _;

use deposit_tree::DepositTree;
use helper_functions::{accessors, misc, verifier::Verifier};
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{
            EpochsPerHistoricalVector, DOMAIN_DEPOSIT, FAR_FUTURE_EPOCH, GENESIS_EPOCH,
            GENESIS_SLOT,
        },
        containers::{
            BeaconBlock, BeaconBlockBody, BeaconBlockHeader, DepositData, DepositMessage, Fork,
            SignedBeaconBlock, Validator,
        },
        primitives::{DepositIndex, ExecutionBlockHash, UnixSeconds, H256},
    },
};

/// Builds a candidate genesis state incrementally from eth1 deposits.
///
/// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/beacon-chain.md#genesis>
pub struct Incremental<'config> {
    config: &'config Config,
    beacon_state: BeaconState,
    deposit_tree: DepositTree,
}

impl<'config> Incremental<'config> {
    #[must_use]
    pub fn new(config: &'config Config) -> Self {
        let version = config.genesis_fork_version;

        let beacon_state = BeaconState {
            slot: GENESIS_SLOT,
            fork: Fork {
                previous_version: version,
                current_version: version,
                epoch: GENESIS_EPOCH,
            },
            latest_block_header: BeaconBlockHeader {
                slot: GENESIS_SLOT,
                body_root: BeaconBlockBody::default().tree_hash_root(),
                ..BeaconBlockHeader::default()
            },
            ..BeaconState::default()
        };

        Self {
            config,
            beacon_state,
            deposit_tree: DepositTree::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_genesis_state(self.config, &self.beacon_state)
    }

    pub fn set_eth1_timestamp(&mut self, eth1_timestamp: UnixSeconds) {
        self.beacon_state.genesis_time = eth1_timestamp + self.config.genesis_delay;
    }

    pub fn add_deposit_data(
        &mut self,
        data: &DepositData,
        deposit_index: DepositIndex,
        verifier: &dyn Verifier,
    ) -> Result<()> {
        let deposit_root = self.deposit_tree.push_and_compute_root(deposit_index, data)?;

        let eth1_data = &mut self.beacon_state.eth1_data;
        eth1_data.deposit_root = deposit_root;
        eth1_data.deposit_count = self.deposit_tree.deposit_count;
        self.beacon_state.eth1_deposit_index = self.deposit_tree.deposit_count;

        if let Some(validator_index) =
            apply_deposit(self.config, &mut self.beacon_state, data, verifier)?
        {
            let balance = self.beacon_state.balances[validator_index];
            let increment = self.config.effective_balance_increment;
            let max_effective_balance = self.config.max_effective_balance;

            let validator = &mut self.beacon_state.validators[validator_index];

            validator.effective_balance =
                (balance - balance % increment).min(max_effective_balance);

            if validator.effective_balance == max_effective_balance {
                validator.activation_eligibility_epoch = GENESIS_EPOCH;
                validator.activation_epoch = GENESIS_EPOCH;
            }
        }

        Ok(())
    }

    pub fn finish(self, eth1_block_hash: ExecutionBlockHash) -> Result<(BeaconState, DepositTree)> {
        let Self {
            mut beacon_state,
            deposit_tree,
            ..
        } = self;

        beacon_state.eth1_data.block_hash = eth1_block_hash;

        // > Seed RANDAO with Eth1 entropy
        beacon_state.randao_mixes = FixedVector::new(vec![
            eth1_block_hash;
            EpochsPerHistoricalVector::USIZE
        ])
        .expect("vector has the length of the randao mix register");

        // > Set genesis validators root for domain separation and chain versioning
        beacon_state.genesis_validators_root = beacon_state.validators.tree_hash_root();

        Ok((beacon_state, deposit_tree))
    }
}

#[derive(Debug, Error)]
enum GenesisTriggerError {
    #[error("too early ({actual_genesis_time} < {minimum_genesis_time})")]
    TooEarly {
        minimum_genesis_time: UnixSeconds,
        actual_genesis_time: UnixSeconds,
    },
    #[error("not enough active validators ({actual_validator_count} < {minimum_validator_count})")]
    NotEnoughActiveValidators {
        minimum_validator_count: NonZeroU64,
        actual_validator_count: u64,
    },
}

/// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/beacon-chain.md#genesis-block>
#[must_use]
pub fn beacon_block(genesis_state: &BeaconState) -> SignedBeaconBlock {
    // The way the genesis block is constructed makes it possible for many parties to independently
    // produce the same block. Note that `BeaconBlock.body.eth1_data` is not set to
    // `genesis_state.eth1_data`.
    BeaconBlock::default()
        .with_state_root(genesis_state.tree_hash_root())
        .with_zero_signature()
}

/// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/beacon-chain.md#genesis-state>
fn validate_genesis_state(config: &Config, state: &BeaconState) -> Result<()> {
    let minimum_genesis_time = config.min_genesis_time;
    let actual_genesis_time = state.genesis_time;

    ensure!(
        minimum_genesis_time <= actual_genesis_time,
        GenesisTriggerError::TooEarly {
            minimum_genesis_time,
            actual_genesis_time,
        },
    );

    let minimum_validator_count = config.min_genesis_active_validator_count;
    let actual_validator_count = accessors::active_validator_count(state, GENESIS_EPOCH);

    ensure!(
        minimum_validator_count.get() <= actual_validator_count,
        GenesisTriggerError::NotEnoughActiveValidators {
            minimum_validator_count,
            actual_validator_count,
        },
    );

    Ok(())
}

fn apply_deposit(
    config: &Config,
    state: &mut BeaconState,
    data: &DepositData,
    verifier: &dyn Verifier,
) -> Result<Option<usize>> {
    let DepositData {
        ref pubkey,
        withdrawal_credentials,
        amount,
        ref signature,
    } = *data;

    if let Some(validator_index) = state
        .validators
        .iter()
        .position(|validator| validator.pubkey == *pubkey)
    {
        state.balances[validator_index] += amount;
        return Ok(Some(validator_index));
    }

    // > Verify the deposit signature (proof of possession)
    // > which is not checked by the deposit contract
    let deposit_message = DepositMessage {
        pubkey: pubkey.clone(),
        withdrawal_credentials,
        amount,
    };

    let domain = misc::compute_domain(DOMAIN_DEPOSIT, config.genesis_fork_version, H256::ZERO);
    let signing_root = misc::compute_signing_root(&deposit_message, domain);

    if verifier.verify_single(pubkey, signing_root, signature).is_err() {
        return Ok(None);
    }

    let effective_balance =
        (amount - amount % config.effective_balance_increment).min(config.max_effective_balance);

    state
        .validators
        .push(Validator {
            pubkey: pubkey.clone(),
            withdrawal_credentials,
            effective_balance,
            slashed: false,
            activation_eligibility_epoch: FAR_FUTURE_EPOCH,
            activation_epoch: FAR_FUTURE_EPOCH,
            exit_epoch: FAR_FUTURE_EPOCH,
            withdrawable_epoch: FAR_FUTURE_EPOCH,
        })
        .expect("deposit tree capacity is far below the validator registry limit");

    state
        .balances
        .push(amount)
        .expect("balances grow in lockstep with the validator registry");

    Ok(Some(state.validators.len() - 1))
}

#[cfg(test)]
mod tests {
    use anyhow::anyhow;
    use helper_functions::verifier::NullVerifier;
    use types::phase0::primitives::{PublicKeyBytes, SignatureBytes};

    use super::*;

    fn deposit_data(config: &Config, byte: u8, amount_gwei: u64) -> DepositData {
        let mut pubkey_bytes = [0; 48];
        pubkey_bytes[0] = byte;

        DepositData {
            pubkey: PublicKeyBytes::new(pubkey_bytes.to_vec())
                .expect("pubkey byte array has the correct length"),
            withdrawal_credentials: H256::repeat_byte(byte),
            amount: amount_gwei * config.effective_balance_increment.get(),
            signature: SignatureBytes::default(),
        }
    }

    fn triggered_incremental(config: &Config) -> Result<Incremental<'_>> {
        let mut incremental = Incremental::new(config);

        incremental.set_eth1_timestamp(config.min_genesis_time);

        for index in 0..config.min_genesis_active_validator_count.get() {
            let data = deposit_data(config, index as u8 + 1, 32);
            incremental.add_deposit_data(&data, index, &NullVerifier)?;
        }

        Ok(incremental)
    }

    #[test]
    fn genesis_is_not_triggered_before_min_genesis_time() -> Result<()> {
        let config = Config::minimal();
        let mut incremental = triggered_incremental(&config)?;

        incremental.set_eth1_timestamp(
            config
                .min_genesis_time
                .checked_sub(config.genesis_delay + 1)
                .ok_or_else(|| anyhow!("minimal genesis time is too small"))?,
        );

        incremental.validate().expect_err("genesis time is too early");

        Ok(())
    }

    #[test]
    fn genesis_is_not_triggered_with_too_few_active_validators() -> Result<()> {
        let config = Config::minimal();
        let mut incremental = Incremental::new(&config);

        incremental.set_eth1_timestamp(config.min_genesis_time);

        for index in 0..config.min_genesis_active_validator_count.get() - 1 {
            let data = deposit_data(&config, index as u8 + 1, 32);
            incremental.add_deposit_data(&data, index, &NullVerifier)?;
        }

        incremental.validate().expect_err("one validator short of the minimum");

        Ok(())
    }

    #[test]
    fn genesis_is_triggered_with_exactly_the_minimum() -> Result<()> {
        let config = Config::minimal();
        let incremental = triggered_incremental(&config)?;

        incremental.validate()?;

        let eth1_block_hash = H256::repeat_byte(0xaa);
        let (state, deposit_tree) = incremental.finish(eth1_block_hash)?;

        assert_eq!(state.eth1_data.block_hash, eth1_block_hash);
        assert_eq!(state.eth1_data.deposit_root, deposit_tree.root());
        assert_eq!(
            state.eth1_data.deposit_count,
            config.min_genesis_active_validator_count.get(),
        );
        assert_eq!(state.randao_mixes[0], eth1_block_hash);
        assert_eq!(
            state.genesis_validators_root,
            state.validators.tree_hash_root(),
        );

        Ok(())
    }

    #[test]
    fn partial_deposits_activate_a_validator_once_topped_up() -> Result<()> {
        let config = Config::minimal();
        let mut incremental = Incremental::new(&config);

        let data = deposit_data(&config, 1, 16);

        incremental.add_deposit_data(&data, 0, &NullVerifier)?;
        incremental.add_deposit_data(&data, 1, &NullVerifier)?;

        let (state, _) = incremental.finish(H256::ZERO)?;

        assert_eq!(state.validators.len(), 1);
        assert_eq!(state.balances[0], config.max_effective_balance);
        assert_eq!(accessors::active_validator_count(&state, GENESIS_EPOCH), 1);

        Ok(())
    }

    #[test]
    fn rejected_proof_of_possession_skips_onboarding() -> Result<()> {
        struct RejectingVerifier;

        impl Verifier for RejectingVerifier {
            fn verify_single(
                &self,
                _pubkey: &PublicKeyBytes,
                _message: H256,
                _signature: &SignatureBytes,
            ) -> Result<()> {
                Err(anyhow!("invalid signature"))
            }

            fn verify_aggregate(
                &self,
                _pubkeys: &[PublicKeyBytes],
                _message: H256,
                _signature: &SignatureBytes,
            ) -> Result<()> {
                Err(anyhow!("invalid signature"))
            }
        }

        let config = Config::minimal();
        let mut incremental = Incremental::new(&config);

        incremental.add_deposit_data(&deposit_data(&config, 1, 32), 0, &RejectingVerifier)?;

        let (state, deposit_tree) = incremental.finish(H256::ZERO)?;

        // The deposit is part of the tree but no validator was onboarded.
        assert_eq!(deposit_tree.deposit_count, 1);
        assert_eq!(state.validators.len(), 0);

        Ok(())
    }

    #[test]
    fn genesis_block_root_is_stable_for_a_given_state_root() -> Result<()> {
        let config = Config::minimal();
        let incremental = triggered_incremental(&config)?;
        let (state, _) = incremental.finish(H256::repeat_byte(0xaa))?;

        let first = beacon_block(&state);
        let second = beacon_block(&state);

        assert_eq!(first.block_root(), second.block_root());
        assert_eq!(first.message.state_root, state.tree_hash_root());
        assert_eq!(first.message.parent_root, H256::ZERO);

        Ok(())
    }
}
