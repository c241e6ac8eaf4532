use core::num::NonZeroU64;

use anyhow::{ensure, Result};
use ssz_types::typenum::Unsigned as _;

use shuffling::shuffle_single;
use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        consts::{EpochsPerHistoricalVector, DOMAIN_BEACON_ATTESTER},
        containers::Attestation,
        primitives::{CommitteeIndex, DomainType, Epoch, Slot, ValidatorIndex, H256},
    },
};

use crate::{error::Error, misc, predicates};

pub fn get_active_validator_indices(
    state: &BeaconState,
    epoch: Epoch,
) -> impl Iterator<Item = ValidatorIndex> + '_ {
    state
        .validators
        .iter()
        .zip(0..)
        .filter(move |(validator, _)| predicates::is_active_validator(validator, epoch))
        .map(|(_, index)| index)
}

#[must_use]
pub fn active_validator_count(state: &BeaconState, epoch: Epoch) -> u64 {
    get_active_validator_indices(state, epoch).count() as u64
}

#[must_use]
pub fn get_randao_mix(state: &BeaconState, epoch: Epoch) -> H256 {
    let index = epoch % EpochsPerHistoricalVector::U64;
    state.randao_mixes[usize::try_from(index).expect("randao mix index fits in usize")]
}

/// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/beacon-chain.md#get_seed>
#[must_use]
pub fn get_seed(
    config: &Config,
    state: &BeaconState,
    epoch: Epoch,
    domain_type: DomainType,
) -> H256 {
    let lookahead_epoch =
        epoch + EpochsPerHistoricalVector::U64 - config.min_seed_lookahead - 1;

    misc::hash_epoch_with_mix(domain_type, epoch, get_randao_mix(state, lookahead_epoch))
}

#[must_use]
pub fn get_committee_count_per_slot(config: &Config, state: &BeaconState, epoch: Epoch) -> u64 {
    let active = active_validator_count(state, epoch);

    (active / config.slots_per_epoch / config.target_committee_size)
        .clamp(1, config.max_committees_per_slot.get())
}

/// The committee for `(slot, index)` computed from `state`.
///
/// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/beacon-chain.md#get_beacon_committee>
pub fn beacon_committee(
    config: &Config,
    state: &BeaconState,
    slot: Slot,
    index: CommitteeIndex,
) -> Result<Vec<ValidatorIndex>> {
    let epoch = config.epoch_at_slot(slot);
    let committees_per_slot = get_committee_count_per_slot(config, state, epoch);

    ensure!(
        index < committees_per_slot,
        Error::CommitteeIndexOutOfBounds {
            slot,
            index,
            committees_per_slot,
        },
    );

    let indices = get_active_validator_indices(state, epoch).collect::<Vec<_>>();

    ensure!(!indices.is_empty(), Error::NoActiveValidators { epoch });

    let seed = get_seed(config, state, epoch, DOMAIN_BEACON_ATTESTER);
    let committees_at_epoch = committees_per_slot * config.slots_per_epoch.get();
    let committee_index = (slot % config.slots_per_epoch) * committees_per_slot + index;

    Ok(compute_committee(
        &indices,
        seed,
        committee_index,
        committees_at_epoch,
        config.shuffle_round_count,
    ))
}

fn compute_committee(
    indices: &[ValidatorIndex],
    seed: H256,
    index: u64,
    count: u64,
    rounds: u8,
) -> Vec<ValidatorIndex> {
    let length = indices.len() as u64;
    let index_count = NonZeroU64::new(length).expect("callers ensure indices are not empty");
    let start = length * index / count;
    let end = length * (index + 1) / count;

    (start..end)
        .map(|position| {
            let shuffled = shuffle_single(position, index_count, seed, rounds);
            indices[usize::try_from(shuffled).expect("shuffled position fits in usize")]
        })
        .collect()
}

/// Validator indices participating in `attestation`, in committee order.
pub fn attesting_indices(
    committee: &[ValidatorIndex],
    attestation: &Attestation,
) -> Result<Vec<ValidatorIndex>> {
    let bits = &attestation.aggregation_bits;

    ensure!(
        bits.len() == committee.len(),
        Error::AggregationBitlistLengthMismatch {
            bits: bits.len(),
            committee: committee.len(),
        },
    );

    Ok(committee
        .iter()
        .zip(bits.iter())
        .filter(|(_, bit)| *bit)
        .map(|(index, _)| *index)
        .collect())
}
