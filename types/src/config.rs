use core::{num::NonZeroU64, time::Duration};
use std::{borrow::Cow, collections::BTreeMap};

use nonzero_ext::nonzero;
use serde::{Deserialize, Serialize};

use crate::phase0::{
    consts::GENESIS_EPOCH,
    containers::Fork,
    primitives::{Epoch, Gwei, Slot, UnixSeconds, Version},
};

/// Runtime configuration of a network.
///
/// Quantities that determine SSZ container shapes are fixed at the mainnet
/// preset in `phase0::consts`. Everything the core arithmetic depends on at
/// runtime (slot timing, committee sizing, genesis triggers, the fork
/// schedule) lives here, so tests can run with the faster minimal values.
#[derive(Clone, PartialEq, Eq, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub config_name: Cow<'static, str>,

    // Time
    pub seconds_per_slot: NonZeroU64,
    pub slots_per_epoch: NonZeroU64,

    // Genesis
    pub genesis_delay: u64,
    pub genesis_fork_version: Version,
    pub min_genesis_active_validator_count: NonZeroU64,
    pub min_genesis_time: UnixSeconds,

    // Committees
    pub max_committees_per_slot: NonZeroU64,
    pub min_seed_lookahead: u64,
    pub shuffle_round_count: u8,
    pub target_committee_size: NonZeroU64,

    // Deposits and balances
    pub effective_balance_increment: NonZeroU64,
    pub max_effective_balance: Gwei,

    // Scheduled fork versions keyed by activation epoch.
    // The genesis fork version is implied at `GENESIS_EPOCH`.
    pub fork_schedule: BTreeMap<Epoch, Version>,
}

impl Default for Config {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl Config {
    #[must_use]
    pub fn mainnet() -> Self {
        Self {
            config_name: Cow::Borrowed("mainnet"),
            seconds_per_slot: nonzero!(12_u64),
            slots_per_epoch: nonzero!(32_u64),
            genesis_delay: 604_800,
            genesis_fork_version: Version::ZERO,
            min_genesis_active_validator_count: nonzero!(16_384_u64),
            min_genesis_time: 1_606_824_000,
            max_committees_per_slot: nonzero!(64_u64),
            min_seed_lookahead: 1,
            shuffle_round_count: 90,
            target_committee_size: nonzero!(128_u64),
            effective_balance_increment: nonzero!(1_000_000_000_u64),
            max_effective_balance: 32_000_000_000,
            fork_schedule: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn minimal() -> Self {
        Self {
            config_name: Cow::Borrowed("minimal"),
            seconds_per_slot: nonzero!(6_u64),
            slots_per_epoch: nonzero!(8_u64),
            genesis_delay: 300,
            genesis_fork_version: Version::new([0x00, 0x00, 0x00, 0x01]),
            min_genesis_active_validator_count: nonzero!(64_u64),
            min_genesis_time: 1_578_009_600,
            max_committees_per_slot: nonzero!(4_u64),
            min_seed_lookahead: 1,
            shuffle_round_count: 10,
            target_committee_size: nonzero!(4_u64),
            effective_balance_increment: nonzero!(1_000_000_000_u64),
            max_effective_balance: 32_000_000_000,
            fork_schedule: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn slot_duration(&self) -> Duration {
        Duration::from_secs(self.seconds_per_slot.get())
    }

    #[must_use]
    pub fn fork_version_at_epoch(&self, epoch: Epoch) -> Version {
        self.fork_schedule
            .range(..=epoch)
            .next_back()
            .map(|(_, version)| *version)
            .unwrap_or(self.genesis_fork_version)
    }

    #[must_use]
    pub fn fork_at_epoch(&self, epoch: Epoch) -> Fork {
        let current = self
            .fork_schedule
            .range(..=epoch)
            .next_back()
            .map(|(activation, version)| (*activation, *version));

        match current {
            Some((activation, version)) => Fork {
                previous_version: self
                    .fork_schedule
                    .range(..activation)
                    .next_back()
                    .map(|(_, previous)| *previous)
                    .unwrap_or(self.genesis_fork_version),
                current_version: version,
                epoch: activation,
            },
            None => Fork {
                previous_version: self.genesis_fork_version,
                current_version: self.genesis_fork_version,
                epoch: GENESIS_EPOCH,
            },
        }
    }

    /// Whether the scheduled fork version differs between two epochs.
    #[must_use]
    pub fn fork_boundary_crossed(&self, old_epoch: Epoch, new_epoch: Epoch) -> bool {
        self.fork_version_at_epoch(old_epoch) != self.fork_version_at_epoch(new_epoch)
    }

    #[must_use]
    pub fn epoch_at_slot(&self, slot: Slot) -> Epoch {
        slot / self.slots_per_epoch
    }

    #[must_use]
    pub fn start_slot_at_epoch(&self, epoch: Epoch) -> Slot {
        epoch * self.slots_per_epoch.get()
    }

    #[must_use]
    pub fn is_epoch_start(&self, slot: Slot) -> bool {
        slot % self.slots_per_epoch == 0
    }
}
