//! A [`Stream`]-based slot timer for the beacon chain.
//!
//! Implemented with [`Interval`]. Tick instants are derived from the genesis
//! anchor rather than from the previous tick, so a wall-clock backstep cannot
//! produce a lower slot; the stream simply resynchronises on the next
//! scheduled instant.
//!
//! [`Interval`]: tokio::time::Interval

use core::{error::Error, time::Duration};
use std::time::{Instant, SystemTime, SystemTimeError};

use anyhow::Result;
use futures::stream::{Stream, StreamExt as _};
use thiserror::Error;
use tokio_stream::wrappers::IntervalStream;
use types::{
    config::Config,
    phase0::{
        consts::GENESIS_SLOT,
        primitives::{Epoch, Slot, UnixSeconds},
    },
};

#[cfg(test)]
mod fake_time;

pub trait InstantLike: Sized {
    fn checked_add(self, duration: Duration) -> Option<Self>;
}

pub trait SystemTimeLike: Copy {
    type Error: Error + Send + Sync + 'static;

    const UNIX_EPOCH: Self;

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error>;
}

impl InstantLike for Instant {
    fn checked_add(self, duration: Duration) -> Option<Self> {
        Self::checked_add(&self, duration)
    }
}

impl SystemTimeLike for SystemTime {
    type Error = SystemTimeError;

    const UNIX_EPOCH: Self = Self::UNIX_EPOCH;

    fn duration_since(self, earlier: Self) -> Result<Duration, Self::Error> {
        Self::duration_since(&self, earlier)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Tick {
    pub slot: Slot,
}

impl Tick {
    #[must_use]
    pub const fn start_of_slot(slot: Slot) -> Self {
        Self { slot }
    }

    pub fn at_time(config: &Config, time: UnixSeconds, genesis_time: UnixSeconds) -> Result<Self> {
        let duration_since_unix_epoch = Duration::from_secs(time);
        Ok(Self::from_duration(
            config,
            duration_since_unix_epoch,
            genesis_time,
        ))
    }

    pub fn current(config: &Config, genesis_time: UnixSeconds) -> Result<Self> {
        let duration_since_unix_epoch = SystemTime::now().duration_since(SystemTime::UNIX_EPOCH)?;
        Ok(Self::from_duration(
            config,
            duration_since_unix_epoch,
            genesis_time,
        ))
    }

    #[must_use]
    pub fn epoch(self, config: &Config) -> Epoch {
        config.epoch_at_slot(self.slot)
    }

    #[must_use]
    pub fn is_start_of_epoch(self, config: &Config) -> bool {
        config.is_epoch_start(self.slot)
    }

    fn from_duration(
        config: &Config,
        duration_since_unix_epoch: Duration,
        genesis_time: UnixSeconds,
    ) -> Self {
        let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

        let seconds_since_genesis = duration_since_unix_epoch
            .saturating_sub(unix_epoch_to_genesis)
            .as_secs();

        let slots_since_genesis = seconds_since_genesis / config.seconds_per_slot;

        Self::start_of_slot(GENESIS_SLOT + slots_since_genesis)
    }

    fn next(self) -> Result<Self> {
        let slot = self.slot.checked_add(1).ok_or(ClockError::RanOutOfSlots)?;
        Ok(Self::start_of_slot(slot))
    }
}

#[derive(Debug, Error)]
#[cfg_attr(test, derive(PartialEq, Eq))]
pub enum ClockError {
    #[error("time of next tick overflowed")]
    NextInstantOverflow,
    #[error("ran out of slots")]
    RanOutOfSlots,
}

/// A stream producing one [`Tick`] at the start of every slot.
pub fn ticks(
    config: &Config,
    genesis_time: UnixSeconds,
) -> Result<impl Stream<Item = Result<Tick>>> {
    // We assume the `Instant` and `SystemTime` obtained here correspond to the same point in time.
    // This is slightly inaccurate but the error will probably be negligible compared to clock
    // differences between different nodes in the network.
    let now_instant = Instant::now();
    let now_system_time = SystemTime::now();

    let (mut next_tick, next_instant) =
        next_tick_with_instant(config, now_instant, now_system_time, genesis_time)?;

    let interval = tokio::time::interval_at(next_instant.into(), config.slot_duration());

    Ok(IntervalStream::new(interval).map(move |_| {
        let current_tick = next_tick;
        next_tick = current_tick.next()?;
        Ok(current_tick)
    }))
}

fn next_tick_with_instant<I: InstantLike, S: SystemTimeLike>(
    config: &Config,
    now_instant: I,
    now_system_time: S,
    genesis_time: UnixSeconds,
) -> Result<(Tick, I)> {
    let unix_epoch_to_now = now_system_time.duration_since(S::UNIX_EPOCH)?;
    let unix_epoch_to_genesis = Duration::from_secs(genesis_time);

    // Some platforms do not support negative `Instant`s. Operations that would produce an `Instant`
    // corresponding to time before the epoch will panic on those platforms. This means we are not
    // allowed to subtract `Duration`s from `Instant`s. The `InstantLike` trait conveniently
    // prevents us from doing so.

    let next_tick;
    let now_to_next_tick;

    if unix_epoch_to_now <= unix_epoch_to_genesis {
        next_tick = Tick::start_of_slot(GENESIS_SLOT);
        now_to_next_tick = unix_epoch_to_genesis - unix_epoch_to_now;
    } else {
        let slot_duration = config.slot_duration();
        let genesis_to_now = unix_epoch_to_now - unix_epoch_to_genesis;
        let slots_since_genesis = genesis_to_now.as_secs() / config.seconds_per_slot;
        let genesis_to_current_slot =
            Duration::from_secs(slots_since_genesis * config.seconds_per_slot.get());
        let current_slot_to_now = genesis_to_now - genesis_to_current_slot;

        if current_slot_to_now.is_zero() {
            next_tick = Tick::start_of_slot(GENESIS_SLOT + slots_since_genesis);
            now_to_next_tick = Duration::ZERO;
        } else {
            next_tick = Tick::start_of_slot(GENESIS_SLOT + slots_since_genesis).next()?;
            now_to_next_tick = slot_duration - current_slot_to_now;
        }
    }

    let next_instant = now_instant
        .checked_add(now_to_next_tick)
        .ok_or(ClockError::NextInstantOverflow)?;

    Ok((next_tick, next_instant))
}
