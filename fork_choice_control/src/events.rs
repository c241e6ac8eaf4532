use log::warn;
use serde::Serialize;
use strum::{AsRefStr, EnumString};
use tokio::sync::broadcast::{self, Receiver, Sender};

use fork_choice_store::ForkChoiceNode;
use types::{
    config::Config,
    phase0::{
        containers::Checkpoint,
        primitives::{Epoch, ForkDigest, Slot, Version, H256},
    },
};

pub const DEFAULT_MAX_EVENTS: usize = 100;

#[derive(Clone, Copy, PartialEq, Eq, Debug, AsRefStr, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Topic {
    Block,
    Head,
    JustifiedCheckpoint,
    FinalizedCheckpoint,
    ForkDigest,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
#[serde(untagged)]
pub enum Event {
    Block(BlockEvent),
    Head(HeadEvent),
    JustifiedCheckpoint(CheckpointEvent),
    FinalizedCheckpoint(CheckpointEvent),
    ForkDigest(ForkDigestEvent),
}

impl Event {
    #[must_use]
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Block(_) => Topic::Block,
            Self::Head(_) => Topic::Head,
            Self::JustifiedCheckpoint(_) => Topic::JustifiedCheckpoint,
            Self::FinalizedCheckpoint(_) => Topic::FinalizedCheckpoint,
            Self::ForkDigest(_) => Topic::ForkDigest,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct BlockEvent {
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: Slot,
    pub block: H256,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct HeadEvent {
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: Slot,
    pub block: H256,
    pub state: H256,
    pub epoch_transition: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct CheckpointEvent {
    pub block: H256,
    pub state: H256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub epoch: Epoch,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize)]
pub struct ForkDigestEvent {
    pub current_version: Version,
    pub fork_digest: ForkDigest,
    #[serde(with = "serde_utils::quoted_u64")]
    pub epoch: Epoch,
}

/// The typed event bus of the consensus core.
///
/// Emitting is a capability: components hold an `Arc` of this and publish;
/// consumers subscribe per topic. Events are dropped when nobody listens.
pub struct EventChannels {
    blocks: Sender<Event>,
    heads: Sender<Event>,
    justified_checkpoints: Sender<Event>,
    finalized_checkpoints: Sender<Event>,
    fork_digests: Sender<Event>,
}

impl Default for EventChannels {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EVENTS)
    }
}

impl EventChannels {
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            blocks: broadcast::channel(max_events).0,
            heads: broadcast::channel(max_events).0,
            justified_checkpoints: broadcast::channel(max_events).0,
            finalized_checkpoints: broadcast::channel(max_events).0,
            fork_digests: broadcast::channel(max_events).0,
        }
    }

    #[must_use]
    pub fn receiver_for(&self, topic: Topic) -> Receiver<Event> {
        match topic {
            Topic::Block => &self.blocks,
            Topic::Head => &self.heads,
            Topic::JustifiedCheckpoint => &self.justified_checkpoints,
            Topic::FinalizedCheckpoint => &self.finalized_checkpoints,
            Topic::ForkDigest => &self.fork_digests,
        }
        .subscribe()
    }

    pub fn send_block_event(&self, slot: Slot, block: H256) {
        self.send(&self.blocks, Event::Block(BlockEvent { slot, block }));
    }

    pub fn send_head_event(&self, config: &Config, head: &ForkChoiceNode) {
        let event = Event::Head(HeadEvent {
            slot: head.slot,
            block: head.block_root,
            state: head.state_root,
            epoch_transition: config.is_epoch_start(head.slot),
        });

        self.send(&self.heads, event);
    }

    pub fn send_justified_checkpoint_event(&self, checkpoint: Checkpoint, state: H256) {
        let event = Event::JustifiedCheckpoint(CheckpointEvent {
            block: checkpoint.root,
            state,
            epoch: checkpoint.epoch,
        });

        self.send(&self.justified_checkpoints, event);
    }

    pub fn send_finalized_checkpoint_event(&self, checkpoint: Checkpoint, state: H256) {
        let event = Event::FinalizedCheckpoint(CheckpointEvent {
            block: checkpoint.root,
            state,
            epoch: checkpoint.epoch,
        });

        self.send(&self.finalized_checkpoints, event);
    }

    pub fn send_fork_digest_event(
        &self,
        current_version: Version,
        fork_digest: ForkDigest,
        epoch: Epoch,
    ) {
        let event = Event::ForkDigest(ForkDigestEvent {
            current_version,
            fork_digest,
            epoch,
        });

        self.send(&self.fork_digests, event);
    }

    fn send(&self, sender: &Sender<Event>, event: Event) {
        if sender.receiver_count() == 0 {
            return;
        }

        let topic = event.topic();

        if let Err(error) = sender.send(event) {
            warn!("unable to send {} event: {error}", topic.as_ref());
        }
    }
}
