use anyhow::Result;
use futures::{
    channel::mpsc::{UnboundedReceiver, UnboundedSender},
    stream::BoxStream,
    StreamExt as _,
};
use parking_lot::Mutex;

use types::{
    config::Config,
    phase0::{
        beacon_state::BeaconState,
        containers::DepositData,
        primitives::{DepositIndex, ExecutionBlockHash, ExecutionBlockNumber, UnixSeconds},
    },
};

/// An eth1 block event as delivered by the follower.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Eth1Block {
    pub hash: ExecutionBlockHash,
    pub number: ExecutionBlockNumber,
    pub timestamp: UnixSeconds,
}

/// A deposit observed in the deposit contract, in log order.
#[derive(Clone, PartialEq, Debug)]
pub struct DepositEvent {
    pub data: DepositData,
    pub index: DepositIndex,
}

pub type BlockStream = BoxStream<'static, Result<Eth1Block>>;

/// Contract of the eth1 follower.
///
/// The follower itself (JSON-RPC polling, reorg handling) lives outside the
/// consensus core. Dropping the stream returned by [`Eth1Chain::block_stream`]
/// is the unsubscription.
pub trait Eth1Chain: Send + Sync {
    fn block_stream(&self) -> Result<BlockStream>;

    /// Deposits with block number at most `to_block_number`,
    /// starting at deposit index `from` if given.
    fn process_past_deposits(
        &self,
        from: Option<DepositIndex>,
        to_block_number: ExecutionBlockNumber,
    ) -> Result<Vec<DepositEvent>>;

    /// Lets the follower seed its block cache once a state is known.
    fn init_block_cache(&self, _config: &Config, _state: &BeaconState) -> Result<()> {
        Ok(())
    }
}

/// Scripted eth1 source.
///
/// Blocks already pushed with [`Eth1ChainStub::push_block`] are replayed to
/// new streams; later pushes are delivered live. Deposits are attributed to
/// eth1 block numbers up front.
#[derive(Default)]
pub struct Eth1ChainStub {
    blocks: Mutex<Vec<Eth1Block>>,
    deposits: Mutex<Vec<(ExecutionBlockNumber, DepositEvent)>>,
    subscribers: Mutex<Vec<UnboundedSender<Result<Eth1Block>>>>,
}

impl Eth1ChainStub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_deposit(&self, block_number: ExecutionBlockNumber, deposit: DepositEvent) {
        self.deposits.lock().push((block_number, deposit));
    }

    pub fn push_block(&self, block: Eth1Block) {
        self.blocks.lock().push(block);

        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.unbounded_send(Ok(block)).is_ok());
    }
}

impl Eth1Chain for Eth1ChainStub {
    fn block_stream(&self) -> Result<BlockStream> {
        let (sender, receiver): (_, UnboundedReceiver<Result<Eth1Block>>) =
            futures::channel::mpsc::unbounded();

        for block in self.blocks.lock().iter() {
            sender
                .unbounded_send(Ok(*block))
                .expect("receiver is alive until this function returns");
        }

        self.subscribers.lock().push(sender);

        Ok(receiver.boxed())
    }

    fn process_past_deposits(
        &self,
        from: Option<DepositIndex>,
        to_block_number: ExecutionBlockNumber,
    ) -> Result<Vec<DepositEvent>> {
        let from = from.unwrap_or(0);

        let mut deposits = self
            .deposits
            .lock()
            .iter()
            .filter(|(block_number, deposit)| {
                *block_number <= to_block_number && deposit.index >= from
            })
            .map(|(_, deposit)| deposit.clone())
            .collect::<Vec<_>>();

        deposits.sort_by_key(|deposit| deposit.index);

        Ok(deposits)
    }
}
