pub mod eth1_chain;
pub mod genesis;

pub use eth1_chain::{BlockStream, DepositEvent, Eth1Block, Eth1Chain, Eth1ChainStub};
