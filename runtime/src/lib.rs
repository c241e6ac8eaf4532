pub mod beacon_chain;

pub use beacon_chain::BeaconChain;
