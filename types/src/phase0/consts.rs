use ssz_types::typenum::{
    U1099511627776, U128, U16, U16777216, U2, U2048, U33, U4, U4096, U65536, U8192,
};

use crate::phase0::primitives::{DomainType, Epoch, Slot};

pub const DOMAIN_BEACON_ATTESTER: DomainType = DomainType::new([0x01, 0x00, 0x00, 0x00]);
pub const DOMAIN_BEACON_PROPOSER: DomainType = DomainType::new([0x00, 0x00, 0x00, 0x00]);
pub const DOMAIN_DEPOSIT: DomainType = DomainType::new([0x03, 0x00, 0x00, 0x00]);
pub const DOMAIN_RANDAO: DomainType = DomainType::new([0x02, 0x00, 0x00, 0x00]);

pub const FAR_FUTURE_EPOCH: Epoch = Epoch::MAX;
pub const GENESIS_EPOCH: Epoch = 0;
pub const GENESIS_SLOT: Slot = 0;

pub const DEPOSIT_CONTRACT_TREE_DEPTH: usize = 32;

// List and vector capacities are fixed at the mainnet preset.
// Variable quantities (slots per epoch, committee sizing) live in `Config`.
pub type DepositProofLength = U33;
pub type EpochsPerHistoricalVector = U65536;
pub type EpochsPerSlashingsVector = U8192;
pub type HistoricalRootsLimit = U16777216;
pub type JustificationBitsLength = U4;
pub type MaxAttestations = U128;
pub type MaxAttesterSlashings = U2;
pub type MaxDeposits = U16;
pub type MaxPendingAttestations = U4096;
pub type MaxProposerSlashings = U16;
pub type MaxValidatorsPerCommittee = U2048;
pub type MaxVoluntaryExits = U16;
pub type SlotsPerEth1VotingPeriod = U2048;
pub type SlotsPerHistoricalRoot = U8192;
pub type ValidatorRegistryLimit = U1099511627776;
