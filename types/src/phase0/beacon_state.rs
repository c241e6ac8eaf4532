use serde::{Deserialize, Serialize};
use ssz_derive::{Decode, Encode};
use ssz_types::{BitVector, FixedVector, VariableList};
use tree_hash_derive::TreeHash;

use crate::phase0::{
    consts::{
        EpochsPerHistoricalVector, EpochsPerSlashingsVector, HistoricalRootsLimit,
        JustificationBitsLength, MaxPendingAttestations, SlotsPerEth1VotingPeriod,
        SlotsPerHistoricalRoot, ValidatorRegistryLimit,
    },
    containers::{BeaconBlockHeader, Checkpoint, Eth1Data, Fork, PendingAttestation, Validator},
    primitives::{DepositIndex, Gwei, Slot, UnixSeconds, H256},
};

#[derive(Clone, PartialEq, Debug, Default, Deserialize, Serialize, Encode, Decode, TreeHash)]
#[serde(deny_unknown_fields)]
pub struct BeaconState {
    // Versioning
    #[serde(with = "serde_utils::quoted_u64")]
    pub genesis_time: UnixSeconds,
    pub genesis_validators_root: H256,
    #[serde(with = "serde_utils::quoted_u64")]
    pub slot: Slot,
    pub fork: Fork,
    // History
    pub latest_block_header: BeaconBlockHeader,
    pub block_roots: FixedVector<H256, SlotsPerHistoricalRoot>,
    pub state_roots: FixedVector<H256, SlotsPerHistoricalRoot>,
    pub historical_roots: VariableList<H256, HistoricalRootsLimit>,
    // Eth1
    pub eth1_data: Eth1Data,
    pub eth1_data_votes: VariableList<Eth1Data, SlotsPerEth1VotingPeriod>,
    #[serde(with = "serde_utils::quoted_u64")]
    pub eth1_deposit_index: DepositIndex,
    // Registry
    pub validators: VariableList<Validator, ValidatorRegistryLimit>,
    #[serde(with = "ssz_types::serde_utils::quoted_u64_var_list")]
    pub balances: VariableList<Gwei, ValidatorRegistryLimit>,
    // Randomness
    pub randao_mixes: FixedVector<H256, EpochsPerHistoricalVector>,
    // Slashings
    #[serde(with = "ssz_types::serde_utils::quoted_u64_fixed_vec")]
    pub slashings: FixedVector<Gwei, EpochsPerSlashingsVector>,
    // Attestations
    pub previous_epoch_attestations: VariableList<PendingAttestation, MaxPendingAttestations>,
    pub current_epoch_attestations: VariableList<PendingAttestation, MaxPendingAttestations>,
    // Finality
    pub justification_bits: BitVector<JustificationBitsLength>,
    pub previous_justified_checkpoint: Checkpoint,
    pub current_justified_checkpoint: Checkpoint,
    pub finalized_checkpoint: Checkpoint,
}
