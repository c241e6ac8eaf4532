use ethereum_hashing::hash_fixed;
use tree_hash::TreeHash;

use types::phase0::{
    containers::{ForkData, SigningData},
    primitives::{Domain, DomainType, Epoch, ForkDigest, Version, H256},
};

#[must_use]
pub fn compute_fork_data_root(current_version: Version, genesis_validators_root: H256) -> H256 {
    ForkData {
        current_version,
        genesis_validators_root,
    }
    .tree_hash_root()
}

/// <https://github.com/ethereum/consensus-specs/blob/v1.3.0/specs/phase0/beacon-chain.md#compute_fork_digest>
#[must_use]
pub fn compute_fork_digest(current_version: Version, genesis_validators_root: H256) -> ForkDigest {
    let fork_data_root = compute_fork_data_root(current_version, genesis_validators_root);
    ForkDigest::from_slice(&fork_data_root[..4])
}

#[must_use]
pub fn compute_domain(
    domain_type: DomainType,
    fork_version: Version,
    genesis_validators_root: H256,
) -> Domain {
    let fork_data_root = compute_fork_data_root(fork_version, genesis_validators_root);

    let mut domain = [0; 32];
    domain[..4].copy_from_slice(domain_type.as_slice());
    domain[4..].copy_from_slice(&fork_data_root[..28]);

    Domain::new(domain)
}

#[must_use]
pub fn compute_signing_root(object: &impl TreeHash, domain: Domain) -> H256 {
    SigningData {
        object_root: object.tree_hash_root(),
        domain,
    }
    .tree_hash_root()
}

#[must_use]
pub fn hash_epoch_with_mix(domain_type: DomainType, epoch: Epoch, mix: H256) -> H256 {
    let mut input = [0; 44];
    input[..4].copy_from_slice(domain_type.as_slice());
    input[4..12].copy_from_slice(&epoch.to_le_bytes());
    input[12..].copy_from_slice(mix.as_slice());

    H256::new(hash_fixed(&input))
}
