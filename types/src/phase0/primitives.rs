use ssz_types::{
    typenum::{U48, U96},
    FixedVector,
};

pub use alloy_primitives::{aliases::B32, B256 as H256};

pub type Slot = u64;
pub type Epoch = u64;
pub type CommitteeIndex = u64;
pub type ValidatorIndex = u64;
pub type Gwei = u64;
pub type UnixSeconds = u64;
pub type DepositIndex = u64;

pub type ExecutionBlockHash = H256;
pub type ExecutionBlockNumber = u64;

pub type Version = B32;
pub type ForkDigest = B32;
pub type DomainType = B32;
pub type Domain = H256;

// Signatures and public keys are kept in compressed byte form.
// Decompression and verification happen behind the injectable verifier.
pub type PublicKeyBytes = FixedVector<u8, U48>;
pub type SignatureBytes = FixedVector<u8, U96>;
