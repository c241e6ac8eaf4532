use anyhow::Result;

use types::phase0::primitives::{PublicKeyBytes, SignatureBytes, H256};

/// Boundary to the BLS backend.
///
/// The consensus core never decompresses keys or signatures itself. Callers
/// inject an implementation backed by a real BLS library; `NullVerifier`
/// accepts everything and is used for trusted inputs and in tests.
pub trait Verifier: Send + Sync {
    fn verify_single(
        &self,
        pubkey: &PublicKeyBytes,
        message: H256,
        signature: &SignatureBytes,
    ) -> Result<()>;

    fn verify_aggregate(
        &self,
        pubkeys: &[PublicKeyBytes],
        message: H256,
        signature: &SignatureBytes,
    ) -> Result<()>;
}

#[derive(Clone, Copy, Default, Debug)]
pub struct NullVerifier;

impl Verifier for NullVerifier {
    fn verify_single(
        &self,
        _pubkey: &PublicKeyBytes,
        _message: H256,
        _signature: &SignatureBytes,
    ) -> Result<()> {
        Ok(())
    }

    fn verify_aggregate(
        &self,
        _pubkeys: &[PublicKeyBytes],
        _message: H256,
        _signature: &SignatureBytes,
    ) -> Result<()> {
        Ok(())
    }
}
