use std::sync::Arc;

use anyhow::{ensure, Result};

use fork_choice_store::{AttestationAction, Error, Store};
use helper_functions::{accessors, misc, verifier::Verifier};
use types::{
    config::Config,
    phase0::{
        consts::DOMAIN_BEACON_ATTESTER,
        containers::Attestation,
        primitives::PublicKeyBytes,
    },
};

use crate::storage::Storage;

/// Validates attestations against a store snapshot and recovers the
/// participating validator set. Safe to run concurrently; the resulting
/// votes are serialised through the mutator queue.
pub struct AttestationProcessor {
    config: Arc<Config>,
    storage: Arc<Storage>,
    verifier: Arc<dyn Verifier>,
}

impl AttestationProcessor {
    #[must_use]
    pub fn new(config: Arc<Config>, storage: Arc<Storage>, verifier: Arc<dyn Verifier>) -> Self {
        Self {
            config,
            storage,
            verifier,
        }
    }

    pub fn validate_attestation(
        &self,
        store: &Store<Storage>,
        attestation: &Attestation,
    ) -> Result<AttestationAction> {
        let data = attestation.data;

        // The vote must be for a block we have seen.
        ensure!(
            store.contains_block(data.beacon_block_root)
                || self.storage.contains_block(data.beacon_block_root)?,
            Error::AttestationForUnknownBlock {
                beacon_block_root: data.beacon_block_root,
            },
        );

        let current_epoch = store.current_epoch();
        let target_epoch = data.target.epoch;

        ensure!(
            target_epoch <= current_epoch + 1,
            Error::AttestationTargetsFutureEpoch {
                target_epoch,
                current_epoch,
            },
        );

        ensure!(
            self.config.epoch_at_slot(data.slot) == target_epoch,
            Error::AttestationTargetsWrongEpoch {
                slot: data.slot,
                target_epoch,
            },
        );

        // The committee comes from the target state, fetched by root.
        let target = store
            .node(data.target.root)
            .ok_or(Error::AttestationForUnknownBlock {
                beacon_block_root: data.target.root,
            })?;

        let target_state = self
            .storage
            .state_by_state_root(target.state_root)?
            .ok_or(Error::MissingState {
                block_root: target.block_root,
                state_root: target.state_root,
            })?;

        let committee =
            accessors::beacon_committee(&self.config, &target_state, data.slot, data.index)?;

        let attesting_indices = accessors::attesting_indices(&committee, attestation)?;

        if attesting_indices.is_empty() {
            return Ok(AttestationAction::Ignore);
        }

        let pubkeys = attesting_indices
            .iter()
            .map(|validator_index| {
                let index = usize::try_from(*validator_index)
                    .expect("validator indices in committees fit in usize");
                target_state.validators[index].pubkey.clone()
            })
            .collect::<Vec<PublicKeyBytes>>();

        let domain = misc::compute_domain(
            DOMAIN_BEACON_ATTESTER,
            self.config.fork_version_at_epoch(target_epoch),
            target_state.genesis_validators_root,
        );

        let signing_root = misc::compute_signing_root(&data, domain);

        self.verifier
            .verify_aggregate(&pubkeys, signing_root, &attestation.signature)
            .map_err(|_| Error::InvalidAttestationSignature)?;

        Ok(AttestationAction::Accept {
            beacon_block_root: data.beacon_block_root,
            target_epoch,
            attesting_indices,
        })
    }
}
