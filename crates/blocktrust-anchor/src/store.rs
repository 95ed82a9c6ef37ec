use blocktrust_core::{Attestation, ChainTxRef, CredentialRef, Digest};
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::AnchorError;

/// Append-only attestation storage.
///
/// Records are never mutated or removed. Only genuine attestations enter the
/// `(digest, credential)` index used for idempotent submission.
#[derive(Default)]
pub struct AttestationStore {
    by_id: DashMap<Uuid, Attestation>,
    by_tx: DashMap<ChainTxRef, Uuid>,
    genuine: DashMap<(Digest, CredentialRef), Uuid>,
}

impl AttestationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, attestation: Attestation) -> Result<(), AnchorError> {
        let id = attestation.id;
        match self.by_id.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(AnchorError::DuplicateAttestation(id))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                if attestation.is_genuine() {
                    self.genuine.insert(
                        (attestation.digest, attestation.credential_ref.clone()),
                        id,
                    );
                }
                self.by_tx.insert(attestation.chain_tx_ref.clone(), id);
                slot.insert(attestation);
            }
        }
        tracing::debug!(attestation_id = %id, "attestation stored");
        Ok(())
    }

    pub fn get(&self, id: &Uuid) -> Option<Attestation> {
        self.by_id.get(id).map(|a| a.value().clone())
    }

    pub fn get_by_tx(&self, tx_ref: &ChainTxRef) -> Option<Attestation> {
        let id = *self.by_tx.get(tx_ref)?.value();
        self.get(&id)
    }

    pub fn find_genuine(&self, digest: &Digest, credential: &CredentialRef) -> Option<Attestation> {
        let id = *self
            .genuine
            .get(&(*digest, credential.clone()))?
            .value();
        self.get(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn genuine_count(&self) -> usize {
        self.genuine.len()
    }
}
