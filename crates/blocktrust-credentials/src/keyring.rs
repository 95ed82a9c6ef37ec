use blocktrust_core::{Digest, KeyRef, OwnerId, SignatureHex};
use blocktrust_crypto::{sign_digest, verify_digest_signature, KeyPair, PublicKey};
use dashmap::DashMap;
use std::sync::Arc;

use crate::error::CredentialError;

/// Keyring keys known to this engine.
///
/// Owners with an enrolled key pair can sign here; verify-only public keys can
/// be registered for keys held elsewhere.
#[derive(Default)]
pub struct Keyring {
    signers: DashMap<OwnerId, Arc<KeyPair>>,
    /// Key ref → (owner, public key).
    directory: DashMap<KeyRef, (OwnerId, PublicKey)>,
}

impl Keyring {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enroll a signing key for `owner`, replacing any earlier one.
    pub fn enroll(&self, owner: &OwnerId, keypair: KeyPair) -> KeyRef {
        let public = keypair.public_key();
        let key_ref = public.key_ref();
        self.directory
            .insert(key_ref.clone(), (owner.clone(), public));
        self.signers.insert(owner.clone(), Arc::new(keypair));
        tracing::info!(owner = %owner, key_ref = %key_ref, "keyring key enrolled");
        key_ref
    }

    /// Enroll a freshly generated key unless the owner already has one.
    pub fn ensure_enrolled(&self, owner: &OwnerId) -> KeyRef {
        match self.key_ref_for(owner) {
            Some(existing) => existing,
            None => self.enroll(owner, KeyPair::generate()),
        }
    }

    /// Register a public key held outside the engine.
    pub fn register_public(&self, owner: &OwnerId, public: PublicKey) -> KeyRef {
        let key_ref = public.key_ref();
        self.directory.insert(key_ref.clone(), (owner.clone(), public));
        key_ref
    }

    pub fn key_ref_for(&self, owner: &OwnerId) -> Option<KeyRef> {
        self.signers.get(owner).map(|kp| kp.key_ref())
    }

    pub fn public_key(&self, key_ref: &KeyRef) -> Option<PublicKey> {
        self.directory.get(key_ref).map(|e| e.value().1.clone())
    }

    pub fn owner_of(&self, key_ref: &KeyRef) -> Option<OwnerId> {
        self.directory.get(key_ref).map(|e| e.value().0.clone())
    }

    /// Sign a digest with the owner's enrolled key.
    pub fn sign(&self, owner: &OwnerId, digest: &Digest) -> Result<(SignatureHex, KeyRef), CredentialError> {
        let keypair = self
            .signers
            .get(owner)
            .map(|kp| Arc::clone(kp.value()))
            .ok_or_else(|| CredentialError::KeyNotFound(owner.to_string()))?;
        Ok((sign_digest(digest, &keypair), keypair.key_ref()))
    }

    /// Whether `signature` over `digest` verifies under the referenced key.
    pub fn verify(
        &self,
        digest: &Digest,
        signature: &SignatureHex,
        key_ref: &KeyRef,
    ) -> Result<(), CredentialError> {
        let public = self
            .public_key(key_ref)
            .ok_or_else(|| CredentialError::KeyNotFound(key_ref.to_string()))?;
        verify_digest_signature(digest, signature, &public)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.directory.len()
    }

    pub fn is_empty(&self) -> bool {
        self.directory.is_empty()
    }
}
