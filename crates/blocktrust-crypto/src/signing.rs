use blocktrust_core::{Digest, SignatureHex};
use ed25519_dalek::{Signer, Verifier};

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};

/// Keyring signature over the 32 raw digest bytes.
pub fn sign_digest(digest: &Digest, keypair: &KeyPair) -> SignatureHex {
    let sig = keypair.signing_key().sign(digest.as_bytes());
    SignatureHex::from_bytes(&sig.to_bytes())
}

/// Check a keyring signature. The algorithm tag is not part of the message.
pub fn verify_digest_signature(
    digest: &Digest,
    signature: &SignatureHex,
    pubkey: &PublicKey,
) -> Result<(), CryptoError> {
    let sig = ed25519_dalek::Signature::from_bytes(&signature.to_bytes());
    pubkey
        .verifying_key()
        .verify(digest.as_bytes(), &sig)
        .map_err(|_| CryptoError::SignatureVerificationFailed)
}
