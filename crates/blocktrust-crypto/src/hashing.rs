use blocktrust_core::{CoreError, CredentialRef, Digest, HashAlgorithm};
use sha2::{Digest as _, Sha256};
use sha3::Keccak256;

/// Hash raw document bytes with the chosen algorithm.
pub fn compute_digest(bytes: &[u8], algorithm: HashAlgorithm) -> Digest {
    let out: [u8; 32] = match algorithm {
        HashAlgorithm::ContentHash => Sha256::digest(bytes).into(),
        HashAlgorithm::ChainNativeHash => Keccak256::digest(bytes).into(),
    };
    Digest::new(out, algorithm)
}

/// Parse a client-supplied digest string, tagging it as a content hash.
pub fn normalize(raw: &str) -> Result<Digest, CoreError> {
    normalize_with(raw, HashAlgorithm::ContentHash)
}

pub fn normalize_with(raw: &str, algorithm: HashAlgorithm) -> Result<Digest, CoreError> {
    let digest = Digest::normalize(raw, algorithm)?;
    tracing::trace!(digest = %digest, algorithm = %algorithm, "digest normalized");
    Ok(digest)
}

/// Stable identifier for one logical submission of `digest` under `credential`.
///
/// Every attempt of the same operation shares this id in the attempt ledger.
pub fn operation_id(digest: &Digest, credential: &CredentialRef) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(digest.algorithm().as_str().as_bytes());
    hasher.update(digest.as_bytes());
    hasher.update(credential.to_string().as_bytes());
    hasher.finalize().to_hex()[..32].to_string()
}

/// Recompute-and-compare helpers for digests.
pub trait DigestExt {
    /// Whether `bytes` hash to this digest under its own algorithm.
    fn matches_content(&self, bytes: &[u8]) -> bool;
}

impl DigestExt for Digest {
    fn matches_content(&self, bytes: &[u8]) -> bool {
        compute_digest(bytes, self.algorithm()).as_bytes() == self.as_bytes()
    }
}
