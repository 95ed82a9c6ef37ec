use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::credential_state::{CredentialStatus, InvalidationCause};
use crate::error::CoreError;

/// Length of every document digest, in bytes.
pub const DIGEST_LEN: usize = 32;

/// The two interchangeable digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    /// General-purpose 256-bit hash over raw bytes (SHA-256).
    ContentHash,
    /// The anchoring chain's native 256-bit hash (Keccak-256).
    ChainNativeHash,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContentHash => "content-hash",
            Self::ChainNativeHash => "chain-native-hash",
        }
    }
}

impl Default for HashAlgorithm {
    fn default() -> Self {
        Self::ContentHash
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = CoreError;

    /// Accepts the canonical names plus the concrete hash names used by clients.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "content-hash" | "sha256" | "sha-256" => Ok(Self::ContentHash),
            "chain-native-hash" | "keccak256" | "keccak-256" => Ok(Self::ChainNativeHash),
            other => Err(CoreError::ValidationError(format!(
                "unknown hash algorithm: {}",
                other
            ))),
        }
    }
}

/// A canonical 32-byte document digest tagged with its algorithm.
///
/// Textual form is always `0x` followed by 64 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "DigestRepr", into = "DigestRepr")]
pub struct Digest {
    bytes: [u8; DIGEST_LEN],
    algorithm: HashAlgorithm,
}

#[derive(Serialize, Deserialize)]
struct DigestRepr {
    digest: String,
    #[serde(default)]
    algorithm: HashAlgorithm,
}

impl TryFrom<DigestRepr> for Digest {
    type Error = CoreError;

    fn try_from(repr: DigestRepr) -> Result<Self, Self::Error> {
        Digest::normalize(&repr.digest, repr.algorithm)
    }
}

impl From<Digest> for DigestRepr {
    fn from(d: Digest) -> Self {
        Self {
            digest: d.to_hex(),
            algorithm: d.algorithm,
        }
    }
}

impl Digest {
    pub fn new(bytes: [u8; DIGEST_LEN], algorithm: HashAlgorithm) -> Self {
        Self { bytes, algorithm }
    }

    /// Parse any accepted textual digest into canonical form.
    ///
    /// Whitespace is trimmed, case is folded and an optional `0x` prefix is
    /// stripped; exactly 64 hex characters must remain.
    pub fn normalize(raw: &str, algorithm: HashAlgorithm) -> Result<Self, CoreError> {
        let folded = raw.trim().to_ascii_lowercase();
        let body = folded.strip_prefix("0x").unwrap_or(&folded);

        if body.chars().count() != DIGEST_LEN * 2 {
            return Err(CoreError::InvalidDigest(format!(
                "expected 64 characters of hex after the optional 0x prefix, received {} characters",
                body.chars().count()
            )));
        }
        if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidDigest(
                "expected 64 characters of hex, found a non-hex character".into(),
            ));
        }

        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(body, &mut bytes)
            .map_err(|e| CoreError::InvalidDigest(e.to_string()))?;
        Ok(Self { bytes, algorithm })
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.bytes
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Re-tag the same 32 bytes with another algorithm.
    pub fn with_algorithm(self, algorithm: HashAlgorithm) -> Self {
        Self { algorithm, ..self }
    }

    /// Canonical `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.bytes))
    }

    /// Byte-level equality, ignoring the algorithm tag.
    pub fn same_bytes(&self, other: &Digest) -> bool {
        self.bytes == other.bytes
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({}, {})", self.to_hex(), self.algorithm)
    }
}

/// Strip an optional `0x`, check length and hex alphabet, return lowercase hex.
fn parse_hex_field(raw: &str, hex_len: usize, field: &str) -> Result<String, CoreError> {
    let folded = raw.trim().to_ascii_lowercase();
    let body = folded.strip_prefix("0x").unwrap_or(&folded);
    if body.len() != hex_len || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(CoreError::MalformedAttestation(format!(
            "{} must be {} hex characters",
            field, hex_len
        )));
    }
    Ok(body.to_string())
}

/// Opaque identifier of a credential owner (the platform user).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self, CoreError> {
        let id = id.into();
        if id.is_empty() || id.len() > 128 {
            return Err(CoreError::ValidationError(
                "owner id must be 1..=128 characters".into(),
            ));
        }
        if id.chars().any(|c| c == '#' || c.is_whitespace() || c.is_control()) {
            return Err(CoreError::ValidationError(format!(
                "owner id contains a forbidden character: {:?}",
                id
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for OwnerId {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<OwnerId> for String {
    fn from(id: OwnerId) -> Self {
        id.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A credential version pinned at signing time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialRef {
    pub owner_id: OwnerId,
    pub version: u32,
}

impl CredentialRef {
    pub fn new(owner_id: OwnerId, version: u32) -> Self {
        Self { owner_id, version }
    }

    /// SHA-256 of `<owner>#<version>`, the value recorded on-chain.
    pub fn commitment(&self) -> [u8; 32] {
        Sha256::digest(self.to_string().as_bytes()).into()
    }
}

impl fmt::Display for CredentialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.owner_id, self.version)
    }
}

/// Transaction hash of an anchoring transaction (`0x` + 64 hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainTxRef(String);

impl ChainTxRef {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        Ok(Self(format!("0x{}", parse_hex_field(raw, 64, "chain tx ref")?)))
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(format!("0x{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChainTxRef {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChainTxRef> for String {
    fn from(r: ChainTxRef) -> Self {
        r.0
    }
}

impl fmt::Display for ChainTxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Account address on the anchoring chain (`0x` + 40 hex, lowercase).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChainAddress(String);

impl ChainAddress {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let body = parse_hex_field(raw, 40, "chain address")
            .map_err(|_| CoreError::ValidationError(format!("invalid chain address: {}", raw)))?;
        Ok(Self(format!("0x{}", body)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChainAddress {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ChainAddress> for String {
    fn from(a: ChainAddress) -> Self {
        a.0
    }
}

impl fmt::Display for ChainAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Keyring key fingerprint: 40 uppercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyRef(String);

impl KeyRef {
    /// Parse a fingerprint; interior spaces (as printed by keyring tools) are ignored.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
        let body = parse_hex_field(&compact, 40, "keyring key ref")?;
        Ok(Self(body.to_ascii_uppercase()))
    }

    pub fn from_fingerprint(fingerprint: [u8; 20]) -> Self {
        Self(hex::encode_upper(fingerprint))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for KeyRef {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<KeyRef> for String {
    fn from(k: KeyRef) -> Self {
        k.0
    }
}

impl fmt::Display for KeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex-encoded 64-byte keyring signature (128 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SignatureHex(String);

impl SignatureHex {
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        Ok(Self(parse_hex_field(raw, 128, "keyring signature")?))
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        let mut out = [0u8; 64];
        // Validated at construction.
        let _ = hex::decode_to_slice(&self.0, &mut out);
        out
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SignatureHex {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SignatureHex> for String {
    fn from(s: SignatureHex) -> Self {
        s.0
    }
}

/// One version of an owner's identity credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub owner_id: OwnerId,
    /// Monotonic per owner, starting at 1.
    pub version: u32,
    pub status: CredentialStatus,
    /// Chain account expected to sign anchoring transactions for this version.
    pub holder_address: ChainAddress,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub invalidated_at: Option<DateTime<Utc>>,
    pub invalidation_cause: Option<InvalidationCause>,
}

impl Credential {
    pub fn credential_ref(&self) -> CredentialRef {
        CredentialRef::new(self.owner_id.clone(), self.version)
    }

    /// Whether this version can back a new attestation right now.
    pub fn is_usable(&self) -> bool {
        self.status == CredentialStatus::Active
    }

    /// Whether this version was active at `at`, regardless of its current status.
    ///
    /// `at` is a block timestamp with whole-second precision, so activation
    /// is floored and invalidation ceiled to the second before comparing.
    pub fn was_active_at(&self, at: DateTime<Utc>) -> bool {
        match self.activated_at {
            Some(activated) if activated.trunc_subsecs(0) <= at => self
                .invalidated_at
                .map_or(true, |invalidated| at < ceil_to_second(invalidated)),
            _ => false,
        }
    }
}

fn ceil_to_second(instant: DateTime<Utc>) -> DateTime<Utc> {
    let floor = instant.trunc_subsecs(0);
    if floor == instant {
        instant
    } else {
        floor + chrono::Duration::seconds(1)
    }
}

/// Whether an attestation is authoritative. Never shown to untrusted readers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authenticity {
    Genuine,
    Decoy,
}

/// An immutable attestation record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attestation {
    pub id: Uuid,
    #[serde(flatten)]
    pub digest: Digest,
    pub keyring_signature: SignatureHex,
    pub keyring_key_ref: KeyRef,
    pub chain_tx_ref: ChainTxRef,
    pub credential_ref: CredentialRef,
    pub created_at: DateTime<Utc>,
    pub authenticity: Authenticity,
}

impl Attestation {
    pub fn algorithm(&self) -> HashAlgorithm {
        self.digest.algorithm()
    }

    pub fn is_genuine(&self) -> bool {
        self.authenticity == Authenticity::Genuine
    }

    /// The payload shown to untrusted readers; drops the authenticity tag.
    pub fn public_view(&self) -> AttestationView {
        AttestationView {
            id: self.id,
            digest: self.digest,
            keyring_signature: self.keyring_signature.clone(),
            keyring_key_ref: self.keyring_key_ref.clone(),
            chain_tx_ref: self.chain_tx_ref.clone(),
            credential_ref: self.credential_ref.clone(),
            created_at: self.created_at,
        }
    }
}

/// Attestation as exposed over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationView {
    pub id: Uuid,
    #[serde(flatten)]
    pub digest: Digest,
    pub keyring_signature: SignatureHex,
    pub keyring_key_ref: KeyRef,
    pub chain_tx_ref: ChainTxRef,
    pub credential_ref: CredentialRef,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPPER: &str = "A94A8FE5CCB19BA61C4C0873D391E987982FBBD3E4F4B8B5D0A8E1B2C3D4E5F6";
    const CANONICAL: &str = "0xa94a8fe5ccb19ba61c4c0873d391e987982fbbd3e4f4b8b5d0a8e1b2c3d4e5f6";

    #[test]
    fn test_normalize_uppercase_without_prefix() {
        let d = Digest::normalize(UPPER, HashAlgorithm::ContentHash).unwrap();
        assert_eq!(d.to_hex(), CANONICAL);
    }

    #[test]
    fn test_normalize_variants_agree() {
        let inputs = [
            UPPER.to_string(),
            format!("0x{}", UPPER),
            format!("0X{}", UPPER.to_lowercase()),
            format!("  {}\n", CANONICAL),
        ];
        for input in inputs {
            let d = Digest::normalize(&input, HashAlgorithm::ContentHash).unwrap();
            assert_eq!(d.to_hex(), CANONICAL, "input {:?}", input);
        }
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = Digest::normalize(UPPER, HashAlgorithm::ChainNativeHash).unwrap();
        let twice = Digest::normalize(&once.to_hex(), HashAlgorithm::ChainNativeHash).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.to_hex(), CANONICAL);
    }

    #[test]
    fn test_normalize_63_chars_fails() {
        let err = Digest::normalize(&UPPER[..63], HashAlgorithm::ContentHash).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDigest(_)));
        assert!(err.to_string().contains("64 characters"));
        assert!(err.to_string().contains("63"));
    }

    #[test]
    fn test_normalize_non_hex_fails() {
        let bad = format!("{}g", &UPPER[..63]);
        let err = Digest::normalize(&bad, HashAlgorithm::ContentHash).unwrap_err();
        assert!(matches!(err, CoreError::InvalidDigest(_)));
    }

    #[test]
    fn test_normalize_rejects_inner_whitespace_and_empty() {
        assert!(Digest::normalize("", HashAlgorithm::ContentHash).is_err());
        assert!(Digest::normalize("0x", HashAlgorithm::ContentHash).is_err());
        let spaced = format!("{} {}", &UPPER[..32], &UPPER[32..]);
        assert!(Digest::normalize(&spaced, HashAlgorithm::ContentHash).is_err());
    }

    #[test]
    fn test_digest_serde_shape() {
        let d = Digest::normalize(UPPER, HashAlgorithm::ChainNativeHash).unwrap();
        let value = serde_json::to_value(d).unwrap();
        assert_eq!(value["digest"], CANONICAL);
        assert_eq!(value["algorithm"], "chain-native-hash");
        let back: Digest = serde_json::from_value(value).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn test_digest_deserialize_rejects_bad_hex() {
        let value = serde_json::json!({"digest": "0x1234", "algorithm": "content-hash"});
        assert!(serde_json::from_value::<Digest>(value).is_err());
    }

    #[test]
    fn test_algorithm_aliases() {
        assert_eq!("sha256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::ContentHash);
        assert_eq!(
            "Keccak256".parse::<HashAlgorithm>().unwrap(),
            HashAlgorithm::ChainNativeHash
        );
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }

    #[test]
    fn test_owner_id_validation() {
        assert!(OwnerId::new("user-42").is_ok());
        assert!(OwnerId::new("").is_err());
        assert!(OwnerId::new("a#b").is_err());
        assert!(OwnerId::new("has space").is_err());
    }

    #[test]
    fn test_credential_ref_display_and_commitment() {
        let r = CredentialRef::new(OwnerId::new("alice").unwrap(), 3);
        assert_eq!(r.to_string(), "alice#3");
        let other = CredentialRef::new(OwnerId::new("alice").unwrap(), 4);
        assert_ne!(r.commitment(), other.commitment());
        assert_eq!(r.commitment(), r.clone().commitment());
    }

    #[test]
    fn test_key_ref_parse() {
        let k = KeyRef::parse("abcd 1234 abcd 1234 abcd 1234 abcd 1234 abcd 1234").unwrap();
        assert_eq!(k.as_str(), "ABCD1234ABCD1234ABCD1234ABCD1234ABCD1234");
        assert!(KeyRef::parse("SHORT").is_err());
    }

    #[test]
    fn test_tx_ref_and_address_parse() {
        let tx = ChainTxRef::parse(UPPER).unwrap();
        assert_eq!(tx.as_str(), CANONICAL);
        let addr = ChainAddress::parse("0xAbCdEf0000000000000000000000000000000001").unwrap();
        assert_eq!(addr.as_str(), "0xabcdef0000000000000000000000000000000001");
        assert!(ChainAddress::parse("0x1234").is_err());
    }

    #[test]
    fn test_signature_hex_roundtrip() {
        let bytes = [7u8; 64];
        let sig = SignatureHex::from_bytes(&bytes);
        assert_eq!(sig.as_str().len(), 128);
        assert_eq!(sig.to_bytes(), bytes);
        assert!(SignatureHex::parse("abcd").is_err());
    }

    fn credential(activated: Option<DateTime<Utc>>, invalidated: Option<DateTime<Utc>>) -> Credential {
        Credential {
            owner_id: OwnerId::new("alice").unwrap(),
            version: 1,
            status: if invalidated.is_some() {
                CredentialStatus::Invalidated
            } else {
                CredentialStatus::Active
            },
            holder_address: ChainAddress::parse("0x00000000000000000000000000000000000000aa")
                .unwrap(),
            created_at: Utc::now(),
            activated_at: activated,
            invalidated_at: invalidated,
            invalidation_cause: invalidated.map(|_| InvalidationCause::User),
        }
    }

    fn at(secs: i64, nanos: u32) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, nanos).unwrap()
    }

    #[test]
    fn test_was_active_at_window() {
        let c = credential(Some(at(0, 0)), Some(at(20, 0)));
        assert!(!c.was_active_at(at(-1, 0)));
        assert!(c.was_active_at(at(0, 0)));
        assert!(c.was_active_at(at(10, 0)));
        assert!(!c.was_active_at(at(20, 0)));
        assert!(!c.is_usable());
    }

    #[test]
    fn test_was_active_at_block_granularity() {
        // Activated and invalidated mid-second; blocks carry whole seconds.
        let c = credential(Some(at(0, 679_258_270)), Some(at(20, 400_000_000)));
        assert!(c.was_active_at(at(0, 0)));
        assert!(c.was_active_at(at(20, 0)));
        assert!(!c.was_active_at(at(21, 0)));
        assert!(!c.was_active_at(at(-1, 0)));
    }

    #[test]
    fn test_never_activated_was_never_active() {
        let c = credential(None, None);
        assert!(!c.was_active_at(Utc::now()));
    }

    #[test]
    fn test_public_view_hides_authenticity() {
        let att = Attestation {
            id: Uuid::now_v7(),
            digest: Digest::normalize(UPPER, HashAlgorithm::ContentHash).unwrap(),
            keyring_signature: SignatureHex::from_bytes(&[1u8; 64]),
            keyring_key_ref: KeyRef::from_fingerprint([2u8; 20]),
            chain_tx_ref: ChainTxRef::from_bytes([3u8; 32]),
            credential_ref: CredentialRef::new(OwnerId::new("alice").unwrap(), 1),
            created_at: Utc::now(),
            authenticity: Authenticity::Decoy,
        };
        let full = serde_json::to_value(&att).unwrap();
        assert_eq!(full["authenticity"], "decoy");
        assert_eq!(full["digest"], CANONICAL);

        let view = serde_json::to_value(att.public_view()).unwrap();
        assert!(view.get("authenticity").is_none());
        assert_eq!(view["algorithm"], "content-hash");

        let back: Attestation = serde_json::from_value(full).unwrap();
        assert_eq!(back, att);
    }
}
