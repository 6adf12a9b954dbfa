//! Attestation Verifier - Checks signed claims of completed work
//!
//! A worker attests that it produced `outputHash` from `inputHash` for a
//! given job by signing a canonical JSON payload with its Ed25519 key. The
//! verifier re-derives that payload byte for byte and checks the signature.
//!
//! Verification is a pure function of the claim document, an optional
//! independently computed output hash, the verifier config, and the
//! supplied `now`. Malformed input is a failure reason, never a panic or an
//! `Err`. Each gate short-circuits:
//!
//! 1. required fields present with the right shape
//! 2. expected output hash, if given, equals the claimed one
//! 3. key material decodes (hex, base58, base64) to 32 and 64 bytes
//! 4. canonical payload reconstruction
//! 5. Ed25519 signature check
//! 6. timestamp not in the future; old claims get a `Stale` advisory

use crate::encoding::{decode_key_material, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const PUBLIC_KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

/// Seven days
pub const DEFAULT_STALE_AFTER_SECS: u64 = 7 * 24 * 60 * 60;

/// Field names of a claim document, in canonical order where they are signed
pub const REQUIRED_FIELDS: [&str; 6] = [
    "jobId",
    "inputHash",
    "outputHash",
    "workerPublicKey",
    "signature",
    "timestamp",
];

/// Configuration for the attestation verifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifierConfig {
    /// Age after which a valid claim is flagged as stale
    pub stale_after_secs: u64,
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }
}

/// Why a claim was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum AttestationFailure {
    #[error("missing or malformed required fields: {}", fields.join(", "))]
    MissingField { fields: Vec<String> },

    #[error("output hash mismatch: claimed {claimed}, expected {expected}")]
    OutputMismatch { claimed: String, expected: String },

    #[error("{field} must be {expected} bytes, got {actual}")]
    MalformedKeyMaterial {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{field} is not valid hex (0x-prefixed), base58 or base64")]
    UndecodableEncoding { field: &'static str },

    #[error("signature verification failed")]
    SignatureInvalid,

    #[error("timestamp {timestamp} is in the future (now {now})")]
    TimestampInFuture { timestamp: u64, now: u64 },
}

impl AttestationFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "MissingField",
            Self::OutputMismatch { .. } => "OutputMismatch",
            Self::MalformedKeyMaterial { .. } => "MalformedKeyMaterial",
            Self::UndecodableEncoding { .. } => "UndecodableEncoding",
            Self::SignatureInvalid => "SignatureInvalid",
            Self::TimestampInFuture { .. } => "TimestampInFuture",
        }
    }
}

/// Non-fatal note on a valid claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum Advisory {
    /// Signed longer ago than the configured threshold
    Stale { age_secs: u64 },
}

impl std::fmt::Display for Advisory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stale { age_secs } => {
                write!(f, "attestation is {} days old", age_secs / 86_400)
            }
        }
    }
}

/// Outcome of a verification call
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result")]
pub enum Verification {
    Valid { advisories: Vec<Advisory> },
    Invalid { reason: AttestationFailure },
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    pub fn reason(&self) -> Option<&AttestationFailure> {
        match self {
            Self::Invalid { reason } => Some(reason),
            Self::Valid { .. } => None,
        }
    }

    pub fn advisories(&self) -> &[Advisory] {
        match self {
            Self::Valid { advisories } => advisories,
            Self::Invalid { .. } => &[],
        }
    }
}

/// Claim with every required field present and well-typed
///
/// Key material is kept as text: the canonical payload signs the public key
/// exactly as it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationClaim {
    pub job_id: u64,
    pub input_hash: String,
    pub output_hash: String,
    pub worker_public_key: String,
    pub signature: String,
    pub timestamp: u64,
}

impl AttestationClaim {
    /// Extract the required fields from a claim document
    pub fn from_document(document: &Value) -> Result<Self, AttestationFailure> {
        let text = |name: &str| {
            document
                .get(name)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
        };
        let integer = |name: &str| document.get(name).and_then(Value::as_u64);

        let job_id = integer("jobId");
        let input_hash = text("inputHash");
        let output_hash = text("outputHash");
        let worker_public_key = text("workerPublicKey");
        let signature = text("signature");
        let timestamp = integer("timestamp");

        let present = [
            job_id.is_some(),
            input_hash.is_some(),
            output_hash.is_some(),
            worker_public_key.is_some(),
            signature.is_some(),
            timestamp.is_some(),
        ];

        match (job_id, input_hash, output_hash, worker_public_key, signature, timestamp) {
            (
                Some(job_id),
                Some(input_hash),
                Some(output_hash),
                Some(worker_public_key),
                Some(signature),
                Some(timestamp),
            ) => Ok(Self {
                job_id,
                input_hash,
                output_hash,
                worker_public_key,
                signature,
                timestamp,
            }),
            _ => {
                let fields = REQUIRED_FIELDS
                    .iter()
                    .zip(present)
                    .filter(|(_, ok)| !ok)
                    .map(|(name, _)| name.to_string())
                    .collect();
                Err(AttestationFailure::MissingField { fields })
            }
        }
    }

    /// Exact bytes the worker signed
    ///
    /// Fixed key order, no whitespace. Strings are JSON-escaped.
    pub fn canonical_payload(&self) -> Vec<u8> {
        canonical_payload(
            self.job_id,
            &self.input_hash,
            &self.output_hash,
            &self.worker_public_key,
            self.timestamp,
        )
    }
}

fn canonical_payload(
    job_id: u64,
    input_hash: &str,
    output_hash: &str,
    worker_public_key: &str,
    timestamp: u64,
) -> Vec<u8> {
    let quoted = |s: &str| Value::String(s.to_owned()).to_string();
    format!(
        "{{\"jobId\":{},\"inputHash\":{},\"outputHash\":{},\"workerPublicKey\":{},\"timestamp\":{}}}",
        job_id,
        quoted(input_hash),
        quoted(output_hash),
        quoted(worker_public_key),
        timestamp
    )
    .into_bytes()
}

/// Serialized attestation as produced by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimDocument {
    pub job_id: u64,
    pub input_hash: String,
    pub output_hash: String,
    pub worker_public_key: String,
    pub signature: String,
    pub timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_address: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl ClaimDocument {
    /// JSON form as a worker would publish it
    pub fn to_value(&self) -> Value {
        let mut document = json!({
            "jobId": self.job_id,
            "inputHash": self.input_hash,
            "outputHash": self.output_hash,
            "workerPublicKey": self.worker_public_key,
            "signature": self.signature,
            "timestamp": self.timestamp,
            "version": self.version,
        });
        if let (Some(address), Some(fields)) = (&self.worker_address, document.as_object_mut()) {
            fields.insert("workerAddress".to_string(), Value::String(address.clone()));
        }
        document
    }
}

/// Sign a claim with a worker key, rendering the public key as `0x`-hex
pub fn sign_claim(
    signing_key: &SigningKey,
    job_id: u64,
    input_hash: &str,
    output_hash: &str,
    timestamp: u64,
) -> ClaimDocument {
    let worker_public_key = Encoding::Hex.encode(signing_key.verifying_key().as_bytes());
    let payload = canonical_payload(job_id, input_hash, output_hash, &worker_public_key, timestamp);
    let signature = signing_key.sign(&payload);

    ClaimDocument {
        job_id,
        input_hash: input_hash.to_string(),
        output_hash: output_hash.to_string(),
        worker_public_key,
        signature: Encoding::Hex.encode(&signature.to_bytes()),
        timestamp,
        worker_address: None,
        version: default_version(),
    }
}

/// SHA-256 of `data` as `0x`-prefixed hex
pub fn sha256_hex(data: &[u8]) -> String {
    format!("0x{}", hex::encode(Sha256::digest(data)))
}

/// Compare digests, ignoring hex letter case when both sides are `0x`-hex
fn digests_match(claimed: &str, expected: &str) -> bool {
    match (Encoding::Hex.decode(claimed), Encoding::Hex.decode(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => claimed == expected,
    }
}

fn decode_fixed<const N: usize>(
    field: &'static str,
    text: &str,
) -> Result<[u8; N], AttestationFailure> {
    let (bytes, encoding) =
        decode_key_material(text).ok_or(AttestationFailure::UndecodableEncoding { field })?;
    debug!("{} decoded as {}", field, encoding);

    let actual = bytes.len();
    bytes
        .try_into()
        .map_err(|_| AttestationFailure::MalformedKeyMaterial {
            field,
            expected: N,
            actual,
        })
}

/// Stateless verifier; safe to share across any number of callers
#[derive(Debug, Clone, Default)]
pub struct AttestationVerifier {
    config: VerifierConfig,
}

impl AttestationVerifier {
    pub fn new(config: VerifierConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &VerifierConfig {
        &self.config
    }

    /// Verify a claim document as of `now` (seconds since epoch)
    pub fn verify(&self, document: &Value, expected_output_hash: Option<&str>, now: u64) -> Verification {
        let outcome = AttestationClaim::from_document(document)
            .and_then(|claim| self.check(&claim, expected_output_hash, now));

        match outcome {
            Ok(advisories) => {
                for advisory in &advisories {
                    warn!("Attestation advisory: {}", advisory);
                }
                info!("Attestation valid");
                Verification::Valid { advisories }
            }
            Err(reason) => {
                warn!("Attestation invalid: {}", reason);
                Verification::Invalid { reason }
            }
        }
    }

    /// Verify an already-extracted claim
    pub fn verify_claim(
        &self,
        claim: &AttestationClaim,
        expected_output_hash: Option<&str>,
        now: u64,
    ) -> Verification {
        match self.check(claim, expected_output_hash, now) {
            Ok(advisories) => Verification::Valid { advisories },
            Err(reason) => Verification::Invalid { reason },
        }
    }

    fn check(
        &self,
        claim: &AttestationClaim,
        expected_output_hash: Option<&str>,
        now: u64,
    ) -> Result<Vec<Advisory>, AttestationFailure> {
        if let Some(expected) = expected_output_hash {
            if !digests_match(&claim.output_hash, expected) {
                return Err(AttestationFailure::OutputMismatch {
                    claimed: claim.output_hash.clone(),
                    expected: expected.to_string(),
                });
            }
        }

        let key_bytes: [u8; PUBLIC_KEY_LENGTH] =
            decode_fixed("workerPublicKey", &claim.worker_public_key)?;
        let signature_bytes: [u8; SIGNATURE_LENGTH] = decode_fixed("signature", &claim.signature)?;

        let payload = claim.canonical_payload();

        let verifying_key =
            VerifyingKey::from_bytes(&key_bytes).map_err(|_| AttestationFailure::SignatureInvalid)?;
        let signature = Signature::from_bytes(&signature_bytes);
        verifying_key
            .verify_strict(&payload, &signature)
            .map_err(|_| AttestationFailure::SignatureInvalid)?;

        if claim.timestamp > now {
            return Err(AttestationFailure::TimestampInFuture {
                timestamp: claim.timestamp,
                now,
            });
        }

        let age_secs = now - claim.timestamp;
        let mut advisories = Vec::new();
        if age_secs > self.config.stale_after_secs {
            advisories.push(Advisory::Stale { age_secs });
        }
        Ok(advisories)
    }
}
