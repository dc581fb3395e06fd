//! Ed25519 signatures over snapshot bundles.
//!
//! A signature covers the canonical snapshot body (the same bytes the
//! digest hashes) and is verified independently of execution: tampering
//! with any serialized field invalidates both the digest and every
//! signature. Key material comes from the host; the core never touches an
//! entropy source.

use crate::snapshot::{Snapshot, SnapshotError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The only supported signature algorithm.
pub const SIGNATURE_ALGORITHM: &str = "ed25519";

/// A detached snapshot signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSignature {
    /// Algorithm identifier (always `ed25519`).
    pub algorithm: String,
    /// Base64 raw public key (32 bytes).
    pub public_key: String,
    /// Base64 raw signature (64 bytes).
    pub signature: String,
}

/// Signature creation/verification failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SigningError {
    /// Algorithm other than `ed25519`.
    #[error("unsupported signature algorithm {0:?}")]
    UnsupportedAlgorithm(String),
    /// Public key is not valid base64 / 32 raw bytes.
    #[error("malformed public key")]
    MalformedPublicKey,
    /// Signature is not valid base64 / 64 raw bytes.
    #[error("malformed signature")]
    MalformedSignature,
    /// Canonical body serialization failure.
    #[error("snapshot body error: {0}")]
    Body(String),
}

/// Derive a signing key from 32 seed bytes supplied by the host.
#[must_use]
pub fn signing_key_from_seed(seed: &[u8; 32]) -> SigningKey {
    SigningKey::from_bytes(seed)
}

/// Sign a snapshot's canonical body.
///
/// # Errors
///
/// Returns [`SigningError::Body`] when the canonical body cannot be
/// serialized.
pub fn sign_snapshot(
    snapshot: &Snapshot,
    key: &SigningKey,
) -> Result<SnapshotSignature, SigningError> {
    let body = snapshot
        .canonical_bytes()
        .map_err(|err: SnapshotError| SigningError::Body(err.to_string()))?;
    let signature = key.sign(&body);
    Ok(SnapshotSignature {
        algorithm: SIGNATURE_ALGORITHM.to_string(),
        public_key: BASE64.encode(key.verifying_key().to_bytes()),
        signature: BASE64.encode(signature.to_bytes()),
    })
}

/// Check a signature against a snapshot's canonical body.
///
/// Returns `Ok(false)` for a well-formed signature that does not match,
/// and an error for malformed inputs.
///
/// # Errors
///
/// Returns a [`SigningError`] for an unsupported algorithm or malformed
/// key/signature material.
pub fn verify_snapshot_signature(
    snapshot: &Snapshot,
    signature: &SnapshotSignature,
) -> Result<bool, SigningError> {
    if signature.algorithm != SIGNATURE_ALGORITHM {
        return Err(SigningError::UnsupportedAlgorithm(
            signature.algorithm.clone(),
        ));
    }
    let public_bytes: [u8; 32] = BASE64
        .decode(&signature.public_key)
        .map_err(|_| SigningError::MalformedPublicKey)?
        .try_into()
        .map_err(|_| SigningError::MalformedPublicKey)?;
    let verifying_key =
        VerifyingKey::from_bytes(&public_bytes).map_err(|_| SigningError::MalformedPublicKey)?;
    let signature_bytes: [u8; 64] = BASE64
        .decode(&signature.signature)
        .map_err(|_| SigningError::MalformedSignature)?
        .try_into()
        .map_err(|_| SigningError::MalformedSignature)?;
    let signature = Signature::from_bytes(&signature_bytes);
    let body = snapshot
        .canonical_bytes()
        .map_err(|err: SnapshotError| SigningError::Body(err.to_string()))?;
    Ok(verifying_key.verify_strict(&body, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{Const, Program};
    use crate::vm::Vm;
    use sema_engine::SessionConfig;

    fn snapshot() -> Snapshot {
        let mut vm = Vm::new(SessionConfig::default());
        let program = Program::from_asm(
            "PUSH_TEXT 0\nSTORE_ANSWER\nHALT",
            vec![Const::Text("signed".to_string())],
        )
        .unwrap();
        vm.load(program, None).unwrap();
        Snapshot::capture(&vm).unwrap()
    }

    #[test]
    fn sign_then_verify() {
        let snapshot = snapshot();
        let key = signing_key_from_seed(&[7u8; 32]);
        let signature = sign_snapshot(&snapshot, &key).unwrap();
        assert_eq!(signature.algorithm, "ed25519");
        assert!(verify_snapshot_signature(&snapshot, &signature).unwrap());
    }

    #[test]
    fn signature_survives_document_round_trip() {
        let snapshot = snapshot();
        let key = signing_key_from_seed(&[9u8; 32]);
        let signed = snapshot.with_signature(sign_snapshot(&snapshot, &key).unwrap());
        let json = signed.to_json_string().unwrap();
        let back = Snapshot::from_json_string(&json).unwrap();
        assert_eq!(back.signatures.len(), 1);
        assert!(verify_snapshot_signature(&back, &back.signatures[0]).unwrap());
    }

    #[test]
    fn foreign_signature_does_not_verify() {
        let a = snapshot();
        let key = signing_key_from_seed(&[1u8; 32]);
        let signature = sign_snapshot(&a, &key).unwrap();

        let mut vm = Vm::new(SessionConfig::default());
        let other = Program::from_asm(
            "PUSH_TEXT 0\nSTORE_ANSWER\nHALT",
            vec![Const::Text("different".to_string())],
        )
        .unwrap();
        vm.load(other, None).unwrap();
        let b = Snapshot::capture(&vm).unwrap();
        assert!(!verify_snapshot_signature(&b, &signature).unwrap());
    }

    #[test]
    fn unsupported_algorithm_is_an_error() {
        let snapshot = snapshot();
        let bogus = SnapshotSignature {
            algorithm: "rsa".to_string(),
            public_key: String::new(),
            signature: String::new(),
        };
        assert_eq!(
            verify_snapshot_signature(&snapshot, &bogus).unwrap_err(),
            SigningError::UnsupportedAlgorithm("rsa".to_string())
        );
    }
}
