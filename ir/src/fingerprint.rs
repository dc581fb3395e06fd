//! Deterministic content fingerprints.
//!
//! A [`Fingerprint`] is the SHA-256 digest of a node's canonical structure.
//! Child nodes contribute their own (already computed) fingerprints, so the
//! digest is Merkle-style: computing a parent is O(local size) and equal
//! canonical trees always collide onto the same fingerprint, across
//! processes and conforming implementations.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of a fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// SHA-256 content digest of a canonical node structure.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Hash raw canonical bytes into a fingerprint.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&Sha256::digest(data));
        Fingerprint(out)
    }

    /// Raw digest bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Lowercase hexadecimal rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Parse a 64-character lowercase hex string.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != FINGERPRINT_LEN * 2 {
            return None;
        }
        let mut out = [0u8; FINGERPRINT_LEN];
        for (i, chunk) in hex.as_bytes().chunks_exact(2).enumerate() {
            let pair = std::str::from_utf8(chunk).ok()?;
            out[i] = u8::from_str_radix(pair, 16).ok()?;
        }
        Some(Fingerprint(out))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.0.iter().take(8).map(|b| format!("{b:02x}")).collect();
        write!(f, "Fingerprint({short}...)")
    }
}

impl Serialize for Fingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Fingerprint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Fingerprint::from_hex(&hex).ok_or_else(|| D::Error::custom("invalid fingerprint hex"))
    }
}

/// Incremental canonical-byte hasher used when fingerprinting nodes.
///
/// Every variable-length component is length-prefixed so distinct canonical
/// structures can never serialize to the same byte stream.
pub(crate) struct FingerprintHasher {
    inner: Sha256,
}

impl FingerprintHasher {
    pub(crate) fn new() -> Self {
        FingerprintHasher {
            inner: Sha256::new(),
        }
    }

    pub(crate) fn write_u8(&mut self, byte: u8) {
        self.inner.update([byte]);
    }

    pub(crate) fn write_u32(&mut self, value: u32) {
        self.inner.update(value.to_be_bytes());
    }

    pub(crate) fn write_str(&mut self, value: &str) {
        self.write_u32(u32::try_from(value.len()).unwrap_or(u32::MAX));
        self.inner.update(value.as_bytes());
    }

    pub(crate) fn write_fingerprint(&mut self, fp: &Fingerprint) {
        self.inner.update(fp.as_bytes());
    }

    pub(crate) fn finish(self) -> Fingerprint {
        let mut out = [0u8; FINGERPRINT_LEN];
        out.copy_from_slice(&self.inner.finalize());
        Fingerprint(out)
    }
}
