//! 128-bit content fingerprints.
//!
//! Fingerprints are the sole identity used by visitors, caches and interners:
//! two objects with equal fingerprints are treated as the same object
//! everywhere in the compiler. The hash must therefore be collision
//! resistant; we truncate SHA-256 to 128 bits.

use std::fmt;

use sha2::{Digest, Sha256};

/// 128-bit content hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u128);

impl Fingerprint {
    pub fn as_u128(self) -> u128 {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:032x})", self.0)
    }
}

/// Incremental fingerprint builder.
///
/// Every input is length- or tag-prefixed, so different combine sequences
/// cannot collide by concatenation. The salt separates unrelated domains
/// (node kinds, operator families, value types).
pub struct FingerprintHasher {
    digest: Sha256,
}

impl FingerprintHasher {
    pub fn new(salt: &str) -> Self {
        let mut hasher = FingerprintHasher { digest: Sha256::new() };
        hasher.write_str(salt);
        hasher
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.digest.update((bytes.len() as u64).to_le_bytes());
        self.digest.update(bytes);
    }

    pub fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    pub fn write_u64(&mut self, v: u64) {
        self.digest.update(v.to_le_bytes());
    }

    pub fn write_fingerprint(&mut self, fp: Fingerprint) {
        self.digest.update(fp.0.to_le_bytes());
    }

    /// Chaining flavor of [`Self::write_bytes`].
    pub fn combine_bytes(mut self, bytes: &[u8]) -> Self {
        self.write_bytes(bytes);
        self
    }

    /// Chaining flavor of [`Self::write_str`].
    pub fn combine_str(mut self, s: &str) -> Self {
        self.write_str(s);
        self
    }

    /// Chaining flavor of [`Self::write_u64`].
    pub fn combine_u64(mut self, v: u64) -> Self {
        self.write_u64(v);
        self
    }

    /// Chaining flavor of [`Self::write_fingerprint`].
    pub fn combine(mut self, fp: Fingerprint) -> Self {
        self.write_fingerprint(fp);
        self
    }

    pub fn finish(self) -> Fingerprint {
        let bytes = self.digest.finalize();
        let mut low = [0u8; 16];
        low.copy_from_slice(&bytes[..16]);
        Fingerprint(u128::from_le_bytes(low))
    }
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod fingerprint_tests;