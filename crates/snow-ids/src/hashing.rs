//! SHA-256 helpers used for content-derived identifiers.

use sha2::{Digest, Sha256};

/// A 256-bit hash value.
pub type Hash256 = [u8; 32];

/// Computes the SHA-256 digest of `data`.
#[must_use]
pub fn compute_hash256(data: &[u8]) -> Hash256 {
    Sha256::digest(data).into()
}

/// Returns the trailing `length` bytes of the SHA-256 digest of `data`.
///
/// `length` is clamped to the digest size.
#[must_use]
pub fn checksum(data: &[u8], length: usize) -> Vec<u8> {
    let hash = compute_hash256(data);
    let length = length.min(hash.len());
    hash[hash.len() - length..].to_vec()
}
