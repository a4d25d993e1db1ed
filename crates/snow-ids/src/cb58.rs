//! CB58: Base58 with a trailing 4-byte SHA-256 checksum.

use thiserror::Error;

use crate::hashing::checksum;

const CHECKSUM_LEN: usize = 4;

/// Errors returned when decoding CB58 text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Cb58Error {
    #[error("base58 decoding error: {0}")]
    Base58Decoding(String),

    #[error("input is shorter than the checksum")]
    MissingChecksum,

    #[error("invalid checksum")]
    BadChecksum,
}

/// Encodes `bytes` as CB58.
#[must_use]
pub fn encode_cb58(bytes: &[u8]) -> String {
    let mut checked = Vec::with_capacity(bytes.len() + CHECKSUM_LEN);
    checked.extend_from_slice(bytes);
    checked.extend_from_slice(&checksum(bytes, CHECKSUM_LEN));
    bs58::encode(checked).into_string()
}

/// Decodes CB58 text, verifying its checksum.
///
/// # Errors
///
/// Fails if the text is not Base58, is too short to carry a checksum,
/// or the checksum does not match.
pub fn decode_cb58(s: &str) -> Result<Vec<u8>, Cb58Error> {
    let decoded = bs58::decode(s)
        .into_vec()
        .map_err(|e| Cb58Error::Base58Decoding(e.to_string()))?;

    if decoded.len() < CHECKSUM_LEN {
        return Err(Cb58Error::MissingChecksum);
    }

    let (raw, provided) = decoded.split_at(decoded.len() - CHECKSUM_LEN);
    if provided != checksum(raw, CHECKSUM_LEN).as_slice() {
        return Err(Cb58Error::BadChecksum);
    }
    Ok(raw.to_vec())
}
