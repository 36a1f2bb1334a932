//! zstd envelope around exported ciphertexts.
//!
//! Every ciphertext leaving the engine is compressed; decrypt and compare
//! paths accept the compressed form and unwrap it first. The envelope is
//! not authenticated: integrity of the record comes from the AES-GCM
//! payload, and a mangled index ciphertext can at worst misreport a match
//! the server could fabricate anyway.

use crate::error::FheError;

/// zstd level for ciphertext envelopes.
const ENVELOPE_LEVEL: i32 = 9;

/// Compress serialized ciphertext bytes.
pub fn pack(ciphertext: &[u8]) -> Result<Vec<u8>, FheError> {
    zstd::encode_all(ciphertext, ENVELOPE_LEVEL).map_err(|_| FheError::CorruptCiphertext)
}

/// Decompress an envelope back to serialized ciphertext bytes.
pub fn unpack(envelope: &[u8]) -> Result<Vec<u8>, FheError> {
    zstd::decode_all(envelope).map_err(|_| FheError::CorruptCiphertext)
}
