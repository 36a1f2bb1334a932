//! AES-256-GCM payload sealing.
//!
//! Sealed layout (fixed and public):
//! [12 bytes: IV][16 bytes: GCM tag][N bytes: ciphertext]
//! The IV is drawn fresh from the system RNG for every sealing and is
//! never reused for a distinct plaintext under the same key. Re-sealing a
//! plaintext already in the memo returns the identical blob; the
//! content-addressed dedup table downstream depends on that, and it
//! reveals only the payload equality the dedup table records anyway.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use sealstore_cache::SharedLruCache;
use xxhash_rust::xxh64::xxh64;
use zeroize::Zeroize;

use crate::error::CryptoError;

/// AES-GCM IV length in bytes.
pub const IV_LENGTH: usize = 12;
/// AES-GCM authentication tag length in bytes.
pub const TAG_LENGTH: usize = 16;
/// AES-256 key length in bytes.
pub const KEY_LENGTH: usize = 32;
/// Fixed overhead of a sealed payload over its plaintext.
pub const SEALED_OVERHEAD: usize = IV_LENGTH + TAG_LENGTH;

/// Generate a random 12-byte IV.
fn generate_iv() -> Result<[u8; IV_LENGTH], CryptoError> {
    let mut iv = [0u8; IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
    Ok(iv)
}

/// Default capacity of the seal memo.
const SEAL_MEMO_CAPACITY: usize = 1000;

/// Authenticated encryption of opaque payload bytes under the AES master key.
///
/// The key is immutable after construction and zeroized on drop.
pub struct PayloadSealer {
    cipher: Aes256Gcm,
    key: [u8; KEY_LENGTH],
    /// Memo from plaintext hash to sealed blob; makes re-sealing an equal
    /// payload deterministic so the reference table can deduplicate it.
    seal_memo: SharedLruCache<u64, Vec<u8>>,
}

impl PayloadSealer {
    /// Create a sealer from 32-byte raw key material.
    pub fn new(key: &[u8]) -> Result<Self, CryptoError> {
        if key.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LENGTH,
                got: key.len(),
            });
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let mut key_copy = [0u8; KEY_LENGTH];
        key_copy.copy_from_slice(key);
        Ok(Self {
            cipher,
            key: key_copy,
            seal_memo: SharedLruCache::new(SEAL_MEMO_CAPACITY),
        })
    }

    /// Create a sealer with a fresh random key.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut key = [0u8; KEY_LENGTH];
        getrandom::getrandom(&mut key).map_err(|e| CryptoError::RngFailed(e.to_string()))?;
        let sealer = Self::new(&key);
        key.zeroize();
        sealer
    }

    /// Raw key material, for persistence through the key vault.
    pub fn key(&self) -> &[u8; KEY_LENGTH] {
        &self.key
    }

    /// Seal a payload: [IV:12][tag:16][ciphertext]. Re-sealing a payload
    /// still in the memo returns the identical blob.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let memo_key = xxh64(plaintext, 0);
        if let Some(hit) = self.seal_memo.get(&memo_key) {
            return Ok(hit);
        }
        let sealed = self.seal_fresh(plaintext)?;
        self.seal_memo.put(memo_key, sealed.clone());
        Ok(sealed)
    }

    /// Seal with a fresh IV, bypassing the memo.
    fn seal_fresh(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let iv = generate_iv()?;
        let nonce = Nonce::from_slice(&iv);

        // The aead API appends the tag to the ciphertext; the on-disk
        // layout wants it between IV and ciphertext.
        let ct_and_tag = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
        let tag_offset = ct_and_tag.len() - TAG_LENGTH;

        let mut sealed = Vec::with_capacity(SEALED_OVERHEAD + tag_offset);
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&ct_and_tag[tag_offset..]);
        sealed.extend_from_slice(&ct_and_tag[..tag_offset]);
        Ok(sealed)
    }

    /// Open a sealed payload, verifying the GCM tag.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if sealed.len() < SEALED_OVERHEAD {
            return Err(CryptoError::DataTooShort);
        }
        let iv = &sealed[..IV_LENGTH];
        let tag = &sealed[IV_LENGTH..SEALED_OVERHEAD];
        let ciphertext = &sealed[SEALED_OVERHEAD..];

        let mut ct_and_tag = Vec::with_capacity(ciphertext.len() + TAG_LENGTH);
        ct_and_tag.extend_from_slice(ciphertext);
        ct_and_tag.extend_from_slice(tag);

        let nonce = Nonce::from_slice(iv);
        self.cipher
            .decrypt(nonce, ct_and_tag.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed)
    }

    /// Seal each payload independently; the single-call contract applies
    /// pointwise.
    pub fn seal_batch<T: AsRef<[u8]>>(&self, payloads: &[T]) -> Result<Vec<Vec<u8>>, CryptoError> {
        payloads.iter().map(|p| self.seal(p.as_ref())).collect()
    }

    /// Open each sealed payload independently.
    pub fn open_batch<T: AsRef<[u8]>>(&self, sealed: &[T]) -> Result<Vec<Vec<u8>>, CryptoError> {
        sealed.iter().map(|s| self.open(s.as_ref())).collect()
    }

    /// Drop the seal memo. Subsequent seals of previously seen payloads
    /// draw fresh IVs.
    pub fn clear_cache(&self) {
        self.seal_memo.clear();
    }
}

impl Drop for PayloadSealer {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sealer() -> PayloadSealer {
        PayloadSealer::generate().unwrap()
    }

    #[test]
    fn seal_open_round_trip() {
        let s = sealer();
        let sealed = s.seal(b"hello, world").unwrap();
        assert_eq!(s.open(&sealed).unwrap(), b"hello, world");
    }

    #[test]
    fn sealed_layout_has_fixed_overhead() {
        let s = sealer();
        let sealed = s.seal(b"abc").unwrap();
        assert_eq!(sealed.len(), SEALED_OVERHEAD + 3);
    }

    #[test]
    fn distinct_plaintexts_get_distinct_ivs() {
        let s = sealer();
        let a = s.seal(b"plaintext one").unwrap();
        let b = s.seal(b"plaintext two").unwrap();
        assert_ne!(a[..IV_LENGTH], b[..IV_LENGTH]);
    }

    #[test]
    fn resealing_equal_plaintext_reuses_the_blob() {
        let s = sealer();
        let a = s.seal(b"same plaintext").unwrap();
        let b = s.seal(b"same plaintext").unwrap();
        assert_eq!(a, b);
        assert_eq!(s.open(&a).unwrap(), b"same plaintext");
    }

    #[test]
    fn fresh_iv_after_memo_clear() {
        let s = sealer();
        let a = s.seal(b"same plaintext").unwrap();
        s.clear_cache();
        let b = s.seal(b"same plaintext").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[..IV_LENGTH], b[..IV_LENGTH]);
        assert_eq!(s.open(&a).unwrap(), s.open(&b).unwrap());
    }

    #[test]
    fn rejects_tampered_ciphertext() {
        let s = sealer();
        let mut sealed = s.seal(b"secret").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            s.open(&sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn rejects_tampered_tag() {
        let s = sealer();
        let mut sealed = s.seal(b"secret").unwrap();
        sealed[IV_LENGTH] ^= 0x01;
        assert!(s.open(&sealed).is_err());
    }

    #[test]
    fn rejects_truncated_input() {
        let s = sealer();
        assert!(matches!(
            s.open(&[0u8; SEALED_OVERHEAD - 1]),
            Err(CryptoError::DataTooShort)
        ));
    }

    #[test]
    fn wrong_key_fails() {
        let s1 = sealer();
        let s2 = sealer();
        let sealed = s1.seal(b"secret").unwrap();
        assert!(s2.open(&sealed).is_err());
    }

    #[test]
    fn handles_empty_plaintext() {
        let s = sealer();
        let sealed = s.seal(b"").unwrap();
        assert_eq!(sealed.len(), SEALED_OVERHEAD);
        assert!(s.open(&sealed).unwrap().is_empty());
    }

    #[test]
    fn handles_large_payload() {
        let s = sealer();
        let mut payload = vec![0u8; 256 * 1024];
        getrandom::getrandom(&mut payload).unwrap();
        let sealed = s.seal(&payload).unwrap();
        assert_eq!(s.open(&sealed).unwrap(), payload);
    }

    #[test]
    fn rejects_bad_key_length() {
        assert!(PayloadSealer::new(&[0u8; 16]).is_err());
        assert!(PayloadSealer::new(&[0u8; 33]).is_err());
    }

    #[test]
    fn same_key_reconstructs_sealer() {
        let s1 = sealer();
        let sealed = s1.seal(b"persisted").unwrap();
        let s2 = PayloadSealer::new(s1.key()).unwrap();
        assert_eq!(s2.open(&sealed).unwrap(), b"persisted");
    }

    #[test]
    fn batch_applies_pointwise() {
        let s = sealer();
        let payloads = [b"one".as_slice(), b"two".as_slice(), b"".as_slice()];
        let sealed = s.seal_batch(&payloads).unwrap();
        assert_eq!(sealed.len(), 3);
        let opened = s.open_batch(&sealed).unwrap();
        assert_eq!(opened[0], b"one");
        assert_eq!(opened[1], b"two");
        assert!(opened[2].is_empty());
    }

    #[test]
    fn batch_fails_on_any_bad_element() {
        let s = sealer();
        let mut sealed = s.seal_batch(&[b"a".as_slice(), b"b".as_slice()]).unwrap();
        let last = sealed[1].len() - 1;
        sealed[1][last] ^= 0xff;
        assert!(s.open_batch(&sealed).is_err());
    }
}
