//! Password sealing of at-rest key material.
//!
//! Keyfile layout (fixed and public):
//! [16 bytes: PBKDF2 salt][16 bytes: CBC IV][N bytes: AES-256-CBC ciphertext]
//! KEK = PBKDF2-HMAC-SHA256(password, salt, 100 000 iterations, 32 bytes);
//! plaintext is PKCS#7 padded.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::error::VaultError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// PBKDF2 salt length in bytes.
pub const SALT_LENGTH: usize = 16;
/// AES-CBC IV length in bytes.
pub const CBC_IV_LENGTH: usize = 16;
/// Fixed PBKDF2 iteration count.
pub const PBKDF2_ITERATIONS: u32 = 100_000;

const KEK_LENGTH: usize = 32;
const CBC_BLOCK: usize = 16;

fn derive_kek(password: &str, salt: &[u8]) -> Zeroizing<[u8; KEK_LENGTH]> {
    let mut kek = Zeroizing::new([0u8; KEK_LENGTH]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, kek.as_mut());
    kek
}

/// Seal `plaintext` under a password-derived KEK.
pub fn seal_with_password(plaintext: &[u8], password: &str) -> Result<Vec<u8>, VaultError> {
    let mut salt = [0u8; SALT_LENGTH];
    getrandom::getrandom(&mut salt).map_err(|e| VaultError::RngFailed(e.to_string()))?;
    let mut iv = [0u8; CBC_IV_LENGTH];
    getrandom::getrandom(&mut iv).map_err(|e| VaultError::RngFailed(e.to_string()))?;

    let kek = derive_kek(password, &salt);
    let cipher = Aes256CbcEnc::new_from_slices(kek.as_ref(), &iv)
        .map_err(|_| VaultError::AuthFailed)?;
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut sealed = Vec::with_capacity(SALT_LENGTH + CBC_IV_LENGTH + ciphertext.len());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

/// Open a sealed blob. Any parse or unpadding failure maps to
/// [`VaultError::AuthFailed`]; the primitive gives no better signal for
/// distinguishing a wrong password from tampering, and the caller must not
/// learn which it was.
pub fn open_with_password(sealed: &[u8], password: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
    if sealed.len() < SALT_LENGTH + CBC_IV_LENGTH + CBC_BLOCK {
        return Err(VaultError::AuthFailed);
    }
    let salt = &sealed[..SALT_LENGTH];
    let iv = &sealed[SALT_LENGTH..SALT_LENGTH + CBC_IV_LENGTH];
    let ciphertext = &sealed[SALT_LENGTH + CBC_IV_LENGTH..];
    if ciphertext.len() % CBC_BLOCK != 0 {
        return Err(VaultError::AuthFailed);
    }

    let kek = derive_kek(password, salt);
    let cipher = Aes256CbcDec::new_from_slices(kek.as_ref(), iv)
        .map_err(|_| VaultError::AuthFailed)?;
    let plaintext = cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::AuthFailed)?;
    Ok(Zeroizing::new(plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let sealed = seal_with_password(b"key material", "hunter2").unwrap();
        let opened = open_with_password(&sealed, "hunter2").unwrap();
        assert_eq!(opened.as_slice(), b"key material");
    }

    #[test]
    fn layout_is_salt_iv_ciphertext() {
        let sealed = seal_with_password(&[0u8; 32], "pw").unwrap();
        // 32 bytes pad to 48 under PKCS#7.
        assert_eq!(sealed.len(), SALT_LENGTH + CBC_IV_LENGTH + 48);
    }

    #[test]
    fn wrong_password_fails() {
        let sealed = seal_with_password(b"secret", "right").unwrap();
        assert!(matches!(
            open_with_password(&sealed, "wrong"),
            Err(VaultError::AuthFailed)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_identically() {
        let mut sealed = seal_with_password(b"secret", "pw").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(matches!(
            open_with_password(&sealed, "pw"),
            Err(VaultError::AuthFailed)
        ));
    }

    #[test]
    fn truncated_input_fails() {
        assert!(matches!(
            open_with_password(&[0u8; 40], "pw"),
            Err(VaultError::AuthFailed)
        ));
    }

    #[test]
    fn fresh_salt_per_call() {
        let a = seal_with_password(b"same", "pw").unwrap();
        let b = seal_with_password(b"same", "pw").unwrap();
        assert_ne!(a[..SALT_LENGTH], b[..SALT_LENGTH]);
        assert_ne!(a, b);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let sealed = seal_with_password(b"", "pw").unwrap();
        assert!(open_with_password(&sealed, "pw").unwrap().is_empty());
    }
}
