use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Sealed data too short")]
    DataTooShort,

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Tag verification failure. Wrong key and tampered ciphertext are
    /// reported identically to avoid an oracle.
    #[error("Decryption failed: authentication tag mismatch")]
    DecryptionFailed,

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
