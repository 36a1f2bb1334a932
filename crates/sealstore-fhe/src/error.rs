use thiserror::Error;

#[derive(Debug, Error)]
pub enum FheError {
    /// Decrypt or compare attempted without the secret key.
    #[error("Operation requires the secret key, but the engine is encrypt-only")]
    EncryptOnly,

    #[error("Value {value} is outside the representable range (max {max})")]
    ValueOutOfRange { value: u64, max: u64 },

    #[error("Unsupported bit width {0} (expected 1..=64)")]
    InvalidBitWidth(usize),

    #[error("Invalid BFV parameters: {0}")]
    InvalidParameters(String),

    /// The evaluation consumed the ciphertext's noise budget; decrypting
    /// the result would yield garbage rather than a wrong-but-plausible
    /// answer.
    #[error("Noise budget exhausted during homomorphic evaluation")]
    NoiseBudgetExhausted,

    #[error("Ciphertext envelope is corrupt")]
    CorruptCiphertext,

    #[error("Decrypted string is not valid UTF-8")]
    InvalidUtf8,

    #[error("BFV operation failed: {0}")]
    Bfv(#[from] fhe::Error),
}
