use thiserror::Error;

/// Top-level error for the Secure-DB façade.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Crypto(#[from] sealstore_crypto::CryptoError),

    #[error(transparent)]
    Vault(#[from] sealstore_keys::VaultError),

    #[error(transparent)]
    Fhe(#[from] sealstore_fhe::FheError),

    #[error(transparent)]
    Store(#[from] sealstore_store::StoreError),

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidPayload,

    #[error("Key material is corrupt: {0}")]
    CorruptKeyMaterial(String),

    #[error("Import/export serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
