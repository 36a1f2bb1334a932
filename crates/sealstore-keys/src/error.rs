use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VaultError {
    /// Wrong password or tampered keyfile. The two causes are reported
    /// identically to avoid an oracle.
    #[error("Key authentication failed: wrong password or tampered keyfile")]
    AuthFailed,

    #[error("Keyfile not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Random number generation failed: {0}")]
    RngFailed(String),
}
