//! Key lifecycle: generation-time persistence, password-sealed at-rest
//! protection, rotation with timestamped backup, and atomic archive
//! backup/restore.

pub mod backup;
pub mod error;
pub mod sealed;
pub mod vault;

pub use error::VaultError;
pub use sealed::{open_with_password, seal_with_password, CBC_IV_LENGTH, PBKDF2_ITERATIONS, SALT_LENGTH};
pub use vault::{
    KeyVault, AES_KEY_FILE, BACKUP_DIR, GALOIS_KEY_FILE, PARAMS_FILE, PUBLIC_KEY_FILE,
    RELIN_KEY_FILE, SECRET_KEY_FILE,
};
