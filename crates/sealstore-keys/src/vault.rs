//! Keyfile persistence: compressed key blobs, password-sealed secrets,
//! atomic writes, and timestamped rotation.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::error::VaultError;
use crate::sealed::{open_with_password, seal_with_password};

/// zstd level for key material at rest.
const KEY_COMPRESSION_LEVEL: i32 = 9;

/// Conventional keyfile names inside the vault directory.
pub const PARAMS_FILE: &str = "params.bin";
pub const PUBLIC_KEY_FILE: &str = "public.key";
pub const SECRET_KEY_FILE: &str = "secret.key";
pub const RELIN_KEY_FILE: &str = "relin.key";
pub const GALOIS_KEY_FILE: &str = "galois.key";
pub const AES_KEY_FILE: &str = "aes.key";
/// Subdirectory receiving rotation and archive backups.
pub const BACKUP_DIR: &str = "backups";

/// Exclusive owner of the persisted key material under `keys_dir`.
pub struct KeyVault {
    keys_dir: PathBuf,
}

impl KeyVault {
    /// Open (creating if needed) a vault rooted at `keys_dir`.
    pub fn open(keys_dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let keys_dir = keys_dir.into();
        fs::create_dir_all(&keys_dir)?;
        debug!(keys_dir = %keys_dir.display(), "key vault opened");
        Ok(Self { keys_dir })
    }

    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// Full path of a keyfile inside the vault.
    pub fn key_path(&self, file: &str) -> PathBuf {
        self.keys_dir.join(file)
    }

    pub(crate) fn backup_dir(&self) -> PathBuf {
        self.keys_dir.join(BACKUP_DIR)
    }

    /// Whether a keyfile exists.
    pub fn contains(&self, file: &str) -> bool {
        self.key_path(file).is_file()
    }

    // ------------------------------------------------------------------
    // AES master key
    // ------------------------------------------------------------------

    /// Seal the AES master key under `password` and persist it.
    pub fn save_aes_key(&self, key: &[u8], file: &str, password: &str) -> Result<(), VaultError> {
        let sealed = seal_with_password(key, password)?;
        self.write_atomic(&self.key_path(file), &sealed)?;
        info!(file, "AES key saved");
        Ok(())
    }

    /// Load and unseal the AES master key.
    pub fn load_aes_key(&self, file: &str, password: &str) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let sealed = self.read_file(&self.key_path(file))?;
        let key = open_with_password(&sealed, password)?;
        info!(file, "AES key loaded");
        Ok(key)
    }

    // ------------------------------------------------------------------
    // FHE key material
    // ------------------------------------------------------------------

    /// Persist a BFV public/secret key pair. The public key is written
    /// compressed and unsealed; the secret key is additionally sealed when
    /// `password` is given.
    pub fn save_fhe_keys(
        &self,
        public: &[u8],
        secret: &[u8],
        pub_file: &str,
        sec_file: &str,
        password: Option<&str>,
    ) -> Result<(), VaultError> {
        self.save_key_blob(pub_file, public)?;

        let compressed = compress(secret)?;
        let bytes = match password {
            Some(pw) => seal_with_password(&compressed, pw)?,
            None => compressed,
        };
        self.write_atomic(&self.key_path(sec_file), &bytes)?;
        info!(pub_file, sec_file, sealed = password.is_some(), "FHE key pair saved");
        Ok(())
    }

    /// Load the BFV public key.
    pub fn load_fhe_public_key(&self, file: &str) -> Result<Vec<u8>, VaultError> {
        self.load_key_blob(file)
    }

    /// Load the BFV secret key, unsealing it when `password` is given.
    pub fn load_fhe_secret_key(
        &self,
        file: &str,
        password: Option<&str>,
    ) -> Result<Zeroizing<Vec<u8>>, VaultError> {
        let bytes = self.read_file(&self.key_path(file))?;
        let compressed = match password {
            Some(pw) => open_with_password(&bytes, pw)?,
            None => Zeroizing::new(bytes),
        };
        Ok(Zeroizing::new(decompress(&compressed)?))
    }

    /// Persist an unsealed key blob (parameters, relinearization and Galois
    /// material), zstd-compressed.
    pub fn save_key_blob(&self, file: &str, bytes: &[u8]) -> Result<(), VaultError> {
        let compressed = compress(bytes)?;
        self.write_atomic(&self.key_path(file), &compressed)
    }

    /// Load an unsealed key blob.
    pub fn load_key_blob(&self, file: &str) -> Result<Vec<u8>, VaultError> {
        let compressed = self.read_file(&self.key_path(file))?;
        decompress(&compressed)
    }

    // ------------------------------------------------------------------
    // Rotation
    // ------------------------------------------------------------------

    /// Rotate the BFV key pair: move the current `old_pub`/`old_sec` files
    /// into `backups/` with a UTC `_YYYYMMDD_HHMMSS` suffix, then persist
    /// the new pair. If saving the new pair fails, the backups remain and
    /// the key slots are left absent for the caller to restore.
    pub fn rotate_fhe_keys(
        &self,
        old_pub: &str,
        old_sec: &str,
        new_public: &[u8],
        new_secret: &[u8],
        password: Option<&str>,
    ) -> Result<(), VaultError> {
        let backups = self.backup_dir();
        fs::create_dir_all(&backups)?;
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();

        for file in [old_pub, old_sec] {
            let current = self.key_path(file);
            if current.is_file() {
                let backed_up = backups.join(format!("{file}_{timestamp}"));
                fs::rename(&current, &backed_up)?;
                debug!(from = %current.display(), to = %backed_up.display(), "key moved to backup");
            }
        }

        self.save_fhe_keys(new_public, new_secret, old_pub, old_sec, password)?;
        info!(timestamp, "FHE keys rotated");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    pub(crate) fn read_file(&self, path: &Path) -> Result<Vec<u8>, VaultError> {
        match fs::read(path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(VaultError::NotFound(path.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a sibling temp file, fsync, then rename into place.
    pub(crate) fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<(), VaultError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("keyfile");
        let tmp = path.with_file_name(format!(".{file_name}.tmp"));
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

pub(crate) fn compress(bytes: &[u8]) -> Result<Vec<u8>, VaultError> {
    Ok(zstd::encode_all(bytes, KEY_COMPRESSION_LEVEL)?)
}

pub(crate) fn decompress(bytes: &[u8]) -> Result<Vec<u8>, VaultError> {
    // A blob that fails to decompress was tampered with or truncated.
    zstd::decode_all(bytes).map_err(|_| VaultError::AuthFailed)
}
