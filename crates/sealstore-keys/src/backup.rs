//! Whole-directory key backups as gzip-compressed tar archives.

use std::fs;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::info;

use crate::error::VaultError;
use crate::vault::{KeyVault, AES_KEY_FILE};

impl KeyVault {
    /// Archive the entire keys directory into
    /// `backup_dir/keys_backup_YYYYMMDD_HHMMSS.tar.gz` and return its path.
    ///
    /// `backup_dir` defaults to `backups/` inside the vault. Relative paths
    /// are preserved; the archive being written is excluded from itself.
    pub fn generate_backup(&self, backup_dir: Option<&Path>) -> Result<PathBuf, VaultError> {
        let backup_dir = match backup_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.backup_dir(),
        };
        fs::create_dir_all(&backup_dir)?;

        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let archive_path = backup_dir.join(format!("keys_backup_{timestamp}.tar.gz"));

        let file = fs::File::create(&archive_path)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_dir(&mut builder, self.keys_dir(), self.keys_dir(), &archive_path)?;
        let encoder = builder.into_inner()?;
        let file = encoder.finish()?;
        file.sync_all()?;

        info!(archive = %archive_path.display(), "keys backup written");
        Ok(archive_path)
    }

    /// Extract `archive` over the keys directory, overwriting its contents.
    ///
    /// When `password` is given, the restored AES keyfile must open under
    /// it; otherwise the previous directory contents are put back and the
    /// call fails with [`VaultError::AuthFailed`].
    pub fn restore_backup(
        &self,
        archive: &Path,
        password: Option<&str>,
    ) -> Result<(), VaultError> {
        if !archive.is_file() {
            return Err(VaultError::NotFound(archive.to_path_buf()));
        }
        fs::create_dir_all(self.keys_dir())?;

        // Snapshot the current directory so a failed verification can roll
        // back. The snapshot lives next to the keys dir, not inside it.
        let snapshot = self
            .keys_dir()
            .with_file_name(format!(
                "{}.restore-prev",
                self.keys_dir()
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("keys")
            ));
        if snapshot.exists() {
            fs::remove_dir_all(&snapshot)?;
        }
        fs::create_dir_all(&snapshot)?;
        move_dir_contents(self.keys_dir(), &snapshot)?;

        let result = (|| -> Result<(), VaultError> {
            let file = fs::File::open(archive)?;
            let mut tar = tar::Archive::new(GzDecoder::new(file));
            tar.unpack(self.keys_dir())?;

            if let Some(pw) = password {
                // Verification only; the key is dropped (and zeroized) here.
                self.load_aes_key(AES_KEY_FILE, pw)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                fs::remove_dir_all(&snapshot)?;
                info!(archive = %archive.display(), "keys backup restored");
                Ok(())
            }
            Err(e) => {
                // Roll back to the pre-restore contents.
                clear_dir(self.keys_dir())?;
                move_dir_contents(&snapshot, self.keys_dir())?;
                fs::remove_dir_all(&snapshot)?;
                Err(e)
            }
        }
    }
}

fn append_dir(
    builder: &mut tar::Builder<GzEncoder<fs::File>>,
    root: &Path,
    dir: &Path,
    exclude: &Path,
) -> Result<(), VaultError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path == exclude {
            continue;
        }
        let relative = path
            .strip_prefix(root)
            .map_err(|_| VaultError::NotFound(path.clone()))?
            .to_path_buf();
        if path.is_dir() {
            builder.append_dir(&relative, &path)?;
            append_dir(builder, root, &path, exclude)?;
        } else {
            builder.append_path_with_name(&path, &relative)?;
        }
    }
    Ok(())
}

fn move_dir_contents(from: &Path, to: &Path) -> Result<(), VaultError> {
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        fs::rename(entry.path(), to.join(entry.file_name()))?;
    }
    Ok(())
}

fn clear_dir(dir: &Path) -> Result<(), VaultError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
