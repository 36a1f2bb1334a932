//! The Secure-DB façade: wires the key vault, payload sealer, homomorphic
//! index engine, and record store into one surface.

use std::path::{Path, PathBuf};

use tracing::info;
use zeroize::Zeroizing;

use sealstore_cache::CacheStats;
use sealstore_crypto::PayloadSealer;
use sealstore_fhe::{FheEngine, KeyMaterial, SECRET_SEED_LENGTH};
use sealstore_keys::{
    KeyVault, AES_KEY_FILE, GALOIS_KEY_FILE, PARAMS_FILE, PUBLIC_KEY_FILE, RELIN_KEY_FILE,
    SECRET_KEY_FILE,
};
use sealstore_store::{NewRecord, RecordStore, StoreCacheStats};

use crate::config::SecureDbConfig;
use crate::error::{Error, Result};

/// How to obtain key material at startup.
#[derive(Debug, Clone, Copy)]
pub enum KeyPolicy<'a> {
    /// Generate a fresh key set and persist it, sealing the secrets under
    /// `password`.
    Generate { password: &'a str },
    /// Load the persisted key set in full mode.
    Load { password: &'a str },
    /// Load only the public half: the instance can insert and export but
    /// not decrypt or run predicate scans.
    LoadEncryptOnly { password: &'a str },
}

/// A decrypted search or fetch result.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordData {
    pub id: i64,
    pub data: String,
}

/// Combined statistics over the store caches and the comparison memo.
#[derive(Debug, Clone)]
pub struct CacheStatsReport {
    pub store: StoreCacheStats,
    pub compare_memo: CacheStats,
}

pub struct SecureDb {
    vault: KeyVault,
    sealer: PayloadSealer,
    fhe: FheEngine,
    store: RecordStore,
    config: SecureDbConfig,
}

impl SecureDb {
    /// Open the database, obtaining key material per `policy`.
    pub fn open(config: SecureDbConfig, policy: KeyPolicy<'_>) -> Result<Self> {
        let vault = KeyVault::open(&config.keys_dir)?;

        let (fhe, sealer) = match policy {
            KeyPolicy::Generate { password } => {
                let (engine, material) = FheEngine::generate(&config.fhe)?;
                persist_material(&vault, &material, password)?;
                let sealer = PayloadSealer::generate()?;
                vault.save_aes_key(sealer.key(), AES_KEY_FILE, password)?;
                info!("generated and persisted a fresh key set");
                (engine, sealer)
            }
            KeyPolicy::Load { password } => {
                let material = load_material(&vault, Some(password))?;
                let engine = FheEngine::from_material(&material)?;
                let aes_key = vault.load_aes_key(AES_KEY_FILE, password)?;
                let sealer = PayloadSealer::new(&aes_key)?;
                (engine, sealer)
            }
            KeyPolicy::LoadEncryptOnly { password } => {
                let material = load_material(&vault, None)?;
                let engine = FheEngine::from_material(&material)?;
                let aes_key = vault.load_aes_key(AES_KEY_FILE, password)?;
                let sealer = PayloadSealer::new(&aes_key)?;
                (engine, sealer)
            }
        };

        let store = RecordStore::open(&config.db_path, config.cache_capacity, config.query_timeout)?;
        Ok(Self {
            vault,
            sealer,
            fhe,
            store,
            config,
        })
    }

    pub fn vault(&self) -> &KeyVault {
        &self.vault
    }

    /// Direct access to the record store, for operators inspecting dedup
    /// and cache behaviour.
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn is_encrypt_only(&self) -> bool {
        self.fhe.is_encrypt_only()
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Encrypt and insert one record. Returns the new record id.
    pub fn add_record(
        &self,
        index_value: u64,
        data: &str,
        enable_range_query: bool,
    ) -> Result<i64> {
        let record = self.encrypt_record(index_value, data, enable_range_query)?;
        Ok(self.store.add(record)?)
    }

    /// Encrypt and insert many records in one transaction; ids preserve
    /// input order.
    pub fn add_records_batch(&self, records: &[(u64, String, bool)]) -> Result<Vec<i64>> {
        let mut encrypted = Vec::with_capacity(records.len());
        for (index_value, data, enable_range) in records {
            encrypted.push(self.encrypt_record(*index_value, data, *enable_range)?);
        }
        Ok(self.store.add_batch(encrypted)?)
    }

    fn encrypt_record(
        &self,
        index_value: u64,
        data: &str,
        enable_range_query: bool,
    ) -> Result<NewRecord> {
        let encrypted_index = self.fhe.encrypt_int(index_value)?;
        let encrypted_bits = if enable_range_query {
            Some(
                self.fhe
                    .encrypt_for_range_query(index_value, self.config.fhe.range_bits)?,
            )
        } else {
            None
        };
        let encrypted_payload = self.sealer.seal(data.as_bytes())?;
        Ok(NewRecord {
            encrypted_index,
            encrypted_payload,
            encrypted_bits,
        })
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Fetch and decrypt one record; absent ids are `None`.
    pub fn get_record(&self, record_id: i64) -> Result<Option<String>> {
        match self.store.get(record_id)? {
            Some(record) => Ok(Some(self.open_payload(&record.encrypted_payload)?)),
            None => Ok(None),
        }
    }

    /// Fetch and decrypt many records; the result preserves input order
    /// and pairs each id with `None` when absent.
    pub fn get_records_batch(&self, record_ids: &[i64]) -> Result<Vec<(i64, Option<String>)>> {
        let records = self.store.get_many(record_ids)?;
        let mut by_id: std::collections::HashMap<i64, String> =
            std::collections::HashMap::with_capacity(records.len());
        for record in records {
            by_id.insert(record.id, self.open_payload(&record.encrypted_payload)?);
        }
        Ok(record_ids
            .iter()
            .map(|id| (*id, by_id.remove(id)))
            .collect())
    }

    /// Equality search over the homomorphic index.
    pub fn search_by_index(&self, index_value: u64) -> Result<Vec<RecordData>> {
        let records = self.store.search_by_encrypted_index(&self.fhe, index_value)?;
        self.decrypt_results(records)
    }

    /// Equality search against several index values at once; each matching
    /// record is returned once.
    pub fn search_by_indices(&self, index_values: &[u64]) -> Result<Vec<RecordData>> {
        let records = self
            .store
            .search_by_encrypted_indices(&self.fhe, index_values)?;
        self.decrypt_results(records)
    }

    /// Range search over the bitwise homomorphic index. Records inserted
    /// without range support are not returned.
    pub fn search_by_range(
        &self,
        min_value: Option<u64>,
        max_value: Option<u64>,
    ) -> Result<Vec<RecordData>> {
        let records = self.store.search_by_range(&self.fhe, min_value, max_value)?;
        self.decrypt_results(records)
    }

    fn decrypt_results(
        &self,
        records: Vec<sealstore_store::StoredRecord>,
    ) -> Result<Vec<RecordData>> {
        records
            .into_iter()
            .map(|record| {
                Ok(RecordData {
                    id: record.id,
                    data: self.open_payload(&record.encrypted_payload)?,
                })
            })
            .collect()
    }

    pub(crate) fn open_payload(&self, sealed: &[u8]) -> Result<String> {
        let plaintext = self.sealer.open(sealed)?;
        String::from_utf8(plaintext).map_err(|_| Error::InvalidPayload)
    }

    // ------------------------------------------------------------------
    // Updates and deletes
    // ------------------------------------------------------------------

    /// Re-seal `new_data` as the payload of `record_id`. The index is
    /// immutable. Returns false when the id does not exist.
    pub fn update_record(&self, record_id: i64, new_data: &str) -> Result<bool> {
        let sealed = self.sealer.seal(new_data.as_bytes())?;
        Ok(self.store.update(record_id, &sealed)?)
    }

    /// Batch payload update; returns how many ids existed.
    pub fn update_records_batch(&self, updates: &[(i64, String)]) -> Result<usize> {
        let mut sealed = Vec::with_capacity(updates.len());
        for (id, data) in updates {
            sealed.push((*id, self.sealer.seal(data.as_bytes())?));
        }
        Ok(self.store.update_batch(&sealed)?)
    }

    /// Update every record whose index equals `index_value`; returns the
    /// updated ids.
    pub fn update_by_index(&self, index_value: u64, new_data: &str) -> Result<Vec<i64>> {
        let sealed = self.sealer.seal(new_data.as_bytes())?;
        Ok(self.store.update_by_index(&self.fhe, index_value, &sealed)?)
    }

    /// Update every record whose index lies in the range; returns the
    /// updated ids.
    pub fn update_by_range(
        &self,
        min_value: Option<u64>,
        max_value: Option<u64>,
        new_data: &str,
    ) -> Result<Vec<i64>> {
        let sealed = self.sealer.seal(new_data.as_bytes())?;
        Ok(self
            .store
            .update_by_range(&self.fhe, min_value, max_value, &sealed)?)
    }

    /// Delete one record. Returns false when the id does not exist.
    pub fn delete_record(&self, record_id: i64) -> Result<bool> {
        Ok(self.store.delete(record_id)?)
    }

    /// Batch delete; returns how many ids existed.
    pub fn delete_records_batch(&self, record_ids: &[i64]) -> Result<usize> {
        Ok(self.store.delete_batch(record_ids)?)
    }

    /// Delete every record whose index equals `index_value`.
    pub fn delete_by_index(&self, index_value: u64) -> Result<Vec<i64>> {
        Ok(self.store.delete_by_index(&self.fhe, index_value)?)
    }

    /// Delete every record whose index lies in the range.
    pub fn delete_by_range(
        &self,
        min_value: Option<u64>,
        max_value: Option<u64>,
    ) -> Result<Vec<i64>> {
        Ok(self.store.delete_by_range(&self.fhe, min_value, max_value)?)
    }

    /// Garbage-collect dead reference rows; returns how many were removed.
    pub fn cleanup_references(&self) -> Result<usize> {
        Ok(self.store.cleanup_unused_references()?)
    }

    // ------------------------------------------------------------------
    // Caches
    // ------------------------------------------------------------------

    pub fn get_cache_stats(&self) -> CacheStatsReport {
        CacheStatsReport {
            store: self.store.cache_stats(),
            compare_memo: self.fhe.cache_stats(),
        }
    }

    pub fn clear_caches(&self) {
        self.store.clear_caches();
        self.fhe.clear_cache();
        self.sealer.clear_cache();
    }

    // ------------------------------------------------------------------
    // Key lifecycle passthroughs
    // ------------------------------------------------------------------

    /// Rotate the BFV key set: the old keys move into `backups/` with a
    /// timestamp suffix and a fresh set takes their place. Records
    /// encrypted under the old keys become un-queryable; re-encrypting
    /// them is an operator task.
    pub fn rotate_fhe_keys(&mut self, password: &str) -> Result<()> {
        let (engine, material) = FheEngine::generate(&self.config.fhe)?;
        let seed = material
            .secret_seed
            .as_ref()
            .ok_or_else(|| Error::CorruptKeyMaterial("generated material lacks a seed".into()))?;
        self.vault.rotate_fhe_keys(
            PUBLIC_KEY_FILE,
            SECRET_KEY_FILE,
            &material.public_key,
            seed.as_slice(),
            Some(password),
        )?;
        self.vault.save_key_blob(PARAMS_FILE, &material.params)?;
        if let Some(relin) = &material.relin_key {
            self.vault.save_key_blob(RELIN_KEY_FILE, relin)?;
        }
        if let Some(galois) = &material.galois_key {
            self.vault.save_key_blob(GALOIS_KEY_FILE, galois)?;
        }
        self.fhe = engine;
        // Cached predicate results were computed under the old keys.
        self.clear_caches();
        info!("FHE keys rotated; existing records require operator re-encryption");
        Ok(())
    }

    /// Archive the keys directory; returns the archive path.
    pub fn generate_backup(&self, backup_dir: Option<&Path>) -> Result<PathBuf> {
        Ok(self.vault.generate_backup(backup_dir)?)
    }

    /// Restore the keys directory from an archive and reload all key
    /// material from the restored files.
    pub fn restore_backup(&mut self, archive: &Path, password: &str) -> Result<()> {
        self.vault.restore_backup(archive, Some(password))?;
        let material = load_material(&self.vault, Some(password))?;
        self.fhe = FheEngine::from_material(&material)?;
        let aes_key = self.vault.load_aes_key(AES_KEY_FILE, password)?;
        self.sealer = PayloadSealer::new(&aes_key)?;
        self.clear_caches();
        Ok(())
    }
}

fn persist_material(vault: &KeyVault, material: &KeyMaterial, password: &str) -> Result<()> {
    let seed = material
        .secret_seed
        .as_ref()
        .ok_or_else(|| Error::CorruptKeyMaterial("generated material lacks a seed".into()))?;
    vault.save_key_blob(PARAMS_FILE, &material.params)?;
    vault.save_fhe_keys(
        &material.public_key,
        seed.as_slice(),
        PUBLIC_KEY_FILE,
        SECRET_KEY_FILE,
        Some(password),
    )?;
    if let Some(relin) = &material.relin_key {
        vault.save_key_blob(RELIN_KEY_FILE, relin)?;
    }
    if let Some(galois) = &material.galois_key {
        vault.save_key_blob(GALOIS_KEY_FILE, galois)?;
    }
    Ok(())
}

fn load_material(vault: &KeyVault, password: Option<&str>) -> Result<KeyMaterial> {
    let params = vault.load_key_blob(PARAMS_FILE)?;
    let public_key = vault.load_fhe_public_key(PUBLIC_KEY_FILE)?;

    let (secret_seed, relin_key, galois_key) = match password {
        Some(pw) => {
            let seed_bytes = vault.load_fhe_secret_key(SECRET_KEY_FILE, Some(pw))?;
            if seed_bytes.len() != SECRET_SEED_LENGTH {
                return Err(Error::CorruptKeyMaterial(format!(
                    "secret seed has {} bytes, expected {SECRET_SEED_LENGTH}",
                    seed_bytes.len()
                )));
            }
            let mut seed = Zeroizing::new([0u8; SECRET_SEED_LENGTH]);
            seed.copy_from_slice(&seed_bytes);
            let relin = vault.load_key_blob(RELIN_KEY_FILE)?;
            let galois = if vault.contains(GALOIS_KEY_FILE) {
                Some(vault.load_key_blob(GALOIS_KEY_FILE)?)
            } else {
                None
            };
            (Some(seed), Some(relin), galois)
        }
        None => (None, None, None),
    };

    Ok(KeyMaterial {
        params,
        public_key,
        secret_seed,
        relin_key,
        galois_key,
    })
}
