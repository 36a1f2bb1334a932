//! The record store: transactional mutation, content-addressed payload
//! deduplication, and the layered caches.
//!
//! Sessions follow a one-session-per-operation discipline: the SQLite
//! connection lives behind a mutex, is acquired at the top of each
//! operation, and is released on every exit path before any cache is
//! touched. A rolled-back transaction therefore never leaks into the
//! in-memory caches.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use tracing::{debug, info};
use xxhash_rust::xxh64::xxh64;

use sealstore_cache::SharedLruCache;

use crate::error::StoreError;
use crate::schema;
use crate::types::{NewRecord, StoredRecord, StoreCacheStats};

/// Default capacity for each of the three LRU caches.
pub const DEFAULT_CACHE_CAPACITY: usize = 1000;
/// Default bound on a single SQL round-trip.
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

pub struct RecordStore {
    conn: Mutex<Connection>,
    pub(crate) record_cache: SharedLruCache<i64, StoredRecord>,
    pub(crate) equality_cache: SharedLruCache<u64, Vec<i64>>,
    pub(crate) range_cache: SharedLruCache<String, Vec<i64>>,
    reference_cache: Mutex<HashMap<String, i64>>,
}

impl RecordStore {
    /// Open (creating if needed) a store at `path`.
    pub fn open(
        path: impl AsRef<Path>,
        cache_capacity: usize,
        query_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, cache_capacity, query_timeout)
    }

    /// Open an in-memory store.
    pub fn open_in_memory(cache_capacity: usize) -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, cache_capacity, DEFAULT_QUERY_TIMEOUT)
    }

    fn with_connection(
        conn: Connection,
        cache_capacity: usize,
        query_timeout: Duration,
    ) -> Result<Self, StoreError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        // Bounds the SQL round-trip only; homomorphic evaluation runs
        // outside the connection lock and is not interruptible.
        conn.busy_timeout(query_timeout)?;
        schema::init(&conn)?;
        info!(cache_capacity, "record store opened");
        Ok(Self {
            conn: Mutex::new(conn),
            record_cache: SharedLruCache::new(cache_capacity),
            equality_cache: SharedLruCache::new(cache_capacity),
            range_cache: SharedLruCache::new(cache_capacity),
            reference_cache: Mutex::new(HashMap::new()),
        })
    }

    // ------------------------------------------------------------------
    // Insert
    // ------------------------------------------------------------------

    /// Insert one record (plus its bit rows when present); returns the new
    /// row id.
    pub fn add(&self, record: NewRecord) -> Result<i64, StoreError> {
        let mut pending_refs = Vec::new();
        let (id, stored) = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let inserted = self.insert_in_tx(&tx, &record, &mut pending_refs)?;
            tx.commit()?;
            inserted
        };
        self.apply_reference_updates(pending_refs);
        self.record_cache.put(id, stored);
        self.invalidate_query_caches();
        debug!(id, "record added");
        Ok(id)
    }

    /// Insert many records in a single transaction. The returned ids
    /// preserve input order. A failure rolls the whole batch back.
    pub fn add_batch(&self, records: Vec<NewRecord>) -> Result<Vec<i64>, StoreError> {
        let mut pending_refs = Vec::new();
        let mut inserted = Vec::with_capacity(records.len());
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            for (attempted, record) in records.iter().enumerate() {
                match self.insert_in_tx(&tx, record, &mut pending_refs) {
                    Ok(pair) => inserted.push(pair),
                    Err(StoreError::Sqlite(source)) => {
                        return Err(StoreError::Batch {
                            attempted: attempted + 1,
                            source,
                        });
                    }
                    Err(other) => return Err(other),
                }
            }
            tx.commit()?;
        }
        self.apply_reference_updates(pending_refs);
        let ids: Vec<i64> = inserted
            .into_iter()
            .map(|(id, stored)| {
                self.record_cache.put(id, stored);
                id
            })
            .collect();
        self.invalidate_query_caches();
        info!(count = ids.len(), "batch insert committed");
        Ok(ids)
    }

    fn insert_in_tx(
        &self,
        tx: &Transaction<'_>,
        record: &NewRecord,
        pending_refs: &mut Vec<(String, i64)>,
    ) -> Result<(i64, StoredRecord), StoreError> {
        self.reference_in_tx(tx, &record.encrypted_payload, pending_refs)?;

        let now = Utc::now();
        tx.execute(
            "INSERT INTO encrypted_records (encrypted_index, encrypted_payload, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![record.encrypted_index, record.encrypted_payload, now, now],
        )?;
        let id = tx.last_insert_rowid();

        if let Some(bits) = &record.encrypted_bits {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO range_query_indices (record_id, bit_position, encrypted_bit)
                 VALUES (?1, ?2, ?3)",
            )?;
            for (position, bit) in bits.iter().enumerate() {
                stmt.execute(params![id, position as i64, bit])?;
            }
        }

        let stored = StoredRecord {
            id,
            encrypted_index: record.encrypted_index.clone(),
            encrypted_payload: record.encrypted_payload.clone(),
            created_at: now,
            updated_at: now,
        };
        Ok((id, stored))
    }

    /// Find or create the reference row for `payload` inside `tx`. The
    /// reference cache is only consulted here; updates are staged in
    /// `pending_refs` and applied after commit.
    fn reference_in_tx(
        &self,
        tx: &Transaction<'_>,
        payload: &[u8],
        pending_refs: &mut Vec<(String, i64)>,
    ) -> Result<i64, StoreError> {
        let hash = payload_hash(payload);
        if let Some(id) = self.reference_cache.lock().get(&hash).copied() {
            return Ok(id);
        }
        if let Some((_, id)) = pending_refs.iter().find(|(h, _)| *h == hash) {
            return Ok(*id);
        }
        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM reference_table WHERE hash_value = ?1",
                [&hash],
                |row| row.get(0),
            )
            .optional()?;
        let id = match existing {
            Some(id) => id,
            None => {
                tx.execute(
                    "INSERT INTO reference_table (hash_value, encrypted_data) VALUES (?1, ?2)",
                    params![hash, payload],
                )?;
                tx.last_insert_rowid()
            }
        };
        pending_refs.push((hash, id));
        Ok(id)
    }

    fn apply_reference_updates(&self, pending_refs: Vec<(String, i64)>) {
        if pending_refs.is_empty() {
            return;
        }
        let mut cache = self.reference_cache.lock();
        for (hash, id) in pending_refs {
            cache.insert(hash, id);
        }
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    /// Fetch by id, cache first. Absent rows are `None`, not an error.
    pub fn get(&self, id: i64) -> Result<Option<StoredRecord>, StoreError> {
        if let Some(hit) = self.record_cache.get(&id) {
            return Ok(Some(hit));
        }
        let record = {
            let conn = self.conn.lock();
            conn.query_row(
                "SELECT id, encrypted_index, encrypted_payload, created_at, updated_at
                 FROM encrypted_records WHERE id = ?1",
                [id],
                row_to_record,
            )
            .optional()?
        };
        if let Some(record) = &record {
            self.record_cache.put(id, record.clone());
        }
        Ok(record)
    }

    /// Fetch many ids: cache hits are split out, the misses resolved with
    /// one `IN` query, and the result merged back in input order. Ids with
    /// no row are simply absent from the result.
    pub fn get_many(&self, ids: &[i64]) -> Result<Vec<StoredRecord>, StoreError> {
        let mut found: HashMap<i64, StoredRecord> = HashMap::with_capacity(ids.len());
        let mut misses = Vec::new();
        for id in ids {
            match self.record_cache.get(id) {
                Some(hit) => {
                    found.insert(*id, hit);
                }
                None => misses.push(*id),
            }
        }

        if !misses.is_empty() {
            let conn = self.conn.lock();
            let placeholders = vec!["?"; misses.len()].join(",");
            let sql = format!(
                "SELECT id, encrypted_index, encrypted_payload, created_at, updated_at
                 FROM encrypted_records WHERE id IN ({placeholders})"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(rusqlite::params_from_iter(misses.iter()), row_to_record)?;
            for row in rows {
                let record = row?;
                found.insert(record.id, record);
            }
            drop(stmt);
            drop(conn);
            for id in &misses {
                if let Some(record) = found.get(id) {
                    self.record_cache.put(*id, record.clone());
                }
            }
        }

        Ok(ids.iter().filter_map(|id| found.remove(id)).collect())
    }

    /// All records in id order, for export.
    pub fn get_all(&self) -> Result<Vec<StoredRecord>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, encrypted_index, encrypted_payload, created_at, updated_at
             FROM encrypted_records ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub(crate) fn all_index_rows(&self) -> Result<Vec<(i64, Vec<u8>)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT id, encrypted_index FROM encrypted_records ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub(crate) fn ids_with_bit_rows(&self) -> Result<Vec<i64>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT DISTINCT record_id FROM range_query_indices ORDER BY record_id",
        )?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Ordered bit ciphertexts for one record, LSB first.
    pub(crate) fn bit_rows(&self, record_id: i64) -> Result<Vec<Vec<u8>>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT encrypted_bit FROM range_query_indices
             WHERE record_id = ?1 ORDER BY bit_position",
        )?;
        let rows = stmt.query_map([record_id], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Update and delete
    // ------------------------------------------------------------------

    /// Replace a record's payload. The index is immutable by design.
    /// Returns false when the id does not exist.
    pub fn update(&self, id: i64, new_payload: &[u8]) -> Result<bool, StoreError> {
        let mut pending_refs = Vec::new();
        let updated = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            let existing: Option<StoredRecord> = tx
                .query_row(
                    "SELECT id, encrypted_index, encrypted_payload, created_at, updated_at
                     FROM encrypted_records WHERE id = ?1",
                    [id],
                    row_to_record,
                )
                .optional()?;
            let Some(mut record) = existing else {
                return Ok(false);
            };
            self.reference_in_tx(&tx, new_payload, &mut pending_refs)?;
            let now = Utc::now();
            tx.execute(
                "UPDATE encrypted_records SET encrypted_payload = ?1, updated_at = ?2 WHERE id = ?3",
                params![new_payload, now, id],
            )?;
            tx.commit()?;
            record.encrypted_payload = new_payload.to_vec();
            record.updated_at = now;
            record
        };
        self.apply_reference_updates(pending_refs);
        self.record_cache.put(id, updated);
        self.invalidate_query_caches();
        debug!(id, "record updated");
        Ok(true)
    }

    /// Apply many payload updates in one transaction; returns how many ids
    /// existed and were updated.
    pub fn update_batch(&self, updates: &[(i64, Vec<u8>)]) -> Result<usize, StoreError> {
        let mut pending_refs = Vec::new();
        let mut applied = Vec::new();
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            for (attempted, (id, payload)) in updates.iter().enumerate() {
                let result = (|| -> Result<bool, StoreError> {
                    self.reference_in_tx(&tx, payload, &mut pending_refs)?;
                    let now = Utc::now();
                    let n = tx.execute(
                        "UPDATE encrypted_records SET encrypted_payload = ?1, updated_at = ?2 WHERE id = ?3",
                        params![payload, now, id],
                    )?;
                    Ok(n > 0)
                })();
                match result {
                    Ok(true) => applied.push(*id),
                    Ok(false) => {}
                    Err(StoreError::Sqlite(source)) => {
                        return Err(StoreError::Batch {
                            attempted: attempted + 1,
                            source,
                        });
                    }
                    Err(other) => return Err(other),
                }
            }
            tx.commit()?;
        }
        self.apply_reference_updates(pending_refs);
        for id in &applied {
            self.record_cache.remove(id);
        }
        self.invalidate_query_caches();
        Ok(applied.len())
    }

    /// Delete a record and its bit rows. Returns false when the id does
    /// not exist. The child rows are removed explicitly; ownership is not
    /// delegated to SQL cascades.
    pub fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let deleted = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM range_query_indices WHERE record_id = ?1", [id])?;
            let n = tx.execute("DELETE FROM encrypted_records WHERE id = ?1", [id])?;
            tx.commit()?;
            n > 0
        };
        if deleted {
            self.record_cache.remove(&id);
            self.invalidate_query_caches();
            debug!(id, "record deleted");
        }
        Ok(deleted)
    }

    /// Delete many records in one transaction; returns how many existed.
    pub fn delete_batch(&self, ids: &[i64]) -> Result<usize, StoreError> {
        let mut deleted = Vec::new();
        {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;
            for (attempted, id) in ids.iter().enumerate() {
                let result = (|| -> Result<bool, rusqlite::Error> {
                    tx.execute("DELETE FROM range_query_indices WHERE record_id = ?1", [id])?;
                    let n = tx.execute("DELETE FROM encrypted_records WHERE id = ?1", [id])?;
                    Ok(n > 0)
                })();
                match result {
                    Ok(true) => deleted.push(*id),
                    Ok(false) => {}
                    Err(source) => {
                        return Err(StoreError::Batch {
                            attempted: attempted + 1,
                            source,
                        });
                    }
                }
            }
            tx.commit()?;
        }
        for id in &deleted {
            self.record_cache.remove(id);
        }
        self.invalidate_query_caches();
        Ok(deleted.len())
    }

    // ------------------------------------------------------------------
    // Reference GC
    // ------------------------------------------------------------------

    /// Delete reference rows whose hash is no longer achieved by any live
    /// payload, and clear the reference cache. Idempotent.
    pub fn cleanup_unused_references(&self) -> Result<usize, StoreError> {
        let removed = {
            let mut conn = self.conn.lock();
            let tx = conn.transaction()?;

            let live: HashSet<String> = {
                let mut stmt = tx.prepare("SELECT encrypted_payload FROM encrypted_records")?;
                let rows = stmt.query_map([], |row| row.get::<_, Vec<u8>>(0))?;
                let mut set = HashSet::new();
                for row in rows {
                    set.insert(payload_hash(&row?));
                }
                set
            };

            let dead: Vec<i64> = {
                let mut stmt = tx.prepare("SELECT id, hash_value FROM reference_table")?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                })?;
                let mut dead = Vec::new();
                for row in rows {
                    let (id, hash) = row?;
                    if !live.contains(&hash) {
                        dead.push(id);
                    }
                }
                dead
            };

            for id in &dead {
                tx.execute("DELETE FROM reference_table WHERE id = ?1", [id])?;
            }
            tx.commit()?;
            dead.len()
        };
        self.reference_cache.lock().clear();
        info!(removed, "reference table garbage collected");
        Ok(removed)
    }

    /// Number of reference rows, for dedup accounting.
    pub fn reference_count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM reference_table", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // ------------------------------------------------------------------
    // Caches
    // ------------------------------------------------------------------

    pub(crate) fn invalidate_query_caches(&self) {
        // Coarse by design: per-value invalidation would require plaintext
        // knowledge of the indices, which the server does not have.
        self.equality_cache.clear();
        self.range_cache.clear();
    }

    pub fn cache_stats(&self) -> StoreCacheStats {
        StoreCacheStats {
            records: self.record_cache.stats(),
            equality_queries: self.equality_cache.stats(),
            range_queries: self.range_cache.stats(),
        }
    }

    pub fn clear_caches(&self) {
        self.record_cache.clear();
        self.equality_cache.clear();
        self.range_cache.clear();
        self.reference_cache.lock().clear();
    }
}

/// xxhash64 of a ciphertext blob, hex-encoded, as stored in
/// `reference_table.hash_value`.
pub fn payload_hash(payload: &[u8]) -> String {
    format!("{:016x}", xxh64(payload, 0))
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredRecord> {
    Ok(StoredRecord {
        id: row.get(0)?,
        encrypted_index: row.get(1)?,
        encrypted_payload: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}
