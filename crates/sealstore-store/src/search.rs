//! Homomorphic predicate scans and predicate-driven mutations.
//!
//! The server cannot index over BFV ciphertexts, so every cache miss is a
//! full scan: each row's index ciphertext (or bit-ciphertext list) goes
//! through the engine's comparison protocol. Matching id lists are cached;
//! any mutation invalidates those caches wholesale.

use tracing::{debug, info};

use sealstore_fhe::FheEngine;

use crate::error::StoreError;
use crate::store::RecordStore;
use crate::types::StoredRecord;

impl RecordStore {
    /// Equality scan: all records whose encrypted index matches
    /// `query_value`. Requires a full-mode engine.
    pub fn search_by_encrypted_index(
        &self,
        fhe: &FheEngine,
        query_value: u64,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        if let Some(ids) = self.equality_cache.get(&query_value) {
            debug!(query_value, hits = ids.len(), "equality scan served from cache");
            return self.get_many(&ids);
        }

        // The connection lock is released before the per-row homomorphic
        // work begins.
        let rows = self.all_index_rows()?;
        let scanned = rows.len();
        let mut matches = Vec::new();
        for (id, encrypted_index) in rows {
            if fhe.compare_encrypted(&encrypted_index, query_value)? {
                matches.push(id);
            }
        }
        info!(query_value, scanned, matched = matches.len(), "equality scan complete");

        let records = self.get_many(&matches)?;
        self.equality_cache.put(query_value, matches);
        Ok(records)
    }

    /// Equality scan against several query values; a record matches when
    /// any of them matches its index (first match wins, so a record is
    /// returned at most once). Uncached.
    pub fn search_by_encrypted_indices(
        &self,
        fhe: &FheEngine,
        query_values: &[u64],
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let rows = self.all_index_rows()?;
        let mut matches = Vec::new();
        for (id, encrypted_index) in rows {
            for value in query_values {
                if fhe.compare_encrypted(&encrypted_index, *value)? {
                    matches.push(id);
                    break;
                }
            }
        }
        self.get_many(&matches)
    }

    /// Range scan: all records whose index lies in `[min_value, max_value]`
    /// (either bound optional). Records inserted without range support are
    /// excluded. Requires a full-mode engine.
    pub fn search_by_range(
        &self,
        fhe: &FheEngine,
        min_value: Option<u64>,
        max_value: Option<u64>,
    ) -> Result<Vec<StoredRecord>, StoreError> {
        let key = range_cache_key(min_value, max_value);
        if let Some(ids) = self.range_cache.get(&key) {
            debug!(%key, hits = ids.len(), "range scan served from cache");
            return self.get_many(&ids);
        }

        let candidates = self.ids_with_bit_rows()?;
        let scanned = candidates.len();
        let mut matches = Vec::new();
        for id in candidates {
            let bits = self.bit_rows(id)?;
            if fhe.compare_range(&bits, min_value, max_value)? {
                matches.push(id);
            }
        }
        info!(%key, scanned, matched = matches.len(), "range scan complete");

        let records = self.get_many(&matches)?;
        self.range_cache.put(key, matches);
        Ok(records)
    }

    /// Update the payload of every record matching the equality predicate.
    /// Returns the ids that were updated.
    pub fn update_by_index(
        &self,
        fhe: &FheEngine,
        query_value: u64,
        new_payload: &[u8],
    ) -> Result<Vec<i64>, StoreError> {
        let ids = self.matching_ids_by_index(fhe, query_value)?;
        self.mutate_each(ids, |id| self.update(id, new_payload).map(|_| ()))
    }

    /// Update the payload of every record matching the range predicate.
    pub fn update_by_range(
        &self,
        fhe: &FheEngine,
        min_value: Option<u64>,
        max_value: Option<u64>,
        new_payload: &[u8],
    ) -> Result<Vec<i64>, StoreError> {
        let ids = self.matching_ids_by_range(fhe, min_value, max_value)?;
        self.mutate_each(ids, |id| self.update(id, new_payload).map(|_| ()))
    }

    /// Delete every record matching the equality predicate.
    pub fn delete_by_index(
        &self,
        fhe: &FheEngine,
        query_value: u64,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = self.matching_ids_by_index(fhe, query_value)?;
        self.mutate_each(ids, |id| self.delete(id).map(|_| ()))
    }

    /// Delete every record matching the range predicate.
    pub fn delete_by_range(
        &self,
        fhe: &FheEngine,
        min_value: Option<u64>,
        max_value: Option<u64>,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = self.matching_ids_by_range(fhe, min_value, max_value)?;
        self.mutate_each(ids, |id| self.delete(id).map(|_| ()))
    }

    fn matching_ids_by_index(
        &self,
        fhe: &FheEngine,
        query_value: u64,
    ) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .search_by_encrypted_index(fhe, query_value)?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    fn matching_ids_by_range(
        &self,
        fhe: &FheEngine,
        min_value: Option<u64>,
        max_value: Option<u64>,
    ) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .search_by_range(fhe, min_value, max_value)?
            .into_iter()
            .map(|r| r.id)
            .collect())
    }

    /// Apply `mutate` to each id in order. One logical operation, not one
    /// SQL transaction: on failure the already-applied ids are reported.
    fn mutate_each(
        &self,
        ids: Vec<i64>,
        mutate: impl Fn(i64) -> Result<(), StoreError>,
    ) -> Result<Vec<i64>, StoreError> {
        let mut succeeded = Vec::with_capacity(ids.len());
        for id in ids {
            match mutate(id) {
                Ok(()) => succeeded.push(id),
                Err(source) => {
                    return Err(StoreError::PartialMutation {
                        succeeded,
                        source: Box::new(source),
                    });
                }
            }
        }
        Ok(succeeded)
    }
}

/// Canonical cache key for a range predicate; `*` marks an open bound.
fn range_cache_key(min_value: Option<u64>, max_value: Option<u64>) -> String {
    let lo = min_value.map_or_else(|| "*".to_string(), |v| v.to_string());
    let hi = max_value.map_or_else(|| "*".to_string(), |v| v.to_string());
    format!("{lo}..{hi}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_cache_key_canonicalizes_open_bounds() {
        assert_eq!(range_cache_key(Some(15), Some(35)), "15..35");
        assert_eq!(range_cache_key(None, Some(10)), "*..10");
        assert_eq!(range_cache_key(Some(40), None), "40..*");
        assert_eq!(range_cache_key(None, None), "*..*");
    }
}
