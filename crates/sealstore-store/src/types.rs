//! Row types and cache statistics.

use chrono::{DateTime, Utc};
use sealstore_cache::CacheStats;

/// A persisted encrypted record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: i64,
    /// BFV ciphertext of the indexing integer (compressed envelope).
    pub encrypted_index: Vec<u8>,
    /// Sealed payload: IV ‖ tag ‖ AES-GCM ciphertext.
    pub encrypted_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input to an insert.
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub encrypted_index: Vec<u8>,
    pub encrypted_payload: Vec<u8>,
    /// Bit ciphertexts (LSB first) when range querying is enabled.
    pub encrypted_bits: Option<Vec<Vec<u8>>>,
}

/// Statistics over the store's three LRU caches.
#[derive(Debug, Clone)]
pub struct StoreCacheStats {
    pub records: CacheStats,
    pub equality_queries: CacheStats,
    pub range_queries: CacheStats,
}
