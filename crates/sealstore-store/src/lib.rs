//! Relational storage of encrypted records: content-addressed payload
//! deduplication, bit-ciphertext child rows, homomorphic predicate scans,
//! and the layered caches that make repeated queries tractable.

pub mod error;
pub mod schema;
pub mod search;
pub mod store;
pub mod types;

pub use error::StoreError;
pub use store::{payload_hash, RecordStore, DEFAULT_CACHE_CAPACITY, DEFAULT_QUERY_TIMEOUT};
pub use types::{NewRecord, StoreCacheStats, StoredRecord};
