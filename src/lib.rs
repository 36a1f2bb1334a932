//! sealstore: a privacy-preserving encrypted record store.
//!
//! Payloads are sealed under AES-256-GCM; indexing attributes are sealed
//! under BFV so equality and bounded-width range predicates are evaluated
//! over ciphertexts, without the server ever decrypting a stored index.
//!
//! The [`SecureDb`] façade wires the member crates together:
//! `sealstore-keys` (key vault), `sealstore-crypto` (payload sealer),
//! `sealstore-fhe` (homomorphic index engine), `sealstore-store` (record
//! store and caches).

pub mod config;
pub mod db;
pub mod error;
pub mod export;

pub use config::SecureDbConfig;
pub use db::{CacheStatsReport, KeyPolicy, RecordData, SecureDb};
pub use error::{Error, Result};
pub use export::ExportedRecord;

pub use sealstore_cache::CacheStats;
pub use sealstore_crypto::CryptoError;
pub use sealstore_fhe::{FheEngine, FheError, FheParams};
pub use sealstore_keys::{KeyVault, VaultError};
pub use sealstore_store::{StoreCacheStats, StoreError, StoredRecord};
