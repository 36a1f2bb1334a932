//! Immutable configuration handed to every component constructor.

use std::path::PathBuf;
use std::time::Duration;

use sealstore_fhe::FheParams;
use sealstore_store::{DEFAULT_CACHE_CAPACITY, DEFAULT_QUERY_TIMEOUT};

/// Configuration for a [`crate::SecureDb`] instance.
///
/// No process-wide mutable state: everything a component needs is fixed
/// here at construction.
#[derive(Debug, Clone)]
pub struct SecureDbConfig {
    /// SQLite database path.
    pub db_path: PathBuf,
    /// Directory owned by the key vault.
    pub keys_dir: PathBuf,
    /// Capacity of each LRU cache.
    pub cache_capacity: usize,
    /// Bound on a single SQL round-trip.
    pub query_timeout: Duration,
    /// BFV parameters, including the range-query bit width.
    pub fhe: FheParams,
}

impl SecureDbConfig {
    /// Configuration with default crypto parameters and cache sizing.
    pub fn new(db_path: impl Into<PathBuf>, keys_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            keys_dir: keys_dir.into(),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            fhe: FheParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SecureDbConfig::new("db.sqlite", "keys");
        assert_eq!(config.cache_capacity, 1000);
        assert_eq!(config.query_timeout, Duration::from_secs(30));
        assert_eq!(config.fhe.range_bits, 32);
        assert_eq!(config.fhe.degree, 8192);
    }
}
