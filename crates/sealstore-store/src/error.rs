use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQL failure: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Homomorphic evaluation failed: {0}")]
    Fhe(#[from] sealstore_fhe::FheError),

    /// A batch mutation failed; the surrounding transaction was rolled
    /// back. `attempted` counts the rows tried before the failure.
    #[error("Batch failed after attempting {attempted} rows: {source}")]
    Batch {
        attempted: usize,
        #[source]
        source: rusqlite::Error,
    },

    /// A predicate mutation failed partway. The ids in `succeeded` were
    /// already applied and remain applied.
    #[error("Predicate mutation failed after {} of its targets were applied", succeeded.len())]
    PartialMutation {
        succeeded: Vec<i64>,
        #[source]
        source: Box<StoreError>,
    },

    #[error("Internal invariant violated: {0}")]
    Internal(String),
}
