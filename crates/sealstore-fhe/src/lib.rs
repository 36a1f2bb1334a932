//! Homomorphic index engine: BFV context management, integer and bitwise
//! encodings, and the equality/range comparison protocols evaluated over
//! ciphertexts.

pub mod comparator;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod material;
pub mod params;

pub use engine::{FheEngine, DEFAULT_MEMO_CAPACITY};
pub use error::FheError;
pub use material::{KeyMaterial, SECRET_SEED_LENGTH};
pub use params::FheParams;
