//! Symmetric sealing of record payloads.

pub mod error;
pub mod sealer;

pub use error::CryptoError;
pub use sealer::{PayloadSealer, IV_LENGTH, KEY_LENGTH, SEALED_OVERHEAD, TAG_LENGTH};
