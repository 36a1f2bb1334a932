//! BFV parameter set for the homomorphic index.
//!
//! The defaults are fixed by the at-rest format: degree 8192, a 20-bit
//! prime plaintext modulus congruent to 1 mod 2n (so the batch encoder is
//! available), and the [60, 40, 40, 60] coefficient modulus chain.

use std::sync::Arc;

use fhe::bfv::{BfvParameters, BfvParametersBuilder};

use crate::error::FheError;

/// Immutable BFV parameter configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct FheParams {
    /// Polynomial modulus degree (lattice dimension).
    pub degree: usize,
    /// Plaintext modulus; must satisfy t ≡ 1 (mod 2·degree) for batching.
    pub plaintext_modulus: u64,
    /// Bit sizes of the coefficient modulus chain.
    pub moduli_sizes: Vec<usize>,
    /// Default bit width for range-query encodings.
    pub range_bits: usize,
}

impl Default for FheParams {
    fn default() -> Self {
        Self {
            degree: 8192,
            plaintext_modulus: 1_032_193,
            moduli_sizes: vec![60, 40, 40, 60],
            range_bits: 32,
        }
    }
}

impl FheParams {
    /// Check internal consistency before building a context.
    pub fn validate(&self) -> Result<(), FheError> {
        if !self.degree.is_power_of_two() || self.degree < 1024 {
            return Err(FheError::InvalidParameters(format!(
                "degree {} is not a power of two >= 1024",
                self.degree
            )));
        }
        // Batch encoding needs t ≡ 1 (mod 2n); non-batch integer encoding
        // is not supported.
        if self.plaintext_modulus % (2 * self.degree as u64) != 1 {
            return Err(FheError::InvalidParameters(format!(
                "plaintext modulus {} does not satisfy t ≡ 1 (mod 2n)",
                self.plaintext_modulus
            )));
        }
        if self.range_bits == 0 || self.range_bits > 64 {
            return Err(FheError::InvalidBitWidth(self.range_bits));
        }
        Ok(())
    }

    /// Build the BFV context for this configuration.
    pub fn build(&self) -> Result<Arc<BfvParameters>, FheError> {
        self.validate()?;
        Ok(BfvParametersBuilder::new()
            .set_degree(self.degree)
            .set_plaintext_modulus(self.plaintext_modulus)
            .set_moduli_sizes(&self.moduli_sizes)
            .build_arc()?)
    }
}
