//! Serialized BFV key material, as exchanged with the key vault.

use zeroize::Zeroizing;

/// Length of the secret-key seed in bytes.
pub const SECRET_SEED_LENGTH: usize = 32;

/// The serialized form of a BFV key set.
///
/// Public material uses the library's own wire encoding. The secret key is
/// represented by the 32-byte CSPRNG seed from which its CBD coefficients
/// are deterministically resampled; the seed is the raw secret key bytes of
/// the at-rest format.
pub struct KeyMaterial {
    /// Serialized `BfvParameters`.
    pub params: Vec<u8>,
    /// Serialized public key.
    pub public_key: Vec<u8>,
    /// Secret-key seed; absent for encrypt-only material.
    pub secret_seed: Option<Zeroizing<[u8; SECRET_SEED_LENGTH]>>,
    /// Serialized relinearization key; absent for encrypt-only material.
    pub relin_key: Option<Vec<u8>>,
    /// Serialized Galois (rotation) key; absent for encrypt-only material.
    pub galois_key: Option<Vec<u8>>,
}

impl KeyMaterial {
    /// Whether this material carries the secret half of the key set.
    pub fn has_secret(&self) -> bool {
        self.secret_seed.is_some() && self.relin_key.is_some()
    }

    /// Strip the secret half, leaving encrypt-only material. The dropped
    /// seed zeroizes itself.
    pub fn into_public_only(mut self) -> Self {
        self.secret_seed = None;
        self.relin_key = None;
        self.galois_key = None;
        self
    }
}
