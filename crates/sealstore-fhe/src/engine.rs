//! The homomorphic index engine.
//!
//! Wraps BFV with batch-encoder slots: integers live in slot 0 of a SIMD
//! encoding, strings are per-byte ciphertext sequences, and equality is
//! decided by squaring the homomorphic difference and decrypting only that
//! result. An engine is either *full* (secret, relinearization and Galois
//! keys present) or *encrypt-only*; decrypt and compare require full mode.

use std::sync::Arc;

use fhe::bfv::{
    BfvParameters, Ciphertext, Encoding, EvaluationKey, EvaluationKeyBuilder, Plaintext,
    PublicKey, RelinearizationKey, SecretKey,
};
use fhe_traits::{
    Deserialize as FheDeserialize, DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder,
    FheEncrypter, Serialize as FheSerialize,
};
use rand::rngs::StdRng;
use rand::{rng, SeedableRng};
use tracing::{debug, info};
use xxhash_rust::xxh64::xxh64;
use zeroize::Zeroizing;

use sealstore_cache::{CacheStats, SharedLruCache};

use crate::envelope;
use crate::error::FheError;
use crate::material::{KeyMaterial, SECRET_SEED_LENGTH};
use crate::params::FheParams;

/// Default capacity of the comparison memo.
pub const DEFAULT_MEMO_CAPACITY: usize = 2000;

/// Key material held by a full-mode engine.
pub(crate) struct FullKeys {
    pub(crate) secret_key: SecretKey,
    pub(crate) relin_key: RelinearizationKey,
    /// Rotation material, kept for parity with the persisted key set.
    #[allow(dead_code)]
    pub(crate) galois_key: Option<EvaluationKey>,
}

/// Engine mode: tagged variants rather than nullable key fields.
pub(crate) enum Mode {
    Full(FullKeys),
    EncryptOnly,
}

/// Memoized comparison operations.
#[derive(Clone, PartialEq, Eq, Hash)]
pub(crate) enum CompareOp {
    Equals(u64),
    LessThan(u64),
    GreaterThan(u64),
}

pub struct FheEngine {
    params: Arc<BfvParameters>,
    public_key: PublicKey,
    pub(crate) mode: Mode,
    /// Memo keyed by (ciphertext hash, operation). Presence is a
    /// performance hint only and must stay unobservable to callers.
    pub(crate) compare_memo: SharedLruCache<(u64, CompareOp), bool>,
}

impl FheEngine {
    /// Generate a fresh key set and a full-mode engine over it.
    pub fn generate(config: &FheParams) -> Result<(Self, KeyMaterial), FheError> {
        let params = config.build()?;

        let mut seed = Zeroizing::new([0u8; SECRET_SEED_LENGTH]);
        getrandom::getrandom(&mut seed[..])
            .map_err(|e| FheError::InvalidParameters(e.to_string()))?;
        let secret_key = secret_key_from_seed(&params, &seed);

        let mut rng = rng();
        let public_key = PublicKey::new(&secret_key, &mut rng);
        let relin_key = RelinearizationKey::new(&secret_key, &mut rng)?;
        let galois_key = EvaluationKeyBuilder::new(&secret_key)?
            .enable_inner_sum()?
            .build(&mut rng)?;

        let material = KeyMaterial {
            params: params.to_bytes(),
            public_key: public_key.to_bytes(),
            secret_seed: Some(seed),
            relin_key: Some(relin_key.to_bytes()),
            galois_key: Some(galois_key.to_bytes()),
        };

        info!(degree = params.degree(), "generated fresh BFV key set");
        let engine = Self {
            params,
            public_key,
            mode: Mode::Full(FullKeys {
                secret_key,
                relin_key,
                galois_key: Some(galois_key),
            }),
            compare_memo: SharedLruCache::new(DEFAULT_MEMO_CAPACITY),
        };
        Ok((engine, material))
    }

    /// Reconstruct an engine from persisted key material. The mode follows
    /// the material: secret halves present means full, absent means
    /// encrypt-only.
    pub fn from_material(material: &KeyMaterial) -> Result<Self, FheError> {
        let params = Arc::new(
            BfvParameters::try_deserialize(&material.params)
                .map_err(|_| FheError::InvalidParameters("corrupt parameter blob".into()))?,
        );
        let public_key = PublicKey::from_bytes(&material.public_key, &params)
            .map_err(|_| FheError::CorruptCiphertext)?;

        let mode = match (&material.secret_seed, &material.relin_key) {
            (Some(seed), Some(relin_bytes)) => {
                let secret_key = secret_key_from_seed(&params, seed);
                let relin_key = RelinearizationKey::from_bytes(relin_bytes, &params)
                    .map_err(|_| FheError::CorruptCiphertext)?;
                let galois_key = match &material.galois_key {
                    Some(bytes) => Some(
                        EvaluationKey::from_bytes(bytes, &params)
                            .map_err(|_| FheError::CorruptCiphertext)?,
                    ),
                    None => None,
                };
                debug!("engine loaded in full mode");
                Mode::Full(FullKeys {
                    secret_key,
                    relin_key,
                    galois_key,
                })
            }
            _ => {
                debug!("engine loaded in encrypt-only mode");
                Mode::EncryptOnly
            }
        };

        Ok(Self {
            params,
            public_key,
            mode,
            compare_memo: SharedLruCache::new(DEFAULT_MEMO_CAPACITY),
        })
    }

    pub fn params(&self) -> &Arc<BfvParameters> {
        &self.params
    }

    /// Largest integer encodable in a slot.
    pub fn max_value(&self) -> u64 {
        self.params.plaintext() - 1
    }

    pub fn is_encrypt_only(&self) -> bool {
        matches!(self.mode, Mode::EncryptOnly)
    }

    // ------------------------------------------------------------------
    // Integer and string encryption
    // ------------------------------------------------------------------

    /// Encrypt an integer into slot 0, returning the compressed envelope.
    pub fn encrypt_int(&self, value: u64) -> Result<Vec<u8>, FheError> {
        let ct = self.encrypt_slot0(value)?;
        envelope::pack(&ct.to_bytes())
    }

    /// Decrypt slot 0 of a compressed ciphertext. Requires full mode.
    pub fn decrypt_int(&self, bytes: &[u8]) -> Result<u64, FheError> {
        self.require_full()?;
        let ct = self.load_ciphertext(bytes)?;
        self.decrypt_slot0(&ct)
    }

    /// Encrypt each value independently.
    pub fn encrypt_ints(&self, values: &[u64]) -> Result<Vec<Vec<u8>>, FheError> {
        values.iter().map(|v| self.encrypt_int(*v)).collect()
    }

    /// Decrypt each ciphertext independently. Requires full mode.
    pub fn decrypt_ints<T: AsRef<[u8]>>(&self, encrypted: &[T]) -> Result<Vec<u64>, FheError> {
        encrypted.iter().map(|e| self.decrypt_int(e.as_ref())).collect()
    }

    /// Encrypt a string as the ordered sequence of its UTF-8 bytes, one
    /// ciphertext per byte. The sequence length leaks.
    pub fn encrypt_string(&self, text: &str) -> Result<Vec<Vec<u8>>, FheError> {
        text.bytes().map(|b| self.encrypt_int(b as u64)).collect()
    }

    /// Decrypt a per-byte ciphertext sequence back to a string.
    pub fn decrypt_string<T: AsRef<[u8]>>(&self, encrypted: &[T]) -> Result<String, FheError> {
        let mut bytes = Vec::with_capacity(encrypted.len());
        for item in encrypted {
            let value = self.decrypt_int(item.as_ref())?;
            if value > u8::MAX as u64 {
                return Err(FheError::InvalidUtf8);
            }
            bytes.push(value as u8);
        }
        String::from_utf8(bytes).map_err(|_| FheError::InvalidUtf8)
    }

    // ------------------------------------------------------------------
    // Homomorphic equality
    // ------------------------------------------------------------------

    /// Decide whether `encrypted_index` encrypts `query`.
    ///
    /// Computes d = ct − Enc(query), squares it (sign suppression),
    /// relinearizes, and decrypts only the squared difference: the fixed
    /// procedure reveals exactly the match bit the caller is about to
    /// learn. Requires full mode.
    pub fn compare_encrypted(&self, encrypted_index: &[u8], query: u64) -> Result<bool, FheError> {
        self.require_full()?;
        self.check_value(query)?;

        let memo_key = (xxh64(encrypted_index, 0), CompareOp::Equals(query));
        if let Some(hit) = self.compare_memo.get(&memo_key) {
            return Ok(hit);
        }

        let index_ct = self.load_ciphertext(encrypted_index)?;
        let query_ct = self.encrypt_slot0(query)?;
        let diff = &index_ct - &query_ct;
        let mut squared = &diff * &diff;
        self.relinearize(&mut squared)?;
        self.check_noise(&squared)?;

        let matched = self.decrypt_slot0(&squared)? == 0;
        self.compare_memo.put(memo_key, matched);
        Ok(matched)
    }

    /// Empty the comparison memo.
    pub fn clear_cache(&self) {
        self.compare_memo.clear();
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.compare_memo.stats()
    }

    // ------------------------------------------------------------------
    // Internals shared with the comparator
    // ------------------------------------------------------------------

    pub(crate) fn check_value(&self, value: u64) -> Result<(), FheError> {
        if value >= self.params.plaintext() {
            return Err(FheError::ValueOutOfRange {
                value,
                max: self.max_value(),
            });
        }
        Ok(())
    }

    pub(crate) fn require_full(&self) -> Result<&FullKeys, FheError> {
        match &self.mode {
            Mode::Full(keys) => Ok(keys),
            Mode::EncryptOnly => Err(FheError::EncryptOnly),
        }
    }

    /// Encrypt `value` into slot 0 of a fresh SIMD-encoded ciphertext.
    pub(crate) fn encrypt_slot0(&self, value: u64) -> Result<Ciphertext, FheError> {
        self.check_value(value)?;
        let slots = vec![value];
        let pt = Plaintext::try_encode(&slots, Encoding::simd(), &self.params)?;
        Ok(self.public_key.try_encrypt(&pt, &mut rng())?)
    }

    pub(crate) fn decrypt_slot0(&self, ct: &Ciphertext) -> Result<u64, FheError> {
        let keys = self.require_full()?;
        let pt = keys.secret_key.try_decrypt(ct)?;
        let values = Vec::<u64>::try_decode(&pt, Encoding::simd())?;
        Ok(values.first().copied().unwrap_or(0))
    }

    pub(crate) fn load_ciphertext(&self, bytes: &[u8]) -> Result<Ciphertext, FheError> {
        let raw = envelope::unpack(bytes)?;
        Ciphertext::from_bytes(&raw, &self.params).map_err(|_| FheError::CorruptCiphertext)
    }

    pub(crate) fn relinearize(&self, ct: &mut Ciphertext) -> Result<(), FheError> {
        let keys = self.require_full()?;
        keys.relin_key.relinearizes(ct)?;
        Ok(())
    }

    /// Fail rather than decrypt once the noise has plausibly overrun the
    /// invariant bound q/(2t). `measure_noise` reports the bit size of the
    /// noise term; the comparison against the modulus chain is an
    /// approximation, erring on the side of reporting exhaustion.
    pub(crate) fn check_noise(&self, ct: &Ciphertext) -> Result<(), FheError> {
        let keys = self.require_full()?;
        let noise_bits = unsafe { keys.secret_key.measure_noise(ct)? };
        let q_bits: usize = self
            .params
            .moduli()
            .iter()
            .map(|m| 64 - m.leading_zeros() as usize)
            .sum();
        let t_bits = 64 - self.params.plaintext().leading_zeros() as usize;
        if noise_bits + t_bits + 1 >= q_bits {
            return Err(FheError::NoiseBudgetExhausted);
        }
        Ok(())
    }
}

/// Deterministically resample the secret key from its seed.
fn secret_key_from_seed(params: &Arc<BfvParameters>, seed: &[u8; SECRET_SEED_LENGTH]) -> SecretKey {
    let mut rng = StdRng::from_seed(*seed);
    SecretKey::random(params, &mut rng)
}
