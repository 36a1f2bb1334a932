//! Bitwise encryption and homomorphic comparison for range queries.
//!
//! A value is split into its bits (LSB first), each bit encrypted
//! independently. Comparison against a public query value walks the bits
//! from the MSB down, maintaining running equal-so-far and less-so-far
//! ciphertexts; only the final Boolean ciphertext is ever decrypted.

use fhe::bfv::Ciphertext;
use fhe_traits::Serialize as FheSerialize;
use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::engine::{CompareOp, FheEngine};
use crate::error::FheError;

/// Direction of a strict bitwise comparison.
#[derive(Clone, Copy, PartialEq)]
enum Direction {
    Less,
    Greater,
}

impl FheEngine {
    /// Encrypt `value` for range querying: one ciphertext per bit, LSB
    /// first, `bits` wide. `value` must fit in `bits`.
    pub fn encrypt_for_range_query(
        &self,
        value: u64,
        bits: usize,
    ) -> Result<Vec<Vec<u8>>, FheError> {
        check_width(bits)?;
        check_fits(value, bits)?;
        (0..bits)
            .map(|position| {
                let bit_ct = self.encrypt_slot0((value >> position) & 1)?;
                crate::envelope::pack(&bit_ct.to_bytes())
            })
            .collect()
    }

    /// Decide x < `query` for the value x behind `encrypted_bits`.
    /// Requires full mode.
    pub fn compare_less_than<T: AsRef<[u8]>>(
        &self,
        encrypted_bits: &[T],
        query: u64,
    ) -> Result<bool, FheError> {
        self.compare_bits(encrypted_bits, query, Direction::Less)
    }

    /// Decide x > `query` for the value x behind `encrypted_bits`.
    /// Requires full mode.
    pub fn compare_greater_than<T: AsRef<[u8]>>(
        &self,
        encrypted_bits: &[T],
        query: u64,
    ) -> Result<bool, FheError> {
        self.compare_bits(encrypted_bits, query, Direction::Greater)
    }

    /// Decide lo ≤ x ≤ hi with either bound optional; both bounds absent
    /// is vacuously true. Requires full mode.
    pub fn compare_range<T: AsRef<[u8]>>(
        &self,
        encrypted_bits: &[T],
        min_value: Option<u64>,
        max_value: Option<u64>,
    ) -> Result<bool, FheError> {
        if let Some(lo) = min_value {
            if self.compare_less_than(encrypted_bits, lo)? {
                return Ok(false);
            }
        }
        if let Some(hi) = max_value {
            if self.compare_greater_than(encrypted_bits, hi)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare_bits<T: AsRef<[u8]>>(
        &self,
        encrypted_bits: &[T],
        query: u64,
        direction: Direction,
    ) -> Result<bool, FheError> {
        self.require_full()?;
        let width = encrypted_bits.len();
        check_width(width)?;
        check_fits(query, width)?;

        let memo_op = match direction {
            Direction::Less => CompareOp::LessThan(query),
            Direction::Greater => CompareOp::GreaterThan(query),
        };
        let memo_key = (hash_bits(encrypted_bits), memo_op);
        if let Some(hit) = self.compare_memo.get(&memo_key) {
            return Ok(hit);
        }

        let bits: Vec<Ciphertext> = encrypted_bits
            .iter()
            .map(|b| self.load_ciphertext(b.as_ref()))
            .collect::<Result<_, _>>()?;

        let one = self.encrypt_slot0(1)?;
        // The strict result accumulator and the equal-prefix product. At
        // most one bit position can ever contribute, so the accumulator
        // decrypts to 0 or 1.
        let mut result = self.encrypt_slot0(0)?;
        let mut eq_so_far = one.clone();

        for position in (0..width).rev() {
            let bit_ct = &bits[position];
            let query_bit = (query >> position) & 1;

            let fires = match direction {
                // x_i = 0 while q_i = 1 decides x < q at this position.
                Direction::Less => query_bit == 1,
                // x_i = 1 while q_i = 0 decides x > q at this position.
                Direction::Greater => query_bit == 0,
            };
            if fires {
                let decided = match direction {
                    Direction::Less => &one - bit_ct,
                    Direction::Greater => bit_ct.clone(),
                };
                let mut contribution = &eq_so_far * &decided;
                self.relinearize(&mut contribution)?;
                result = &result + &contribution;
            }

            if position == 0 {
                // The equal-prefix product is not consumed after the LSB.
                break;
            }
            let bit_eq = if query_bit == 1 {
                bit_ct.clone()
            } else {
                &one - bit_ct
            };
            let mut eq = &eq_so_far * &bit_eq;
            self.relinearize(&mut eq)?;
            eq_so_far = eq;
        }

        self.check_noise(&result)?;
        let matched = self.decrypt_slot0(&result)? != 0;
        debug!(width, query, matched, "bitwise comparison evaluated");
        self.compare_memo.put(memo_key, matched);
        Ok(matched)
    }
}

fn check_width(bits: usize) -> Result<(), FheError> {
    if bits == 0 || bits > 64 {
        return Err(FheError::InvalidBitWidth(bits));
    }
    Ok(())
}

fn check_fits(value: u64, bits: usize) -> Result<(), FheError> {
    if bits < 64 && value >> bits != 0 {
        return Err(FheError::ValueOutOfRange {
            value,
            max: (1u64 << bits) - 1,
        });
    }
    Ok(())
}

fn hash_bits<T: AsRef<[u8]>>(encrypted_bits: &[T]) -> u64 {
    let mut hasher = Xxh64::new(0);
    for bit in encrypted_bits {
        hasher.update(bit.as_ref());
    }
    hasher.digest()
}
