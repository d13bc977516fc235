use dense::DenseRegisters;
use sparse::{P_PRIME, SparseRegisters, entry_index, entry_value, project_entry};
use thiserror::Error;

mod dense;
mod settings;
mod sparse;
#[cfg(test)]
mod sparse_test;

pub use settings::{Settings, SettingsError};

/// `Registers` is the interface shared by the two register encodings.
trait Registers {
    /// Number of hash bits consumed by register addressing: log2m for the
    /// dense encoding, P_PRIME for the sparse one.
    fn index_bits(&self) -> u32;

    /// set_if_greater raises the register reg_num to value if and only if
    /// value is greater than the current one, and reports whether the
    /// register changed.
    fn set_if_greater(&mut self, reg_num: u32, value: u8) -> bool;

    /// add_hash routes a 64-bit hash to a register.  The low index_bits
    /// select the register and the rank is one more than the number of
    /// trailing zeros of the remaining bits.  A zero remainder counts as a
    /// full run of 64 - index_bits zeros.
    fn add_hash(&mut self, hash: u64) -> bool {
        let bits = self.index_bits();
        let reg_num = (hash & ((1u64 << bits) - 1)) as u32;

        let substream = hash >> bits;
        let rank = match substream {
            0 => (64 - bits + 1) as u8,
            _ => (substream.trailing_zeros() + 1) as u8,
        };

        self.set_if_greater(reg_num, rank)
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum EstimatorError {
    #[error("{0}")]
    Settings(#[from] SettingsError),
    #[error("register count mismatch: expected {expected}, got {got}")]
    RegisterSize { expected: usize, got: usize },
}

/// The live register encoding of an [`Estimator`].  An estimator starts
/// sparse by default and promotes itself to dense exactly once.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Encoding {
    Sparse,
    Dense,
}

#[derive(Clone, Debug, PartialEq)]
enum Repr {
    Sparse(SparseRegisters),
    Dense(DenseRegisters),
}

/// A HyperLogLog cardinality estimator over 64-bit hash values.
///
/// Hashing is external: callers submit hashes through [`add_raw`] and the
/// estimator approximates the number of distinct values seen, within a
/// relative standard error of about `1.04 / sqrt(2^log2m)`.  Low
/// cardinalities are held in a sparse register list at higher addressing
/// precision; past a size threshold the estimator switches to a dense
/// register array for good.
///
/// [`add_raw`]: Estimator::add_raw
#[derive(Clone, Debug, PartialEq)]
pub struct Estimator {
    settings: Settings,
    registers: Repr,
    cached: Option<u64>,
}

impl Estimator {
    pub fn new(settings: Settings) -> Self {
        let registers = match settings.sparse {
            true => Repr::Sparse(SparseRegisters::with_settings(&settings)),
            false => Repr::Dense(DenseRegisters::with_settings(&settings)),
        };

        Self {
            settings,
            registers,
            cached: None,
        }
    }

    /// add_raw submits one 64-bit hash value.
    pub fn add_raw(&mut self, hash: u64) {
        let changed = match &mut self.registers {
            Repr::Sparse(sparse_registers) => {
                let changed = sparse_registers.add_hash(hash);

                if sparse_registers.is_full() {
                    self.registers = Repr::Dense(sparse_registers.to_dense());
                    self.cached = None;
                }

                changed
            }
            Repr::Dense(dense_registers) => dense_registers.add_hash(hash),
        };

        if changed {
            self.cached = None;
        }
    }

    /// count estimates the number of distinct hashes submitted so far.
    /// The result is cached until the next register mutation.
    pub fn count(&mut self) -> u64 {
        if let Some(cached) = self.cached {
            return cached;
        }

        let count = match &mut self.registers {
            Repr::Sparse(sparse_registers) => {
                sparse_registers.compact();

                // at sparse precision the registers are nearly all empty,
                // so linear counting is the whole estimate
                let m_prime = 1u64 << P_PRIME;
                linear_count(m_prime, m_prime - sparse_registers.len() as u64)
            }
            Repr::Dense(dense_registers) => {
                Self::dense_count(&self.settings, dense_registers)
            }
        };

        self.cached = Some(count);
        count
    }

    fn dense_count(settings: &Settings, registers: &DenseRegisters) -> u64 {
        // nothing recorded yet
        if registers.max_value() == 0 {
            return 0;
        }

        let m = 1u64 << settings.log2m;
        let num_zeros = registers.num_zeros() as u64;

        // the "raw" alpha-corrected harmonic-mean estimate
        let mut estimate = (settings.alpha_msquared / registers.sum_inverse_pow2()) as u64;

        // small range correction: only while empty registers remain and
        // the raw estimate is below (5/2) * m
        if estimate as f64 <= 2.5 * m as f64 && num_zeros > 0 {
            estimate = linear_count(m, num_zeros);
        }

        // large range correction for hash domains narrower than 64 bits,
        // where register saturation flattens the raw estimate.  The
        // companion pow/30 cutoff collapses to zero under integer
        // division, leaving the 0.033333 gate as the effective one.
        let hash_bits = settings.hash_bits.min(64);
        if hash_bits < 64 {
            let pow = 2f64.powi(hash_bits as i32);
            if estimate as f64 > 0.033333 * pow {
                estimate = (-pow * (1.0 - estimate as f64 / pow).ln()).round() as u64;
            }
        }

        estimate
    }

    /// merge folds another estimator's registers into this one.  Both
    /// must share log2m and hash_bits.  Merging with a dense peer, or
    /// growing past the promotion threshold, promotes this estimator.
    pub fn merge(&mut self, other: &Self) -> Result<(), EstimatorError> {
        self.settings.settings_check(&other.settings)?;

        match (&mut self.registers, &other.registers) {
            (Repr::Sparse(lhs), Repr::Sparse(rhs)) => {
                lhs.union_sparse(rhs);

                if lhs.is_full() {
                    self.registers = Repr::Dense(lhs.to_dense());
                }
            }
            (Repr::Sparse(lhs), Repr::Dense(rhs)) => {
                let mut dense_registers = lhs.to_dense();
                dense_registers.union_dense(rhs)?;

                self.registers = Repr::Dense(dense_registers);
            }
            (Repr::Dense(lhs), Repr::Sparse(rhs)) => {
                lhs.union_sparse(rhs);
            }
            (Repr::Dense(lhs), Repr::Dense(rhs)) => {
                lhs.union_dense(rhs)?;
            }
        }

        self.cached = None;
        Ok(())
    }

    pub fn encoding(&self) -> Encoding {
        match &self.registers {
            Repr::Sparse(_) => Encoding::Sparse,
            Repr::Dense(_) => Encoding::Dense,
        }
    }

    pub fn log2m(&self) -> u32 {
        self.settings.log2m
    }

    pub fn hash_bits(&self) -> u32 {
        self.settings.hash_bits
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// standard_error reports the expected relative standard error of the
    /// dense estimate.
    pub fn standard_error(&self) -> f64 {
        self.settings.standard_error()
    }

    /// dense_register_bytes exposes the dense register array, one byte per
    /// register in index order, when the estimator is dense.
    pub fn dense_register_bytes(&self) -> Option<&[u8]> {
        match &self.registers {
            Repr::Sparse(_) => None,
            Repr::Dense(dense_registers) => Some(dense_registers.bytes()),
        }
    }

    /// sparse_packed_entries exposes the compacted sparse entries, sorted
    /// ascending by index, when the estimator is sparse.  Each entry packs
    /// the register value into its low 6 bits and the 25-bit index above.
    pub fn sparse_packed_entries(&mut self) -> Option<&[u32]> {
        match &mut self.registers {
            Repr::Sparse(sparse_registers) => {
                sparse_registers.compact();
                Some(sparse_registers.entries())
            }
            Repr::Dense(_) => None,
        }
    }

    /// set_dense_registers bulk-loads a dense register image, one byte per
    /// register.  Each slot goes through the usual only-raise guard, so
    /// loading on top of existing registers takes the per-slot maximum.  A
    /// sparse estimator is promoted first.
    pub fn set_dense_registers(&mut self, bytes: &[u8]) -> Result<(), EstimatorError> {
        if let Repr::Sparse(sparse_registers) = &mut self.registers {
            self.registers = Repr::Dense(sparse_registers.to_dense());
        }

        if let Repr::Dense(dense_registers) = &mut self.registers {
            if dense_registers.load_bytes(bytes)? {
                self.cached = None;
            }
        }

        Ok(())
    }

    /// set_sparse_registers bulk-loads packed sparse entries.  A dense
    /// estimator projects each entry down instead of reverting encodings.
    pub fn set_sparse_registers(&mut self, packed: &[u32]) {
        let changed = match &mut self.registers {
            Repr::Sparse(sparse_registers) => {
                let mut changed = false;
                for &entry in packed {
                    changed |=
                        sparse_registers.set_if_greater(entry_index(entry), entry_value(entry));
                }

                if sparse_registers.is_full() {
                    self.registers = Repr::Dense(sparse_registers.to_dense());
                }

                changed
            }
            Repr::Dense(dense_registers) => {
                let mut changed = false;
                for &entry in packed {
                    let (reg_num, value) = project_entry(self.settings.log2m, entry);
                    changed |= dense_registers.set_if_greater(reg_num, value);
                }

                changed
            }
        };

        if changed {
            self.cached = None;
        }
    }

    /// set_count seeds the count cache, letting a deserializer restore a
    /// previously computed cardinality.  The next register mutation drops
    /// the seeded value and the following count recomputes.
    pub fn set_count(&mut self, count: u64) {
        self.cached = Some(count);
    }

    /// clear resets every register to empty.  The encoding and settings
    /// are unchanged; a dense estimator stays dense.
    pub fn clear(&mut self) {
        match &mut self.registers {
            Repr::Sparse(sparse_registers) => sparse_registers.clear(),
            Repr::Dense(dense_registers) => dense_registers.clear(),
        }
        self.cached = None;
    }
}

impl Default for Estimator {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}

impl Extend<u64> for Estimator {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for hash in iter {
            self.add_raw(hash);
        }
    }
}

/// linear_count estimates cardinality from the number of empty registers,
/// round(size * ln(size / zeros)).  Callers guarantee zeros > 0.
fn linear_count(size: u64, zeros: u64) -> u64 {
    let size = size as f64;
    (size * (size / zeros as f64).ln()).round() as u64
}
