use thiserror::Error;

use crate::sparse::Q_PRIME;

// minimum and maximum values for the log-base-2 of the number of registers
// in the estimator
const MINIMUM_LOG2M_PARAM: u32 = 4;
const MAXIMUM_LOG2M_PARAM: u32 = 16;

// widest hash the estimator accounts for; wider requests are capped here
const MAXIMUM_HASH_BITS: u32 = 128;

const DEFAULT_LOG2M: u32 = 14;
const DEFAULT_HASH_BITS: u32 = 64;

/// Settings configure the estimator: register addressing width, effective
/// hash width, the initial register encoding, and the derived constants
/// used by the cardinality formulas.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Settings {
    /// log2m determines the number of registers.  The minimum value is 4
    /// and the maximum value is 16.  The register count is 2^log2m.
    pub(crate) log2m: u32,

    /// hash_bits is the effective width of the submitted hash values,
    /// expected to be one of 16, 32, 64 or 128.  Values above 128 are
    /// capped; widths of 64 and above count identically, since the
    /// saturation correction only applies to hashes narrower than 64 bits.
    pub(crate) hash_bits: u32,

    /// sparse selects the initial register encoding.  A sparse estimator
    /// promotes itself to dense once it crosses promotion_threshold.
    pub(crate) sparse: bool,

    /// bit_pack records whether a serializer is expected to pack registers
    /// into 6 bits.  It changes the promotion threshold and the semantic
    /// register ceiling, not the in-memory layout.
    pub(crate) bit_pack: bool,

    /// alpha * m^2 (the constant in the "'raw' HyperLogLog estimator")
    pub(crate) alpha_msquared: f64,

    /// number of distinct sparse entries past which the estimator switches
    /// to the dense encoding
    pub(crate) promotion_threshold: usize,

    /// largest value a register may hold: 63 when registers are meant to
    /// pack into 6 bits, 255 otherwise
    pub(crate) register_ceiling: u8,
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("log2m must be between {MINIMUM_LOG2M_PARAM}, {MAXIMUM_LOG2M_PARAM}")]
    Log2m,
    #[error("config mismatch. log2m and hash_bits must match when merging estimators")]
    MisMatch,
}

impl Settings {
    pub fn new(
        log2m: u32,
        hash_bits: u32,
        sparse: bool,
        bit_pack: bool,
    ) -> Result<Self, SettingsError> {
        if !(MINIMUM_LOG2M_PARAM..=MAXIMUM_LOG2M_PARAM).contains(&log2m) {
            return Err(SettingsError::Log2m);
        }

        Ok(Self::with_params(log2m, hash_bits, sparse, bit_pack))
    }

    fn with_params(log2m: u32, hash_bits: u32, sparse: bool, bit_pack: bool) -> Self {
        let hash_bits = hash_bits.min(MAXIMUM_HASH_BITS);

        Self {
            log2m,
            hash_bits,
            sparse,
            bit_pack,
            alpha_msquared: Settings::alpha_m_squared(log2m, hash_bits),
            promotion_threshold: Settings::promotion_threshold(log2m, bit_pack),
            register_ceiling: match bit_pack {
                true => (1 << Q_PRIME) - 1,
                false => u8::MAX,
            },
        }
    }

    pub fn settings_check(&self, other: &Self) -> Result<(), SettingsError> {
        if self.log2m == other.log2m && self.hash_bits == other.hash_bits {
            return Ok(());
        }

        Err(SettingsError::MisMatch)
    }

    pub fn log2m(&self) -> u32 {
        self.log2m
    }

    pub fn hash_bits(&self) -> u32 {
        self.hash_bits
    }

    /// alpha_m_squared calculates the 'alpha-m-squared' constant (gamma
    /// times registerCount squared where gamma is based on the effective
    /// hash width) used by the HyperLogLog algorithm.
    pub(crate) fn alpha_m_squared(log2m: u32, hash_bits: u32) -> f64 {
        let m: f64 = (1u32 << log2m).into();

        let alpha = match hash_bits {
            ..=16 => 0.673,
            ..=32 => 0.697,
            ..=64 => 0.709,
            _ => 0.7213 / (1.0 + 1.079 / m),
        };

        alpha * m * m
    }

    // promotion_threshold determines the cutoff for switching between the
    // sparse and dense register encodings.  With packed registers the dense
    // image costs m*6/8 bytes and a sparse entry is roughly five times a
    // packed register; unpacked, a third of the register count.
    pub(crate) fn promotion_threshold(log2m: u32, bit_pack: bool) -> usize {
        let m = 1usize << log2m;

        match bit_pack {
            true => (m * Q_PRIME as usize / 8) / 5,
            false => m / 3,
        }
    }

    /// standard_error reports the expected relative standard error of the
    /// dense estimate, 1.04 / sqrt(m).
    pub fn standard_error(&self) -> f64 {
        1.04 / ((1u64 << self.log2m) as f64).sqrt()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::with_params(DEFAULT_LOG2M, DEFAULT_HASH_BITS, true, true)
    }
}
