use crate::dense::DenseRegisters;
use crate::settings::Settings;
use crate::Registers;

/// Sparse addressing precision: sparse entries index by the low P_PRIME
/// bits of the hash, extending the dense index upward.
pub(crate) const P_PRIME: u32 = 25;

/// Width of the value field in a packed sparse entry.
pub(crate) const Q_PRIME: u32 = 6;

const VALUE_MASK: u32 = (1 << Q_PRIME) - 1;

/// A sparse entry packs an (index, value) pair into one integer: the value
/// in the low Q_PRIME bits, the index in the P_PRIME bits above it.
#[inline(always)]
pub(crate) fn pack_entry(index: u32, value: u8) -> u32 {
    (index << Q_PRIME) | value as u32
}

#[inline(always)]
pub(crate) fn entry_index(packed: u32) -> u32 {
    packed >> Q_PRIME
}

#[inline(always)]
pub(crate) fn entry_value(packed: u32) -> u8 {
    (packed & VALUE_MASK) as u8
}

/// project_entry translates a packed sparse entry down to dense precision.
/// The low log2m bits of the sparse index are the dense index; the bits
/// above them are the part of the rank run the dense encoding would have
/// inspected.  When that run is empty the sparse value continues it.
#[inline(always)]
pub(crate) fn project_entry(log2m: u32, packed: u32) -> (u32, u8) {
    let index = entry_index(packed);
    let reg_num = index & ((1 << log2m) - 1);
    let run = index >> log2m;

    let value = match run {
        0 => entry_value(packed) + (P_PRIME - log2m) as u8,
        _ => (run.trailing_zeros() + 1) as u8,
    };

    (reg_num, value)
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SparseRegisters {
    pub(crate) settings: Settings,
    temp: Vec<u32>,
    entries: Vec<u32>,
    temp_limit: usize,
}

impl SparseRegisters {
    pub fn with_settings(settings: &Settings) -> Self {
        Self {
            settings: *settings,
            temp: Vec::new(),
            entries: Vec::new(),
            temp_limit: (1usize << settings.log2m) / 4,
        }
    }

    /// len is the number of distinct indices held.  Exact only on
    /// compacted state; callers compact before estimating.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// staged_len is a cheap upper bound on len: staged duplicates have
    /// not been collapsed yet.
    pub fn staged_len(&self) -> usize {
        self.entries.len() + self.temp.len()
    }

    /// is_full reports whether the register has outgrown the sparse
    /// encoding.  The upper bound filters out the common case; a real
    /// compaction settles the rest.
    pub fn is_full(&mut self) -> bool {
        let threshold = self.settings.promotion_threshold;
        if self.staged_len() <= threshold {
            return false;
        }

        self.compact();
        self.entries.len() > threshold
    }

    /// compact merges the staged entries into the sorted list, keeping the
    /// maximum value per index.  Sorting packed entries orders an index's
    /// duplicates value-ascending, so the last of each run wins.
    pub fn compact(&mut self) {
        if self.temp.is_empty() {
            return;
        }
        self.temp.sort_unstable();

        let mut merged = Vec::with_capacity(self.entries.len() + self.temp.len());
        let mut i = 0;
        let mut j = 0;
        while i < self.entries.len() || j < self.temp.len() {
            while j + 1 < self.temp.len() && entry_index(self.temp[j]) == entry_index(self.temp[j + 1]) {
                j += 1;
            }

            let next = match (self.entries.get(i), self.temp.get(j)) {
                (Some(&a), Some(&b)) => {
                    if entry_index(a) < entry_index(b) {
                        i += 1;
                        a
                    } else if entry_index(b) < entry_index(a) {
                        j += 1;
                        b
                    } else {
                        // same index: the larger packed word carries the
                        // larger value
                        i += 1;
                        j += 1;
                        a.max(b)
                    }
                }
                (Some(&a), None) => {
                    i += 1;
                    a
                }
                (None, Some(&b)) => {
                    j += 1;
                    b
                }
                (None, None) => unreachable!(),
            };
            merged.push(next);
        }

        self.entries = merged;
        self.temp.clear();
    }

    /// entries exposes the compacted packed entries, sorted ascending by
    /// index.  Callers compact first.
    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    /// projected iterates every held pair, staged or compacted, translated
    /// down to dense precision.  Duplicate indices may appear; the dense
    /// register guard resolves them.
    pub fn projected(&self, log2m: u32) -> impl Iterator<Item = (u32, u8)> + '_ {
        self.entries
            .iter()
            .chain(self.temp.iter())
            .map(move |&packed| project_entry(log2m, packed))
    }

    pub fn union_sparse(&mut self, other: &Self) -> bool {
        let mut changed = false;
        for &packed in other.entries.iter().chain(other.temp.iter()) {
            changed |= self.set_if_greater(entry_index(packed), entry_value(packed));
        }

        changed
    }

    /// to_dense projects every entry down to dense precision.  The sparse
    /// register is compacted first so the result is canonical.
    pub fn to_dense(&mut self) -> DenseRegisters {
        self.compact();

        let mut registers = DenseRegisters::with_settings(&self.settings);
        registers.union_sparse(self);

        registers
    }

    pub fn clear(&mut self) {
        self.temp.clear();
        self.entries.clear();
    }
}

impl Registers for SparseRegisters {
    fn index_bits(&self) -> u32 {
        P_PRIME
    }

    fn set_if_greater(&mut self, reg_num: u32, value: u8) -> bool {
        // an absent entry is a zero register, so zero can never raise one
        if value == 0 || reg_num >= 1 << P_PRIME {
            return false;
        }

        let value = value.min(VALUE_MASK as u8);
        if let Ok(pos) = self
            .entries
            .binary_search_by_key(&reg_num, |&packed| entry_index(packed))
        {
            if entry_value(self.entries[pos]) >= value {
                return false;
            }
        }

        // staged; a later compaction settles duplicates
        self.temp.push(pack_entry(reg_num, value));
        if self.temp.len() >= self.temp_limit {
            self.compact();
        }

        true
    }
}
