use std::collections::BTreeMap;

use rand::prelude::*;
use rand::rngs::StdRng;

use crate::sparse::{P_PRIME, SparseRegisters, entry_index, entry_value, pack_entry, project_entry};
use crate::{Registers, Settings};

fn sparse_test_settings() -> Settings {
    Settings::new(11, 64, true, true).unwrap()
}

/// Builds a hash whose low index_bits select `register` and whose
/// remaining bits carry a rank run of exactly `value`.
pub(crate) fn construct_hash(index_bits: u32, register: u32, value: u32) -> u64 {
    let substream_value: u64 = 1 << (value - 1);
    (substream_value << index_bits) | register as u64
}

fn compacted_pairs(registers: &mut SparseRegisters) -> Vec<(u32, u8)> {
    registers.compact();
    registers
        .entries()
        .iter()
        .map(|&packed| (entry_index(packed), entry_value(packed)))
        .collect()
}

#[test]
fn test_packing() {
    let packed = pack_entry(0x1FF_FFFF, 63);
    assert_eq!(entry_index(packed), 0x1FF_FFFF);
    assert_eq!(entry_value(packed), 63);
    assert_eq!(packed >> (P_PRIME + 6), 0);

    let packed = pack_entry(12345, 40);
    assert_eq!(entry_index(packed), 12345);
    assert_eq!(entry_value(packed), 40);
}

#[test]
fn test_add_sparse() {
    // Inserting an element with register value 1 (minimum set value)
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        registers.add_hash(construct_hash(P_PRIME, 7, 1));

        assert_eq!(compacted_pairs(&mut registers), vec![(7, 1)]);
    }

    // Inserting an element whose substream is all zeros (maximum rank)
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        registers.add_hash(7);

        assert_eq!(compacted_pairs(&mut registers), vec![(7, (64 - P_PRIME + 1) as u8)]);
    }

    // Inserting duplicate elements, observe no change
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        let hash = construct_hash(P_PRIME, 7, 3);
        registers.add_hash(hash);
        registers.add_hash(hash);

        assert_eq!(compacted_pairs(&mut registers), vec![(7, 3)]);
    }

    // Inserting elements that increase a register's value
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        registers.add_hash(construct_hash(P_PRIME, 7, 3));
        registers.add_hash(construct_hash(P_PRIME, 7, 9));

        assert_eq!(compacted_pairs(&mut registers), vec![(7, 9)]);
    }

    // Inserting elements with lower register values, observe no change
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        registers.add_hash(construct_hash(P_PRIME, 7, 9));
        registers.compact();
        assert!(!registers.set_if_greater(7, 3));

        assert_eq!(compacted_pairs(&mut registers), vec![(7, 9)]);
    }

    // Staged duplicates collapse to the maximum at compaction
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        registers.set_if_greater(7, 3);
        registers.set_if_greater(7, 9);
        registers.set_if_greater(7, 5);

        assert_eq!(compacted_pairs(&mut registers), vec![(7, 9)]);
    }

    // Zero values and out-of-range indexes are rejected
    {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        assert!(!registers.set_if_greater(1 << P_PRIME, 1));
        assert!(!registers.set_if_greater(3, 0));
        assert_eq!(registers.staged_len(), 0);
    }
}

#[test]
fn test_compaction_sorted() {
    let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
    for register in [900, 3, 512, 44, 3, 900_000, 12] {
        registers.set_if_greater(register, 5);
    }
    registers.compact();

    let indices: Vec<u32> = registers.entries().iter().map(|&e| entry_index(e)).collect();
    assert_eq!(indices, vec![3, 12, 44, 512, 900, 900_000]);
    assert_eq!(registers.len(), 6);
    assert_eq!(registers.staged_len(), 6);
}

#[test]
fn test_auto_compaction_at_limit() {
    // temp limit is m/4 = 512 for log2m = 11
    let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
    for register in 0..512u32 {
        registers.set_if_greater(register, 1);
    }

    // the staging buffer drained without an explicit compact call
    assert_eq!(registers.len(), 512);
    assert_eq!(registers.staged_len(), 512);
}

#[test]
fn test_union_sparse() {
    // Two disjoint multisets should union properly
    {
        let mut registers_a = SparseRegisters::with_settings(&sparse_test_settings());
        registers_a.set_if_greater(1, 1);
        let mut registers_b = SparseRegisters::with_settings(&sparse_test_settings());
        registers_b.set_if_greater(2, 1);

        registers_a.union_sparse(&registers_b);

        assert_eq!(compacted_pairs(&mut registers_a), vec![(1, 1), (2, 1)]);
    }

    // Two exactly overlapping multisets should union properly
    {
        let mut registers_a = SparseRegisters::with_settings(&sparse_test_settings());
        registers_a.set_if_greater(1, 10);
        let mut registers_b = SparseRegisters::with_settings(&sparse_test_settings());
        registers_b.set_if_greater(1, 13);

        registers_a.union_sparse(&registers_b);

        assert_eq!(compacted_pairs(&mut registers_a), vec![(1, 13)]);
    }

    // Overlapping multisets should union properly, keeping the maximum
    // per register
    {
        let mut registers_a = SparseRegisters::with_settings(&sparse_test_settings());
        let mut registers_b = SparseRegisters::with_settings(&sparse_test_settings());

        registers_a.set_if_greater(3, 11);

        registers_a.set_if_greater(4, 13);
        registers_b.set_if_greater(4, 21);

        registers_b.set_if_greater(5, 14);

        registers_a.union_sparse(&registers_b);

        assert_eq!(
            compacted_pairs(&mut registers_a),
            vec![(3, 11), (4, 21), (5, 14)]
        );
    }

    // An uncompacted peer contributes its staged entries too
    {
        let mut registers_a = SparseRegisters::with_settings(&sparse_test_settings());
        let mut registers_b = SparseRegisters::with_settings(&sparse_test_settings());
        registers_b.set_if_greater(8, 2);
        registers_b.set_if_greater(8, 6);

        registers_a.union_sparse(&registers_b);

        assert_eq!(compacted_pairs(&mut registers_a), vec![(8, 6)]);
    }
}

#[test]
fn test_is_full() {
    // promotion threshold is (2048*6/8)/5 = 307 for log2m = 11
    let settings = sparse_test_settings();
    assert_eq!(settings.promotion_threshold, 307);

    let mut registers = SparseRegisters::with_settings(&settings);
    for register in 0..307u32 {
        registers.set_if_greater(register, 1);
        assert!(!registers.is_full());
    }

    registers.set_if_greater(307, 1);
    assert!(registers.is_full());
}

#[test]
fn test_projection() {
    let log2m = sparse_test_settings().log2m;

    // Nonzero discarded run bits: the projected value is the run length
    // through them
    {
        let sparse_index = (0b100u32 << log2m) | 7;
        let (reg_num, value) = project_entry(log2m, pack_entry(sparse_index, 40));
        assert_eq!((reg_num, value), (7, 3));
    }

    // All-ones run bits: run length 1
    {
        let run_mask = (1u32 << (P_PRIME - log2m)) - 1;
        let sparse_index = (run_mask << log2m) | 1029;
        let (reg_num, value) = project_entry(log2m, pack_entry(sparse_index, 12));
        assert_eq!((reg_num, value), (1029, 1));
    }

    // Zero run bits: the sparse value continues through the discarded bits
    {
        let (reg_num, value) = project_entry(log2m, pack_entry(7, 25));
        assert_eq!((reg_num, value), (7, 25 + (P_PRIME - log2m) as u8));
    }
}

#[test]
fn test_projection_matches_dense_routing() {
    // Routing a hash through the sparse register and projecting must land
    // on the same (register, rank) as routing it through a dense register
    // directly.
    let settings = sparse_test_settings();
    let log2m = settings.log2m;

    let seed = 7;
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..1_000 {
        let hash: u64 = rng.random();

        let mut sparse = SparseRegisters::with_settings(&settings);
        sparse.add_hash(hash);
        sparse.compact();
        let projected = project_entry(log2m, sparse.entries()[0]);

        let reg_num = (hash & ((1u64 << log2m) - 1)) as u32;
        let substream = hash >> log2m;
        let rank = match substream {
            0 => (64 - log2m + 1) as u8,
            _ => (substream.trailing_zeros() + 1) as u8,
        };

        assert_eq!(projected, (reg_num, rank), "hash: {hash:#x}");
    }
}

#[test]
fn test_random_values_sparse() {
    let seed = 1; // makes for reproducible tests
    let mut rng = StdRng::seed_from_u64(seed);

    for _ in 0..100 {
        let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
        let mut expected: BTreeMap<u32, u8> = BTreeMap::new();

        // Stage random values against both the registers and the oracle
        for _ in 0..100 {
            let register = rng.random_range(0..(1u32 << P_PRIME));
            let value: u8 = rng.random_range(1..=40);
            registers.set_if_greater(register, value);

            expected
                .entry(register)
                .and_modify(|e| *e = (*e).max(value))
                .or_insert(value);
        }

        let pairs = compacted_pairs(&mut registers);
        let oracle: Vec<(u32, u8)> = expected.into_iter().collect();
        assert_eq!(pairs, oracle);
    }
}

#[test]
fn test_clear() {
    let mut registers = SparseRegisters::with_settings(&sparse_test_settings());
    registers.set_if_greater(1, 1);
    registers.set_if_greater(2, 2);
    registers.compact();
    registers.set_if_greater(3, 3);

    registers.clear();
    assert_eq!(registers.staged_len(), 0);
    assert_eq!(registers.len(), 0);
}
