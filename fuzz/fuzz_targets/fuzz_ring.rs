#![no_main]
use std::collections::HashSet;

use libfuzzer_sys::arbitrary;
use libfuzzer_sys::arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

const CHECK_EVERY: usize = 8;

#[derive(Debug, Arbitrary)]
enum Op {
    Add(u16),
    Insert(u16),
    Reset,
    MergeOther,
    RoundTrip,
}

#[derive(Debug, Arbitrary)]
struct Input {
    size: u16,
    hash_rounds: u8,
    other: Vec<u16>,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let Input {
        size,
        hash_rounds,
        other,
        ops,
    } = input;
    let Ok(mut ring) = bloomring::Ring::with_size(size as u64, hash_rounds.clamp(1, 32) as u64)
    else {
        return;
    };
    let side = bloomring::Ring::with_params(ring.params());
    for &item in &other {
        side.add(&item.to_le_bytes());
    }
    // The "Model", every item that must test positive
    let mut added = HashSet::new();
    let mut inserted = HashSet::new();
    for (i, op) in ops.iter().enumerate() {
        match *op {
            Op::Add(item) => {
                ring.add(&item.to_le_bytes());
                added.insert(item);
            }
            Op::Insert(item) => {
                ring.insert(&item);
                inserted.insert(item);
            }
            Op::Reset => {
                ring.reset();
                assert!(ring.is_empty());
                added.clear();
                inserted.clear();
            }
            Op::MergeOther => {
                ring.merge(&side).unwrap();
                added.extend(other.iter().copied());
            }
            Op::RoundTrip => {
                ring = bloomring::Ring::from_bytes(&ring.to_bytes()).unwrap();
            }
        }

        if i % CHECK_EVERY == 0 {
            for item in &added {
                assert!(ring.test(&item.to_le_bytes()), "{item}");
            }
            for item in &inserted {
                assert!(ring.contains(item), "{item}");
            }
        }
    }
    for item in &added {
        assert!(ring.test(&item.to_le_bytes()), "{item}");
    }
    for item in &inserted {
        assert!(ring.contains(item), "{item}");
    }
});
