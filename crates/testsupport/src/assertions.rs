//! Assertion helpers that check whole indexes.

use btree::{KeyFile, TreeStats};
use common::{IndexError, IndexResult, RecordPointer};

use crate::fixtures::{collect_backward, collect_keys};

/// Assert that a forward walk of `index` yields exactly `expected`.
///
/// Also checks that walking backwards yields the same records reversed.
///
/// # Example
///
/// ```no_run
/// use testsupport::prelude::*;
///
/// let mut fixture = TestKeyFile::new(vec![numeric_key("n", true, &Config::default())]);
/// fixture.file.insert(0, &numeric_record(3, 6), RecordPointer(3)).unwrap();
/// assert_walk(&mut fixture.file, 0, &[RecordPointer(3)]);
/// ```
pub fn assert_walk(file: &mut KeyFile, index: usize, expected: &[RecordPointer]) {
    let forward: Vec<RecordPointer> = collect_keys(file, index)
        .expect("forward walk failed")
        .into_iter()
        .map(|(_, record)| record)
        .collect();
    assert_eq!(
        forward, expected,
        "Forward walk mismatch on index {index}"
    );

    let mut backward = collect_backward(file, index).expect("backward walk failed");
    backward.reverse();
    assert_eq!(
        backward, expected,
        "Backward walk disagrees with forward walk on index {index}"
    );
}

/// Verify `index` and check its key count against `keys`.
pub fn assert_verified(file: &mut KeyFile, index: usize, keys: u64) -> TreeStats {
    let stats = file
        .verify(index)
        .unwrap_or_else(|err| panic!("index {index} failed verification: {err}"));
    assert_eq!(stats.keys, keys, "Key count mismatch on index {index}");
    assert_eq!(file.key_count(index).expect("key count"), keys);
    stats
}

/// Verify `index` and check that every page below the root is about half full.
///
/// A split or redistribution may leave a page short of half its block by up
/// to two of the longest slots.
pub fn assert_balanced(file: &mut KeyFile, index: usize, keys: u64) -> TreeStats {
    let stats = assert_verified(file, index, keys);
    assert!(stats.max_fill <= 1.0, "Page of index {index} overflows its block");
    if stats.pages() > 1 {
        let def = file.definition(index).expect("index definition");
        let slack = 2.0 * def.max_slot_length(true) as f64 / def.block_length as f64;
        assert!(
            stats.min_fill >= 0.5 - slack,
            "Page of index {index} filled to {:.3}, below half by more than {slack:.3}",
            stats.min_fill
        );
    }
    stats
}

/// Assert that `result` is a duplicate-key error for `index` naming `existing`.
pub fn assert_duplicate<T: std::fmt::Debug>(
    result: IndexResult<T>,
    index: usize,
    existing: RecordPointer,
) {
    match result {
        Err(IndexError::DuplicateKey {
            index: got_index,
            existing: got_existing,
        }) => {
            assert_eq!(
                (got_index, got_existing),
                (index, existing),
                "Duplicate key reported for the wrong index or record"
            );
        }
        other => panic!("Expected duplicate key in index {index}, but got {other:?}"),
    }
}

/// Assert that `result` reports structural damage.
pub fn assert_crashed<T: std::fmt::Debug>(result: IndexResult<T>) {
    match result {
        Err(err) if err.is_crashed() => {}
        other => panic!("Expected a crashed index, but got {other:?}"),
    }
}
