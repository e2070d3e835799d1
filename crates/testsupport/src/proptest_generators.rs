//! Property-based test generators using proptest.
//!
//! Provides strategies for key words, segment packing flags and sequences of
//! index operations to replay against an ordered model.

use catalog::SegmentFlags;
use proptest::prelude::*;

/// One step of a random workload against a single index.
#[derive(Clone, Debug)]
pub enum IndexOp {
    /// Insert a record whose key column holds the word.
    Insert(String),
    /// Delete the n-th live key, modulo the number of live keys.
    Delete(usize),
}

/// Strategy for words drawn from a small alphabet, so prefixes repeat often.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_word;
///
/// proptest! {
///     #[test]
///     fn words_fit_their_column(word in arb_word(8)) {
///         assert!(!word.is_empty() && word.len() <= 8);
///     }
/// }
/// ```
pub fn arb_word(max_len: usize) -> impl Strategy<Value = String> {
    prop::collection::vec(prop::sample::select(vec!['a', 'b', 'c', 'd']), 1..=max_len)
        .prop_map(|chars| chars.into_iter().collect::<String>())
}

/// Strategy for the packing flags a text segment may carry.
pub fn arb_text_flags() -> impl Strategy<Value = SegmentFlags> {
    prop_oneof![
        Just(SegmentFlags::NONE),
        Just(SegmentFlags::SPACE_PACK),
        Just(SegmentFlags::PACK_KEY),
        Just(SegmentFlags::SPACE_PACK | SegmentFlags::PACK_KEY),
    ]
}

/// Strategy for a single operation, insert-heavy so trees grow.
pub fn arb_op(max_len: usize) -> impl Strategy<Value = IndexOp> {
    prop_oneof![
        3 => arb_word(max_len).prop_map(IndexOp::Insert),
        1 => any::<usize>().prop_map(IndexOp::Delete),
    ]
}

/// Strategy for operation sequences of up to `max_ops` steps.
///
/// # Example
///
/// ```
/// use proptest::prelude::*;
/// use testsupport::proptest_generators::arb_ops;
///
/// proptest! {
///     #[test]
///     fn sequences_are_bounded(ops in arb_ops(8, 50)) {
///         assert!(!ops.is_empty() && ops.len() < 50);
///     }
/// }
/// ```
pub fn arb_ops(max_len: usize, max_ops: usize) -> impl Strategy<Value = Vec<IndexOp>> {
    prop::collection::vec(arb_op(max_len), 1..max_ops)
}
