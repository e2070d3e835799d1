//! Ordering of raw keys.

use std::cmp::Ordering;
use std::ops::BitOr;

use catalog::{KeyDefinition, KeySegment};
use types::KeyType;

use crate::keycodec::segment_value;

/// How a comparison treats keys whose segments are all equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchFlag(u8);

impl SearchFlag {
    /// Equal segments are a match; record pointers are ignored.
    pub const FIND: SearchFlag = SearchFlag(1);
    /// Cancels `FIND`, so the tie-break flags apply to a full match too.
    pub const NO_FIND: SearchFlag = SearchFlag(2);
    /// Break ties on the trailing record pointer.
    pub const SAME: SearchFlag = SearchFlag(4);
    /// A tie makes the search key greater.
    pub const BIGGER: SearchFlag = SearchFlag(8);
    /// A tie makes the search key smaller.
    pub const SMALLER: SearchFlag = SearchFlag(16);

    pub fn contains(self, other: SearchFlag) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SearchFlag {
    type Output = SearchFlag;

    fn bitor(self, rhs: SearchFlag) -> SearchFlag {
        SearchFlag(self.0 | rhs.0)
    }
}

/// How much of the search key takes part in a comparison.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyLength {
    /// Every segment present in the search key.
    Whole,
    /// Only the first `n` raw bytes of the search key.
    Prefix(usize),
}

/// Compare search key `a` against page key `b`.
///
/// Segments are compared in order until one differs or the length budget
/// runs out. A search key may stop at a segment boundary or, within the
/// budget, inside a segment. When everything compared is equal, `flag`
/// decides the result.
pub fn compare_keys(
    def: &KeyDefinition,
    a: &[u8],
    b: &[u8],
    length: KeyLength,
    flag: SearchFlag,
) -> Ordering {
    let mut budget = match length {
        KeyLength::Whole => usize::MAX,
        KeyLength::Prefix(n) => n,
    };
    let (mut pa, mut pb) = (0, 0);
    let mut whole = true;

    for seg in &def.segments {
        let remaining = budget.min(a.len().saturating_sub(pa));
        if remaining == 0 {
            whole = false;
            break;
        }
        let Some((range_b, next_b)) = segment_value(seg, b, pb) else {
            whole = false;
            break;
        };
        let value_b = &b[range_b];
        let (ord, next_a) = match segment_value(seg, a, pa) {
            Some((range_a, next_a)) if next_a - pa <= remaining => {
                (compare_segment(seg, &a[range_a], value_b), Some(next_a))
            }
            Some((range_a, _)) => {
                let end = (pa + remaining).clamp(range_a.start, range_a.end);
                (compare_partial(seg, &a[range_a.start..end], value_b), None)
            }
            None if !seg.space_packed() => {
                (compare_partial(seg, &a[pa..pa + remaining], value_b), None)
            }
            None => (Ordering::Equal, None),
        };
        let ord = if seg.reversed() { ord.reverse() } else { ord };
        if ord != Ordering::Equal {
            return ord;
        }
        match next_a {
            Some(next_a) => {
                budget = budget.saturating_sub(next_a - pa);
                pa = next_a;
                pb = next_b;
            }
            None => {
                whole = false;
                break;
            }
        }
    }

    if flag.contains(SearchFlag::FIND) && !flag.contains(SearchFlag::NO_FIND) {
        return Ordering::Equal;
    }
    if flag.contains(SearchFlag::SAME) && whole {
        let (ptr_a, ptr_b) = (&a[pa..], &b[pb..]);
        if !ptr_a.is_empty() && ptr_a.len() == ptr_b.len() {
            // Same-width big-endian pointers order like their values.
            let ord = ptr_a.cmp(ptr_b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
    }
    if flag.contains(SearchFlag::BIGGER) {
        Ordering::Greater
    } else if flag.contains(SearchFlag::SMALLER) {
        Ordering::Less
    } else {
        Ordering::Equal
    }
}

fn compare_segment(seg: &KeySegment, a: &[u8], b: &[u8]) -> Ordering {
    match seg.key_type {
        KeyType::Text | KeyType::Binary if seg.space_packed() => compare_space_packed(a, b),
        KeyType::Text | KeyType::Binary => a.cmp(b),
        KeyType::Num => compare_num(a, b),
        fixed => fixed.cmp_fixed(a, b).unwrap_or(Ordering::Equal),
    }
}

/// Compare a truncated search value against a full page value.
fn compare_partial(seg: &KeySegment, a: &[u8], b: &[u8]) -> Ordering {
    if !matches!(seg.key_type, KeyType::Text | KeyType::Binary) {
        return Ordering::Equal;
    }
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal if a[n..].iter().any(|&c| c != b' ') => Ordering::Greater,
        ord => ord,
    }
}

fn compare_space_packed(a: &[u8], b: &[u8]) -> Ordering {
    let n = a.len().min(b.len());
    match a[..n].cmp(&b[..n]) {
        Ordering::Equal => {}
        ord => return ord,
    }
    let rest = if a.len() > b.len() { &a[n..] } else { &b[n..] };
    if rest.iter().all(|&c| c == b' ') {
        Ordering::Equal
    } else {
        a.len().cmp(&b.len())
    }
}

fn split_num(value: &[u8]) -> (bool, &[u8]) {
    let skip = value.iter().take_while(|&&c| c == b' ').count();
    let value = &value[skip..];
    let (negative, digits) = match value.first() {
        Some(b'-') => (true, &value[1..]),
        Some(b'+') => (false, &value[1..]),
        _ => (false, value),
    };
    let zeros = digits.iter().take_while(|&&c| c == b'0').count();
    (negative, &digits[zeros..])
}

/// Decimal numbers written as right-aligned text with a fixed scale.
fn compare_num(a: &[u8], b: &[u8]) -> Ordering {
    let (neg_a, digits_a) = split_num(a);
    let (neg_b, digits_b) = split_num(b);
    if neg_a != neg_b {
        return if neg_a { Ordering::Less } else { Ordering::Greater };
    }
    let ord = digits_a
        .len()
        .cmp(&digits_b.len())
        .then_with(|| digits_a.cmp(digits_b));
    if neg_a { ord.reverse() } else { ord }
}
