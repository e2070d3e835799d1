//! Raw keys and their on-page slot encoding.
//!
//! A raw key is the concatenation of its segments followed by the record
//! pointer. Plain segments occupy their declared length; space packed
//! segments are a length code followed by the stripped value. Raw keys are
//! what the comparator works on.
//!
//! On a page, segment 0 of a prefix packed index is front-coded against the
//! previous slot's key: `[shared length][suffix length][suffix]`, where the
//! suffix length is only written when the segment is also space packed.
//! Every other segment is stored raw, followed by the record pointer and, on
//! internal pages, the right child pointer.

use std::ops::Range;

use catalog::{KeyDefinition, KeySegment};
use common::{IndexError, IndexResult, PageAddr, RecordPointer};
use storage::BLOCK_UNIT;
use types::KeyType;

use crate::compare::KeyLength;
use crate::corrupt;

/// Append the length code of `n` for `seg`.
///
/// One byte, unless the segment is longer than 255 bytes and `n` exceeds
/// 127; then two bytes with the top bit of the first one set.
pub fn write_length(seg: &KeySegment, n: usize, out: &mut Vec<u8>) {
    if seg.length_bytes(n) == 2 {
        out.push(0x80 | (n >> 8) as u8);
        out.push((n & 0xFF) as u8);
    } else {
        out.push(n as u8);
    }
}

/// Read a length code, returning the length and the number of code bytes.
pub fn read_length(seg: &KeySegment, src: &[u8]) -> Option<(usize, usize)> {
    let first = *src.first()?;
    if seg.length > 255 && first & 0x80 != 0 {
        let second = *src.get(1)?;
        Some(((usize::from(first & 0x7F) << 8) | usize::from(second), 2))
    } else {
        Some((usize::from(first), 1))
    }
}

/// Value bytes of the segment starting at `pos` and the offset just past it.
pub(crate) fn segment_value(
    seg: &KeySegment,
    key: &[u8],
    pos: usize,
) -> Option<(Range<usize>, usize)> {
    if seg.space_packed() {
        let (n, code) = read_length(seg, key.get(pos..)?)?;
        let start = pos + code;
        let end = start + n;
        (n <= seg.length && end <= key.len()).then_some((start..end, end))
    } else {
        let end = pos + seg.length;
        (end <= key.len()).then_some((pos..end, end))
    }
}

/// Length of the segment part of a raw key, without the record pointer.
pub fn key_part_length(def: &KeyDefinition, key: &[u8]) -> Option<usize> {
    def.segments
        .iter()
        .try_fold(0, |pos, seg| segment_value(seg, key, pos).map(|(_, next)| next))
}

/// The record pointer trailing a complete raw key.
pub fn key_pointer(def: &KeyDefinition, key: &[u8]) -> Option<RecordPointer> {
    let start = key_part_length(def, key)?;
    let width = def.record_pointer;
    if key.len() != start + width.bytes() {
        return None;
    }
    width.decode(&key[start..]).map(RecordPointer)
}

/// Reject keys that are not complete raw keys of `def`.
pub(crate) fn check_key(def: &KeyDefinition, key: &[u8]) -> IndexResult<()> {
    if key_pointer(def, key).is_none() {
        return Err(IndexError::InvalidDefinition(format!(
            "{} byte key is not a complete key of index '{}'",
            key.len(),
            def.name
        )));
    }
    Ok(())
}

fn strip_spaces(key_type: KeyType, value: &[u8]) -> &[u8] {
    if key_type == KeyType::Num {
        let skip = value.iter().take_while(|&&b| b == b' ').count();
        &value[skip..]
    } else {
        let keep = value.len() - value.iter().rev().take_while(|&&b| b == b' ').count();
        &value[..keep]
    }
}

fn push_segment(seg: &KeySegment, value: &[u8], key: &mut Vec<u8>) {
    if seg.space_packed() {
        let stripped = strip_spaces(seg.key_type, value);
        write_length(seg, stripped.len(), key);
        key.extend_from_slice(stripped);
    } else {
        key.extend_from_slice(value);
    }
}

fn push_pointer(def: &KeyDefinition, pointer: RecordPointer, key: &mut Vec<u8>) -> IndexResult<()> {
    if def.record_pointer.encode(pointer.0, key) {
        Ok(())
    } else {
        Err(IndexError::InvalidDefinition(format!(
            "record pointer {} does not fit {} bytes",
            pointer.0,
            def.record_pointer.bytes()
        )))
    }
}

/// Build the raw key of `record` for index `def`.
pub fn make_key(
    def: &KeyDefinition,
    record: &[u8],
    pointer: RecordPointer,
) -> IndexResult<Vec<u8>> {
    let mut key = Vec::with_capacity(def.max_key_length() + def.record_pointer.bytes());
    for (nr, seg) in def.segments.iter().enumerate() {
        let value = record.get(seg.start..seg.start + seg.length).ok_or_else(|| {
            IndexError::InvalidDefinition(format!(
                "record of {} bytes is too short for segment {nr} of index '{}'",
                record.len(),
                def.name
            ))
        })?;
        push_segment(seg, value, &mut key);
    }
    push_pointer(def, pointer, &mut key)?;
    Ok(key)
}

/// Build a lookup key from the values of the leading segments.
///
/// Text values shorter than their segment are padded with spaces (on the
/// left for `Num`). Returns the key, without a record pointer, and the length
/// limit that restricts comparisons to the supplied segments.
pub fn pack_search_key(def: &KeyDefinition, values: &[&[u8]]) -> IndexResult<(Vec<u8>, KeyLength)> {
    if values.len() > def.segments.len() {
        return Err(IndexError::InvalidDefinition(format!(
            "{} values given for the {} segments of index '{}'",
            values.len(),
            def.segments.len(),
            def.name
        )));
    }
    let mut key = Vec::new();
    for (nr, (seg, value)) in def.segments.iter().zip(values).enumerate() {
        if value.len() > seg.length
            || seg.key_type.fixed_width().is_some_and(|w| w != value.len())
        {
            return Err(IndexError::InvalidDefinition(format!(
                "value of {} bytes does not fit segment {nr} ({} bytes)",
                value.len(),
                seg.length
            )));
        }
        let pad = seg.length - value.len();
        let padded: Vec<u8> = if seg.key_type == KeyType::Num {
            std::iter::repeat_n(b' ', pad).chain(value.iter().copied()).collect()
        } else {
            value.iter().copied().chain(std::iter::repeat_n(b' ', pad)).collect()
        };
        push_segment(seg, &padded, &mut key);
    }
    let length = KeyLength::Prefix(key.len());
    Ok((key, length))
}

fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// Segment 0 value of a raw key of a prefix packed index.
fn leading_value<'k>(seg: &KeySegment, key: &'k [u8]) -> IndexResult<&'k [u8]> {
    segment_value(seg, key, 0)
        .map(|(range, _)| &key[range])
        .ok_or_else(|| corrupt("key too short for its first segment"))
}

fn encode_prefix(seg: &KeySegment, value: &[u8], prev: Option<&[u8]>, out: &mut Vec<u8>) {
    let shared = prev.map_or(0, |p| common_prefix(p, value));
    write_length(seg, shared, out);
    if seg.space_packed() {
        write_length(seg, value.len() - shared, out);
    }
    out.extend_from_slice(&value[shared..]);
}

/// Bytes taken by the front-coded first segment of the slot at `pos`.
fn prefix_part_length(seg: &KeySegment, data: &[u8], pos: usize) -> IndexResult<usize> {
    let overrun = || corrupt(format!("slot at offset {pos} runs past the used length"));
    let rest = data.get(pos..).ok_or_else(overrun)?;
    let (shared, code) = read_length(seg, rest).ok_or_else(overrun)?;
    let mut p = pos + code;
    let suffix = if seg.space_packed() {
        let (n, code) = read_length(seg, data.get(p..).ok_or_else(overrun)?).ok_or_else(overrun)?;
        p += code;
        n
    } else {
        seg.length.checked_sub(shared).ok_or_else(|| {
            corrupt(format!(
                "slot at offset {pos} shares {shared} bytes of a {} byte segment",
                seg.length
            ))
        })?
    };
    if p + suffix > data.len() {
        return Err(overrun());
    }
    Ok(p + suffix - pos)
}

/// Append the slot encoding of `key` following `prev` on a page.
pub fn encode_slot(
    def: &KeyDefinition,
    key: &[u8],
    prev: Option<&[u8]>,
    child: Option<PageAddr>,
    out: &mut Vec<u8>,
) -> IndexResult<()> {
    let mut pos = 0;
    for (nr, seg) in def.segments.iter().enumerate() {
        let (range, next) = segment_value(seg, key, pos)
            .ok_or_else(|| corrupt(format!("key too short for segment {nr}")))?;
        if nr == 0 && seg.prefix_packed() {
            let prev_value = prev.map(|p| leading_value(seg, p)).transpose()?;
            encode_prefix(seg, &key[range], prev_value, out);
        } else {
            out.extend_from_slice(&key[pos..next]);
        }
        pos = next;
    }
    if key.len() != pos + def.record_pointer.bytes() {
        return Err(corrupt("key without a record pointer"));
    }
    out.extend_from_slice(&key[pos..]);
    if let Some(addr) = child {
        let unit = addr.0 / BLOCK_UNIT as u64;
        if !def.node_pointer.encode(unit, out) {
            return Err(corrupt(format!("child page {} exceeds the node pointer width", addr.0)));
        }
    }
    Ok(())
}

/// Decode the slot at `pos`, given the decoded key of the slot before it.
///
/// Returns the raw key (with record pointer), the child pointer stored after
/// it on internal pages and the offset of the next slot.
pub fn decode_next(
    def: &KeyDefinition,
    internal: bool,
    data: &[u8],
    pos: usize,
    prev: Option<&[u8]>,
) -> IndexResult<(Vec<u8>, Option<PageAddr>, usize)> {
    let overrun = || corrupt(format!("slot at offset {pos} runs past the used length"));
    let mut key = Vec::with_capacity(def.max_key_length() + def.record_pointer.bytes());
    let mut p = pos;
    for (nr, seg) in def.segments.iter().enumerate() {
        if nr == 0 && seg.prefix_packed() {
            let part = prefix_part_length(seg, data, p)?;
            let (shared, code) = read_length(seg, &data[p..]).ok_or_else(overrun)?;
            let suffix_start = if seg.space_packed() {
                let (_, n_code) = read_length(seg, &data[p + code..]).ok_or_else(overrun)?;
                p + code + n_code
            } else {
                p + code
            };
            let suffix = &data[suffix_start..p + part];
            let reused = match prev {
                Some(prev) => leading_value(seg, prev)?,
                None => &[],
            };
            if shared > reused.len() {
                return Err(corrupt(format!(
                    "slot at offset {pos} reuses {shared} bytes of a {} byte predecessor",
                    reused.len()
                )));
            }
            let value_len = shared + suffix.len();
            if value_len > seg.length || (!seg.space_packed() && value_len != seg.length) {
                return Err(corrupt(format!("slot at offset {pos} decodes to {value_len} bytes")));
            }
            if seg.space_packed() {
                write_length(seg, value_len, &mut key);
            }
            key.extend_from_slice(&reused[..shared]);
            key.extend_from_slice(suffix);
            p += part;
        } else {
            let (_, next) = segment_value(seg, data, p).ok_or_else(overrun)?;
            key.extend_from_slice(&data[p..next]);
            p = next;
        }
    }
    let width = def.record_pointer.bytes();
    key.extend_from_slice(data.get(p..p + width).ok_or_else(overrun)?);
    p += width;
    let child = if internal {
        let unit = def.node_pointer.decode(data.get(p..).ok_or_else(overrun)?).ok_or_else(overrun)?;
        p += def.node_pointer.bytes();
        Some(PageAddr(unit * BLOCK_UNIT as u64))
    } else {
        None
    };
    Ok((key, child, p))
}

/// Length of the slot at `pos` without decoding its key.
pub fn slot_length(
    def: &KeyDefinition,
    internal: bool,
    data: &[u8],
    pos: usize,
) -> IndexResult<usize> {
    let overrun = || corrupt(format!("slot at offset {pos} runs past the used length"));
    let mut p = pos;
    for (nr, seg) in def.segments.iter().enumerate() {
        if nr == 0 && seg.prefix_packed() {
            p += prefix_part_length(seg, data, p)?;
        } else {
            p = segment_value(seg, data, p).ok_or_else(overrun)?.1;
        }
    }
    p += def.record_pointer.bytes();
    if internal {
        p += def.node_pointer.bytes();
    }
    if p > data.len() {
        return Err(overrun());
    }
    Ok(p - pos)
}

/// New bytes for the front-coded head of the slot that follows an edit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NextRewrite {
    /// Bytes of the following slot's current front-coded part.
    pub old_len: usize,
    /// Its replacement, coded against the new predecessor.
    pub bytes: Vec<u8>,
}

/// Byte layout of one slot insertion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackPlan {
    pub slot: Vec<u8>,
    pub next: Option<NextRewrite>,
}

impl PackPlan {
    /// Bytes replacing `old_len()` bytes at the insertion offset.
    pub fn store(&self) -> Vec<u8> {
        let mut bytes = self.slot.clone();
        if let Some(next) = &self.next {
            bytes.extend_from_slice(&next.bytes);
        }
        bytes
    }

    /// Bytes of the page consumed at the insertion offset.
    pub fn old_len(&self) -> usize {
        self.next.as_ref().map_or(0, |next| next.old_len)
    }

    /// Change of the page's used length.
    pub fn delta(&self) -> isize {
        self.store().len() as isize - self.old_len() as isize
    }
}

/// Where a slot is inserted: the page bytes and the decoded neighbours.
#[derive(Clone, Copy, Debug)]
pub struct InsertPoint<'a> {
    pub data: &'a [u8],
    pub pos: usize,
    pub prev: Option<&'a [u8]>,
    pub next: Option<&'a [u8]>,
}

/// Re-code the front of the slot at `next_pos` against `new_prev`.
pub(crate) fn rewrite_next(
    def: &KeyDefinition,
    data: &[u8],
    next_pos: usize,
    new_prev: Option<&[u8]>,
    next_key: &[u8],
) -> IndexResult<Option<NextRewrite>> {
    let Some(seg) = def.segments.first().filter(|s| s.prefix_packed()) else {
        return Ok(None);
    };
    let old_len = prefix_part_length(seg, data, next_pos)?;
    let value = leading_value(seg, next_key)?;
    let prev_value = new_prev.map(|p| leading_value(seg, p)).transpose()?;
    let mut bytes = Vec::with_capacity(old_len);
    encode_prefix(seg, value, prev_value, &mut bytes);
    Ok(Some(NextRewrite { old_len, bytes }))
}

/// Plan the insertion of `key` at `at`.
pub fn plan_pack(
    def: &KeyDefinition,
    at: &InsertPoint<'_>,
    key: &[u8],
    child: Option<PageAddr>,
) -> IndexResult<PackPlan> {
    let mut slot = Vec::new();
    encode_slot(def, key, at.prev, child, &mut slot)?;
    let next = match at.next {
        Some(next_key) => rewrite_next(def, at.data, at.pos, Some(key), next_key)?,
        None => None,
    };
    Ok(PackPlan { slot, next })
}
