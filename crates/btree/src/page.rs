//! Slot navigation and in-place edits on one index page.
//!
//! Fixed layouts are addressed directly and binary searched. Packed layouts
//! are walked from the first slot, since every slot is decoded against the
//! key before it.

use catalog::{KeyDefinition, KeyLayout};
use common::{IndexResult, PageAddr};
use storage::{BLOCK_UNIT, IndexPage, PAGE_HEADER_LEN};

use crate::corrupt;
use crate::keycodec::{InsertPoint, decode_next, plan_pack, rewrite_next, slot_length};

/// A slot boundary inside a page, with the decoded keys on both sides.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotPos {
    /// Number of slots before this position.
    pub index: usize,
    /// Page offset of slot `index`, or the used length at the end.
    pub pos: usize,
    /// Offset just past slot `index`; equals `pos` at the end.
    pub end: usize,
    pub prev: Option<Vec<u8>>,
    pub key: Option<Vec<u8>>,
}

/// Page offset of the first slot.
pub fn first_slot(def: &KeyDefinition, internal: bool) -> usize {
    PAGE_HEADER_LEN + if internal { def.node_pointer.bytes() } else { 0 }
}

fn fixed_slot(def: &KeyDefinition, internal: bool) -> Option<(usize, usize)> {
    match def.layout() {
        KeyLayout::Fixed { key_length } => {
            let key = key_length + def.record_pointer.bytes();
            let node = if internal { def.node_pointer.bytes() } else { 0 };
            Some((key, key + node))
        }
        KeyLayout::Packed => None,
    }
}

/// Slots that fit an empty page of a fixed layout.
pub fn fixed_capacity(def: &KeyDefinition, internal: bool) -> Option<usize> {
    fixed_slot(def, internal).map(|(_, slot)| (def.block_length - first_slot(def, internal)) / slot)
}

fn fixed_count(def: &KeyDefinition, page: &IndexPage, slot: usize) -> IndexResult<usize> {
    let body = page
        .used_length()
        .checked_sub(first_slot(def, page.is_internal()))
        .ok_or_else(|| corrupt(format!("page {} is shorter than its first pointer", page.addr.0)))?;
    if body % slot != 0 {
        return Err(corrupt(format!(
            "page {} holds {body} bytes of {slot} byte slots",
            page.addr.0
        )));
    }
    Ok(body / slot)
}

fn fixed_pos(
    def: &KeyDefinition,
    page: &IndexPage,
    index: usize,
    count: usize,
    slot: usize,
) -> SlotPos {
    let key_len = slot - if page.is_internal() { def.node_pointer.bytes() } else { 0 };
    let start = first_slot(def, page.is_internal());
    let key_at = |i: usize| {
        let pos = start + i * slot;
        page.data()[pos..pos + key_len].to_vec()
    };
    let pos = start + index * slot;
    SlotPos {
        index,
        pos,
        end: if index < count { pos + slot } else { pos },
        prev: (index > 0).then(|| key_at(index - 1)),
        key: (index < count).then(|| key_at(index)),
    }
}

/// Find the first slot for which `before` is false.
///
/// `before` must hold for a prefix of the slots, so that fixed pages can be
/// binary searched.
pub fn probe(
    def: &KeyDefinition,
    page: &IndexPage,
    mut before: impl FnMut(&[u8]) -> bool,
) -> IndexResult<SlotPos> {
    let internal = page.is_internal();
    if let Some((key_len, slot)) = fixed_slot(def, internal) {
        let count = fixed_count(def, page, slot)?;
        let start = first_slot(def, internal);
        let (mut lo, mut hi) = (0, count);
        while lo < hi {
            let mid = (lo + hi) / 2;
            let pos = start + mid * slot;
            if before(&page.data()[pos..pos + key_len]) {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        return Ok(fixed_pos(def, page, lo, count, slot));
    }

    let data = page.data();
    let mut pos = first_slot(def, internal);
    let mut prev: Option<Vec<u8>> = None;
    let mut index = 0;
    while pos < data.len() {
        let (key, _, end) = decode_next(def, internal, data, pos, prev.as_deref())?;
        if !before(&key) {
            return Ok(SlotPos {
                index,
                pos,
                end,
                prev,
                key: Some(key),
            });
        }
        prev = Some(key);
        pos = end;
        index += 1;
    }
    Ok(SlotPos {
        index,
        pos,
        end: pos,
        prev,
        key: None,
    })
}

/// Position of slot `index`; past the last slot this is the end position.
pub fn locate(def: &KeyDefinition, page: &IndexPage, index: usize) -> IndexResult<SlotPos> {
    if let Some((_, slot)) = fixed_slot(def, page.is_internal()) {
        let count = fixed_count(def, page, slot)?;
        return Ok(fixed_pos(def, page, index.min(count), count, slot));
    }
    let mut seen = 0;
    probe(def, page, |_| {
        seen += 1;
        seen <= index
    })
}

/// The slot ending at offset `pos`, if `pos` is not the first slot.
pub fn slot_before(
    def: &KeyDefinition,
    page: &IndexPage,
    pos: usize,
) -> IndexResult<Option<SlotPos>> {
    let internal = page.is_internal();
    let start = first_slot(def, internal);
    if pos <= start {
        return Ok(None);
    }
    if let Some((_, slot)) = fixed_slot(def, internal) {
        if (pos - start) % slot != 0 {
            return Err(corrupt(format!("offset {pos} is not a slot boundary")));
        }
        let count = fixed_count(def, page, slot)?;
        return Ok(Some(fixed_pos(def, page, (pos - start) / slot - 1, count, slot)));
    }
    let mut walk = start;
    let mut index = 0;
    while walk < pos && walk < page.used_length() {
        let next = walk + slot_length(def, internal, page.data(), walk)?;
        if next == pos {
            return locate(def, page, index).map(Some);
        }
        walk = next;
        index += 1;
    }
    Err(corrupt(format!("offset {pos} is not a slot boundary of page {}", page.addr.0)))
}

/// Number of slots on the page.
pub fn slot_count(def: &KeyDefinition, page: &IndexPage) -> IndexResult<usize> {
    let internal = page.is_internal();
    if let Some((_, slot)) = fixed_slot(def, internal) {
        return fixed_count(def, page, slot);
    }
    let data = page.data();
    let mut pos = first_slot(def, internal);
    let mut count = 0;
    while pos < data.len() {
        pos += slot_length(def, internal, data, pos)?;
        count += 1;
    }
    Ok(count)
}

/// Offset of the page's last slot.
pub fn last_slot_pos(def: &KeyDefinition, page: &IndexPage) -> IndexResult<Option<usize>> {
    let internal = page.is_internal();
    let data = page.data();
    let mut pos = first_slot(def, internal);
    let mut last = None;
    while pos < data.len() {
        last = Some(pos);
        pos += slot_length(def, internal, data, pos)?;
    }
    Ok(last)
}

/// Child pointer stored just before offset `pos` of an internal page.
///
/// At a slot's start this is the left child of that slot; at the end of
/// the page it is the last child.
pub fn child_at(def: &KeyDefinition, page: &IndexPage, pos: usize) -> IndexResult<PageAddr> {
    let width = def.node_pointer.bytes();
    if !page.is_internal() || pos < first_slot(def, true) || pos > page.used_length() {
        return Err(corrupt(format!(
            "no child pointer before offset {pos} of page {}",
            page.addr.0
        )));
    }
    let unit = def
        .node_pointer
        .decode(&page.data()[pos - width..pos])
        .ok_or_else(|| corrupt(format!("child pointer of page {} cut short", page.addr.0)))?;
    Ok(PageAddr(unit * BLOCK_UNIT as u64))
}

/// Splice `key` (and its right child on internal pages) in at `at`.
pub fn insert_at(
    def: &KeyDefinition,
    page: &mut IndexPage,
    at: &SlotPos,
    key: &[u8],
    child: Option<PageAddr>,
) -> IndexResult<()> {
    let point = InsertPoint {
        data: page.data(),
        pos: at.pos,
        prev: at.prev.as_deref(),
        next: at.key.as_deref(),
    };
    let plan = plan_pack(def, &point, key, child)?;
    let bytes = plan.store();
    page.splice(at.pos..at.pos + plan.old_len(), &bytes);
    Ok(())
}

/// Remove the slot at `at`, returning its key and right child.
pub fn remove_at(
    def: &KeyDefinition,
    page: &mut IndexPage,
    at: &SlotPos,
) -> IndexResult<(Vec<u8>, Option<PageAddr>)> {
    let internal = page.is_internal();
    let key = at
        .key
        .clone()
        .ok_or_else(|| corrupt(format!("no slot to remove at offset {}", at.pos)))?;
    let child = if internal {
        Some(child_at(def, page, at.end)?)
    } else {
        None
    };
    let mut end = at.end;
    let mut replacement = Vec::new();
    if at.end < page.used_length() && def.packs_prefix() {
        let (next_key, _, _) = decode_next(def, internal, page.data(), at.end, Some(&key))?;
        let rewrite = rewrite_next(def, page.data(), at.end, at.prev.as_deref(), &next_key)?;
        if let Some(rewrite) = rewrite {
            end += rewrite.old_len;
            replacement = rewrite.bytes;
        }
    }
    page.splice(at.pos..end, &replacement);
    Ok((key, child))
}
