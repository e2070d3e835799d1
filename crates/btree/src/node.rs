//! Decoded page images used for structural changes.
//!
//! Splits, merges and redistribution work on a fully decoded copy of the
//! pages involved and write them back with fresh front-coding.

use catalog::{KeyDefinition, KeyLayout};
use common::{IndexResult, PageAddr};
use storage::{IndexPage, PAGE_HEADER_LEN};

use crate::corrupt;
use crate::keycodec::{decode_next, encode_slot};
use crate::page::{child_at, first_slot};

/// The kind of a page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeType {
    Internal,
    Leaf,
}

/// One decoded slot: the raw key and, on internal pages, its right child.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSlot {
    pub key: Vec<u8>,
    pub child: Option<PageAddr>,
}

/// A page with every slot decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeImage {
    pub node_type: NodeType,
    /// Leftmost child of an internal page.
    pub first_child: Option<PageAddr>,
    pub slots: Vec<NodeSlot>,
}

/// Result of cutting an image in two around a promoted key.
#[derive(Clone, Debug)]
pub struct Split {
    pub left: NodeImage,
    /// Key moving up to the parent; its child is the right page, set by the caller.
    pub separator: Vec<u8>,
    pub right: NodeImage,
}

impl NodeImage {
    /// Create an empty image.
    pub fn new(node_type: NodeType, first_child: Option<PageAddr>) -> Self {
        Self {
            node_type,
            first_child,
            slots: Vec::new(),
        }
    }

    pub fn is_internal(&self) -> bool {
        self.node_type == NodeType::Internal
    }

    /// Decode every slot of `page`.
    pub fn read(def: &KeyDefinition, page: &IndexPage) -> IndexResult<Self> {
        let internal = page.is_internal();
        let data = page.data();
        let start = first_slot(def, internal);
        if data.len() < start {
            return Err(corrupt(format!(
                "page {} is shorter than its first pointer",
                page.addr.0
            )));
        }
        let first_child = internal.then(|| child_at(def, page, start)).transpose()?;
        let mut slots: Vec<NodeSlot> = Vec::new();
        let mut pos = start;
        while pos < data.len() {
            let prev = slots.last().map(|s| s.key.as_slice());
            let (key, child, end) = decode_next(def, internal, data, pos, prev)?;
            slots.push(NodeSlot { key, child });
            pos = end;
        }
        let node_type = if internal { NodeType::Internal } else { NodeType::Leaf };
        Ok(Self {
            node_type,
            first_child,
            slots,
        })
    }

    /// Encoded page body, header excluded.
    fn encode_body(&self, def: &KeyDefinition) -> IndexResult<Vec<u8>> {
        let mut body = Vec::with_capacity(def.block_length);
        if self.is_internal() {
            let first = self
                .first_child
                .ok_or_else(|| corrupt("internal page image without a first child"))?;
            if !def.node_pointer.encode(first.0 / storage::BLOCK_UNIT as u64, &mut body) {
                return Err(corrupt(format!(
                    "child page {} exceeds the node pointer width",
                    first.0
                )));
            }
        }
        let mut prev: Option<&[u8]> = None;
        for slot in &self.slots {
            if slot.child.is_some() != self.is_internal() {
                return Err(corrupt("slot child pointer does not match the page kind"));
            }
            encode_slot(def, &slot.key, prev, slot.child, &mut body)?;
            prev = Some(&slot.key);
        }
        Ok(body)
    }

    /// Used length the image would have as a page.
    pub fn encoded_length(&self, def: &KeyDefinition) -> IndexResult<usize> {
        Ok(PAGE_HEADER_LEN + self.encode_body(def)?.len())
    }

    /// Replace the contents of `page` with this image.
    pub fn write(&self, def: &KeyDefinition, page: &mut IndexPage) -> IndexResult<()> {
        let body = self.encode_body(def)?;
        page.clear_body();
        page.set_internal(self.is_internal());
        page.extend(&body);
        Ok(())
    }

    /// Join `left`, the parent's separator key and `right` into one image.
    pub fn merge(left: NodeImage, separator: Vec<u8>, right: NodeImage) -> NodeImage {
        let mut slots = left.slots;
        slots.reserve(right.slots.len() + 1);
        slots.push(NodeSlot {
            key: separator,
            child: right.first_child,
        });
        slots.extend(right.slots);
        NodeImage {
            node_type: left.node_type,
            first_child: left.first_child,
            slots,
        }
    }

    /// Index of the slot promoted when splitting.
    ///
    /// Fixed layouts split at the slot-count midpoint. Packed layouts split
    /// at the first slot whose encoding ends past half the encoded bytes.
    fn split_point(&self, def: &KeyDefinition) -> IndexResult<usize> {
        let n = self.slots.len();
        if n < 3 {
            return Err(corrupt(format!("cannot split a page of {n} keys")));
        }
        if let KeyLayout::Fixed { .. } = def.layout() {
            return Ok(n / 2);
        }
        let mut sizes = Vec::with_capacity(n);
        let mut prev: Option<&[u8]> = None;
        for slot in &self.slots {
            let mut out = Vec::new();
            encode_slot(def, &slot.key, prev, slot.child, &mut out)?;
            sizes.push(out.len());
            prev = Some(&slot.key);
        }
        let total: usize = sizes.iter().sum();
        let mut acc = 0;
        let mut mid = n - 2;
        for (i, size) in sizes.iter().enumerate() {
            acc += size;
            if acc * 2 > total {
                mid = i;
                break;
            }
        }
        Ok(mid.clamp(1, n - 2))
    }

    /// Cut the image around slot `mid`, which moves up.
    fn split_at(mut self, mid: usize) -> Split {
        let mut upper = self.slots.split_off(mid);
        let promoted = upper.remove(0);
        let right = NodeImage {
            node_type: self.node_type,
            first_child: promoted.child,
            slots: upper,
        };
        Split {
            left: self,
            separator: promoted.key,
            right,
        }
    }

    /// Split into two halves around a promoted key.
    pub fn split(self, def: &KeyDefinition) -> IndexResult<Split> {
        let mid = self.split_point(def)?;
        Ok(self.split_at(mid))
    }

    /// Split a fixed-layout image into three pages and two separators.
    pub fn split_three(self) -> IndexResult<(Split, Vec<u8>, NodeImage)> {
        let n = self.slots.len();
        if n < 5 {
            return Err(corrupt(format!("cannot split {n} keys three ways")));
        }
        let first = (n - 2) / 3;
        let second = first + 1 + (n - 2 - first) / 2;
        let Split {
            left: rest,
            separator: upper_separator,
            right: upper,
        } = self.split_at(second);
        let lower = rest.split_at(first);
        Ok((lower, upper_separator, upper))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycodec::make_key;
    use catalog::{KeySegment, SegmentFlags};
    use common::{Config, RecordPointer};
    use pretty_assertions::assert_eq;
    use types::KeyType;

    fn def(flags: SegmentFlags) -> KeyDefinition {
        let seg = KeySegment::new(KeyType::Text, 0, 6).with_flags(flags);
        KeyDefinition::new("n", vec![seg], false, &Config::default()).unwrap()
    }

    fn leaf_image(def: &KeyDefinition, n: usize) -> NodeImage {
        let mut image = NodeImage::new(NodeType::Leaf, None);
        for i in 0..n {
            let key = make_key(def, format!("{i:06}").as_bytes(), RecordPointer(i as u64)).unwrap();
            image.slots.push(NodeSlot { key, child: None });
        }
        image
    }

    #[test]
    fn image_round_trips_through_page() {
        let def = def(SegmentFlags::SPACE_PACK | SegmentFlags::PACK_KEY);
        let image = leaf_image(&def, 20);
        let mut page = IndexPage::new(PageAddr(1024), def.block_length, false);
        image.write(&def, &mut page).unwrap();
        assert_eq!(page.used_length(), image.encoded_length(&def).unwrap());
        assert_eq!(NodeImage::read(&def, &page).unwrap(), image);
    }

    #[test]
    fn internal_image_keeps_children() {
        let def = def(SegmentFlags::NONE);
        let mut image = leaf_image(&def, 3);
        image.node_type = NodeType::Internal;
        image.first_child = Some(PageAddr(1024));
        for (i, slot) in image.slots.iter_mut().enumerate() {
            slot.child = Some(PageAddr(2048 + 1024 * i as u64));
        }
        let mut page = IndexPage::new(PageAddr(8192), def.block_length, true);
        image.write(&def, &mut page).unwrap();
        assert!(page.is_internal());
        assert_eq!(NodeImage::read(&def, &page).unwrap(), image);
    }

    #[test]
    fn fixed_split_takes_middle_slot() {
        let def = def(SegmentFlags::NONE);
        let image = leaf_image(&def, 7);
        let keys: Vec<_> = image.slots.iter().map(|s| s.key.clone()).collect();
        let split = image.split(&def).unwrap();
        assert_eq!(split.left.slots.len(), 3);
        assert_eq!(split.separator, keys[3]);
        assert_eq!(split.right.slots.len(), 3);
        assert_eq!(split.right.first_child, None);
    }

    #[test]
    fn merge_then_split_preserves_order() {
        let def = def(SegmentFlags::SPACE_PACK | SegmentFlags::PACK_KEY);
        let image = leaf_image(&def, 9);
        let keys: Vec<_> = image.slots.iter().map(|s| s.key.clone()).collect();
        let split = image.split(&def).unwrap();
        let merged = NodeImage::merge(split.left, split.separator, split.right);
        let merged_keys: Vec<_> = merged.slots.iter().map(|s| s.key.clone()).collect();
        assert_eq!(merged_keys, keys);
    }

    #[test]
    fn three_way_split_balances() {
        let def = def(SegmentFlags::NONE);
        let image = leaf_image(&def, 14);
        let (lower, upper_separator, upper) = image.split_three().unwrap();
        let sizes = (
            lower.left.slots.len(),
            lower.right.slots.len(),
            upper.slots.len(),
        );
        assert_eq!(sizes, (4, 4, 4));
        assert!(lower.separator < upper_separator);
    }
}
