//! Deletion with predecessor substitution, merging and root collapse.

use std::cmp::Ordering;

use buffer::PageStore;
use common::{IndexResult, PageAddr};
use storage::IndexPage;

use crate::compare::{KeyLength, SearchFlag, compare_keys};
use crate::corrupt;
use crate::node::{NodeImage, Split};
use crate::page::{child_at, first_slot, insert_at, locate, probe, remove_at, slot_count};
use crate::tree::Tree;

/// Outcome of deleting below a page.
pub(crate) enum Shrunk {
    Done,
    /// The page is at or below half its block; the parent should merge it.
    Underflow,
    /// A longer substituted key pushed the page past its block.
    Overflow(IndexPage),
}

impl<S: PageStore> Tree<'_, S> {
    /// Delete a complete raw key; its absence means the index is damaged.
    pub fn delete(&mut self, key: &[u8]) -> IndexResult<()> {
        let root = (*self.root).ok_or_else(|| corrupt("delete from an empty index"))?;
        match self.delete_from(root, key, 0)? {
            Shrunk::Overflow(page) => self.grow_root(page),
            Shrunk::Done | Shrunk::Underflow => self.collapse_root(root),
        }
    }

    fn delete_from(&mut self, addr: PageAddr, key: &[u8], depth: usize) -> IndexResult<Shrunk> {
        self.check_depth(depth)?;
        let mut page = self.fetch(addr)?;
        let def = self.def;
        let at = probe(def, &page, |slot| {
            compare_keys(def, key, slot, KeyLength::Whole, SearchFlag::SAME) == Ordering::Greater
        })?;
        let hit = at.key.as_deref().is_some_and(|slot| {
            compare_keys(def, key, slot, KeyLength::Whole, SearchFlag::SAME) == Ordering::Equal
        });

        if !page.is_internal() {
            if !hit {
                return Err(corrupt(format!("key to delete is missing from leaf {}", addr.0)));
            }
            remove_at(def, &mut page, &at)?;
            return self.settle_shrunk(page);
        }

        let child = child_at(def, &page, at.pos)?;
        let signal = if hit {
            // The largest key of the left subtree takes the deleted key's slot.
            let (predecessor, signal) = self.remove_last(child, depth + 1)?;
            let (_, right) = remove_at(def, &mut page, &at)?;
            let at = locate(def, &page, at.index)?;
            insert_at(def, &mut page, &at, &predecessor, right)?;
            signal
        } else {
            self.delete_from(child, key, depth + 1)?
        };
        self.fix_child(&mut page, at.index, signal)?;
        self.settle_shrunk(page)
    }

    /// Remove and return the largest key below `addr`.
    fn remove_last(&mut self, addr: PageAddr, depth: usize) -> IndexResult<(Vec<u8>, Shrunk)> {
        self.check_depth(depth)?;
        let mut page = self.fetch(addr)?;
        let def = self.def;
        let n = slot_count(def, &page)?;
        if page.is_internal() {
            let child = child_at(def, &page, page.used_length())?;
            let (key, signal) = self.remove_last(child, depth + 1)?;
            self.fix_child(&mut page, n, signal)?;
            return Ok((key, self.settle_shrunk(page)?));
        }
        if n == 0 {
            return Err(corrupt(format!("leaf page {} is empty", addr.0)));
        }
        let at = locate(def, &page, n - 1)?;
        let (key, _) = remove_at(def, &mut page, &at)?;
        Ok((key, self.settle_shrunk(page)?))
    }

    /// Store `page` if it fits and report whether it ran low.
    fn settle_shrunk(&mut self, page: IndexPage) -> IndexResult<Shrunk> {
        if page.overflows() {
            return Ok(Shrunk::Overflow(page));
        }
        self.write(&page)?;
        if page.used_length() <= page.block_length() / 2 {
            Ok(Shrunk::Underflow)
        } else {
            Ok(Shrunk::Done)
        }
    }

    /// React to the signal of child `index` of `parent`.
    fn fix_child(
        &mut self,
        parent: &mut IndexPage,
        index: usize,
        signal: Shrunk,
    ) -> IndexResult<()> {
        match signal {
            Shrunk::Done => Ok(()),
            Shrunk::Overflow(child) => {
                let at = locate(self.def, parent, index)?;
                self.split_child(parent, &at, child)
            }
            Shrunk::Underflow => self.join_child(parent, index),
        }
    }

    /// Merge an underflowing child with a sibling, or even them out.
    fn join_child(&mut self, parent: &mut IndexPage, index: usize) -> IndexResult<()> {
        let def = self.def;
        let n = slot_count(def, parent)?;
        if n == 0 {
            return Ok(());
        }
        let separator_at = locate(def, parent, index.min(n - 1))?;
        let left_addr = child_at(def, parent, separator_at.pos)?;
        let right_addr = child_at(def, parent, separator_at.end)?;
        let separator = separator_at
            .key
            .clone()
            .ok_or_else(|| corrupt(format!("internal page {} has no separator", parent.addr.0)))?;
        let mut left_page = self.fetch(left_addr)?;
        let mut right_page = self.fetch(right_addr)?;
        let merged = NodeImage::merge(
            NodeImage::read(def, &left_page)?,
            separator,
            NodeImage::read(def, &right_page)?,
        );

        remove_at(def, parent, &separator_at)?;
        if merged.encoded_length(def)? <= def.block_length {
            self.store_image(&merged, &mut left_page)?;
            self.free(right_addr)?;
            tracing::trace!(
                target: "btree::merge",
                index = self.index,
                left = left_addr.0,
                right = right_addr.0,
                keys = merged.slots.len(),
                "merged sibling pages"
            );
        } else {
            let Split {
                left,
                separator,
                right,
            } = merged.split(def)?;
            self.store_image(&left, &mut left_page)?;
            self.store_image(&right, &mut right_page)?;
            let at = locate(def, parent, separator_at.index)?;
            insert_at(def, parent, &at, &separator, Some(right_addr))?;
            tracing::trace!(
                target: "btree::merge",
                index = self.index,
                left = left_addr.0,
                right = right_addr.0,
                "redistributed sibling pages"
            );
        }
        Ok(())
    }

    /// Replace a root left without keys by its only child, or drop it.
    fn collapse_root(&mut self, addr: PageAddr) -> IndexResult<()> {
        let page = self.fetch(addr)?;
        if slot_count(self.def, &page)? > 0 {
            return Ok(());
        }
        let replacement = if page.is_internal() {
            Some(child_at(self.def, &page, first_slot(self.def, true))?)
        } else {
            None
        };
        *self.root = replacement;
        self.free(addr)?;
        tracing::trace!(
            target: "btree::merge",
            index = self.index,
            old_root = addr.0,
            new_root = replacement.map(|a| a.0),
            "collapsed root"
        );
        Ok(())
    }
}
