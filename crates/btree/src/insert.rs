//! Insertion with split, three-way balancing and root growth.

use std::cmp::Ordering;

use buffer::PageStore;
use catalog::KeyLayout;
use common::{IndexError, IndexResult, PageAddr};
use storage::IndexPage;

use crate::compare::{KeyLength, SearchFlag, compare_keys};
use crate::corrupt;
use crate::keycodec::key_pointer;
use crate::node::{NodeImage, NodeSlot, NodeType, Split};
use crate::page::{SlotPos, child_at, fixed_capacity, insert_at, locate, probe, remove_at};
use crate::tree::Tree;

/// Outcome of inserting below a page.
pub(crate) enum Grown {
    Done,
    /// The page no longer fits its block; the parent must split it.
    Overflow(IndexPage),
}

impl<S: PageStore> Tree<'_, S> {
    /// Insert a complete raw key.
    pub fn insert(&mut self, key: &[u8]) -> IndexResult<()> {
        let Some(root) = *self.root else {
            let mut page = self.allocate(false)?;
            let at = locate(self.def, &page, 0)?;
            insert_at(self.def, &mut page, &at, key, None)?;
            self.write(&page)?;
            *self.root = Some(page.addr);
            tracing::trace!(
                target: "btree::insert",
                index = self.index,
                page = page.addr.0,
                "created root leaf"
            );
            return Ok(());
        };
        if let Grown::Overflow(page) = self.insert_into(root, key, 0)? {
            self.grow_root(page)?;
        }
        Ok(())
    }

    fn insert_into(&mut self, addr: PageAddr, key: &[u8], depth: usize) -> IndexResult<Grown> {
        self.check_depth(depth)?;
        let mut page = self.fetch(addr)?;
        let def = self.def;
        let flag = if def.unique {
            SearchFlag::FIND
        } else {
            SearchFlag::SAME
        };
        let at = probe(def, &page, |slot| {
            compare_keys(def, key, slot, KeyLength::Whole, flag) == Ordering::Greater
        })?;
        if let Some(existing) = at.key.as_deref()
            && compare_keys(def, key, existing, KeyLength::Whole, flag) == Ordering::Equal
        {
            let existing = key_pointer(def, existing)
                .ok_or_else(|| corrupt(format!("key on page {} lacks a record pointer", addr.0)))?;
            return Err(IndexError::DuplicateKey {
                index: self.index,
                existing,
            });
        }

        if page.is_internal() {
            let child = child_at(def, &page, at.pos)?;
            match self.insert_into(child, key, depth + 1)? {
                Grown::Done => return Ok(Grown::Done),
                Grown::Overflow(child_page) => self.resolve_overflow(&mut page, &at, child_page)?,
            }
        } else {
            insert_at(def, &mut page, &at, key, None)?;
        }
        self.settle_grown(page)
    }

    /// Store `page` if it fits, otherwise hand it to the parent.
    pub(crate) fn settle_grown(&mut self, page: IndexPage) -> IndexResult<Grown> {
        if page.overflows() {
            return Ok(Grown::Overflow(page));
        }
        self.write(&page)?;
        Ok(Grown::Done)
    }

    /// Fix an overflowing child of `parent` reached through `at`.
    fn resolve_overflow(
        &mut self,
        parent: &mut IndexPage,
        at: &SlotPos,
        child: IndexPage,
    ) -> IndexResult<()> {
        if let KeyLayout::Fixed { .. } = self.def.layout() {
            return self.balance(parent, at, child);
        }
        self.split_child(parent, at, child)
    }

    /// Split `child` in two and insert the promoted key into `parent` at `at`.
    pub(crate) fn split_child(
        &mut self,
        parent: &mut IndexPage,
        at: &SlotPos,
        mut child: IndexPage,
    ) -> IndexResult<()> {
        let Split {
            left,
            separator,
            right,
        } = NodeImage::read(self.def, &child)?.split(self.def)?;
        let mut right_page = self.allocate(right.is_internal())?;
        self.store_image(&left, &mut child)?;
        self.store_image(&right, &mut right_page)?;
        insert_at(self.def, parent, at, &separator, Some(right_page.addr))?;
        tracing::trace!(
            target: "btree::split",
            index = self.index,
            left = child.addr.0,
            right = right_page.addr.0,
            keys = left.slots.len() + right.slots.len() + 1,
            "split page"
        );
        Ok(())
    }

    /// Spread an overflowing fixed-layout child over its sibling.
    ///
    /// The right sibling is used when there is one, the left one otherwise.
    /// When both are full a third page is allocated.
    fn balance(
        &mut self,
        parent: &mut IndexPage,
        at: &SlotPos,
        child: IndexPage,
    ) -> IndexResult<()> {
        let def = self.def;
        let (separator_at, mut left_page, mut right_page) = if at.key.is_some() {
            let right = self.fetch(child_at(def, parent, at.end)?)?;
            (at.clone(), child, right)
        } else {
            let separator_at = locate(def, parent, at.index.saturating_sub(1))?;
            let left = self.fetch(child_at(def, parent, separator_at.pos)?)?;
            (separator_at, left, child)
        };
        let separator = separator_at
            .key
            .clone()
            .ok_or_else(|| corrupt(format!("internal page {} has no separator", parent.addr.0)))?;
        let merged = NodeImage::merge(
            NodeImage::read(def, &left_page)?,
            separator,
            NodeImage::read(def, &right_page)?,
        );
        let internal = merged.node_type == NodeType::Internal;
        let capacity = fixed_capacity(def, internal)
            .ok_or_else(|| corrupt("balancing a packed index"))?;

        remove_at(def, parent, &separator_at)?;
        if merged.slots.len() <= 2 * capacity + 1 {
            let Split {
                left,
                separator,
                right,
            } = merged.split(def)?;
            self.store_image(&left, &mut left_page)?;
            self.store_image(&right, &mut right_page)?;
            let at = locate(def, parent, separator_at.index)?;
            insert_at(def, parent, &at, &separator, Some(right_page.addr))?;
            tracing::trace!(
                target: "btree::balance",
                index = self.index,
                left = left_page.addr.0,
                right = right_page.addr.0,
                "redistributed with sibling"
            );
        } else {
            let (lower, upper_separator, upper) = merged.split_three()?;
            let mut new_page = self.allocate(internal)?;
            self.store_image(&lower.left, &mut left_page)?;
            self.store_image(&lower.right, &mut right_page)?;
            self.store_image(&upper, &mut new_page)?;
            let at = locate(def, parent, separator_at.index)?;
            insert_at(def, parent, &at, &lower.separator, Some(right_page.addr))?;
            let at = locate(def, parent, separator_at.index + 1)?;
            insert_at(def, parent, &at, &upper_separator, Some(new_page.addr))?;
            tracing::trace!(
                target: "btree::balance",
                index = self.index,
                left = left_page.addr.0,
                right = right_page.addr.0,
                new = new_page.addr.0,
                "split two full siblings three ways"
            );
        }
        Ok(())
    }

    /// Split an overflowing root and put a new root above the halves.
    ///
    /// The left half keeps the old root's address.
    pub(crate) fn grow_root(&mut self, mut page: IndexPage) -> IndexResult<()> {
        let Split {
            left,
            separator,
            right,
        } = NodeImage::read(self.def, &page)?.split(self.def)?;
        let mut right_page = self.allocate(right.is_internal())?;
        let mut root_page = self.allocate(true)?;
        self.store_image(&left, &mut page)?;
        self.store_image(&right, &mut right_page)?;
        let mut root = NodeImage::new(NodeType::Internal, Some(page.addr));
        root.slots.push(NodeSlot {
            key: separator,
            child: Some(right_page.addr),
        });
        self.store_image(&root, &mut root_page)?;
        *self.root = Some(root_page.addr);
        tracing::trace!(
            target: "btree::split",
            index = self.index,
            root = root_page.addr.0,
            left = page.addr.0,
            right = right_page.addr.0,
            "grew new root"
        );
        Ok(())
    }
}
