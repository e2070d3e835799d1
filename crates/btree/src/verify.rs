//! Read-only consistency checks and page dumps.

use std::cmp::Ordering;
use std::collections::VecDeque;

use buffer::PageStore;
use common::{IndexResult, PageAddr, PageSummary};
use serde::Serialize;

use crate::compare::{KeyLength, SearchFlag, compare_keys};
use crate::corrupt;
use crate::node::NodeImage;
use crate::tree::Tree;

/// Shape of a verified tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TreeStats {
    /// Levels from the root to the leaves; 0 for an empty index.
    pub depth: usize,
    pub internal_pages: usize,
    pub leaf_pages: usize,
    pub keys: u64,
    /// Lowest fill among non-root pages, or the root's fill for a one-page tree.
    pub min_fill: f64,
    pub max_fill: f64,
}

impl TreeStats {
    pub fn pages(&self) -> usize {
        self.internal_pages + self.leaf_pages
    }

    fn record_fill(&mut self, fill: f64, root: bool) {
        if !root {
            self.min_fill = self.min_fill.min(fill);
        }
        self.max_fill = self.max_fill.max(fill);
    }
}

/// Key range a subtree must stay within.
struct Bounds<'b> {
    lower: Option<&'b [u8]>,
    upper: Option<&'b [u8]>,
}

impl<S: PageStore> Tree<'_, S> {
    /// Walk the whole tree and check order, depth and page sanity.
    pub fn verify(&mut self) -> IndexResult<TreeStats> {
        let mut stats = TreeStats::default();
        let Some(root) = *self.root else {
            return Ok(stats);
        };
        let bounds = Bounds {
            lower: None,
            upper: None,
        };
        let mut leaf_depth = None;
        stats.min_fill = f64::INFINITY;
        self.verify_page(root, 1, &bounds, &mut leaf_depth, &mut stats)?;
        if stats.pages() == 1 {
            stats.min_fill = stats.max_fill;
        }
        stats.depth = leaf_depth.unwrap_or(0);
        Ok(stats)
    }

    fn verify_page(
        &mut self,
        addr: PageAddr,
        depth: usize,
        bounds: &Bounds<'_>,
        leaf_depth: &mut Option<usize>,
        stats: &mut TreeStats,
    ) -> IndexResult<()> {
        self.check_depth(depth)?;
        let page = self.fetch(addr)?;
        let def = self.def;
        let image = NodeImage::read(def, &page)?;
        if image.slots.is_empty() {
            return Err(corrupt(format!("page {} holds no keys", addr.0)));
        }

        let ordered = |a: &[u8], b: &[u8]| {
            compare_keys(def, a, b, KeyLength::Whole, SearchFlag::SAME) == Ordering::Less
        };
        let mut prev = bounds.lower;
        for slot in &image.slots {
            if let Some(prev) = prev
                && !ordered(prev, &slot.key)
            {
                return Err(corrupt(format!("keys out of order on page {}", addr.0)));
            }
            prev = Some(&slot.key);
        }
        if let (Some(last), Some(upper)) = (prev, bounds.upper)
            && !ordered(last, upper)
        {
            return Err(corrupt(format!("page {} reaches past its parent's key", addr.0)));
        }

        if page.is_internal() {
            stats.internal_pages += 1;
        } else {
            stats.leaf_pages += 1;
        }
        stats.keys += image.slots.len() as u64;
        stats.record_fill(page.used_length() as f64 / page.block_length() as f64, depth == 1);

        if !page.is_internal() {
            match *leaf_depth {
                None => *leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(corrupt(format!(
                        "leaf {} at depth {depth}, expected {expected}",
                        addr.0
                    )));
                }
                Some(_) => {}
            }
            return Ok(());
        }

        let first = image
            .first_child
            .ok_or_else(|| corrupt(format!("internal page {} lacks a first child", addr.0)))?;
        let mut child = first;
        let mut lower = bounds.lower;
        for slot in &image.slots {
            let upper = Some(slot.key.as_slice());
            self.verify_page(child, depth + 1, &Bounds { lower, upper }, leaf_depth, stats)?;
            child = slot
                .child
                .ok_or_else(|| corrupt(format!("slot on page {} lacks a child", addr.0)))?;
            lower = upper;
        }
        let last = Bounds {
            lower,
            upper: bounds.upper,
        };
        self.verify_page(child, depth + 1, &last, leaf_depth, stats)
    }

    /// One summary per page, breadth first from the root.
    pub fn describe(&mut self) -> IndexResult<Vec<PageSummary>> {
        let mut summaries = Vec::new();
        let mut queue: VecDeque<(PageAddr, usize)> =
            self.root.iter().map(|addr| (*addr, 0)).collect();
        while let Some((addr, depth)) = queue.pop_front() {
            self.check_depth(depth)?;
            let page = self.fetch(addr)?;
            let image = NodeImage::read(self.def, &page)?;
            if image.is_internal() {
                queue.extend(image.first_child.map(|c| (c, depth + 1)));
                queue.extend(image.slots.iter().filter_map(|s| s.child).map(|c| (c, depth + 1)));
            }
            summaries.push(PageSummary {
                addr,
                depth,
                internal: image.is_internal(),
                keys: image.slots.len(),
                used: page.used_length(),
                block_length: page.block_length(),
            });
        }
        Ok(summaries)
    }
}
