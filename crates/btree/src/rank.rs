//! Approximate position of a key among all keys of an index.

use std::cmp::Ordering;

use buffer::PageStore;
use common::{IndexResult, PageAddr};

use crate::compare::{KeyLength, SearchFlag, compare_keys};
use crate::page::{child_at, probe, slot_count};
use crate::tree::Tree;

impl<S: PageStore> Tree<'_, S> {
    /// Fraction of keys ordered before `key`, in `[0, 1]`.
    ///
    /// Each level contributes the slot the search passes through; subtrees
    /// are assumed to hold equally many keys. `None` stands for the start of
    /// the index.
    pub fn rank(
        &mut self,
        key: Option<&[u8]>,
        length: KeyLength,
        flag: SearchFlag,
    ) -> IndexResult<f64> {
        let (Some(key), Some(root)) = (key, *self.root) else {
            return Ok(0.0);
        };
        let rank = self.rank_below(root, key, length, flag, 0)?;
        Ok(rank.clamp(0.0, 1.0))
    }

    fn rank_below(
        &mut self,
        addr: PageAddr,
        key: &[u8],
        length: KeyLength,
        flag: SearchFlag,
        depth: usize,
    ) -> IndexResult<f64> {
        self.check_depth(depth)?;
        let page = self.fetch(addr)?;
        let def = self.def;
        let n = slot_count(def, &page)?;
        let at = probe(def, &page, |slot| {
            compare_keys(def, key, slot, length, flag) == Ordering::Greater
        })?;
        if page.is_internal() {
            let child = child_at(def, &page, at.pos)?;
            let below = self.rank_below(child, key, length, flag, depth + 1)?;
            return Ok((at.index as f64 + below) / (n + 1) as f64);
        }
        if n == 0 {
            return Ok(0.0);
        }
        Ok(at.index as f64 / n as f64)
    }
}
