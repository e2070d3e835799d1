//! Descent from the root to a key or to the nearest key on either side.

use std::cmp::Ordering;

use buffer::PageStore;
use catalog::KeyDefinition;
use common::{IndexError, IndexResult, PageAddr, RecordPointer};
use storage::IndexPage;

use crate::compare::{KeyLength, SearchFlag, compare_keys};
use crate::corrupt;
use crate::keycodec::{decode_next, key_pointer};
use crate::page::{
    SlotPos, child_at, first_slot, last_slot_pos, locate, probe, slot_before, slot_count,
};
use crate::tree::Tree;

/// Which key a search lands on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadMode {
    /// A key equal to the search key.
    Exact,
    /// The first key not below the search key.
    KeyOrNext,
    /// The first key above the search key.
    After,
    /// The last key not above the search key.
    KeyOrPrev,
    /// The last key below the search key.
    Before,
    /// The last key starting with the search key.
    PrefixLast,
}

impl ReadMode {
    /// Comparator flags used while descending.
    pub fn flag(self) -> SearchFlag {
        match self {
            ReadMode::Exact | ReadMode::PrefixLast => SearchFlag::FIND,
            ReadMode::KeyOrNext => SearchFlag::FIND | SearchFlag::BIGGER,
            ReadMode::After => SearchFlag::BIGGER | SearchFlag::NO_FIND,
            ReadMode::KeyOrPrev => SearchFlag::FIND | SearchFlag::SMALLER,
            ReadMode::Before => SearchFlag::SMALLER | SearchFlag::NO_FIND,
        }
    }

    fn backward(self) -> bool {
        matches!(self, ReadMode::KeyOrPrev | ReadMode::Before | ReadMode::PrefixLast)
    }

    fn must_match(self) -> bool {
        matches!(self, ReadMode::Exact | ReadMode::PrefixLast)
    }
}

/// Step direction for `search_next`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Next,
    Prev,
}

/// A located key together with the page it was found on.
///
/// Valid for stepping without a new descent as long as the key file's change
/// counter still matches `changes`.
#[derive(Clone, Debug)]
pub struct Cursor {
    pub(crate) index: usize,
    pub(crate) key: Vec<u8>,
    pub(crate) record: RecordPointer,
    pub(crate) page: IndexPage,
    pub(crate) pos: usize,
    pub(crate) next_pos: usize,
    pub(crate) last_pos: usize,
    pub(crate) changes: u64,
}

impl Cursor {
    /// Index the cursor belongs to.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Raw key of the current position, record pointer included.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn record(&self) -> RecordPointer {
        self.record
    }

    /// Page holding the current key.
    pub fn page_addr(&self) -> PageAddr {
        self.page.addr
    }

    /// Change counter value at capture.
    pub fn changes(&self) -> u64 {
        self.changes
    }

    /// Offsets of the current slot, the next slot and the page's last slot.
    pub fn offsets(&self) -> (usize, usize, usize) {
        (self.pos, self.next_pos, self.last_pos)
    }

    fn retained_leaf(&self, changes: u64) -> bool {
        self.changes == changes && !self.page.is_internal()
    }
}

/// Page and slot where a search stopped.
pub(crate) struct Found {
    pub page: IndexPage,
    pub at: SlotPos,
}

impl Found {
    fn key(&self) -> IndexResult<&[u8]> {
        self.at
            .key
            .as_deref()
            .ok_or_else(|| corrupt("search stopped past the last slot"))
    }

    fn into_cursor(self, def: &KeyDefinition, index: usize, changes: u64) -> IndexResult<Cursor> {
        let key = self.key()?.to_vec();
        let record = key_pointer(def, &key)
            .ok_or_else(|| {
                corrupt(format!("key on page {} lacks a record pointer", self.page.addr.0))
            })?;
        let last_pos = last_slot_pos(def, &self.page)?.unwrap_or(self.at.pos);
        Ok(Cursor {
            index,
            key,
            record,
            pos: self.at.pos,
            next_pos: self.at.end,
            last_pos,
            page: self.page,
            changes,
        })
    }
}

impl<S: PageStore> Tree<'_, S> {
    fn root_addr(&self) -> IndexResult<PageAddr> {
        (*self.root).ok_or(IndexError::EmptyIndex)
    }

    /// First key at or after the position selected by `flag`.
    fn seek_forward(
        &mut self,
        addr: PageAddr,
        key: &[u8],
        length: KeyLength,
        flag: SearchFlag,
        depth: usize,
    ) -> IndexResult<Option<Found>> {
        self.check_depth(depth)?;
        let page = self.fetch(addr)?;
        let def = self.def;
        let at = probe(def, &page, |slot| {
            compare_keys(def, key, slot, length, flag) == Ordering::Greater
        })?;
        if page.is_internal() {
            let child = child_at(def, &page, at.pos)?;
            if let Some(found) = self.seek_forward(child, key, length, flag, depth + 1)? {
                return Ok(Some(found));
            }
        }
        Ok(at.key.is_some().then_some(Found { page, at }))
    }

    /// Last key before the position selected by `flag`.
    fn seek_backward(
        &mut self,
        addr: PageAddr,
        key: &[u8],
        length: KeyLength,
        flag: SearchFlag,
        depth: usize,
    ) -> IndexResult<Option<Found>> {
        self.check_depth(depth)?;
        let page = self.fetch(addr)?;
        let def = self.def;
        let at = probe(def, &page, |slot| {
            compare_keys(def, key, slot, length, flag) != Ordering::Less
        })?;
        if page.is_internal() {
            let child = child_at(def, &page, at.pos)?;
            if let Some(found) = self.seek_backward(child, key, length, flag, depth + 1)? {
                return Ok(Some(found));
            }
        }
        if at.index == 0 {
            return Ok(None);
        }
        let at = locate(def, &page, at.index - 1)?;
        Ok(Some(Found { page, at }))
    }

    /// Search in `mode`, returning the located key.
    pub fn search(
        &mut self,
        key: &[u8],
        length: KeyLength,
        mode: ReadMode,
        changes: u64,
    ) -> IndexResult<Cursor> {
        let root = self.root_addr()?;
        let flag = mode.flag();
        let found = if mode.backward() {
            self.seek_backward(root, key, length, flag, 0)?
        } else {
            self.seek_forward(root, key, length, flag, 0)?
        };
        let found = found.ok_or(IndexError::KeyNotFound)?;
        if mode.must_match()
            && compare_keys(self.def, key, found.key()?, length, SearchFlag::FIND)
                != Ordering::Equal
        {
            return Err(IndexError::KeyNotFound);
        }
        found.into_cursor(self.def, self.index, changes)
    }

    /// Smallest key of the index.
    pub fn first(&mut self, changes: u64) -> IndexResult<Cursor> {
        let def = self.def;
        let mut addr = self.root_addr()?;
        let mut depth = 0;
        loop {
            self.check_depth(depth)?;
            let page = self.fetch(addr)?;
            if page.is_internal() {
                addr = child_at(def, &page, first_slot(def, true))?;
                depth += 1;
                continue;
            }
            let at = locate(def, &page, 0)?;
            if at.key.is_none() {
                return Err(corrupt(format!("leaf page {} is empty", page.addr.0)));
            }
            return Found { page, at }.into_cursor(def, self.index, changes);
        }
    }

    /// Largest key of the index.
    pub fn last(&mut self, changes: u64) -> IndexResult<Cursor> {
        let def = self.def;
        let mut addr = self.root_addr()?;
        let mut depth = 0;
        loop {
            self.check_depth(depth)?;
            let page = self.fetch(addr)?;
            if page.is_internal() {
                addr = child_at(def, &page, page.used_length())?;
                depth += 1;
                continue;
            }
            let n = slot_count(def, &page)?;
            if n == 0 {
                return Err(corrupt(format!("leaf page {} is empty", page.addr.0)));
            }
            let at = locate(def, &page, n - 1)?;
            return Found { page, at }.into_cursor(def, self.index, changes);
        }
    }

    /// Step from `cursor` to the neighbouring key.
    ///
    /// Reuses the retained leaf when nothing changed since the cursor was
    /// taken; otherwise searches again from the root for the cursor's key.
    pub fn step(
        &mut self,
        cursor: &Cursor,
        direction: Direction,
        changes: u64,
    ) -> IndexResult<Cursor> {
        let def = self.def;
        if cursor.retained_leaf(changes) {
            let page = &cursor.page;
            match direction {
                Direction::Next if cursor.next_pos < page.used_length() => {
                    let (key, _, end) =
                        decode_next(def, false, page.data(), cursor.next_pos, Some(&cursor.key))?;
                    let at = SlotPos {
                        index: 0,
                        pos: cursor.next_pos,
                        end,
                        prev: Some(cursor.key.clone()),
                        key: Some(key),
                    };
                    let found = Found {
                        page: page.clone(),
                        at,
                    };
                    let mut next = found.into_cursor(def, self.index, changes)?;
                    next.last_pos = cursor.last_pos;
                    return Ok(next);
                }
                Direction::Prev => {
                    if let Some(at) = slot_before(def, page, cursor.pos)? {
                        let found = Found {
                            page: page.clone(),
                            at,
                        };
                        return found.into_cursor(def, self.index, changes);
                    }
                }
                Direction::Next => {}
            }
        }

        let root = self.root_addr()?;
        let found = match direction {
            Direction::Next => {
                let flag = SearchFlag::SAME | SearchFlag::BIGGER;
                self.seek_forward(root, &cursor.key, KeyLength::Whole, flag, 0)?
            }
            Direction::Prev => {
                let flag = SearchFlag::SAME | SearchFlag::SMALLER;
                self.seek_backward(root, &cursor.key, KeyLength::Whole, flag, 0)?
            }
        };
        found
            .ok_or(IndexError::EndOfIndex)?
            .into_cursor(def, self.index, changes)
    }

    /// Step forward while the first `prefix` bytes of the key stay the same.
    pub fn step_same(
        &mut self,
        cursor: &Cursor,
        prefix: usize,
        changes: u64,
    ) -> IndexResult<Cursor> {
        let next = self.step(cursor, Direction::Next, changes)?;
        let same = compare_keys(
            self.def,
            &cursor.key,
            &next.key,
            KeyLength::Prefix(prefix),
            SearchFlag::FIND,
        );
        if same != Ordering::Equal {
            return Err(IndexError::EndOfIndex);
        }
        Ok(next)
    }
}
