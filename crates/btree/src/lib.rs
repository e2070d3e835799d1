//! Packed B-tree indexes stored in one key file.
//!
//! A key file holds every index of a table. Each index is a B-tree of
//! fixed-size pages whose keys may be space packed and front coded against
//! the previous key on the same page. [`KeyFile`] is the handle callers use:
//! it owns the page store, the catalog of key definitions and the per-index
//! roots, free lists and counters.
//!
//! # Example
//!
//! ```no_run
//! use btree::{KeyFile, ReadMode, pack_search_key};
//! use catalog::{Catalog, KeySegment};
//! use common::{Config, RecordPointer};
//! use types::KeyType;
//!
//! let config = Config::default();
//! let mut catalog = Catalog::new("users");
//! let by_name = catalog
//!     .define_index("by_name", vec![KeySegment::new(KeyType::Text, 0, 8)], true, &config)
//!     .unwrap();
//!
//! let mut file = KeyFile::create("/tmp/users.idx", catalog, &config).unwrap();
//! file.write_record(b"ada     ", RecordPointer(0)).unwrap();
//!
//! let def = file.definition(by_name).unwrap();
//! let (key, length) = pack_search_key(def, &[b"ada".as_slice()]).unwrap();
//! let (record, _cursor) = file.search(by_name, &key, length, ReadMode::Exact).unwrap();
//! assert_eq!(record, RecordPointer(0));
//! ```

mod compare;
mod delete;
mod insert;
mod keycodec;
mod node;
mod page;
mod rank;
mod search;
mod tree;
mod verify;


pub use compare::{KeyLength, SearchFlag, compare_keys};
pub use keycodec::{
    InsertPoint, PackPlan, decode_next, encode_slot, key_part_length, key_pointer, make_key,
    pack_search_key, plan_pack,
};
pub use node::{NodeImage, NodeSlot, NodeType};
pub use search::{Cursor, Direction, ReadMode};
pub use verify::TreeStats;

use std::path::{Path, PathBuf};

use buffer::{FilePager, PageStore};
use catalog::{Catalog, KeyDefinition};
use common::{Config, IndexError, IndexResult, PageAddr, PageSummary, RecordPointer};
use storage::KeyFileState;

use crate::keycodec::check_key;
use crate::tree::Tree;

/// Report structural damage found while decoding or walking pages.
pub(crate) fn corrupt(detail: impl Into<String>) -> IndexError {
    let detail = detail.into();
    tracing::warn!(target: "btree::corrupt", %detail, "index structure damaged");
    IndexError::Crashed(detail)
}

/// An open key file with all indexes of one table.
#[derive(Debug)]
pub struct KeyFile {
    path: PathBuf,
    pager: FilePager,
    catalog: Catalog,
    state: KeyFileState,
}

impl KeyFile {
    /// Create a key file for `catalog`, writing the catalog next to it.
    pub fn create(path: impl AsRef<Path>, catalog: Catalog, config: &Config) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        catalog.save(&Catalog::path_for(&path))?;
        let pager = FilePager::create(&path, config)?;
        let state = KeyFileState::new(*catalog.file_id.as_bytes(), catalog.len());
        let mut file = Self {
            path,
            pager,
            catalog,
            state,
        };
        file.write_state()?;
        tracing::debug!(
            path = %file.path.display(),
            indexes = file.catalog.len(),
            "created key file"
        );
        Ok(file)
    }

    /// Open a key file and the catalog stored next to it.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> IndexResult<Self> {
        let path = path.as_ref().to_path_buf();
        let catalog = Catalog::load(&Catalog::path_for(&path))?;
        let mut pager = FilePager::open(&path, config)?;
        let state = KeyFileState::decode(&pager.read_state()?)?;
        if state.file_id != *catalog.file_id.as_bytes() {
            return Err(corrupt(format!(
                "key file {} does not belong to catalog of table '{}'",
                path.display(),
                catalog.table
            )));
        }
        if state.roots.len() != catalog.len() {
            return Err(corrupt(format!(
                "key file holds {} indexes, catalog defines {}",
                state.roots.len(),
                catalog.len()
            )));
        }
        if state.file_length > pager.file_length() {
            return Err(corrupt(format!(
                "key file is {} bytes, state expects {}",
                pager.file_length(),
                state.file_length
            )));
        }
        tracing::debug!(path = %path.display(), indexes = catalog.len(), "opened key file");
        Ok(Self {
            path,
            pager,
            catalog,
            state,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn definition(&self, index: usize) -> IndexResult<&KeyDefinition> {
        self.catalog.index(index)
    }

    /// Number of keys stored in `index`.
    pub fn key_count(&self, index: usize) -> IndexResult<u64> {
        self.catalog.index(index)?;
        Ok(self.state.key_counts[index])
    }

    /// Root page of `index`, `None` while it is empty.
    pub fn root(&self, index: usize) -> IndexResult<Option<PageAddr>> {
        self.catalog.index(index)?;
        Ok(self.state.roots[index])
    }

    /// Change counter; bumped by every insert and delete.
    pub fn changes(&self) -> u64 {
        self.state.changes
    }

    /// Write dirty pages, then the state block.
    pub fn flush(&mut self) -> IndexResult<()> {
        self.pager.flush()?;
        self.write_state()?;
        self.pager.flush()
    }

    fn write_state(&mut self) -> IndexResult<()> {
        self.state.file_length = self.pager.file_length();
        let block = self.state.encode()?;
        self.pager.write_state(&block)
    }

    fn tree(&mut self, index: usize) -> IndexResult<Tree<'_, FilePager>> {
        let def = self.catalog.index(index)?;
        let (Some(root), Some(free_list)) = (
            self.state.roots.get_mut(index),
            self.state.free_lists.get_mut(index),
        ) else {
            return Err(corrupt(format!("state block has no entry for index {index}")));
        };
        Ok(Tree {
            index,
            def,
            store: &mut self.pager,
            root,
            free_list,
        })
    }

    /// Insert the key `record` yields for `index`.
    pub fn insert(
        &mut self,
        index: usize,
        record: &[u8],
        pointer: RecordPointer,
    ) -> IndexResult<()> {
        let key = make_key(self.catalog.index(index)?, record, pointer)?;
        self.insert_key(index, &key)
    }

    /// Insert a complete raw key, record pointer included.
    pub fn insert_key(&mut self, index: usize, key: &[u8]) -> IndexResult<()> {
        check_key(self.catalog.index(index)?, key)?;
        self.state.changes += 1;
        self.tree(index)?.insert(key)?;
        self.state.key_counts[index] += 1;
        Ok(())
    }

    /// Delete the key `record` yields for `index`.
    pub fn delete(
        &mut self,
        index: usize,
        record: &[u8],
        pointer: RecordPointer,
    ) -> IndexResult<()> {
        let key = make_key(self.catalog.index(index)?, record, pointer)?;
        self.delete_key(index, &key)
    }

    /// Delete a complete raw key. A key that is not stored means the index is damaged.
    pub fn delete_key(&mut self, index: usize, key: &[u8]) -> IndexResult<()> {
        check_key(self.catalog.index(index)?, key)?;
        self.state.changes += 1;
        self.tree(index)?.delete(key)?;
        let count = &mut self.state.key_counts[index];
        *count = count
            .checked_sub(1)
            .ok_or_else(|| corrupt(format!("key count of index {index} dropped below zero")))?;
        Ok(())
    }

    /// Insert the keys of `record` into every index.
    ///
    /// When index `k` fails, the keys already added to indexes `0..k` are
    /// removed again and the error for `k` is returned.
    pub fn write_record(&mut self, record: &[u8], pointer: RecordPointer) -> IndexResult<()> {
        for index in 0..self.catalog.len() {
            if let Err(err) = self.insert(index, record, pointer) {
                for done in (0..index).rev() {
                    if let Err(undo) = self.delete(done, record, pointer) {
                        tracing::warn!(
                            index = done,
                            error = %undo,
                            "rollback of inserted key failed"
                        );
                    }
                }
                return Err(err);
            }
        }
        Ok(())
    }

    /// Remove the keys of `record` from every index.
    pub fn delete_record(&mut self, record: &[u8], pointer: RecordPointer) -> IndexResult<()> {
        for index in 0..self.catalog.len() {
            self.delete(index, record, pointer)?;
        }
        Ok(())
    }

    /// Move a record's keys from `old` to `new` in the indexes where they differ.
    ///
    /// On failure every index already moved is put back.
    pub fn update_record(
        &mut self,
        old: &[u8],
        new: &[u8],
        pointer: RecordPointer,
    ) -> IndexResult<()> {
        let mut moved: Vec<(usize, Vec<u8>, Vec<u8>)> = Vec::new();
        for index in 0..self.catalog.len() {
            let def = self.catalog.index(index)?;
            let old_key = make_key(def, old, pointer)?;
            let new_key = make_key(def, new, pointer)?;
            if old_key == new_key {
                continue;
            }
            if let Err(err) = self.move_key(index, &old_key, &new_key) {
                for (done, new_key, old_key) in moved.into_iter().rev() {
                    if let Err(undo) = self
                        .delete_key(done, &new_key)
                        .and_then(|()| self.insert_key(done, &old_key))
                    {
                        tracing::warn!(
                            index = done,
                            error = %undo,
                            "rollback of updated key failed"
                        );
                    }
                }
                return Err(err);
            }
            moved.push((index, new_key, old_key));
        }
        Ok(())
    }

    fn move_key(&mut self, index: usize, old_key: &[u8], new_key: &[u8]) -> IndexResult<()> {
        self.delete_key(index, old_key)?;
        if let Err(err) = self.insert_key(index, new_key) {
            if let Err(undo) = self.insert_key(index, old_key) {
                tracing::warn!(index, error = %undo, "restoring original key failed");
            }
            return Err(err);
        }
        Ok(())
    }

    /// Search `index` for `key`, compared over `length`.
    pub fn search(
        &mut self,
        index: usize,
        key: &[u8],
        length: KeyLength,
        mode: ReadMode,
    ) -> IndexResult<(RecordPointer, Cursor)> {
        let changes = self.state.changes;
        let cursor = self.tree(index)?.search(key, length, mode, changes)?;
        Ok((cursor.record(), cursor))
    }

    /// Smallest key of `index`.
    pub fn search_first(&mut self, index: usize) -> IndexResult<(RecordPointer, Cursor)> {
        let changes = self.state.changes;
        let cursor = self.tree(index)?.first(changes)?;
        Ok((cursor.record(), cursor))
    }

    /// Largest key of `index`.
    pub fn search_last(&mut self, index: usize) -> IndexResult<(RecordPointer, Cursor)> {
        let changes = self.state.changes;
        let cursor = self.tree(index)?.last(changes)?;
        Ok((cursor.record(), cursor))
    }

    /// Key next to `cursor` in `direction`.
    pub fn search_next(
        &mut self,
        cursor: &Cursor,
        direction: Direction,
    ) -> IndexResult<(RecordPointer, Cursor)> {
        let changes = self.state.changes;
        let next = self.tree(cursor.index())?.step(cursor, direction, changes)?;
        Ok((next.record(), next))
    }

    /// Next key whose first `prefix` bytes equal those of `cursor`'s key.
    pub fn search_next_same(
        &mut self,
        cursor: &Cursor,
        prefix: usize,
    ) -> IndexResult<(RecordPointer, Cursor)> {
        let changes = self.state.changes;
        let next = self.tree(cursor.index())?.step_same(cursor, prefix, changes)?;
        Ok((next.record(), next))
    }

    /// Estimated fraction of the keys of `index` ordered before `key`.
    ///
    /// `None` is the start of the index.
    pub fn approximate_rank(
        &mut self,
        index: usize,
        key: Option<(&[u8], KeyLength)>,
    ) -> IndexResult<f64> {
        let Some((key, length)) = key else {
            return Ok(0.0);
        };
        self.tree(index)?.rank(Some(key), length, SearchFlag::FIND)
    }

    /// Estimated number of keys from `min` up to and including `max`.
    ///
    /// Open bounds stand for the start and end of the index.
    pub fn records_in_range(
        &mut self,
        index: usize,
        min: Option<(&[u8], KeyLength)>,
        max: Option<(&[u8], KeyLength)>,
    ) -> IndexResult<u64> {
        let count = self.key_count(index)?;
        if count == 0 {
            return Ok(0);
        }
        let low = self.approximate_rank(index, min)?;
        let high = match max {
            Some((key, length)) => {
                let flag = SearchFlag::BIGGER | SearchFlag::NO_FIND;
                self.tree(index)?.rank(Some(key), length, flag)?
            }
            None => 1.0,
        };
        if high < low {
            return Ok(0);
        }
        let estimate = ((high - low) * count as f64).round() as u64;
        Ok(estimate.clamp(1, count))
    }

    /// Check the structure of `index` against its key count.
    pub fn verify(&mut self, index: usize) -> IndexResult<TreeStats> {
        let stats = self.tree(index)?.verify()?;
        let expected = self.state.key_counts[index];
        if stats.keys != expected {
            return Err(corrupt(format!(
                "index {index} holds {} keys, state records {expected}",
                stats.keys
            )));
        }
        Ok(stats)
    }

    /// Page by page summary of `index`, breadth first.
    pub fn describe(&mut self, index: usize) -> IndexResult<Vec<PageSummary>> {
        self.tree(index)?.describe()
    }
}

impl Drop for KeyFile {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            tracing::warn!(path = %self.path.display(), error = %err, "flush on close failed");
        }
    }
}
