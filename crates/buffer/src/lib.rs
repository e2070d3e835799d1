//! Page store for the key file: block cache, file I/O and free lists.
//!
//! The page store sits between the index algorithms and the key file:
//! - LRU-based in-memory block cache with write-back of dirty blocks
//! - Page allocation that reuses freed pages before growing the file
//! - Enforcement of the configured maximum key file length
//!
//! # Example
//!
//! ```no_run
//! use buffer::{FilePager, PageStore};
//! use common::Config;
//! use storage::IndexPage;
//!
//! let mut pager = FilePager::create("/tmp/users.idx", &Config::default()).unwrap();
//! let mut free_list = None;
//!
//! let addr = pager.allocate(&mut free_list, 1024).unwrap();
//! let page = IndexPage::new(addr, 1024, false);
//! pager.write(&page).unwrap();
//! pager.flush().unwrap();
//! ```

#[cfg(test)]
mod tests;

use common::{Config, IndexError, IndexResult, PageAddr};
use hashbrown::HashSet;
use lru::LruCache;
use std::{
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    num::NonZeroUsize,
    path::Path,
};
use storage::{BLOCK_UNIT, IndexPage, STATE_BLOCK_LEN, decode_free_link, encode_free_link};

/// Abstraction for fetching, writing, allocating and freeing index pages.
///
/// The index algorithms never touch the file directly. Free-list heads are
/// owned by the caller and passed in, so one store can serve several indexes.
pub trait PageStore {
    /// Fetch the page at `addr`, validating its header.
    fn fetch(&mut self, addr: PageAddr, block_length: usize) -> IndexResult<IndexPage>;

    /// Store a page image; it reaches disk on eviction or `flush`.
    fn write(&mut self, page: &IndexPage) -> IndexResult<()>;

    /// Pop a page off `free_list`, or extend the file by one block.
    fn allocate(
        &mut self,
        free_list: &mut Option<PageAddr>,
        block_length: usize,
    ) -> IndexResult<PageAddr>;

    /// Push `addr` onto `free_list`, overwriting the page with the old head.
    fn free(
        &mut self,
        free_list: &mut Option<PageAddr>,
        addr: PageAddr,
        block_length: usize,
    ) -> IndexResult<()>;

    /// Read the state block at the start of the file.
    fn read_state(&mut self) -> IndexResult<Vec<u8>>;

    /// Overwrite the state block.
    fn write_state(&mut self, block: &[u8]) -> IndexResult<()>;

    /// Current length of the key file, including unflushed allocations.
    fn file_length(&self) -> u64;

    /// Write all dirty blocks to disk.
    fn flush(&mut self) -> IndexResult<()>;
}

/// File-backed page store with LRU eviction.
///
/// Blocks are cached by address. Dirty blocks are written back when evicted
/// or on an explicit flush.
#[derive(Debug)]
pub struct FilePager {
    file: File,
    max_blocks: usize,
    max_file_length: u64,
    file_length: u64,
    cache: LruCache<PageAddr, Vec<u8>>,
    dirty: HashSet<PageAddr>,
}

/// LRU capacity from the config.
fn cache_capacity(config: &Config) -> IndexResult<NonZeroUsize> {
    NonZeroUsize::new(config.cache_blocks).ok_or_else(|| {
        IndexError::InvalidDefinition("cache_blocks must be greater than zero".into())
    })
}

impl FilePager {
    /// Create a new, empty key file holding only a zeroed state block.
    ///
    /// A config with `cache_blocks == 0` is rejected before the file is touched.
    pub fn create(path: impl AsRef<Path>, config: &Config) -> IndexResult<Self> {
        let capacity = cache_capacity(config)?;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.write_all(&[0u8; STATE_BLOCK_LEN])?;
        Ok(Self::with_file(file, STATE_BLOCK_LEN as u64, capacity, config))
    }

    /// Open an existing key file.
    pub fn open(path: impl AsRef<Path>, config: &Config) -> IndexResult<Self> {
        let capacity = cache_capacity(config)?;
        let path = path.as_ref();
        if !path.exists() {
            return Err(IndexError::Crashed(format!(
                "key file does not exist: {}",
                path.display()
            )));
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        let file_length = file.metadata()?.len();
        if file_length < STATE_BLOCK_LEN as u64 {
            return Err(IndexError::Crashed("key file is shorter than its state block".into()));
        }
        Ok(Self::with_file(file, file_length, capacity, config))
    }

    fn with_file(file: File, file_length: u64, capacity: NonZeroUsize, config: &Config) -> Self {
        Self {
            file,
            max_blocks: capacity.get(),
            max_file_length: config.max_key_file_length,
            file_length,
            cache: LruCache::new(capacity),
            dirty: HashSet::new(),
        }
    }

    fn check_addr(&self, addr: PageAddr, block_length: usize) -> IndexResult<()> {
        let aligned = addr.0 % BLOCK_UNIT as u64 == 0;
        if !aligned
            || addr.0 < STATE_BLOCK_LEN as u64
            || addr.0 + block_length as u64 > self.file_length
        {
            return Err(IndexError::Crashed(format!(
                "page address {} outside key file of {} bytes",
                addr.0, self.file_length
            )));
        }
        Ok(())
    }

    /// Return the block at `addr`, loading it from disk on a cache miss.
    fn load_block(&mut self, addr: PageAddr, block_length: usize) -> IndexResult<&[u8]> {
        if !self.cache.contains(&addr) {
            let mut buf = vec![0u8; block_length];
            self.file.seek(SeekFrom::Start(addr.0))?;
            let n = self.file.read(&mut buf)?;
            if n < block_length {
                // Allocated but never flushed past the old end of file.
                buf[n..].fill(0);
            }
            self.evict_if_needed()?;
            self.cache.push(addr, buf);
        }
        self.cache
            .get(&addr)
            .map(Vec::as_slice)
            .ok_or_else(|| IndexError::Crashed(format!("page {} vanished from cache", addr.0)))
    }

    fn store_block(&mut self, addr: PageAddr, block: Vec<u8>) -> IndexResult<()> {
        if !self.cache.contains(&addr) {
            self.evict_if_needed()?;
        }
        self.cache.push(addr, block);
        self.dirty.insert(addr);
        Ok(())
    }

    fn write_block(&mut self, addr: PageAddr, block: &[u8]) -> IndexResult<()> {
        self.file.seek(SeekFrom::Start(addr.0))?;
        self.file.write_all(block)?;
        Ok(())
    }

    /// Evict the least recently used block if the cache is full.
    ///
    /// If the evicted block is dirty, it is written to disk first.
    fn evict_if_needed(&mut self) -> IndexResult<()> {
        if self.cache.len() < self.max_blocks {
            return Ok(());
        }

        if let Some((addr, block)) = self.cache.pop_lru()
            && self.dirty.remove(&addr)
        {
            self.write_block(addr, &block)?;
        }

        Ok(())
    }
}

impl PageStore for FilePager {
    fn fetch(&mut self, addr: PageAddr, block_length: usize) -> IndexResult<IndexPage> {
        self.check_addr(addr, block_length)?;
        let block = self.load_block(addr, block_length)?;
        if block.len() != block_length {
            return Err(IndexError::Crashed(format!(
                "page {} cached with {} bytes, expected {block_length}",
                addr.0,
                block.len()
            )));
        }
        IndexPage::from_block(addr, block)
    }

    fn write(&mut self, page: &IndexPage) -> IndexResult<()> {
        self.check_addr(page.addr, page.block_length())?;
        let block = page.to_block()?;
        self.store_block(page.addr, block)
    }

    fn allocate(
        &mut self,
        free_list: &mut Option<PageAddr>,
        block_length: usize,
    ) -> IndexResult<PageAddr> {
        if let Some(addr) = *free_list {
            self.check_addr(addr, block_length)?;
            let next = decode_free_link(self.load_block(addr, block_length)?)?;
            tracing::trace!(target: "buffer::free_list", page = addr.0, "reusing freed page");
            *free_list = next;
            return Ok(addr);
        }

        let addr = PageAddr(self.file_length);
        if addr.0 + block_length as u64 > self.max_file_length {
            return Err(IndexError::IndexFull);
        }
        self.file_length += block_length as u64;
        self.store_block(addr, vec![0u8; block_length])?;
        tracing::trace!(target: "buffer::allocate", page = addr.0, "extended key file");
        Ok(addr)
    }

    fn free(
        &mut self,
        free_list: &mut Option<PageAddr>,
        addr: PageAddr,
        block_length: usize,
    ) -> IndexResult<()> {
        self.check_addr(addr, block_length)?;
        self.store_block(addr, encode_free_link(*free_list, block_length))?;
        *free_list = Some(addr);
        tracing::trace!(target: "buffer::free_list", page = addr.0, "freed page");
        Ok(())
    }

    fn read_state(&mut self) -> IndexResult<Vec<u8>> {
        let mut block = vec![0u8; STATE_BLOCK_LEN];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut block)?;
        Ok(block)
    }

    fn write_state(&mut self, block: &[u8]) -> IndexResult<()> {
        self.write_block(PageAddr(0), block)
    }

    fn file_length(&self) -> u64 {
        self.file_length
    }

    fn flush(&mut self) -> IndexResult<()> {
        let dirty: Vec<_> = self.dirty.iter().copied().collect();
        for addr in dirty {
            if let Some(block) = self.cache.peek(&addr).cloned() {
                self.write_block(addr, &block)?;
                self.dirty.remove(&addr);
            }
        }
        self.file.flush()?;
        Ok(())
    }
}
