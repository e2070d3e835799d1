
pub mod pretty;

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Byte offset of an index page inside the key file.
/// Examples:
/// - `let first_page = PageAddr(1024);`
/// - `let next_page = PageAddr(1024 + 1024);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageAddr(pub u64);

/// Opaque handle into the record store, stored as the trailing value of a key.
/// Examples:
/// - `let rec = RecordPointer(0);`
/// - `let rec = RecordPointer(4711);`
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordPointer(pub u64);

/// Canonical error type shared across the key-file crates.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("key not found")]
    KeyNotFound,
    #[error("index is empty")]
    EmptyIndex,
    #[error("end of index")]
    EndOfIndex,
    #[error("duplicate key in unique index {index} (existing record {})", .existing.0)]
    DuplicateKey {
        index: usize,
        existing: RecordPointer,
    },
    #[error("index file is full")]
    IndexFull,
    #[error("index crashed: {0}")]
    Crashed(String),
    #[error("invalid key definition: {0}")]
    InvalidDefinition(String),
    #[error("catalog: {0}")]
    Catalog(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl IndexError {
    /// True when the error means the on-disk structure is damaged.
    pub fn is_crashed(&self) -> bool {
        matches!(self, IndexError::Crashed(_))
    }

    /// True for the ordinary "nothing there" outcomes of a search.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            IndexError::KeyNotFound | IndexError::EmptyIndex | IndexError::EndOfIndex
        )
    }
}

/// Result alias that carries an `IndexError`.
pub type IndexResult<T> = Result<T, IndexError>;

/// Runtime configuration for the key-file components.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .block_length(2048)
///     .cache_blocks(64)
///     .build();
/// assert_eq!(config.block_length, 2048);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, bon::Builder)]
pub struct Config {
    /// Page size, in bytes, given to newly defined indexes.
    #[builder(default = 1024)]
    pub block_length: usize,
    /// Number of blocks the page cache keeps resident.
    #[builder(default = 256)]
    pub cache_blocks: usize,
    /// Upper bound on the key file size; allocation beyond it fails with `IndexFull`.
    #[builder(default = 1 << 32)]
    pub max_key_file_length: u64,
    /// Largest record pointer the record store will hand out.
    #[builder(default = u32::MAX as u64)]
    pub max_record_pointer: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            block_length: 1024,
            cache_blocks: 256,
            max_key_file_length: 1 << 32,
            max_record_pointer: u32::MAX as u64,
        }
    }
}

/// One row of a page dump produced by the index diagnostics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSummary {
    pub addr: PageAddr,
    pub depth: usize,
    pub internal: bool,
    pub keys: usize,
    pub used: usize,
    pub block_length: usize,
}

impl PageSummary {
    /// Fill ratio of the page, header included.
    pub fn fill(&self) -> f64 {
        self.used as f64 / self.block_length as f64
    }
}

/// Convenient re-exports for downstream crates.
pub mod prelude {
    pub use crate::{Config, IndexError, IndexResult, PageAddr, PageSummary, RecordPointer};
    pub use types::{KeyType, PointerWidth};
}
