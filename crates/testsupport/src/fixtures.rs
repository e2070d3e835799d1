//! Common test fixtures: temporary key files, key definitions and records.

use std::path::PathBuf;

use btree::{Direction, KeyFile};
use catalog::{Catalog, KeyDefinition, KeySegment, SegmentFlags};
use common::{Config, IndexError, IndexResult, RecordPointer};
use tempfile::TempDir;
use types::KeyType;

/// A key file living in its own temporary directory.
///
/// The handle is declared before the directory so it is closed first.
pub struct TestKeyFile {
    pub file: KeyFile,
    pub path: PathBuf,
    pub config: Config,
    dir: TempDir,
}

impl TestKeyFile {
    /// Create a key file holding `definitions`, in index order.
    ///
    /// # Panics
    ///
    /// Panics if the definitions cannot be registered or the file cannot be created.
    pub fn new(definitions: Vec<KeyDefinition>) -> Self {
        Self::with_config(definitions, Config::default())
    }

    pub fn with_config(definitions: Vec<KeyDefinition>, config: Config) -> Self {
        let dir = TempDir::new().expect("create temp dir");
        let path = dir.path().join("table.idx");
        let mut catalog = Catalog::new("table");
        for def in definitions {
            catalog.add_index(def).expect("register key definition");
        }
        let file = KeyFile::create(&path, catalog, &config).expect("create key file");
        Self {
            file,
            path,
            config,
            dir,
        }
    }

    /// Close the key file and open it again from disk.
    pub fn reopen(self) -> IndexResult<Self> {
        let Self {
            mut file,
            path,
            config,
            dir,
        } = self;
        file.flush()?;
        drop(file);
        let file = KeyFile::open(&path, &config)?;
        Ok(Self {
            file,
            path,
            config,
            dir,
        })
    }

    pub fn dir(&self) -> &TempDir {
        &self.dir
    }
}

/// Configuration with 512 byte pages, so a few hundred keys build a deep tree.
pub fn small_pages() -> Config {
    Config::builder().block_length(512).cache_blocks(32).build()
}

/// Unpacked six digit decimal number stored as text.
pub fn numeric_key(name: &str, unique: bool, config: &Config) -> KeyDefinition {
    KeyDefinition::new(name, vec![KeySegment::new(KeyType::Num, 0, 6)], unique, config)
        .expect("numeric key definition")
}

/// Text column of `length` bytes, space packed and front coded.
pub fn packed_text_key(name: &str, length: usize, unique: bool, config: &Config) -> KeyDefinition {
    let flags = SegmentFlags::SPACE_PACK | SegmentFlags::PACK_KEY;
    let segment = KeySegment::new(KeyType::Text, 0, length).with_flags(flags);
    KeyDefinition::new(name, vec![segment], unique, config).expect("packed text key definition")
}

/// Text column of `length` bytes with the given packing flags.
pub fn text_key(
    name: &str,
    length: usize,
    flags: SegmentFlags,
    unique: bool,
    config: &Config,
) -> KeyDefinition {
    let segment = KeySegment::new(KeyType::Text, 0, length).with_flags(flags);
    KeyDefinition::new(name, vec![segment], unique, config).expect("text key definition")
}

/// Four byte text code followed by a little-endian `u32` sequence number.
pub fn composite_key(name: &str, unique: bool, config: &Config) -> KeyDefinition {
    let segments = vec![
        KeySegment::new(KeyType::Text, 0, 4).with_flags(SegmentFlags::SPACE_PACK),
        KeySegment::new(KeyType::UInt32, 4, 4),
    ];
    KeyDefinition::new(name, segments, unique, config).expect("composite key definition")
}

/// `n` as zero padded decimal text of `width` digits.
pub fn numeric_record(n: u64, width: usize) -> Vec<u8> {
    format!("{n:0width$}").into_bytes()
}

/// `text` padded with spaces to `width` bytes.
pub fn text_record(text: &str, width: usize) -> Vec<u8> {
    format!("{text:<width$}").into_bytes()
}

/// Record matching [`composite_key`].
pub fn composite_record(code: &str, seq: u32) -> Vec<u8> {
    let mut record = text_record(code, 4);
    record.extend_from_slice(&seq.to_le_bytes());
    record
}

/// Raw keys of `index` in forward order, record pointers included.
pub fn collect_keys(
    file: &mut KeyFile,
    index: usize,
) -> IndexResult<Vec<(Vec<u8>, RecordPointer)>> {
    let mut keys = Vec::new();
    let mut step = file.search_first(index);
    loop {
        match step {
            Ok((record, cursor)) => {
                keys.push((cursor.key().to_vec(), record));
                step = file.search_next(&cursor, Direction::Next);
            }
            Err(IndexError::EndOfIndex | IndexError::EmptyIndex) => return Ok(keys),
            Err(err) => return Err(err),
        }
    }
}

/// Record pointers of `index` walking backwards from the last key.
pub fn collect_backward(file: &mut KeyFile, index: usize) -> IndexResult<Vec<RecordPointer>> {
    let mut records = Vec::new();
    let mut step = file.search_last(index);
    loop {
        match step {
            Ok((record, cursor)) => {
                records.push(record);
                step = file.search_next(&cursor, Direction::Prev);
            }
            Err(IndexError::EndOfIndex | IndexError::EmptyIndex) => return Ok(records),
            Err(err) => return Err(err),
        }
    }
}
