use std::{
    fs,
    ops::BitOr,
    path::{Path, PathBuf},
};

use ahash::RandomState;
use common::{Config, IndexError, IndexResult};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use storage::{BLOCK_UNIT, MAX_BLOCK_LENGTH, PAGE_HEADER_LEN};
use types::{KeyType, PointerWidth};
use uuid::Uuid;

type Map<K, V> = HashMap<K, V, RandomState>;

/// Largest segment length a two-byte length prefix can express.
pub const MAX_SEGMENT_LENGTH: usize = 0x7FFF;

/// Per-segment flags fixed at index creation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentFlags(u8);

impl SegmentFlags {
    pub const NONE: SegmentFlags = SegmentFlags(0);
    /// Strip trailing spaces (leading for `Num`) and store a length prefix.
    pub const SPACE_PACK: SegmentFlags = SegmentFlags(1);
    /// Front-code segment 0 against the previous key in the page.
    pub const PACK_KEY: SegmentFlags = SegmentFlags(2);
    /// Invert the comparison result of this segment.
    pub const REVERSE_SORT: SegmentFlags = SegmentFlags(4);

    pub fn contains(self, other: SegmentFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for SegmentFlags {
    type Output = SegmentFlags;

    fn bitor(self, rhs: SegmentFlags) -> SegmentFlags {
        SegmentFlags(self.0 | rhs.0)
    }
}

/// One column slice of a composite key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySegment {
    pub key_type: KeyType,
    /// Byte offset of the slice in the source record.
    pub start: usize,
    /// Declared (maximum) length in bytes.
    pub length: usize,
    pub flags: SegmentFlags,
}

impl KeySegment {
    pub fn new(key_type: KeyType, start: usize, length: usize) -> Self {
        Self {
            key_type,
            start,
            length,
            flags: SegmentFlags::NONE,
        }
    }

    pub fn with_flags(mut self, flags: SegmentFlags) -> Self {
        self.flags = self.flags | flags;
        self
    }

    pub fn space_packed(&self) -> bool {
        self.flags.contains(SegmentFlags::SPACE_PACK)
    }

    pub fn prefix_packed(&self) -> bool {
        self.flags.contains(SegmentFlags::PACK_KEY)
    }

    pub fn reversed(&self) -> bool {
        self.flags.contains(SegmentFlags::REVERSE_SORT)
    }

    /// Bytes needed to store the length `n` for this segment.
    pub fn length_bytes(&self, n: usize) -> usize {
        if self.length > 255 && n > 127 { 2 } else { 1 }
    }

    /// Longest raw (unpacked) form of this segment, length prefix included.
    pub fn max_raw_length(&self) -> usize {
        if self.space_packed() {
            self.length + self.length_bytes(self.length)
        } else {
            self.length
        }
    }
}

/// How slots of an index are laid out in its pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyLayout {
    /// Every slot has the same length; pages can be binary searched.
    Fixed { key_length: usize },
    /// Variable-length slots; pages are decoded by a forward scan.
    Packed,
}

/// Immutable description of one index of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDefinition {
    pub name: String,
    pub segments: Vec<KeySegment>,
    pub unique: bool,
    pub block_length: usize,
    /// Width of the record pointer appended to every key.
    pub record_pointer: PointerWidth,
    /// Width of child pointers on internal pages (page address / 512).
    pub node_pointer: PointerWidth,
}

impl KeyDefinition {
    /// Build a definition, deriving pointer widths from `config`.
    pub fn new(
        name: impl Into<String>,
        segments: Vec<KeySegment>,
        unique: bool,
        config: &Config,
    ) -> IndexResult<Self> {
        let record_pointer = PointerWidth::for_max_value(config.max_record_pointer)
            .ok_or_else(|| {
                IndexError::InvalidDefinition(format!(
                    "record pointers up to {} need more than four bytes",
                    config.max_record_pointer
                ))
            })?;
        let node_pointer =
            PointerWidth::for_max_value(config.max_key_file_length / BLOCK_UNIT as u64)
                .ok_or_else(|| {
                    IndexError::InvalidDefinition(format!(
                        "key file length {} is too large for four-byte page pointers",
                        config.max_key_file_length
                    ))
                })?;
        let def = Self {
            name: name.into(),
            segments,
            unique,
            block_length: config.block_length,
            record_pointer,
            node_pointer,
        };
        def.validate()?;
        Ok(def)
    }

    /// Fixed or packed page layout, decided by the segment flags.
    pub fn layout(&self) -> KeyLayout {
        if self.is_packed() {
            KeyLayout::Packed
        } else {
            KeyLayout::Fixed {
                key_length: self.segments.iter().map(|s| s.length).sum(),
            }
        }
    }

    /// True when any segment is space packed or prefix packed.
    pub fn is_packed(&self) -> bool {
        self.segments
            .iter()
            .any(|s| s.space_packed() || s.prefix_packed())
    }

    /// True when segment 0 is front-coded against the previous key.
    pub fn packs_prefix(&self) -> bool {
        self.segments.first().is_some_and(|s| s.prefix_packed())
    }

    /// Longest raw key, without the record pointer.
    pub fn max_key_length(&self) -> usize {
        self.segments.iter().map(|s| s.max_raw_length()).sum()
    }

    /// Longest encoded slot on a page of the given kind.
    pub fn max_slot_length(&self, internal: bool) -> usize {
        let reference = self
            .segments
            .first()
            .filter(|s| s.prefix_packed())
            .map_or(0, |s| s.length_bytes(s.length));
        let node = if internal { self.node_pointer.bytes() } else { 0 };
        self.max_key_length() + reference + self.record_pointer.bytes() + node
    }

    /// Minimum record length that holds every segment.
    pub fn record_length(&self) -> usize {
        self.segments
            .iter()
            .map(|s| s.start + s.length)
            .max()
            .unwrap_or(0)
    }

    /// Check the definition's internal consistency.
    pub fn validate(&self) -> IndexResult<()> {
        let invalid = |msg: String| Err(IndexError::InvalidDefinition(msg));
        if self.segments.is_empty() {
            return invalid(format!("index '{}' has no key segments", self.name));
        }
        if self.block_length < BLOCK_UNIT
            || self.block_length % BLOCK_UNIT != 0
            || self.block_length > MAX_BLOCK_LENGTH
        {
            return invalid(format!(
                "block length {} must be a multiple of {BLOCK_UNIT} up to {MAX_BLOCK_LENGTH}",
                self.block_length
            ));
        }
        for (nr, seg) in self.segments.iter().enumerate() {
            if seg.length == 0 || seg.length > MAX_SEGMENT_LENGTH {
                return invalid(format!("segment {nr} has length {}", seg.length));
            }
            if let Some(width) = seg.key_type.fixed_width()
                && seg.length != width
            {
                return invalid(format!(
                    "segment {nr} of type {:?} must be {width} bytes, not {}",
                    seg.key_type, seg.length
                ));
            }
            if (seg.space_packed() || seg.prefix_packed()) && !seg.key_type.is_text() {
                return invalid(format!(
                    "segment {nr} of type {:?} cannot be packed",
                    seg.key_type
                ));
            }
            if seg.prefix_packed() && nr != 0 {
                return invalid(format!("only segment 0 may be prefix packed, not {nr}"));
            }
        }
        let needed = PAGE_HEADER_LEN + self.node_pointer.bytes() + 2 * self.max_slot_length(true);
        if needed > self.block_length {
            return invalid(format!(
                "keys of up to {} bytes do not fit twice in a {} byte page",
                self.max_slot_length(true),
                self.block_length
            ));
        }
        Ok(())
    }
}

/// Persistent catalog describing the indexes stored in one key file.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Catalog {
    pub table: String,
    /// Stamped into the key file so a catalog is never paired with the wrong file.
    pub file_id: Uuid,
    indexes: Vec<KeyDefinition>,
    #[serde(skip)]
    #[serde(default)]
    name_lookup: Map<String, usize>,
}

impl Catalog {
    /// Create an empty catalog for a table.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            file_id: Uuid::new_v4(),
            indexes: Vec::new(),
            name_lookup: Map::default(),
        }
    }

    /// Catalog file that accompanies the key file at `key_file`.
    pub fn path_for(key_file: &Path) -> PathBuf {
        key_file.with_extension("json")
    }

    /// Load a catalog from disk.
    pub fn load(path: &Path) -> IndexResult<Self> {
        if !path.exists() {
            return Err(IndexError::Catalog(format!(
                "catalog file does not exist: {}",
                path.display()
            )));
        }
        let data = fs::read_to_string(path)?;
        let mut catalog: Catalog = serde_json::from_str(&data)
            .map_err(|err| IndexError::Catalog(format!("invalid catalog file: {err}")))?;
        for def in &catalog.indexes {
            def.validate()?;
        }
        catalog.rebuild_lookup();
        Ok(catalog)
    }

    /// Persist the catalog contents as pretty JSON.
    pub fn save(&self, path: &Path) -> IndexResult<()> {
        let data = serde_json::to_string_pretty(self)
            .map_err(|err| IndexError::Catalog(format!("serialize failed: {err}")))?;
        fs::write(path, data)?;
        Ok(())
    }

    /// Register a validated definition, returning its index number.
    pub fn add_index(&mut self, def: KeyDefinition) -> IndexResult<usize> {
        if self.name_lookup.contains_key(&def.name) {
            return Err(IndexError::Catalog(format!(
                "index '{}' already exists on table '{}'",
                def.name, self.table
            )));
        }
        def.validate()?;
        self.indexes.push(def);
        self.rebuild_lookup();
        Ok(self.indexes.len() - 1)
    }

    /// Define and register an index in one step.
    pub fn define_index(
        &mut self,
        name: &str,
        segments: Vec<KeySegment>,
        unique: bool,
        config: &Config,
    ) -> IndexResult<usize> {
        let def = KeyDefinition::new(name, segments, unique, config)?;
        self.add_index(def)
    }

    /// Lookup an index by number.
    pub fn index(&self, nr: usize) -> IndexResult<&KeyDefinition> {
        self.indexes.get(nr).ok_or_else(|| {
            IndexError::Catalog(format!("unknown index {nr} on table '{}'", self.table))
        })
    }

    /// Lookup an index number by name.
    pub fn index_nr(&self, name: &str) -> IndexResult<usize> {
        self.name_lookup.get(name).copied().ok_or_else(|| {
            IndexError::Catalog(format!(
                "index '{name}' does not exist on table '{}'",
                self.table
            ))
        })
    }

    /// Returns all indexes in definition order.
    pub fn indexes(&self) -> &[KeyDefinition] {
        &self.indexes
    }

    pub fn len(&self) -> usize {
        self.indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexes.is_empty()
    }

    fn rebuild_lookup(&mut self) {
        self.name_lookup.clear();
        for (idx, def) in self.indexes.iter().enumerate() {
            self.name_lookup.insert(def.name.clone(), idx);
        }
    }
}
