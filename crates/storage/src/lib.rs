//! On-disk formats of the key file.
//!
//! A key file starts with a fixed state block followed by index pages at
//! 512-byte aligned addresses. Every page begins with a two-byte big-endian
//! header holding the used length, with the top bit set on internal pages.

use std::ops::Range;

use bincode::config::{self, Config};
use bincode::serde::{decode_from_slice, encode_to_vec};
use bytes::{Buf, BufMut};
use common::{IndexError, IndexResult, PageAddr};
use serde::{Deserialize, Serialize};

/// Every block length is a multiple of this unit; child pointers count in it.
pub const BLOCK_UNIT: usize = 512;
/// Length of the page header (used length plus node flag).
pub const PAGE_HEADER_LEN: usize = 2;
/// Largest block length whose used length still fits the 15 header bits.
pub const MAX_BLOCK_LENGTH: usize = 16 * 1024;
/// Header bit marking an internal page.
pub const NODE_FLAG: u16 = 0x8000;
/// Size of the state block at the start of the key file.
pub const STATE_BLOCK_LEN: usize = 1024;

const STATE_MAGIC: u32 = 0x4B45_5946;
const FREE_LINK_NONE: u64 = u64::MAX;

fn bincode_config() -> impl Config {
    config::legacy()
}

/// In-memory image of one index page.
///
/// `data` holds the header bytes followed by the used part of the body, so
/// slot offsets are page offsets. The stored header is refreshed when the
/// page is turned back into a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexPage {
    pub addr: PageAddr,
    block_length: usize,
    internal: bool,
    data: Vec<u8>,
}

impl IndexPage {
    /// Create an empty page.
    pub fn new(addr: PageAddr, block_length: usize, internal: bool) -> Self {
        Self {
            addr,
            block_length,
            internal,
            data: vec![0u8; PAGE_HEADER_LEN],
        }
    }

    /// Parse a block read from disk, validating its header.
    pub fn from_block(addr: PageAddr, block: &[u8]) -> IndexResult<Self> {
        if block.len() < PAGE_HEADER_LEN {
            return Err(IndexError::Crashed(format!(
                "page {} is shorter than its header",
                addr.0
            )));
        }
        let raw = (&block[..PAGE_HEADER_LEN]).get_u16();
        let internal = raw & NODE_FLAG != 0;
        let used = usize::from(raw & !NODE_FLAG);
        if used < PAGE_HEADER_LEN || used > block.len() {
            return Err(IndexError::Crashed(format!(
                "page {} claims {used} used bytes in a {} byte block",
                addr.0,
                block.len()
            )));
        }
        Ok(Self {
            addr,
            block_length: block.len(),
            internal,
            data: block[..used].to_vec(),
        })
    }

    /// Serialize into a full block with a fresh header.
    pub fn to_block(&self) -> IndexResult<Vec<u8>> {
        if self.overflows() {
            return Err(IndexError::Crashed(format!(
                "page {} holds {} bytes, more than its {} byte block",
                self.addr.0,
                self.used_length(),
                self.block_length
            )));
        }
        let mut out = Vec::with_capacity(self.block_length);
        out.put_u16(self.header());
        out.put_slice(&self.data[PAGE_HEADER_LEN..]);
        out.resize(self.block_length, 0);
        Ok(out)
    }

    fn header(&self) -> u16 {
        let flag = if self.internal { NODE_FLAG } else { 0 };
        self.used_length() as u16 | flag
    }

    pub fn is_internal(&self) -> bool {
        self.internal
    }

    pub fn set_internal(&mut self, internal: bool) {
        self.internal = internal;
    }

    pub fn used_length(&self) -> usize {
        self.data.len()
    }

    pub fn block_length(&self) -> usize {
        self.block_length
    }

    /// True when the page no longer fits its block.
    pub fn overflows(&self) -> bool {
        self.used_length() > self.block_length
    }

    /// Header plus used body; offsets into this slice are page offsets.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace `range` of the page with `bytes`.
    pub fn splice(&mut self, range: Range<usize>, bytes: &[u8]) {
        self.data.splice(range, bytes.iter().copied());
    }

    /// Drop the body, keeping the header.
    pub fn clear_body(&mut self) {
        self.data.truncate(PAGE_HEADER_LEN);
    }

    /// Append raw body bytes.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }
}

/// Persistent per-file state: roots, free lists and counters of every index.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyFileState {
    magic: u32,
    pub file_id: [u8; 16],
    pub roots: Vec<Option<PageAddr>>,
    pub free_lists: Vec<Option<PageAddr>>,
    pub key_counts: Vec<u64>,
    /// Bumped by every mutation; cursors compare against it.
    pub changes: u64,
    pub file_length: u64,
}

impl KeyFileState {
    /// State of a freshly created key file with `indexes` empty indexes.
    pub fn new(file_id: [u8; 16], indexes: usize) -> Self {
        Self {
            magic: STATE_MAGIC,
            file_id,
            roots: vec![None; indexes],
            free_lists: vec![None; indexes],
            key_counts: vec![0; indexes],
            changes: 0,
            file_length: STATE_BLOCK_LEN as u64,
        }
    }

    /// Encode into a state block: length, bincode payload, CRC32.
    pub fn encode(&self) -> IndexResult<Vec<u8>> {
        let payload = encode_to_vec(self, bincode_config())
            .map_err(|e| IndexError::Crashed(format!("encode key file state failed: {e}")))?;
        if payload.len() + 8 > STATE_BLOCK_LEN {
            return Err(IndexError::InvalidDefinition(format!(
                "state for {} indexes does not fit the {STATE_BLOCK_LEN} byte state block",
                self.roots.len()
            )));
        }
        let mut block = Vec::with_capacity(STATE_BLOCK_LEN);
        block.put_u32(payload.len() as u32);
        block.put_slice(&payload);
        block.put_u32(crc32fast::hash(&payload));
        block.resize(STATE_BLOCK_LEN, 0);
        Ok(block)
    }

    /// Decode and verify a state block.
    pub fn decode(block: &[u8]) -> IndexResult<Self> {
        let mut cursor = block;
        if cursor.remaining() < 4 {
            return Err(IndexError::Crashed("state block truncated".into()));
        }
        let len = cursor.get_u32() as usize;
        if len + 8 > block.len() {
            return Err(IndexError::Crashed(format!(
                "state block claims {len} payload bytes"
            )));
        }
        let payload = &cursor[..len];
        cursor.advance(len);
        let stored = cursor.get_u32();
        if stored != crc32fast::hash(payload) {
            return Err(IndexError::Crashed("state block checksum mismatch".into()));
        }
        let (state, _): (KeyFileState, usize) = decode_from_slice(payload, bincode_config())
            .map_err(|e| IndexError::Crashed(format!("decode key file state failed: {e}")))?;
        if state.magic != STATE_MAGIC {
            return Err(IndexError::Crashed("not a key file".into()));
        }
        let n = state.roots.len();
        if state.free_lists.len() != n || state.key_counts.len() != n {
            return Err(IndexError::Crashed("state block index counts disagree".into()));
        }
        Ok(state)
    }
}

/// Contents written over a freed page: the previous free-list head.
pub fn encode_free_link(next: Option<PageAddr>, block_length: usize) -> Vec<u8> {
    let mut block = Vec::with_capacity(block_length);
    block.put_u64(next.map_or(FREE_LINK_NONE, |addr| addr.0));
    block.resize(block_length, 0);
    block
}

/// Read the next free-list entry from a freed page.
pub fn decode_free_link(block: &[u8]) -> IndexResult<Option<PageAddr>> {
    if block.len() < 8 {
        return Err(IndexError::Crashed("free page too short for its link".into()));
    }
    let raw = (&block[..8]).get_u64();
    Ok((raw != FREE_LINK_NONE).then_some(PageAddr(raw)))
}
