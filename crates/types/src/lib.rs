use std::cmp::Ordering;

/// Value type of one key segment.
///
/// Integer and floating point segments are stored in the record's
/// little-endian byte order and compared by value. `Text` and `Binary` are
/// compared bytewise; `Num` is a decimal number written as text.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum KeyType {
    Binary,
    Text,
    Num,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int24,
    UInt24,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float,
    Double,
}

impl KeyType {
    /// Width in bytes of fixed-width numeric types, `None` for text-like types.
    pub fn fixed_width(&self) -> Option<usize> {
        match self {
            KeyType::Int8 | KeyType::UInt8 => Some(1),
            KeyType::Int16 | KeyType::UInt16 => Some(2),
            KeyType::Int24 | KeyType::UInt24 => Some(3),
            KeyType::Int32 | KeyType::UInt32 | KeyType::Float => Some(4),
            KeyType::Int64 | KeyType::UInt64 | KeyType::Double => Some(8),
            KeyType::Binary | KeyType::Text | KeyType::Num => None,
        }
    }

    /// True for the types whose bytes can be space packed.
    pub fn is_text(&self) -> bool {
        matches!(self, KeyType::Binary | KeyType::Text | KeyType::Num)
    }

    /// Compare two fixed-width values of this type.
    ///
    /// Returns `None` for text-like types or when either slice is shorter
    /// than the type width.
    pub fn cmp_fixed(&self, a: &[u8], b: &[u8]) -> Option<Ordering> {
        let width = self.fixed_width()?;
        if a.len() < width || b.len() < width {
            return None;
        }
        let (a, b) = (&a[..width], &b[..width]);
        let ord = match self {
            KeyType::Int8 => (a[0] as i8).cmp(&(b[0] as i8)),
            KeyType::UInt8 => a[0].cmp(&b[0]),
            KeyType::Int16 => {
                i16::from_le_bytes([a[0], a[1]]).cmp(&i16::from_le_bytes([b[0], b[1]]))
            }
            KeyType::UInt16 => {
                u16::from_le_bytes([a[0], a[1]]).cmp(&u16::from_le_bytes([b[0], b[1]]))
            }
            KeyType::Int24 => sint3(a).cmp(&sint3(b)),
            KeyType::UInt24 => uint3(a).cmp(&uint3(b)),
            KeyType::Int32 => le_i64(a).cmp(&le_i64(b)),
            KeyType::UInt32 => le_u64(a).cmp(&le_u64(b)),
            KeyType::Int64 => le_i64(a).cmp(&le_i64(b)),
            KeyType::UInt64 => le_u64(a).cmp(&le_u64(b)),
            KeyType::Float => {
                let x = f32::from_le_bytes([a[0], a[1], a[2], a[3]]);
                let y = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            KeyType::Double => {
                let x = f64::from_le_bytes(le_array8(a));
                let y = f64::from_le_bytes(le_array8(b));
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            }
            KeyType::Binary | KeyType::Text | KeyType::Num => return None,
        };
        Some(ord)
    }
}

fn uint3(b: &[u8]) -> u32 {
    u32::from(b[0]) | u32::from(b[1]) << 8 | u32::from(b[2]) << 16
}

fn sint3(b: &[u8]) -> i32 {
    let raw = uint3(b);
    if raw & 0x80_0000 != 0 {
        (raw | 0xFF00_0000) as i32
    } else {
        raw as i32
    }
}

fn le_array8(b: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out[..b.len().min(8)].copy_from_slice(&b[..b.len().min(8)]);
    out
}

// Sign-extending little-endian read of 4 or 8 bytes.
fn le_i64(b: &[u8]) -> i64 {
    match b.len() {
        4 => i32::from_le_bytes([b[0], b[1], b[2], b[3]]) as i64,
        _ => i64::from_le_bytes(le_array8(b)),
    }
}

fn le_u64(b: &[u8]) -> u64 {
    match b.len() {
        4 => u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64,
        _ => u64::from_le_bytes(le_array8(b)),
    }
}

/// Width of an on-page pointer, chosen once per index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum PointerWidth {
    Width2,
    Width3,
    Width4,
}

impl PointerWidth {
    /// Number of bytes written per pointer.
    pub fn bytes(self) -> usize {
        match self {
            PointerWidth::Width2 => 2,
            PointerWidth::Width3 => 3,
            PointerWidth::Width4 => 4,
        }
    }

    /// Largest value that fits.
    pub fn max_value(self) -> u64 {
        (1u64 << (8 * self.bytes())) - 1
    }

    /// Smallest width able to hold `max`; `None` when even four bytes are too narrow.
    pub fn for_max_value(max: u64) -> Option<Self> {
        [PointerWidth::Width2, PointerWidth::Width3, PointerWidth::Width4]
            .into_iter()
            .find(|w| max <= w.max_value())
    }

    /// Append `value` big-endian. Returns `false` if the value does not fit.
    pub fn encode(self, value: u64, out: &mut Vec<u8>) -> bool {
        if value > self.max_value() {
            return false;
        }
        let be = value.to_be_bytes();
        out.extend_from_slice(&be[8 - self.bytes()..]);
        true
    }

    /// Decode a big-endian pointer from the start of `src`.
    pub fn decode(self, src: &[u8]) -> Option<u64> {
        let width = self.bytes();
        let bytes = src.get(..width)?;
        Some(bytes.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b)))
    }
}
