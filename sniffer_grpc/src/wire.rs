//! Schema-free protobuf wire decoder.
//!
//! Without a schema a length-delimited field could be a string, raw bytes or an
//! embedded message. The decoder tries to parse it as a message and keeps the
//! structure only when the whole sub-buffer parses; otherwise the field becomes a
//! bytes leaf. A buffer that fails anywhere produces no output at all.
//!
//! Groups are checked for balance: every end-group must close the innermost open
//! start-group of the same field, and a buffer may not end with a group open.

use std::fmt;

use bytes::Bytes;
use prost::encoding::decode_varint;

/// Nesting limit for speculative message parsing, matching prost's recursion limit.
/// Length-delimited fields below it are kept as bytes.
pub const MAX_DEPTH: usize = 100;

const MAX_FIELD_NUMBER: u64 = (1 << 29) - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireType {
    Varint,
    Fixed64,
    LengthDelimited,
    StartGroup,
    EndGroup,
    Fixed32,
}

impl TryFrom<u8> for WireType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::LengthDelimited),
            3 => Ok(WireType::StartGroup),
            4 => Ok(WireType::EndGroup),
            5 => Ok(WireType::Fixed32),
            other => Err(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireValue {
    Varint(u64),
    Fixed64(u64),
    Fixed32(u32),
    Bytes(Bytes),
    Message(WireTree),
    GroupStart,
    GroupEnd,
}

impl WireValue {
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            WireValue::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&WireTree> {
        match self {
            WireValue::Message(tree) => Some(tree),
            _ => None,
        }
    }

    pub fn as_varint(&self) -> Option<u64> {
        match self {
            WireValue::Varint(v) => Some(*v),
            _ => None,
        }
    }
}

/// One decoded field. `depth` is only used for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireField {
    pub number: u32,
    pub depth: usize,
    pub value: WireValue,
}

/// Fields of one buffer in wire order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WireTree {
    pub fields: Vec<WireField>,
}

impl WireTree {
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, WireField> {
        self.fields.iter()
    }

    /// First field with the given number.
    pub fn get(&self, number: u32) -> Option<&WireField> {
        self.fields.iter().find(|f| f.number == number)
    }
}

impl<'a> IntoIterator for &'a WireTree {
    type Item = &'a WireField;
    type IntoIter = std::slice::Iter<'a, WireField>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl fmt::Display for WireTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for field in &self.fields {
            write!(f, "{:indent$}tag={} ", "", field.number, indent = field.depth * 2)?;
            match &field.value {
                WireValue::Varint(v) => writeln!(f, "varint={}", v)?,
                WireValue::Fixed64(v) => writeln!(f, "fixed64={}", v)?,
                WireValue::Fixed32(v) => writeln!(f, "fixed32={}", v)?,
                WireValue::Bytes(bytes) => writeln!(f, "bytes=\"{}\"", bytes.escape_ascii())?,
                WireValue::Message(tree) => {
                    writeln!(f, "struct")?;
                    write!(f, "{}", tree)?;
                }
                WireValue::GroupStart => writeln!(f, "start")?,
                WireValue::GroupEnd => writeln!(f, "end")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    TruncatedVarint { offset: usize },
    LengthOverrun { offset: usize, declared: u64, available: usize },
    TruncatedFixed { offset: usize, width: usize },
    UnknownWireType { offset: usize, wire_type: u8 },
    InvalidFieldNumber { offset: usize, number: u64 },
    UnbalancedGroup { offset: usize, number: u32 },
    UnclosedGroup { number: u32 },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TruncatedVarint { offset } => write!(f, "Truncated varint at offset {}", offset),
            Self::LengthOverrun { offset, declared, available } => write!(
                f,
                "Length {} at offset {} overruns the {} remaining byte(s)",
                declared, offset, available
            ),
            Self::TruncatedFixed { offset, width } => {
                write!(f, "Truncated {}-byte fixed value at offset {}", width, offset)
            }
            Self::UnknownWireType { offset, wire_type } => {
                write!(f, "Unknown wire type {} at offset {}", wire_type, offset)
            }
            Self::InvalidFieldNumber { offset, number } => {
                write!(f, "Invalid field number {} at offset {}", number, offset)
            }
            Self::UnbalancedGroup { offset, number } => {
                write!(f, "End of group {} at offset {} has no matching start", number, offset)
            }
            Self::UnclosedGroup { number } => write!(f, "Group {} is never closed", number),
        }
    }
}

impl std::error::Error for WireError {}

/// Decode a buffer without a schema.
///
/// ```rust
/// let tree = sniffer_grpc::wire::decode(&[0x08, 0x96, 0x01]).unwrap();
/// assert_eq!(tree.to_string(), "tag=1 varint=150\n");
/// ```
pub fn decode(buf: &[u8]) -> Result<WireTree, WireError> {
    decode_at(buf, 0)
}

/// Decode with display depths starting at `depth`.
pub fn decode_at(buf: &[u8], depth: usize) -> Result<WireTree, WireError> {
    let total = buf.len();
    let mut cursor = buf;
    let mut fields = Vec::new();
    let mut open_groups: Vec<u32> = Vec::new();

    while !cursor.is_empty() {
        let offset = total - cursor.len();
        let key = decode_varint(&mut cursor).map_err(|_| WireError::TruncatedVarint { offset })?;
        let number = key >> 3;
        if number == 0 || number > MAX_FIELD_NUMBER {
            return Err(WireError::InvalidFieldNumber { offset, number });
        }
        let number = number as u32;
        let wire_type = WireType::try_from((key & 0x7) as u8)
            .map_err(|wire_type| WireError::UnknownWireType { offset, wire_type })?;
        let level = depth + open_groups.len();

        let value = match wire_type {
            WireType::Varint => {
                let offset = total - cursor.len();
                WireValue::Varint(decode_varint(&mut cursor).map_err(|_| WireError::TruncatedVarint { offset })?)
            }
            WireType::Fixed64 => {
                let raw = take_fixed::<8>(&mut cursor, total)?;
                WireValue::Fixed64(u64::from_le_bytes(raw))
            }
            WireType::Fixed32 => {
                let raw = take_fixed::<4>(&mut cursor, total)?;
                WireValue::Fixed32(u32::from_le_bytes(raw))
            }
            WireType::LengthDelimited => {
                let offset = total - cursor.len();
                let declared = decode_varint(&mut cursor).map_err(|_| WireError::TruncatedVarint { offset })?;
                if declared > cursor.len() as u64 {
                    return Err(WireError::LengthOverrun {
                        offset,
                        declared,
                        available: cursor.len(),
                    });
                }
                let (inner, rest) = cursor.split_at(declared as usize);
                cursor = rest;
                speculate(inner, level + 1)
            }
            WireType::StartGroup => {
                open_groups.push(number);
                WireValue::GroupStart
            }
            WireType::EndGroup => match open_groups.pop() {
                Some(open) if open == number => {
                    fields.push(WireField {
                        number,
                        depth: level - 1,
                        value: WireValue::GroupEnd,
                    });
                    continue;
                }
                _ => return Err(WireError::UnbalancedGroup { offset, number }),
            },
        };

        fields.push(WireField { number, depth: level, value });
    }

    if let Some(number) = open_groups.last() {
        return Err(WireError::UnclosedGroup { number: *number });
    }
    Ok(WireTree { fields })
}

/// Nested message if `inner` parses completely, bytes leaf otherwise.
fn speculate(inner: &[u8], depth: usize) -> WireValue {
    if depth > MAX_DEPTH {
        return WireValue::Bytes(Bytes::copy_from_slice(inner));
    }
    match decode_at(inner, depth) {
        Ok(tree) => WireValue::Message(tree),
        Err(_) => WireValue::Bytes(Bytes::copy_from_slice(inner)),
    }
}

fn take_fixed<const N: usize>(cursor: &mut &[u8], total: usize) -> Result<[u8; N], WireError> {
    let offset = total - cursor.len();
    if cursor.len() < N {
        return Err(WireError::TruncatedFixed { offset, width: N });
    }
    let (head, rest) = cursor.split_at(N);
    let mut raw = [0u8; N];
    raw.copy_from_slice(head);
    *cursor = rest;
    Ok(raw)
}
