//! Static per-protocol tag tables: header layout, tag → length class, and decode functions.
//!
//! Tables are plain `static` data built with `const fn` constructors, e.g.
//!
//! ```text
//! static ITEMS: &[TagEntry] = &[
//!     TagEntry::new(1, "Status", LengthClass::Fixed(1)),
//!     TagEntry::new(2, "Peer Type", LengthClass::Prefixed).decoded(walk::text),
//! ];
//! static TABLE: TagTable = TagTable::new("dlep.item", HeaderFormat::T2L2, ITEMS);
//! ```

use crate::cursor::{ByteCursor, CursorError, Endianness};
use crate::value::Value;
use crate::walk::WalkContext;

/// Decode a value from a view over exactly its bytes. May recurse through
/// [`WalkContext::walk_nested`](crate::walk::WalkContext::walk_nested).
pub type DecodeFn = fn(&mut ByteCursor<'_>, &mut WalkContext) -> Result<Value, CursorError>;

/// How much value follows a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthClass {
    /// Exactly `n` value bytes.
    Fixed(usize),
    /// Length carried on the wire: in the record header, or in a one-byte prefix
    /// after the tag when the header has no length.
    Prefixed,
    /// Value runs up to the separator byte; the separator is consumed.
    UntilSeparator(u8),
    /// Terminal field: value is everything up to the end of the walked range.
    Remainder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldTag {
    pub id: u32,
    pub length: LengthClass,
}

/// Record header layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFormat {
    /// `tag_width`-byte tag then `length_width`-byte length. With `inclusive`, the length
    /// counts the header bytes too.
    TagLength { tag_width: u8, length_width: u8, inclusive: bool },
    /// Single byte: tag in the high bits, value length in the low `length_bits` bits.
    Packed { length_bits: u8 },
    /// Tag only; the table entry determines the length.
    TagOnly { tag_width: u8 },
}

impl HeaderFormat {
    /// RADIUS attributes: 1-byte type, 1-byte length including the header.
    pub const T1L1_INCLUSIVE: HeaderFormat = HeaderFormat::TagLength { tag_width: 1, length_width: 1, inclusive: true };
    /// MPEG/SCTE-35 descriptors: 1-byte tag, 1-byte length of the value.
    pub const T1L1: HeaderFormat = HeaderFormat::TagLength { tag_width: 1, length_width: 1, inclusive: false };
    /// DLEP data items: 2-byte type, 2-byte length of the value.
    pub const T2L2: HeaderFormat = HeaderFormat::TagLength { tag_width: 2, length_width: 2, inclusive: false };

    pub const fn size(&self) -> usize {
        match *self {
            HeaderFormat::TagLength { tag_width, length_width, .. } => tag_width as usize + length_width as usize,
            HeaderFormat::Packed { .. } => 1,
            HeaderFormat::TagOnly { tag_width } => tag_width as usize,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TagEntry {
    pub tag: FieldTag,
    pub name: &'static str,
    pub decode: Option<DecodeFn>,
}

impl TagEntry {
    pub const fn new(id: u32, name: &'static str, length: LengthClass) -> Self {
        TagEntry { tag: FieldTag { id, length }, name, decode: None }
    }

    pub const fn decoded(mut self, decode: DecodeFn) -> Self {
        self.decode = Some(decode);
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TagTable {
    pub name: &'static str,
    pub header: HeaderFormat,
    pub endianness: Endianness,
    pub entries: &'static [TagEntry],
}

impl TagTable {
    pub const fn new(name: &'static str, header: HeaderFormat, entries: &'static [TagEntry]) -> Self {
        TagTable { name, header, endianness: Endianness::Big, entries }
    }

    pub const fn little_endian(mut self) -> Self {
        self.endianness = Endianness::Little;
        self
    }

    pub fn get(&self, id: u32) -> Option<&TagEntry> {
        self.entries.iter().find(|e| e.tag.id == id)
    }
}
