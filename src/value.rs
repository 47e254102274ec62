//! Decoded values and field records produced by the walker and protocol handlers.

/// A single decoded value (scalar or nested field list).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    Bytes(Vec<u8>),
    Str(String),
    /// Nested records (sub-TLVs, descriptor components).
    Fields(Vec<DecodedField>),
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U8(x) => Some(*x as u64),
            Value::U16(x) => Some(*x as u64),
            Value::U32(x) => Some(*x as u64),
            Value::U64(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I8(x) => Some(*x as i64),
            Value::I16(x) => Some(*x as i64),
            Value::I32(x) => Some(*x as i64),
            Value::I64(x) => Some(*x),
            Value::U8(x) => Some(*x as i64),
            Value::U16(x) => Some(*x as i64),
            Value::U32(x) => Some(*x as i64),
            Value::U64(x) => Some(*x as i64),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_fields(&self) -> Option<&[DecodedField]> {
        match self {
            Value::Fields(v) => Some(v),
            _ => None,
        }
    }

    /// Unsigned value of `width` bytes (1, 2, 4 or 8); other widths widen to `U64`.
    pub fn unsigned(width: usize, v: u64) -> Value {
        match width {
            1 => Value::U8(v as u8),
            2 => Value::U16(v as u16),
            4 => Value::U32(v as u32),
            _ => Value::U64(v),
        }
    }
}

/// Tag of a record whose header could not be read. Protocol tables use tags at most two bytes wide.
pub const UNREADABLE_TAG: u32 = u32::MAX;

/// One decoded record: tag, where it sits in the message, and what it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedField {
    pub tag: u32,
    /// Table name of the tag; `None` for tags the table does not know (opaque field).
    pub name: Option<&'static str>,
    /// Header plus value, absolute offsets `[start, end)` in the message buffer.
    pub byte_range: (usize, usize),
    /// Value bytes only.
    pub value_range: (usize, usize),
    pub value: Value,
    pub malformed: bool,
}

impl DecodedField {
    /// A field built by hand (fixed headers, PER fields) rather than by the walker.
    pub fn fixed(tag: u32, name: &'static str, start: usize, end: usize, value: Value) -> Self {
        DecodedField { tag, name: Some(name), byte_range: (start, end), value_range: (start, end), value, malformed: false }
    }

    pub fn is_opaque(&self) -> bool {
        self.name.is_none()
    }

    pub fn len(&self) -> usize {
        self.byte_range.1 - self.byte_range.0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for the stub left by a header that ran past the end of the range.
    pub fn is_unreadable(&self) -> bool {
        self.tag == UNREADABLE_TAG
    }

    /// First direct child with the given tag, for nested values.
    pub fn child(&self, tag: u32) -> Option<&DecodedField> {
        find_field(self.value.as_fields()?, tag)
    }
}

/// Find the first field with `tag` in a field list.
pub fn find_field(fields: &[DecodedField], tag: u32) -> Option<&DecodedField> {
    fields.iter().find(|f| f.tag == tag)
}
