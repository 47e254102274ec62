//! TLV walk: turn a byte range into [`DecodedField`] records using a static [`TagTable`].
//!
//! The walker reads one record header at a time, looks the tag up in the table, checks the
//! declared length against the end of the walked range, decodes the value from a sub-view over
//! exactly its bytes, and advances to the next record boundary.
//!
//! ## Failure policy
//!
//! | Condition | Result | Walk |
//! |-----------|--------|------|
//! | Header does not fit | malformed field + [`MalformedKind::Header`] (tag [`UNREADABLE_TAG`] if the tag itself is cut) | stops |
//! | Declared length overruns the range | malformed field + [`MalformedKind::Overrun`] | stops |
//! | Inclusive length shorter than header | malformed field + [`MalformedKind::BadLength`] | stops |
//! | Fixed-length tag (tag-only header) longer than what is left | [`MalformedKind::Truncated`] | stops |
//! | Fixed-length tag with a different declared length | opaque malformed field + [`MalformedKind::LengthMismatch`] | continues |
//! | Decode function fails | opaque malformed field + [`MalformedKind::Decode`] | continues |
//! | Unknown tag | one opaque field over the declared length | continues |
//!
//! When the walk stops, [`WalkResult::end_offset`] is the start of the offending record: the
//! caller cannot safely resume past a length it cannot trust. Fields decoded before that point
//! are always returned.
//!
//! ## Nesting
//!
//! Decode functions recurse with [`WalkContext::walk_nested`] (vendor sub-attributes,
//! descriptor components). A nested walk records its reports in the shared context but its
//! failures never truncate the enclosing field list. Depth is bounded by
//! [`WalkLimits::max_depth`].
//!
//! ## Example
//!
//! ```ignore
//! use tlvmatch::walk::walk;
//!
//! let result = walk(&payload, 20, payload.len(), &radius::ATTRIBUTES);
//! for f in &result.fields { /* ... */ }
//! if !result.is_complete() { /* partial output */ }
//! ```

use crate::cursor::{ByteCursor, CursorError};
use crate::table::{HeaderFormat, LengthClass, TagEntry, TagTable};
use crate::value::{DecodedField, Value, UNREADABLE_TAG};
use std::net::Ipv4Addr;

pub const DEFAULT_MAX_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkLimits {
    /// Maximum nesting of [`WalkContext::walk_nested`] calls below the top-level walk.
    pub max_depth: usize,
}

impl Default for WalkLimits {
    fn default() -> Self {
        WalkLimits { max_depth: DEFAULT_MAX_DEPTH }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedKind {
    #[error("record header truncated ({available} bytes left)")]
    Header { available: usize },
    #[error("declared length {declared} overruns buffer ({available} bytes left)")]
    Overrun { declared: usize, available: usize },
    #[error("declared length {declared} shorter than header")]
    BadLength { declared: usize },
    #[error("fixed length {needed} but only {available} bytes left")]
    Truncated { needed: usize, available: usize },
    #[error("length {declared}, expected {expected}")]
    LengthMismatch { expected: usize, declared: usize },
    #[error("separator 0x{0:02x} not found")]
    Unterminated(u8),
    #[error("decode failed: {0}")]
    Decode(CursorError),
    #[error("nesting deeper than {0}")]
    TooDeep(usize),
}

impl MalformedKind {
    /// Whether the walk stopped at this record.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MalformedKind::Header { .. } | MalformedKind::Overrun { .. } | MalformedKind::BadLength { .. } | MalformedKind::Truncated { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedReport {
    pub table: &'static str,
    pub tag: Option<u32>,
    /// Start of the offending record (absolute).
    pub offset: usize,
    /// 0 for the top-level walk.
    pub depth: usize,
    pub kind: MalformedKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WalkResult {
    pub fields: Vec<DecodedField>,
    pub malformed: Vec<MalformedReport>,
    /// Where the top-level walk stopped: `end` on success, start of the bad record otherwise.
    pub end_offset: usize,
}

impl WalkResult {
    /// No report anywhere, nested walks included.
    pub fn is_clean(&self) -> bool {
        self.malformed.is_empty()
    }

    /// The top-level walk reached the end of its range.
    pub fn is_complete(&self) -> bool {
        !self.malformed.iter().any(|r| r.depth == 0 && r.kind.is_fatal())
    }
}

/// Per-message scratch state shared by a walk and the decode functions it calls.
#[derive(Debug, Default)]
pub struct WalkContext {
    limits: WalkLimits,
    depth: usize,
    reports: Vec<MalformedReport>,
}

impl WalkContext {
    pub fn new(limits: WalkLimits) -> Self {
        WalkContext { limits, depth: 0, reports: Vec::new() }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn reports(&self) -> &[MalformedReport] {
        &self.reports
    }

    pub fn into_reports(self) -> Vec<MalformedReport> {
        self.reports
    }

    /// Empty context at the same depth and limits, for trial walks whose reports may be dropped.
    pub fn scratch(&self) -> WalkContext {
        WalkContext { limits: self.limits, depth: self.depth, reports: Vec::new() }
    }

    /// Keep the reports of a trial context.
    pub fn absorb(&mut self, other: WalkContext) {
        self.reports.extend(other.reports);
    }

    pub fn report(&mut self, table: &'static str, tag: Option<u32>, offset: usize, kind: MalformedKind) {
        log::debug!("{}: malformed tag {:?} at {} (depth {}): {}", table, tag, offset, self.depth, kind);
        self.reports.push(MalformedReport { table, tag, offset, depth: self.depth, kind });
    }

    /// Walk the rest of `view` with `table`; returns the nested records as [`Value::Fields`].
    /// The view is left at the nested walk's end offset.
    pub fn walk_nested(&mut self, view: &mut ByteCursor<'_>, table: &TagTable) -> Value {
        if self.depth >= self.limits.max_depth {
            self.report(table.name, None, view.position(), MalformedKind::TooDeep(self.limits.max_depth));
            return Value::Bytes(view.read_rest().to_vec());
        }
        let outer = view.endianness();
        let mut inner = view.with_endianness(table.endianness);
        self.depth += 1;
        let fields = walk_records(&mut inner, table, self);
        self.depth -= 1;
        *view = inner.with_endianness(outer);
        Value::Fields(fields)
    }
}

/// Walk `buffer[start..end]` with default limits.
pub fn walk(buffer: &[u8], start: usize, end: usize, table: &TagTable) -> WalkResult {
    walk_with(buffer, start, end, table, WalkLimits::default())
}

pub fn walk_with(buffer: &[u8], start: usize, end: usize, table: &TagTable, limits: WalkLimits) -> WalkResult {
    let mut ctx = WalkContext::new(limits);
    let mut cursor = ByteCursor::bounded(buffer, start, end).with_endianness(table.endianness);
    let fields = walk_records(&mut cursor, table, &mut ctx);
    WalkResult { fields, malformed: ctx.into_reports(), end_offset: cursor.position() }
}

/// Walk the cursor's remaining range inside an existing context (top level of a handler
/// that already holds a [`WalkContext`]).
pub fn walk_in(cursor: &mut ByteCursor<'_>, table: &TagTable, ctx: &mut WalkContext) -> Vec<DecodedField> {
    let outer = cursor.endianness();
    let mut inner = cursor.with_endianness(table.endianness);
    let fields = walk_records(&mut inner, table, ctx);
    *cursor = inner.with_endianness(outer);
    fields
}

struct RawHeader {
    tag: u32,
    /// Value length from the header; `None` for tag-only headers.
    declared: Option<usize>,
}

enum HeaderError {
    Short { tag: Option<u32> },
    BadLength { tag: u32, declared: usize },
}

fn read_header(c: &mut ByteCursor<'_>, format: HeaderFormat) -> Result<RawHeader, HeaderError> {
    match format {
        HeaderFormat::TagLength { tag_width, length_width, inclusive } => {
            let tag = c.read_uint(tag_width as usize).map_err(|_| HeaderError::Short { tag: None })? as u32;
            let raw = c.read_uint(length_width as usize).map_err(|_| HeaderError::Short { tag: Some(tag) })? as usize;
            let declared = if inclusive {
                let header = format.size();
                if raw < header {
                    return Err(HeaderError::BadLength { tag, declared: raw });
                }
                raw - header
            } else {
                raw
            };
            Ok(RawHeader { tag, declared: Some(declared) })
        }
        HeaderFormat::Packed { length_bits } => {
            let b = c.read_u8().map_err(|_| HeaderError::Short { tag: None })?;
            let mask = ((1u16 << length_bits) - 1) as u8;
            let tag = (b as u16 >> length_bits) as u32;
            Ok(RawHeader { tag, declared: Some((b & mask) as usize) })
        }
        HeaderFormat::TagOnly { tag_width } => {
            let tag = c.read_uint(tag_width as usize).map_err(|_| HeaderError::Short { tag: None })? as u32;
            Ok(RawHeader { tag, declared: None })
        }
    }
}

/// Value extent decided from header and table entry.
enum Extent {
    /// Value length; `skip` extra bytes follow it (separator).
    Value { len: usize, skip: usize, terminal: bool },
    Unterminated { len: usize, sep: u8 },
    Fatal(MalformedKind),
}

fn value_extent(c: &mut ByteCursor<'_>, header: &RawHeader, entry: Option<&TagEntry>) -> Extent {
    let remaining = c.remaining_len();
    let class = entry.map(|e| e.tag.length);
    match (header.declared, class) {
        (_, Some(LengthClass::Remainder)) => Extent::Value { len: remaining, skip: 0, terminal: true },
        (Some(declared), _) if declared > remaining => Extent::Fatal(MalformedKind::Overrun { declared, available: remaining }),
        (Some(declared), _) => Extent::Value { len: declared, skip: 0, terminal: false },
        (None, Some(LengthClass::Fixed(n))) if n > remaining => {
            Extent::Fatal(MalformedKind::Truncated { needed: n, available: remaining })
        }
        (None, Some(LengthClass::Fixed(n))) => Extent::Value { len: n, skip: 0, terminal: false },
        (None, Some(LengthClass::Prefixed)) => match c.read_u8() {
            Ok(n) if n as usize > remaining - 1 => {
                Extent::Fatal(MalformedKind::Overrun { declared: n as usize, available: remaining - 1 })
            }
            Ok(n) => Extent::Value { len: n as usize, skip: 0, terminal: false },
            Err(_) => Extent::Fatal(MalformedKind::Header { available: remaining }),
        },
        (None, Some(LengthClass::UntilSeparator(sep))) => match c.remaining().iter().position(|&b| b == sep) {
            Some(i) => Extent::Value { len: i, skip: 1, terminal: false },
            None => Extent::Unterminated { len: remaining, sep },
        },
        // Unknown tag without a length on the wire: no way to find the next header.
        (None, None) => Extent::Value { len: remaining, skip: 0, terminal: true },
    }
}

fn walk_records(c: &mut ByteCursor<'_>, table: &TagTable, ctx: &mut WalkContext) -> Vec<DecodedField> {
    let mut fields = Vec::new();
    let end = c.end();
    while !c.is_empty() {
        let offset = c.position();
        let header = match read_header(c, table.header) {
            Ok(h) => h,
            Err(e) => {
                let (tag, kind) = match e {
                    HeaderError::Short { tag } => (tag, MalformedKind::Header { available: end - offset }),
                    HeaderError::BadLength { tag, declared } => (Some(tag), MalformedKind::BadLength { declared }),
                };
                fields.push(malformed_record(c, table, tag, offset, offset, end));
                ctx.report(table.name, tag, offset, kind);
                stop_at(c, offset);
                return fields;
            }
        };
        let entry = table.get(header.tag);
        let extent = value_extent(c, &header, entry);
        let value_start = c.position();
        let (len, skip, terminal, flag) = match extent {
            Extent::Value { len, skip, terminal } => (len, skip, terminal, None),
            Extent::Unterminated { len, sep } => (len, 0, true, Some(MalformedKind::Unterminated(sep))),
            Extent::Fatal(kind) => {
                fields.push(malformed_record(c, table, Some(header.tag), offset, value_start, end));
                ctx.report(table.name, Some(header.tag), offset, kind);
                stop_at(c, offset);
                return fields;
            }
        };

        let value_end = value_start + len;
        let mut view = match c.view(value_start, value_end) {
            Ok(v) => v,
            Err(e) => {
                // Extent computation keeps value_end within the cursor; treat a miss as overrun.
                fields.push(malformed_record(c, table, Some(header.tag), offset, value_start, end));
                ctx.report(table.name, Some(header.tag), offset, MalformedKind::Decode(e));
                stop_at(c, offset);
                return fields;
            }
        };
        let next = (value_end + skip).min(end);
        stop_at(c, next);

        let mut field = match entry {
            None => {
                log::trace!("{}: unknown tag {} at {} ({} bytes)", table.name, header.tag, offset, len);
                DecodedField {
                    tag: header.tag,
                    name: None,
                    byte_range: (offset, next),
                    value_range: (value_start, value_end),
                    value: Value::Bytes(view.remaining().to_vec()),
                    malformed: false,
                }
            }
            Some(e) => {
                log::trace!("{}: {} ({}) at {} ({} bytes)", table.name, e.name, header.tag, offset, len);
                decode_entry(e, &mut view, header.declared, offset, next, table, ctx)
            }
        };
        if let Some(kind) = flag {
            field.malformed = true;
            ctx.report(table.name, Some(header.tag), offset, kind);
        }
        fields.push(field);
        if terminal {
            break;
        }
    }
    fields
}

fn decode_entry(
    entry: &TagEntry,
    view: &mut ByteCursor<'_>,
    declared: Option<usize>,
    offset: usize,
    next: usize,
    table: &TagTable,
    ctx: &mut WalkContext,
) -> DecodedField {
    let value_range = (view.start(), view.end());
    let raw = view.remaining();
    let opaque = |malformed| DecodedField {
        tag: entry.tag.id,
        name: Some(entry.name),
        byte_range: (offset, next),
        value_range,
        value: Value::Bytes(raw.to_vec()),
        malformed,
    };

    if let (LengthClass::Fixed(expected), Some(declared)) = (entry.tag.length, declared) {
        if expected != declared {
            ctx.report(table.name, Some(entry.tag.id), offset, MalformedKind::LengthMismatch { expected, declared });
            return opaque(true);
        }
    }

    let decoded = match entry.decode {
        Some(f) => f(view, ctx),
        None => match entry.tag.length {
            LengthClass::Fixed(n @ (1 | 2 | 4 | 8)) => view.read_uint(n).map(|v| Value::unsigned(n, v)),
            _ => Ok(Value::Bytes(raw.to_vec())),
        },
    };
    match decoded {
        Ok(value) => DecodedField { tag: entry.tag.id, name: Some(entry.name), byte_range: (offset, next), value_range, value, malformed: false },
        Err(e) => {
            ctx.report(table.name, Some(entry.tag.id), offset, MalformedKind::Decode(e));
            opaque(true)
        }
    }
}

/// Record for a field whose length could not be trusted: covers what is left of the range.
fn malformed_record(c: &ByteCursor<'_>, table: &TagTable, tag: Option<u32>, offset: usize, value_start: usize, end: usize) -> DecodedField {
    let value_start = value_start.min(end);
    DecodedField {
        tag: tag.unwrap_or(UNREADABLE_TAG),
        name: tag.and_then(|t| table.get(t)).map(|e| e.name),
        byte_range: (offset, end),
        value_range: (value_start, end),
        value: Value::Bytes(c.buffer()[value_start..end].to_vec()),
        malformed: true,
    }
}

fn stop_at(c: &mut ByteCursor<'_>, pos: usize) {
    // `pos` always lies in the cursor's range: record offsets and value ends are bounded by it.
    let _ = c.seek(pos);
}

// Decode functions shared by the protocol tables.

/// Whole value as UTF-8 text.
pub fn text(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let n = c.remaining_len();
    Ok(Value::Str(c.read_utf8(n)?.to_string()))
}

/// Whole value as an unsigned big/little-endian integer of its own width (1..=8 bytes).
pub fn uint(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let n = c.remaining_len();
    Ok(Value::unsigned(n, c.read_uint(n)?))
}

/// Whole value as a signed integer of its own width (1, 2, 4 or 8 bytes).
pub fn int(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    Ok(match c.remaining_len() {
        1 => Value::I8(c.read_i8()?),
        2 => Value::I16(c.read_i16()?),
        4 => Value::I32(c.read_i32()?),
        8 => Value::I64(c.read_i64()?),
        n => return Err(CursorError::Width(n)),
    })
}

/// Four bytes as a dotted-quad string.
pub fn ipv4(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let b = c.read_bytes(4)?;
    Ok(Value::Str(Ipv4Addr::new(b[0], b[1], b[2], b[3]).to_string()))
}
