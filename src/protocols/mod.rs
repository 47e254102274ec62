//! Thin per-protocol handlers: static tag tables plus the glue that extracts matcher keys.

pub mod dlep;
pub mod radius;
pub mod ras;
pub mod scte35;
pub mod zabbix;

use crate::cursor::{ByteCursor, CursorError};
use crate::value::{DecodedField, Value};
use crate::walk::{MalformedKind, WalkContext};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Record a failure to read a fixed header and keep the unread bytes as one opaque field.
pub(crate) fn header_failure(
    protocol: &'static str,
    data: &[u8],
    offset: usize,
    err: CursorError,
    fields: &mut Vec<DecodedField>,
    ctx: &mut WalkContext,
) {
    let offset = offset.min(data.len());
    ctx.report(protocol, None, offset, MalformedKind::Decode(err));
    fields.push(DecodedField {
        tag: 0,
        name: None,
        byte_range: (offset, data.len()),
        value_range: (offset, data.len()),
        value: Value::Bytes(data[offset..].to_vec()),
        malformed: true,
    });
}

/// Sequential reader that records each value it reads as a [`DecodedField`], for structures
/// with a fixed layout inside a TLV value (descriptor bodies, address items).
pub(crate) struct FieldReader<'c, 'a> {
    pub c: &'c mut ByteCursor<'a>,
    pub out: Vec<DecodedField>,
}

impl<'c, 'a> FieldReader<'c, 'a> {
    pub fn new(c: &'c mut ByteCursor<'a>) -> Self {
        FieldReader { c, out: Vec::new() }
    }

    fn record(&mut self, tag: u32, name: &'static str, start: usize, value: Value) {
        let mut end = self.c.position();
        if !self.c.is_aligned() {
            end += 1;
        }
        self.out.push(DecodedField::fixed(tag, name, start, end, value));
    }

    pub fn uint(&mut self, tag: u32, name: &'static str, width: usize) -> Result<u64, CursorError> {
        let start = self.c.position();
        let v = self.c.read_uint(width)?;
        self.record(tag, name, start, Value::unsigned(width, v));
        Ok(v)
    }

    /// `n` bits MSB-first; 33-bit PTS values are read as 1 + 32.
    pub fn bits(&mut self, tag: u32, name: &'static str, n: u8) -> Result<u64, CursorError> {
        let start = self.c.position();
        let v = if n > 32 {
            let hi = self.c.read_bits(n - 32)? as u64;
            (hi << 32) | self.c.read_bits(32)? as u64
        } else {
            self.c.read_bits(n)? as u64
        };
        let value = match n {
            1..=8 => Value::U8(v as u8),
            9..=16 => Value::U16(v as u16),
            17..=32 => Value::U32(v as u32),
            _ => Value::U64(v),
        };
        self.record(tag, name, start, value);
        Ok(v)
    }

    pub fn flag(&mut self, tag: u32, name: &'static str) -> Result<bool, CursorError> {
        Ok(self.bits(tag, name, 1)? != 0)
    }

    /// Reserved bits: consumed, not recorded.
    pub fn reserved(&mut self, n: u8) -> Result<(), CursorError> {
        self.c.read_bits(n).map(|_| ())
    }

    pub fn bytes(&mut self, tag: u32, name: &'static str, n: usize) -> Result<&'a [u8], CursorError> {
        let start = self.c.position();
        let b = self.c.read_bytes(n)?;
        self.record(tag, name, start, Value::Bytes(b.to_vec()));
        Ok(b)
    }

    pub fn text(&mut self, tag: u32, name: &'static str, n: usize) -> Result<(), CursorError> {
        let start = self.c.position();
        let s = self.c.read_utf8(n)?;
        self.record(tag, name, start, Value::Str(s.to_string()));
        Ok(())
    }

    pub fn ipv4(&mut self, tag: u32, name: &'static str) -> Result<(), CursorError> {
        let start = self.c.position();
        let b = self.c.read_bytes(4)?;
        let addr = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
        self.record(tag, name, start, Value::Str(addr.to_string()));
        Ok(())
    }

    pub fn ipv6(&mut self, tag: u32, name: &'static str) -> Result<(), CursorError> {
        let start = self.c.position();
        let mut octets = [0u8; 16];
        octets.copy_from_slice(self.c.read_bytes(16)?);
        self.record(tag, name, start, Value::Str(Ipv6Addr::from(octets).to_string()));
        Ok(())
    }

    /// A value computed elsewhere (nested walk) spanning `start..` the current position.
    pub fn push(&mut self, tag: u32, name: &'static str, start: usize, value: Value) {
        self.record(tag, name, start, value);
    }

    pub fn finish(self) -> Value {
        Value::Fields(self.out)
    }
}
