//! Bounds-checked primitive readers over one message buffer.
//!
//! A [`ByteCursor`] is an immutable view over a byte slice plus a mutable read position and an
//! exclusive end bound. Every read checks the bound first and returns [`CursorError`] instead of
//! panicking, so a truncated packet can never cause a read past `end`.
//!
//! Sub-views created with [`ByteCursor::view`] share the underlying slice, which keeps offsets
//! absolute: a field decoded three levels deep still reports its position in the original
//! message.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Byte order for multi-byte integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    #[error("need {needed} bytes at offset {offset}, {available} available")]
    Truncated { offset: usize, needed: usize, available: usize },
    #[error("view {start}..{end} outside {lower}..{upper}")]
    OutOfRange { start: usize, end: usize, lower: usize, upper: usize },
    #[error("invalid UTF-8 in {start}..{end}")]
    InvalidUtf8 { start: usize, end: usize },
    #[error("unsupported integer width {0}")]
    Width(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    start: usize,
    pos: usize,
    end: usize,
    endianness: Endianness,
    /// Bit offset (0..8) into `data[pos]` while reading bit-fields; 0 when byte aligned.
    bit: u8,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        ByteCursor { data, start: 0, pos: 0, end: data.len(), endianness: Endianness::Big, bit: 0 }
    }

    /// Cursor over `data[start..end]`; `end` is clamped to the slice length.
    pub fn bounded(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        let start = start.min(end);
        ByteCursor { data, start, pos: start, end, endianness: Endianness::Big, bit: 0 }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Sub-view over absolute offsets `[start, end)`, which must lie inside this view's bounds.
    pub fn view(&self, start: usize, end: usize) -> Result<ByteCursor<'a>, CursorError> {
        if start > end || start < self.start || end > self.end {
            return Err(CursorError::OutOfRange { start, end, lower: self.start, upper: self.end });
        }
        Ok(ByteCursor { data: self.data, start, pos: start, end, endianness: self.endianness, bit: 0 })
    }

    /// Sub-view over the next `len` bytes; advances this cursor past them.
    pub fn take(&mut self, len: usize) -> Result<ByteCursor<'a>, CursorError> {
        self.ensure(len)?;
        let v = self.view(self.pos, self.pos + len)?;
        self.pos += len;
        Ok(v)
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move to absolute offset `pos` inside this view (byte aligned).
    pub fn seek(&mut self, pos: usize) -> Result<(), CursorError> {
        if pos < self.start || pos > self.end {
            return Err(CursorError::OutOfRange { start: pos, end: pos, lower: self.start, upper: self.end });
        }
        self.pos = pos;
        self.bit = 0;
        Ok(())
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn remaining_len(&self) -> usize {
        self.end - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.end
    }

    pub fn remaining(&self) -> &'a [u8] {
        &self.data[self.pos..self.end]
    }

    /// The whole underlying buffer (not just this view).
    pub fn buffer(&self) -> &'a [u8] {
        self.data
    }

    fn ensure(&self, needed: usize) -> Result<(), CursorError> {
        if self.bit != 0 || needed > self.end - self.pos {
            return Err(CursorError::Truncated { offset: self.pos, needed, available: self.end - self.pos });
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CursorError> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    pub fn peek_u8(&self) -> Result<u8, CursorError> {
        self.ensure(1)?;
        Ok(self.data[self.pos])
    }

    pub fn read_u8(&mut self) -> Result<u8, CursorError> {
        let v = self.peek_u8()?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_i8(&mut self) -> Result<i8, CursorError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, CursorError> {
        self.ensure(2)?;
        let b = &self.data[self.pos..];
        let v = match self.endianness {
            Endianness::Big => BigEndian::read_u16(b),
            Endianness::Little => LittleEndian::read_u16(b),
        };
        self.pos += 2;
        Ok(v)
    }

    pub fn read_u32(&mut self) -> Result<u32, CursorError> {
        self.ensure(4)?;
        let b = &self.data[self.pos..];
        let v = match self.endianness {
            Endianness::Big => BigEndian::read_u32(b),
            Endianness::Little => LittleEndian::read_u32(b),
        };
        self.pos += 4;
        Ok(v)
    }

    pub fn read_u64(&mut self) -> Result<u64, CursorError> {
        self.ensure(8)?;
        let b = &self.data[self.pos..];
        let v = match self.endianness {
            Endianness::Big => BigEndian::read_u64(b),
            Endianness::Little => LittleEndian::read_u64(b),
        };
        self.pos += 8;
        Ok(v)
    }

    pub fn read_i16(&mut self) -> Result<i16, CursorError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32, CursorError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_i64(&mut self) -> Result<i64, CursorError> {
        Ok(self.read_u64()? as i64)
    }

    /// Unsigned integer of 1 to 8 bytes (odd widths such as 3 or 5 included).
    pub fn read_uint(&mut self, width: usize) -> Result<u64, CursorError> {
        if width == 0 || width > 8 {
            return Err(CursorError::Width(width));
        }
        self.ensure(width)?;
        let b = &self.data[self.pos..self.pos + width];
        let v = match self.endianness {
            Endianness::Big => BigEndian::read_uint(b, width),
            Endianness::Little => LittleEndian::read_uint(b, width),
        };
        self.pos += width;
        Ok(v)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], CursorError> {
        self.ensure(n)?;
        let b = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    pub fn read_rest(&mut self) -> &'a [u8] {
        let b = &self.data[self.pos..self.end];
        self.pos = self.end;
        self.bit = 0;
        b
    }

    pub fn read_utf8(&mut self, n: usize) -> Result<&'a str, CursorError> {
        let start = self.pos;
        let b = self.read_bytes(n)?;
        std::str::from_utf8(b).map_err(|_| {
            self.pos = start;
            CursorError::InvalidUtf8 { start, end: start + n }
        })
    }

    /// Bytes up to (not including) `sep`; the separator itself is consumed.
    /// Returns `None` and leaves the cursor untouched when no separator is present.
    pub fn read_until(&mut self, sep: u8) -> Option<&'a [u8]> {
        if self.bit != 0 {
            return None;
        }
        let hay = &self.data[self.pos..self.end];
        let i = hay.iter().position(|&b| b == sep)?;
        self.pos += i + 1;
        Some(&hay[..i])
    }

    /// Read `n` (1..=32) bits MSB-first, as PER and packed headers lay them out.
    pub fn read_bits(&mut self, n: u8) -> Result<u32, CursorError> {
        if n == 0 || n > 32 {
            return Err(CursorError::Width(n as usize));
        }
        let total_bits = (self.end - self.pos) * 8 - self.bit as usize;
        if n as usize > total_bits {
            return Err(CursorError::Truncated {
                offset: self.pos,
                needed: (self.bit as usize + n as usize + 7) / 8,
                available: self.end - self.pos,
            });
        }
        let mut v: u32 = 0;
        for _ in 0..n {
            let byte = self.data[self.pos];
            let b = (byte >> (7 - self.bit)) & 1;
            v = (v << 1) | b as u32;
            self.bit += 1;
            if self.bit == 8 {
                self.bit = 0;
                self.pos += 1;
            }
        }
        Ok(v)
    }

    pub fn read_bit(&mut self) -> Result<bool, CursorError> {
        Ok(self.read_bits(1)? != 0)
    }

    pub fn is_aligned(&self) -> bool {
        self.bit == 0
    }

    /// Skip to the next octet boundary (aligned-PER padding).
    pub fn align(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.pos += 1;
        }
    }
}
