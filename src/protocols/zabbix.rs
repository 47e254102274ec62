//! Zabbix agent/server protocol.
//!
//! A packet is `"ZBXD"`, one flags byte, then two little-endian lengths (4 bytes each, or 8 with
//! the large-packet flag): data length and reserved (uncompressed length when compressed). The
//! data runs to the end of the packet. Old passive agents send a bare key ending in `\n`.
//!
//! Each TCP connection carries one request and its response, so matching uses sequence 0 and
//! takes the role from the direction: towards port 10050/10051 is a request.

use crate::cursor::{ByteCursor, CursorError, Endianness};
use crate::matcher::{MessageType, Role, TransactionKey};
use crate::protocols::header_failure;
use crate::session::{DissectContext, Dissection, Dissector, MessageMeta};
use crate::value::{DecodedField, Value};
use crate::walk::{MalformedKind, WalkContext};

pub const NAME: &str = "zabbix";
pub const MAGIC: &[u8; 4] = b"ZBXD";
pub const AGENT_PORT: u16 = 10050;
pub const SERVER_PORT: u16 = 10051;

pub const FLAG_PROTOCOL: u8 = 0x01;
pub const FLAG_COMPRESSED: u8 = 0x02;
pub const FLAG_LARGE: u8 = 0x04;

pub const TAG_MAGIC: u32 = 1;
pub const TAG_FLAGS: u32 = 2;
pub const TAG_LENGTH: u32 = 3;
pub const TAG_RESERVED: u32 = 4;
pub const TAG_DATA: u32 = 5;
pub const TAG_KEY: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZabbixHeader {
    pub flags: u8,
    pub data_len: u64,
    pub reserved: u64,
    /// Offset of the first data byte.
    pub data_offset: usize,
}

pub fn read_header(c: &mut ByteCursor<'_>, fields: &mut Vec<DecodedField>) -> Result<ZabbixHeader, CursorError> {
    let start = c.position();
    c.skip(MAGIC.len())?;
    fields.push(DecodedField::fixed(TAG_MAGIC, "Header", start, start + 4, Value::Str("ZBXD".to_string())));
    let flags = c.read_u8()?;
    fields.push(DecodedField::fixed(TAG_FLAGS, "Flags", start + 4, start + 5, Value::U8(flags)));
    let width = if flags & FLAG_LARGE != 0 { 8 } else { 4 };
    let mut le = c.with_endianness(Endianness::Little);
    let at = le.position();
    let data_len = le.read_uint(width)?;
    let reserved = le.read_uint(width)?;
    *c = le.with_endianness(c.endianness());
    fields.push(DecodedField::fixed(TAG_LENGTH, "Length", at, at + width, Value::unsigned(width, data_len)));
    let reserved_name = if flags & FLAG_COMPRESSED != 0 { "Uncompressed Length" } else { "Reserved" };
    fields.push(DecodedField::fixed(TAG_RESERVED, reserved_name, at + width, at + 2 * width, Value::unsigned(width, reserved)));
    Ok(ZabbixHeader { flags, data_len, reserved, data_offset: c.position() })
}

/// Request or response, from the transport direction.
pub fn role(meta: &MessageMeta) -> Role {
    match meta.destination.port() {
        AGENT_PORT | SERVER_PORT => Role::Request,
        _ => Role::Confirm,
    }
}

pub struct Zabbix;

impl Zabbix {
    fn payload(&self, d: &mut Dissection, data: &[u8], ctx: &mut WalkContext) -> Result<String, CursorError> {
        let mut c = ByteCursor::new(data);
        let header = read_header(&mut c, &mut d.fields)?;

        let available = c.remaining_len();
        let declared = usize::try_from(header.data_len).unwrap_or(usize::MAX);
        if declared > available {
            ctx.report(NAME, Some(TAG_LENGTH), 5, MalformedKind::Overrun { declared, available });
        }
        let start = c.position();
        let bytes = c.read_bytes(declared.min(available))?;
        let compressed = header.flags & FLAG_COMPRESSED != 0;
        let value = match std::str::from_utf8(bytes) {
            Ok(s) if !compressed => Value::Str(s.to_string()),
            _ => Value::Bytes(bytes.to_vec()),
        };
        d.fields.push(DecodedField {
            malformed: declared > available,
            ..DecodedField::fixed(TAG_DATA, "Data", start, start + bytes.len(), value)
        });
        Ok(if compressed { format!("{} bytes (compressed)", header.data_len) } else { format!("{} bytes", header.data_len) })
    }
}

impl Dissector for Zabbix {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ports(&self) -> &'static [u16] {
        &[AGENT_PORT, SERVER_PORT]
    }

    fn dissect(&self, meta: &MessageMeta, data: &[u8], cx: &mut DissectContext<'_>) -> Dissection {
        let mut d = Dissection::new(NAME);
        let mut ctx = WalkContext::new(cx.limits);
        let role = role(meta);
        let kind = if role.is_request() { "request" } else { "response" };

        if data.starts_with(MAGIC) {
            match self.payload(&mut d, data, &mut ctx) {
                Ok(size) => d.summary = format!("Zabbix {}, {}", kind, size),
                Err(e) => {
                    let at = d.fields.last().map(|f| f.byte_range.1).unwrap_or(0);
                    header_failure(NAME, data, at, e, &mut d.fields, &mut ctx);
                    d.summary = format!("Zabbix {}, malformed header", kind);
                }
            }
        } else {
            let mut c = ByteCursor::new(data);
            let (key, end) = match c.read_until(b'\n') {
                Some(k) => (k, k.len() + 1),
                None => (c.read_rest(), data.len()),
            };
            let value = match std::str::from_utf8(key) {
                Ok(s) => Value::Str(s.to_string()),
                Err(_) => Value::Bytes(key.to_vec()),
            };
            d.fields.push(DecodedField { value_range: (0, key.len()), ..DecodedField::fixed(TAG_KEY, "Key", 0, end, value) });
            d.summary = format!("Zabbix {} (no header)", kind);
        }

        let mt = MessageType { category: 0, role };
        let key = TransactionKey { conversation: meta.conversation, sequence: 0, category: mt.category };
        d.transaction = cx.flows.correlate(key, mt.role, meta.frame, meta.time, None);
        if d.is_duplicate() {
            d.summary.push_str(" (duplicate)");
        }
        d.malformed = ctx.into_reports();
        d
    }
}
