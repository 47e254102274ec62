//! DLEP, Dynamic Link Exchange Protocol (RFC 8175).
//!
//! Session messages travel over TCP as `type(2) length(2)` records; a segment may hold several.
//! Discovery signals travel over UDP behind a `"DLEP"` prefix with the same record layout.
//! Both carry data items, again `type(2) length(2)`, walked as nested records.

use crate::cursor::{ByteCursor, CursorError};
use crate::protocols::FieldReader;
use crate::session::{DissectContext, Dissection, Dissector, MessageMeta};
use crate::table::{HeaderFormat, LengthClass, TagEntry, TagTable};
use crate::value::Value;
use crate::walk::{self, WalkContext};

pub const NAME: &str = "dlep";
pub const PORT: u16 = 854;
pub const SIGNAL_PREFIX: &[u8; 4] = b"DLEP";

use LengthClass::{Fixed, Prefixed};

static ITEM_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "Status", Prefixed).decoded(status),
    TagEntry::new(2, "IPv4 Connection Point", Prefixed).decoded(ipv4_connection_point),
    TagEntry::new(3, "IPv6 Connection Point", Prefixed).decoded(ipv6_connection_point),
    TagEntry::new(4, "Peer Type", Prefixed).decoded(peer_type),
    TagEntry::new(5, "Heartbeat Interval", Fixed(4)),
    TagEntry::new(6, "Extensions Supported", Prefixed).decoded(extensions),
    TagEntry::new(7, "MAC Address", Prefixed),
    TagEntry::new(8, "IPv4 Address", Fixed(5)).decoded(ipv4_address),
    TagEntry::new(9, "IPv6 Address", Fixed(17)).decoded(ipv6_address),
    TagEntry::new(10, "IPv4 Attached Subnet", Fixed(6)).decoded(ipv4_subnet),
    TagEntry::new(11, "IPv6 Attached Subnet", Fixed(18)).decoded(ipv6_subnet),
    TagEntry::new(12, "Maximum Data Rate (Receive)", Fixed(8)),
    TagEntry::new(13, "Maximum Data Rate (Transmit)", Fixed(8)),
    TagEntry::new(14, "Current Data Rate (Receive)", Fixed(8)),
    TagEntry::new(15, "Current Data Rate (Transmit)", Fixed(8)),
    TagEntry::new(16, "Latency", Fixed(8)),
    TagEntry::new(17, "Resources", Fixed(1)),
    TagEntry::new(18, "Relative Link Quality (Receive)", Fixed(1)),
    TagEntry::new(19, "Relative Link Quality (Transmit)", Fixed(1)),
    TagEntry::new(20, "Maximum Transmission Unit", Fixed(2)),
];

pub static DATA_ITEMS: TagTable = TagTable::new("dlep.item", HeaderFormat::T2L2, ITEM_ENTRIES);

static MESSAGE_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "Session Initialization", Prefixed).decoded(items),
    TagEntry::new(2, "Session Initialization Response", Prefixed).decoded(items),
    TagEntry::new(3, "Session Update", Prefixed).decoded(items),
    TagEntry::new(4, "Session Update Response", Prefixed).decoded(items),
    TagEntry::new(5, "Session Termination", Prefixed).decoded(items),
    TagEntry::new(6, "Session Termination Response", Prefixed).decoded(items),
    TagEntry::new(7, "Destination Up", Prefixed).decoded(items),
    TagEntry::new(8, "Destination Up Response", Prefixed).decoded(items),
    TagEntry::new(9, "Destination Announce", Prefixed).decoded(items),
    TagEntry::new(10, "Destination Announce Response", Prefixed).decoded(items),
    TagEntry::new(11, "Destination Down", Prefixed).decoded(items),
    TagEntry::new(12, "Destination Down Response", Prefixed).decoded(items),
    TagEntry::new(13, "Destination Update", Prefixed).decoded(items),
    TagEntry::new(14, "Link Characteristics Request", Prefixed).decoded(items),
    TagEntry::new(15, "Link Characteristics Response", Prefixed).decoded(items),
    TagEntry::new(16, "Heartbeat", Prefixed).decoded(items),
];

pub static MESSAGES: TagTable = TagTable::new("dlep.message", HeaderFormat::T2L2, MESSAGE_ENTRIES);

static SIGNAL_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "Peer Discovery", Prefixed).decoded(items),
    TagEntry::new(2, "Peer Offer", Prefixed).decoded(items),
];

pub static SIGNALS: TagTable = TagTable::new("dlep.signal", HeaderFormat::T2L2, SIGNAL_ENTRIES);

fn items(c: &mut ByteCursor<'_>, ctx: &mut WalkContext) -> Result<Value, CursorError> {
    Ok(ctx.walk_nested(c, &DATA_ITEMS))
}

fn status(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Status Code", 1)?;
    let n = r.c.remaining_len();
    r.text(2, "Text", n)?;
    Ok(r.finish())
}

fn peer_type(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    let n = r.c.remaining_len();
    r.text(2, "Description", n)?;
    Ok(r.finish())
}

fn ipv4_connection_point(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    r.ipv4(2, "Address")?;
    if !r.c.is_empty() {
        r.uint(3, "Port", 2)?;
    }
    Ok(r.finish())
}

fn ipv6_connection_point(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    r.ipv6(2, "Address")?;
    if !r.c.is_empty() {
        r.uint(3, "Port", 2)?;
    }
    Ok(r.finish())
}

fn extensions(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    while !r.c.is_empty() {
        r.uint(1, "Extension", 2)?;
    }
    Ok(r.finish())
}

fn ipv4_address(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    r.ipv4(2, "Address")?;
    Ok(r.finish())
}

fn ipv6_address(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    r.ipv6(2, "Address")?;
    Ok(r.finish())
}

fn ipv4_subnet(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    r.ipv4(2, "Subnet")?;
    r.uint(3, "Prefix Length", 1)?;
    Ok(r.finish())
}

fn ipv6_subnet(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "Flags", 1)?;
    r.ipv6(2, "Subnet")?;
    r.uint(3, "Prefix Length", 1)?;
    Ok(r.finish())
}

pub struct Dlep;

impl Dissector for Dlep {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ports(&self) -> &'static [u16] {
        &[PORT]
    }

    fn dissect(&self, _meta: &MessageMeta, data: &[u8], cx: &mut DissectContext<'_>) -> Dissection {
        let mut d = Dissection::new(NAME);
        let mut ctx = WalkContext::new(cx.limits);
        let (table, start) = if data.starts_with(SIGNAL_PREFIX) { (&SIGNALS, SIGNAL_PREFIX.len()) } else { (&MESSAGES, 0) };
        let mut c = ByteCursor::bounded(data, start, data.len());
        d.fields = walk::walk_in(&mut c, table, &mut ctx);

        let names: Vec<&str> = d.fields.iter().map(|f| f.name.unwrap_or("Unknown")).collect();
        d.summary = if names.is_empty() { "empty".to_string() } else { names.join(", ") };
        d.malformed = ctx.into_reports();
        d
    }
}
