//! Text rendering of dissections: one header line per message, the field tree, malformed
//! reports and the transaction cross-reference.

use crate::matcher::{Role, TransactionInfo};
use crate::session::{Dissection, MessageMeta};
use crate::value::{DecodedField, Value};
use crate::walk::MalformedReport;
use std::io::{self, Write};

/// Longest byte string printed inline; longer values are cut with `..`.
const MAX_INLINE_BYTES: usize = 32;

pub fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Scalar, string or byte value on one line. Nested lists show their size.
pub fn format_value(v: &Value) -> String {
    match v {
        Value::U8(x) => format!("{}", x),
        Value::U16(x) => format!("{}", x),
        Value::U32(x) => format!("{}", x),
        Value::U64(x) => format!("{}", x),
        Value::I8(x) => format!("{}", x),
        Value::I16(x) => format!("{}", x),
        Value::I32(x) => format!("{}", x),
        Value::I64(x) => format!("{}", x),
        Value::Str(s) => format!("{:?}", s),
        Value::Bytes(b) if b.len() > MAX_INLINE_BYTES => format!("hex({} ..) [{} bytes]", hex_string(&b[..MAX_INLINE_BYTES]), b.len()),
        Value::Bytes(b) => format!("hex({})", hex_string(b)),
        Value::Fields(f) => format!("{} fields", f.len()),
    }
}

fn field_label(f: &DecodedField) -> String {
    match f.name {
        Some(name) => format!("{} ({})", name, f.tag),
        None if f.is_unreadable() => "<unreadable header>".to_string(),
        None => format!("<unknown {}>", f.tag),
    }
}

/// Indented field tree; nested values are written one level deeper.
pub fn write_fields(w: &mut dyn Write, fields: &[DecodedField], indent: usize) -> io::Result<()> {
    let pad = "  ".repeat(indent);
    for f in fields {
        let (a, b) = f.byte_range;
        let mark = if f.malformed { "  MALFORMED" } else { "" };
        match &f.value {
            Value::Fields(children) => {
                writeln!(w, "{}[{}-{}] {}:{}", pad, a, b, field_label(f), mark)?;
                write_fields(w, children, indent + 1)?;
            }
            v => writeln!(w, "{}[{}-{}] {}: {}{}", pad, a, b, field_label(f), format_value(v), mark)?,
        }
    }
    Ok(())
}

pub fn write_report(w: &mut dyn Write, r: &MalformedReport) -> io::Result<()> {
    match r.tag {
        Some(tag) => writeln!(w, "  malformed: {} tag {} at {} (depth {}): {}", r.table, tag, r.offset, r.depth, r.kind),
        None => writeln!(w, "  malformed: {} at {} (depth {}): {}", r.table, r.offset, r.depth, r.kind),
    }
}

/// e.g. `response to frame 100, latency 2.000000000s` or `request, duplicate`.
pub fn transaction_line(t: &TransactionInfo) -> String {
    let mut s = match (t.role, t.peer_frame) {
        (Role::Request, Some(peer)) => format!("request, answered in frame {}", peer),
        (Role::Request, None) => "request, no response seen".to_string(),
        (role, Some(peer)) => format!("{} to frame {}", if role == Role::Reject { "reject" } else { "response" }, peer),
        (_, None) => "response, no request seen".to_string(),
    };
    if let Some(latency) = t.latency {
        s.push_str(&format!(", latency {}s", latency));
    }
    if let Some(id) = t.correlation_id {
        s.push_str(&format!(", correlation {}", id));
    }
    if t.is_duplicate {
        s.push_str(", duplicate");
    }
    s
}

pub fn write_dissection(w: &mut dyn Write, meta: &MessageMeta, d: &Dissection) -> io::Result<()> {
    writeln!(w, "=== frame {}  {}  {} -> {}  {} ===", meta.frame, meta.time, meta.source, meta.destination, d.protocol)?;
    writeln!(w, "  {}", d.summary)?;
    if let Some(t) = &d.transaction {
        writeln!(w, "  transaction: {}", transaction_line(t))?;
    }
    write_fields(w, &d.fields, 1)?;
    for r in &d.malformed {
        write_report(w, r)?;
    }
    Ok(())
}

/// Payload bytes, 16 per line, with offsets.
pub fn write_hex_with_offset(w: &mut dyn Write, data: &[u8]) -> io::Result<()> {
    const COLS: usize = 16;
    for (i, chunk) in data.chunks(COLS).enumerate() {
        writeln!(w, "  offset {:4}: {}", i * COLS, hex_string(chunk))?;
    }
    Ok(())
}

pub fn dissection_to_string(meta: &MessageMeta, d: &Dissection) -> String {
    let mut buf = Vec::new();
    // Writing to a Vec cannot fail.
    let _ = write_dissection(&mut buf, meta, d);
    String::from_utf8_lossy(&buf).into_owned()
}
