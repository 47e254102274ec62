//! RADIUS (RFC 2865/2866/5176): fixed 20-byte header, then attributes walked with
//! [`HeaderFormat::T1L1_INCLUSIVE`].
//!
//! Vendor-Specific attributes (26) carry a vendor id and vendor sub-attributes. Known vendors
//! are walked with their own header layout; an unknown vendor is tried with the RFC 2865
//! suggested layout and shown as opaque data if that trial walk does not parse cleanly.
//!
//! Requests and replies are matched on the packet identifier within the conversation.

use crate::cursor::{ByteCursor, CursorError};
use crate::matcher::{CorrelationId, MessageType, Role, TransactionKey};
use crate::protocols::header_failure;
use crate::session::{DissectContext, Dissection, Dissector, MessageMeta};
use crate::table::{HeaderFormat, LengthClass, TagEntry, TagTable};
use crate::value::{DecodedField, Value};
use crate::walk::{self, MalformedKind, WalkContext};

pub const NAME: &str = "radius";
pub const HEADER_LEN: usize = 20;

pub const TAG_CODE: u32 = 1000;
pub const TAG_IDENTIFIER: u32 = 1001;
pub const TAG_LENGTH: u32 = 1002;
pub const TAG_AUTHENTICATOR: u32 = 1003;

pub const ATTR_VENDOR_SPECIFIC: u32 = 26;
/// Tag of the vendor id inside a decoded Vendor-Specific value.
pub const VSA_VENDOR_ID: u32 = 0;

use LengthClass::{Fixed, Prefixed};

static ATTRIBUTE_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "User-Name", Prefixed).decoded(walk::text),
    TagEntry::new(2, "User-Password", Prefixed),
    TagEntry::new(3, "CHAP-Password", Prefixed),
    TagEntry::new(4, "NAS-IP-Address", Fixed(4)).decoded(walk::ipv4),
    TagEntry::new(5, "NAS-Port", Fixed(4)),
    TagEntry::new(6, "Service-Type", Fixed(4)),
    TagEntry::new(7, "Framed-Protocol", Fixed(4)),
    TagEntry::new(8, "Framed-IP-Address", Fixed(4)).decoded(walk::ipv4),
    TagEntry::new(11, "Filter-Id", Prefixed).decoded(walk::text),
    TagEntry::new(12, "Framed-MTU", Fixed(4)),
    TagEntry::new(18, "Reply-Message", Prefixed).decoded(walk::text),
    TagEntry::new(24, "State", Prefixed),
    TagEntry::new(25, "Class", Prefixed),
    TagEntry::new(ATTR_VENDOR_SPECIFIC, "Vendor-Specific", Prefixed).decoded(vendor_specific),
    TagEntry::new(27, "Session-Timeout", Fixed(4)),
    TagEntry::new(28, "Idle-Timeout", Fixed(4)),
    TagEntry::new(30, "Called-Station-Id", Prefixed).decoded(walk::text),
    TagEntry::new(31, "Calling-Station-Id", Prefixed).decoded(walk::text),
    TagEntry::new(32, "NAS-Identifier", Prefixed).decoded(walk::text),
    TagEntry::new(40, "Acct-Status-Type", Fixed(4)),
    TagEntry::new(41, "Acct-Delay-Time", Fixed(4)),
    TagEntry::new(42, "Acct-Input-Octets", Fixed(4)),
    TagEntry::new(43, "Acct-Output-Octets", Fixed(4)),
    TagEntry::new(44, "Acct-Session-Id", Prefixed).decoded(walk::text),
    TagEntry::new(46, "Acct-Session-Time", Fixed(4)),
    TagEntry::new(61, "NAS-Port-Type", Fixed(4)),
    TagEntry::new(79, "EAP-Message", Prefixed),
    TagEntry::new(80, "Message-Authenticator", Fixed(16)),
    TagEntry::new(87, "NAS-Port-Id", Prefixed).decoded(walk::text),
];

pub static ATTRIBUTES: TagTable = TagTable::new("radius.attr", HeaderFormat::T1L1_INCLUSIVE, ATTRIBUTE_ENTRIES);

static CISCO_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "Cisco-AVPair", Prefixed).decoded(walk::text),
    TagEntry::new(2, "Cisco-NAS-Port", Prefixed).decoded(walk::text),
];

static MICROSOFT_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "MS-CHAP-Response", Fixed(50)),
    TagEntry::new(7, "MS-MPPE-Encryption-Policy", Fixed(4)),
    TagEntry::new(8, "MS-MPPE-Encryption-Types", Fixed(4)),
    TagEntry::new(11, "MS-CHAP-Challenge", Prefixed),
    TagEntry::new(16, "MS-MPPE-Send-Key", Prefixed),
    TagEntry::new(17, "MS-MPPE-Recv-Key", Prefixed),
    TagEntry::new(26, "MS-CHAP2-Response", Fixed(50)),
];

static TGPP_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "3GPP-IMSI", Prefixed).decoded(walk::text),
    TagEntry::new(2, "3GPP-Charging-Id", Fixed(4)),
    TagEntry::new(3, "3GPP-PDP-Type", Fixed(4)),
    TagEntry::new(8, "3GPP-IMSI-MCC-MNC", Prefixed).decoded(walk::text),
    TagEntry::new(10, "3GPP-NSAPI", Prefixed).decoded(walk::text),
];

static LUCENT_ENTRIES: &[TagEntry] = &[
    TagEntry::new(2, "Lucent-Max-Shared-Users", Fixed(4)),
    TagEntry::new(44, "Lucent-Session-Type", Fixed(4)),
];

static STARENT_ENTRIES: &[TagEntry] = &[
    TagEntry::new(1, "SN-VPN-ID", Fixed(4)),
    TagEntry::new(2, "SN-VPN-Name", Prefixed).decoded(walk::text),
];

static GENERIC_VSA: TagTable = TagTable::new("radius.vsa", HeaderFormat::T1L1_INCLUSIVE, &[]);

/// Vendor id → sub-attribute table (with the vendor's type/length widths).
static VENDORS: &[(u32, TagTable)] = &[
    (9, TagTable::new("radius.vsa.cisco", HeaderFormat::T1L1_INCLUSIVE, CISCO_ENTRIES)),
    (311, TagTable::new("radius.vsa.microsoft", HeaderFormat::T1L1_INCLUSIVE, MICROSOFT_ENTRIES)),
    (4846, TagTable::new("radius.vsa.lucent", HeaderFormat::TagLength { tag_width: 2, length_width: 1, inclusive: true }, LUCENT_ENTRIES)),
    (8164, TagTable::new("radius.vsa.starent", HeaderFormat::TagLength { tag_width: 2, length_width: 2, inclusive: true }, STARENT_ENTRIES)),
    (10415, TagTable::new("radius.vsa.3gpp", HeaderFormat::T1L1_INCLUSIVE, TGPP_ENTRIES)),
];

pub fn vendor_table(vendor: u32) -> Option<&'static TagTable> {
    VENDORS.iter().find(|(id, _)| *id == vendor).map(|(_, t)| t)
}

fn vendor_specific(c: &mut ByteCursor<'_>, ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let start = c.position();
    let vendor = c.read_u32()?;
    let mut out = vec![DecodedField::fixed(VSA_VENDOR_ID, "Vendor-Id", start, start + 4, Value::U32(vendor))];
    match vendor_table(vendor) {
        Some(table) => {
            if let Value::Fields(sub) = ctx.walk_nested(c, table) {
                out.extend(sub);
            }
        }
        None => {
            let data_start = c.position();
            let mut trial = ctx.scratch();
            let mut view = *c;
            let parsed = trial.walk_nested(&mut view, &GENERIC_VSA);
            match parsed {
                Value::Fields(sub) if trial.reports().is_empty() => {
                    ctx.absorb(trial);
                    out.extend(sub);
                }
                _ => {
                    let rest = c.read_rest();
                    out.push(DecodedField {
                        tag: VSA_VENDOR_ID,
                        name: None,
                        byte_range: (data_start, data_start + rest.len()),
                        value_range: (data_start, data_start + rest.len()),
                        value: Value::Bytes(rest.to_vec()),
                        malformed: false,
                    });
                }
            }
        }
    }
    Ok(Value::Fields(out))
}

pub fn code_name(code: u8) -> &'static str {
    match code {
        1 => "Access-Request",
        2 => "Access-Accept",
        3 => "Access-Reject",
        4 => "Accounting-Request",
        5 => "Accounting-Response",
        11 => "Access-Challenge",
        12 => "Status-Server",
        13 => "Status-Client",
        40 => "Disconnect-Request",
        41 => "Disconnect-ACK",
        42 => "Disconnect-NAK",
        43 => "CoA-Request",
        44 => "CoA-ACK",
        45 => "CoA-NAK",
        _ => "Unknown",
    }
}

/// Request/reply grouping of a packet code; `None` for codes that are not matched.
pub fn message_type(code: u8) -> Option<MessageType> {
    let (category, role) = match code {
        1 => (0, Role::Request),
        2 | 11 => (0, Role::Confirm),
        3 => (0, Role::Reject),
        4 => (1, Role::Request),
        5 => (1, Role::Confirm),
        40 => (2, Role::Request),
        41 => (2, Role::Confirm),
        42 => (2, Role::Reject),
        43 => (3, Role::Request),
        44 => (3, Role::Confirm),
        45 => (3, Role::Reject),
        _ => return None,
    };
    Some(MessageType { category, role })
}

pub struct Radius;

impl Dissector for Radius {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ports(&self) -> &'static [u16] {
        &[1645, 1646, 1812, 1813, 3799]
    }

    fn dissect(&self, meta: &MessageMeta, data: &[u8], cx: &mut DissectContext<'_>) -> Dissection {
        let mut d = Dissection::new(NAME);
        let mut ctx = WalkContext::new(cx.limits);
        let mut c = ByteCursor::new(data);

        let header = (|| -> Result<(u8, u8, u16, [u8; 16]), CursorError> {
            let code = c.read_u8()?;
            let ident = c.read_u8()?;
            let length = c.read_u16()?;
            let mut auth = [0u8; 16];
            auth.copy_from_slice(c.read_bytes(16)?);
            Ok((code, ident, length, auth))
        })();
        let (code, ident, length, auth) = match header {
            Ok(h) => h,
            Err(e) => {
                header_failure(NAME, data, 0, e, &mut d.fields, &mut ctx);
                d.summary = "malformed RADIUS packet".to_string();
                d.malformed = ctx.into_reports();
                return d;
            }
        };

        d.fields.push(DecodedField::fixed(TAG_CODE, "Code", 0, 1, Value::U8(code)));
        d.fields.push(DecodedField::fixed(TAG_IDENTIFIER, "Identifier", 1, 2, Value::U8(ident)));
        d.fields.push(DecodedField::fixed(TAG_LENGTH, "Length", 2, 4, Value::U16(length)));
        d.fields.push(DecodedField::fixed(TAG_AUTHENTICATOR, "Authenticator", 4, HEADER_LEN, Value::Bytes(auth.to_vec())));

        let length = length as usize;
        let end = if length < HEADER_LEN {
            ctx.report(NAME, Some(TAG_LENGTH), 2, MalformedKind::BadLength { declared: length });
            HEADER_LEN
        } else if length > data.len() {
            ctx.report(NAME, Some(TAG_LENGTH), 2, MalformedKind::Overrun { declared: length, available: data.len() });
            data.len()
        } else {
            length
        };
        let mut attrs = ByteCursor::bounded(data, HEADER_LEN, end);
        d.fields.extend(walk::walk_in(&mut attrs, &ATTRIBUTES, &mut ctx));

        d.summary = format!("{} id={}", code_name(code), ident);
        if let Some(mt) = message_type(code) {
            let key = TransactionKey { conversation: meta.conversation, sequence: ident as u32, category: mt.category };
            let correlation = mt.role.is_request().then_some(CorrelationId(auth));
            d.transaction = cx.flows.correlate(key, mt.role, meta.frame, meta.time, correlation);
            if d.is_duplicate() {
                d.summary.push_str(" (duplicate)");
            }
        }
        d.malformed = ctx.into_reports();
        d
    }
}
