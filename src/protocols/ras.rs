//! H.225 RAS (Registration, Admission and Status).
//!
//! The body is aligned PER, which this crate does not decode. The handler reads only what the
//! transaction matcher needs: the `RasMessage` choice index and the leading `requestSeqNum`
//! of the request/confirm/reject messages (tags 0..=20). Those tags come in triples, so
//! `category = tag / 3` and `role = tag % 3`. The rest of the message is kept as opaque bytes.
//! The conferenceID is not extracted, so RAS calls carry no correlation id.

use crate::cursor::{ByteCursor, CursorError};
use crate::matcher::{MessageType, TransactionKey};
use crate::protocols::header_failure;
use crate::session::{DissectContext, Dissection, Dissector, MessageMeta};
use crate::value::{DecodedField, Value};
use crate::walk::WalkContext;

pub const NAME: &str = "h225.ras";

pub const TAG_MESSAGE: u32 = 1;
pub const TAG_REQUEST_SEQ_NUM: u32 = 2;
pub const TAG_BODY: u32 = 3;

/// Alternatives in the root of the `RasMessage` choice (5-bit index).
pub const ROOT_ALTERNATIVES: u32 = 25;

/// Tags below this value are request/confirm/reject triples and go through the matcher.
pub const MATCHED_TAGS: u32 = 21;

/// OPTIONAL components in the extension root of each matched message; they precede
/// `requestSeqNum` as a presence bitmap.
pub const ROOT_OPTIONALS: [u8; MATCHED_TAGS as usize] = [
    4, 2, 2, // gatekeeper
    3, 3, 2, // registration
    3, 1, 1, // unregistration
    7, 2, 1, // admission
    2, 1, 1, // bandwidth
    1, 1, 1, // disengage
    2, 1, 1, // location
];

const MESSAGE_NAMES: [&str; 33] = [
    "gatekeeperRequest",
    "gatekeeperConfirm",
    "gatekeeperReject",
    "registrationRequest",
    "registrationConfirm",
    "registrationReject",
    "unregistrationRequest",
    "unregistrationConfirm",
    "unregistrationReject",
    "admissionRequest",
    "admissionConfirm",
    "admissionReject",
    "bandwidthRequest",
    "bandwidthConfirm",
    "bandwidthReject",
    "disengageRequest",
    "disengageConfirm",
    "disengageReject",
    "locationRequest",
    "locationConfirm",
    "locationReject",
    "infoRequest",
    "infoRequestResponse",
    "nonStandardMessage",
    "unknownMessageResponse",
    "requestInProgress",
    "resourcesAvailableIndicate",
    "resourcesAvailableConfirm",
    "infoRequestAck",
    "infoRequestNak",
    "serviceControlIndication",
    "serviceControlResponse",
    "admissionConfirmSequence",
];

pub fn message_name(tag: u32) -> &'static str {
    MESSAGE_NAMES.get(tag as usize).copied().unwrap_or("unknown")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasHeader {
    pub tag: u32,
    pub request_seq_num: Option<u16>,
    /// Offset of the two `requestSeqNum` bytes.
    pub seq_offset: Option<usize>,
    /// First byte after what was read.
    pub body_offset: usize,
}

pub fn read_header(c: &mut ByteCursor<'_>) -> Result<RasHeader, CursorError> {
    let extended = c.read_bit()?;
    let tag = if extended {
        // Normally small non-negative number: a flag bit, then 6 bits when below 64.
        if c.read_bit()? {
            c.align();
            return Ok(RasHeader { tag: u32::MAX, request_seq_num: None, seq_offset: None, body_offset: c.position() });
        }
        ROOT_ALTERNATIVES + c.read_bits(6)?
    } else {
        c.read_bits(5)?
    };

    let Some(&optionals) = ROOT_OPTIONALS.get(tag as usize) else {
        c.align();
        return Ok(RasHeader { tag, request_seq_num: None, seq_offset: None, body_offset: c.position() });
    };
    // Sequence extension bit, then the root presence bitmap.
    c.read_bit()?;
    if optionals > 0 {
        c.read_bits(optionals)?;
    }
    c.align();
    let seq_offset = c.position();
    // INTEGER (1..65535), two aligned octets holding the offset from 1.
    let seq = c.read_u16()?.wrapping_add(1);
    Ok(RasHeader { tag, request_seq_num: Some(seq), seq_offset: Some(seq_offset), body_offset: c.position() })
}

/// Encode the choice index and `requestSeqNum` of a matched message with an empty presence
/// bitmap. `None` for tags outside 0..=20 or a zero sequence number.
pub fn encode_header(tag: u32, request_seq_num: u16) -> Option<Vec<u8>> {
    let optionals = *ROOT_OPTIONALS.get(tag as usize)? as u32;
    if request_seq_num == 0 {
        return None;
    }
    // choice ext (0) | 5-bit index | sequence ext (0) | presence bits (all 0)
    let nbits = 1 + 5 + 1 + optionals;
    let word = tag << (1 + optionals);
    let mut out = if nbits <= 8 {
        vec![(word << (8 - nbits)) as u8]
    } else {
        ((word << (16 - nbits)) as u16).to_be_bytes().to_vec()
    };
    out.extend_from_slice(&(request_seq_num - 1).to_be_bytes());
    Some(out)
}

pub struct Ras;

impl Dissector for Ras {
    fn name(&self) -> &'static str {
        NAME
    }

    fn ports(&self) -> &'static [u16] {
        &[1718, 1719]
    }

    fn dissect(&self, meta: &MessageMeta, data: &[u8], cx: &mut DissectContext<'_>) -> Dissection {
        let mut d = Dissection::new(NAME);
        let mut ctx = WalkContext::new(cx.limits);
        let mut c = ByteCursor::new(data);

        let header = match read_header(&mut c) {
            Ok(h) => h,
            Err(e) => {
                header_failure(NAME, data, 0, e, &mut d.fields, &mut ctx);
                d.summary = "malformed RAS message".to_string();
                d.malformed = ctx.into_reports();
                return d;
            }
        };

        let name = message_name(header.tag);
        d.fields.push(DecodedField::fixed(TAG_MESSAGE, "RasMessage", 0, 1, Value::U32(header.tag)));
        if let (Some(seq), Some(at)) = (header.request_seq_num, header.seq_offset) {
            d.fields.push(DecodedField::fixed(TAG_REQUEST_SEQ_NUM, "requestSeqNum", at, at + 2, Value::U16(seq)));
        }
        let mut body = ByteCursor::bounded(data, header.body_offset, data.len());
        if !body.is_empty() {
            let start = body.position();
            let rest = body.read_rest();
            d.fields.push(DecodedField::fixed(TAG_BODY, "body", start, data.len(), Value::Bytes(rest.to_vec())));
        }

        d.summary = match header.request_seq_num {
            Some(seq) => format!("{} seq {}", name, seq),
            None => name.to_string(),
        };

        if let (true, Some(seq)) = (header.tag < MATCHED_TAGS, header.request_seq_num) {
            let mt = MessageType::from_tag(header.tag);
            let key = TransactionKey { conversation: meta.conversation, sequence: seq as u32, category: mt.category };
            d.transaction = cx.flows.correlate(key, mt.role, meta.frame, meta.time, None);
            if d.is_duplicate() {
                d.summary.push_str(" (duplicate)");
            }
        }
        d.malformed = ctx.into_reports();
        d
    }
}
