//! SCTE-35 splice information sections (ANSI/SCTE 35).
//!
//! The section header and splice command are bit-packed and read with [`FieldReader`]. The
//! descriptor loop is a `tag(1) length(1)` walk; segmentation descriptors carry a UPID whose
//! MID form (type 0x0D) is itself a list of `type(1) length(1)` UPIDs and may nest.
//!
//! Sections usually arrive inside MPEG-TS, which this crate does not demultiplex; the handler
//! has no default port and is reached by name or through a port override.

use crate::cursor::{ByteCursor, CursorError};
use crate::protocols::{header_failure, FieldReader};
use crate::session::{DissectContext, Dissection, Dissector, MessageMeta};
use crate::table::{HeaderFormat, LengthClass, TagEntry, TagTable};
use crate::value::{DecodedField, Value};
use crate::walk::{self, MalformedKind, WalkContext};

pub const NAME: &str = "scte35";
pub const TABLE_ID: u8 = 0xFC;
/// `splice_command_length` value meaning "not given, parse the command to find its end".
pub const UNKNOWN_COMMAND_LENGTH: usize = 0xFFF;
/// "CUEI"
pub const CUEI: u32 = 0x4355_4549;
const CRC_LEN: usize = 4;

pub const TAG_TABLE_ID: u32 = 1;
pub const TAG_SECTION_LENGTH: u32 = 5;
pub const TAG_ENCRYPTED: u32 = 7;
pub const TAG_PTS_ADJUSTMENT: u32 = 9;
pub const TAG_COMMAND_LENGTH: u32 = 12;
pub const TAG_COMMAND_TYPE: u32 = 13;
pub const TAG_COMMAND: u32 = 14;
pub const TAG_DESCRIPTOR_LOOP_LENGTH: u32 = 15;
pub const TAG_DESCRIPTORS: u32 = 16;
pub const TAG_STUFFING: u32 = 17;
pub const TAG_E_CRC: u32 = 18;
pub const TAG_CRC: u32 = 19;

pub const DESCRIPTOR_SEGMENTATION: u32 = 0x02;
pub const UPID_MID: u32 = 0x0D;

/// Tags inside a segmentation descriptor value.
pub mod segmentation {
    pub const IDENTIFIER: u32 = 1;
    pub const EVENT_ID: u32 = 2;
    pub const CANCEL: u32 = 3;
    pub const DURATION: u32 = 11;
    pub const UPID_TYPE: u32 = 12;
    pub const UPID_LENGTH: u32 = 13;
    pub const UPID: u32 = 14;
    pub const TYPE_ID: u32 = 15;
    pub const SEGMENT_NUM: u32 = 16;
    pub const SEGMENTS_EXPECTED: u32 = 17;
}

use LengthClass::{Fixed, Prefixed};

static DESCRIPTOR_ENTRIES: &[TagEntry] = &[
    TagEntry::new(0x00, "avail_descriptor", Prefixed).decoded(avail),
    TagEntry::new(0x01, "DTMF_descriptor", Prefixed).decoded(dtmf),
    TagEntry::new(DESCRIPTOR_SEGMENTATION, "segmentation_descriptor", Prefixed).decoded(segmentation_descriptor),
    TagEntry::new(0x03, "time_descriptor", Fixed(16)).decoded(time_descriptor),
    TagEntry::new(0x04, "audio_descriptor", Prefixed).decoded(audio),
];

pub static DESCRIPTORS: TagTable = TagTable::new("scte35.descriptor", HeaderFormat::T1L1, DESCRIPTOR_ENTRIES);

static UPID_ENTRIES: &[TagEntry] = &[
    TagEntry::new(0x01, "User Defined", Prefixed),
    TagEntry::new(0x02, "ISCI", Fixed(8)).decoded(walk::text),
    TagEntry::new(0x03, "Ad-ID", Fixed(12)).decoded(walk::text),
    TagEntry::new(0x04, "UMID", Fixed(32)),
    TagEntry::new(0x05, "ISAN (deprecated)", Fixed(8)),
    TagEntry::new(0x06, "ISAN", Fixed(12)),
    TagEntry::new(0x07, "TID", Fixed(12)).decoded(walk::text),
    TagEntry::new(0x08, "TI", Fixed(8)),
    TagEntry::new(0x09, "ADI", Prefixed).decoded(walk::text),
    TagEntry::new(0x0A, "EIDR", Fixed(12)),
    TagEntry::new(0x0B, "ATSC Content Identifier", Prefixed),
    TagEntry::new(0x0C, "MPU", Prefixed),
    TagEntry::new(UPID_MID, "MID", Prefixed).decoded(mid),
    TagEntry::new(0x0E, "ADS Information", Prefixed).decoded(walk::text),
    TagEntry::new(0x0F, "URI", Prefixed).decoded(walk::text),
    TagEntry::new(0x10, "UUID", Fixed(16)),
];

/// UPIDs inside a MID: `type(1) length(1) value`.
pub static UPIDS: TagTable = TagTable::new("scte35.upid", HeaderFormat::T1L1, UPID_ENTRIES);

pub fn command_name(command_type: u8) -> &'static str {
    match command_type {
        0x00 => "splice_null",
        0x04 => "splice_schedule",
        0x05 => "splice_insert",
        0x06 => "time_signal",
        0x07 => "bandwidth_reservation",
        0xFF => "private_command",
        _ => "reserved",
    }
}

pub fn segmentation_type_name(type_id: u8) -> &'static str {
    match type_id {
        0x00 => "Not Indicated",
        0x01 => "Content Identification",
        0x10 => "Program Start",
        0x11 => "Program End",
        0x12 => "Program Early Termination",
        0x13 => "Program Breakaway",
        0x14 => "Program Resumption",
        0x20 => "Chapter Start",
        0x21 => "Chapter End",
        0x22 => "Break Start",
        0x23 => "Break End",
        0x30 => "Provider Advertisement Start",
        0x31 => "Provider Advertisement End",
        0x32 => "Distributor Advertisement Start",
        0x33 => "Distributor Advertisement End",
        0x34 => "Provider Placement Opportunity Start",
        0x35 => "Provider Placement Opportunity End",
        0x36 => "Distributor Placement Opportunity Start",
        0x37 => "Distributor Placement Opportunity End",
        0x40 => "Unscheduled Event Start",
        0x41 => "Unscheduled Event End",
        0x50 => "Network Start",
        0x51 => "Network End",
        _ => "Unknown",
    }
}

fn splice_time(r: &mut FieldReader<'_, '_>) -> Result<(), CursorError> {
    if r.flag(20, "time_specified_flag")? {
        r.reserved(6)?;
        r.bits(21, "pts_time", 33)?;
    } else {
        r.reserved(7)?;
    }
    Ok(())
}

fn break_duration(r: &mut FieldReader<'_, '_>) -> Result<(), CursorError> {
    r.flag(22, "auto_return")?;
    r.reserved(6)?;
    r.bits(23, "duration", 33)?;
    Ok(())
}

fn splice_insert(r: &mut FieldReader<'_, '_>) -> Result<(), CursorError> {
    r.uint(1, "splice_event_id", 4)?;
    let cancel = r.flag(2, "splice_event_cancel_indicator")?;
    r.reserved(7)?;
    if cancel {
        return Ok(());
    }
    r.flag(3, "out_of_network_indicator")?;
    let program = r.flag(4, "program_splice_flag")?;
    let duration = r.flag(5, "duration_flag")?;
    let immediate = r.flag(6, "splice_immediate_flag")?;
    r.reserved(4)?;
    if program && !immediate {
        splice_time(r)?;
    }
    if !program {
        let count = r.uint(7, "component_count", 1)?;
        for _ in 0..count {
            let start = r.c.position();
            let mut sub = FieldReader::new(&mut *r.c);
            sub.uint(1, "component_tag", 1)?;
            if !immediate {
                splice_time(&mut sub)?;
            }
            let value = sub.finish();
            r.push(8, "component", start, value);
        }
    }
    if duration {
        break_duration(r)?;
    }
    r.uint(9, "unique_program_id", 2)?;
    r.uint(10, "avail_num", 1)?;
    r.uint(11, "avails_expected", 1)?;
    Ok(())
}

/// Decode a command body. `None` when the command type has no parseable layout.
fn splice_command(command_type: u8, c: &mut ByteCursor<'_>) -> Result<Option<Value>, CursorError> {
    let mut r = FieldReader::new(c);
    match command_type {
        0x00 | 0x07 => {}
        0x05 => splice_insert(&mut r)?,
        0x06 => splice_time(&mut r)?,
        0xFF => {
            r.uint(1, "identifier", 4)?;
            let n = r.c.remaining_len();
            r.bytes(2, "private_byte", n)?;
        }
        _ => return Ok(None),
    }
    Ok(Some(r.finish()))
}

fn avail(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "identifier", 4)?;
    r.uint(2, "provider_avail_id", 4)?;
    Ok(r.finish())
}

fn dtmf(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "identifier", 4)?;
    r.uint(2, "preroll", 1)?;
    let count = r.bits(3, "dtmf_count", 3)? as usize;
    r.reserved(5)?;
    r.text(4, "DTMF_char", count)?;
    Ok(r.finish())
}

fn time_descriptor(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "identifier", 4)?;
    r.uint(2, "TAI_seconds", 6)?;
    r.uint(3, "TAI_ns", 4)?;
    r.uint(4, "UTC_offset", 2)?;
    Ok(r.finish())
}

fn audio(c: &mut ByteCursor<'_>, _ctx: &mut WalkContext) -> Result<Value, CursorError> {
    let mut r = FieldReader::new(c);
    r.uint(1, "identifier", 4)?;
    let count = r.bits(2, "audio_count", 4)?;
    r.reserved(4)?;
    for _ in 0..count {
        let start = r.c.position();
        let mut sub = FieldReader::new(&mut *r.c);
        sub.uint(1, "component_tag", 1)?;
        sub.text(2, "ISO_code", 3)?;
        sub.bits(3, "Bit_Stream_Mode", 3)?;
        sub.bits(4, "Num_Channels", 4)?;
        sub.flag(5, "Full_Srvc_Audio")?;
        let value = sub.finish();
        r.push(3, "component", start, value);
    }
    Ok(r.finish())
}

fn mid(c: &mut ByteCursor<'_>, ctx: &mut WalkContext) -> Result<Value, CursorError> {
    Ok(ctx.walk_nested(c, &UPIDS))
}

/// Value of a UPID of `upid_type` over exactly its bytes.
fn upid_value(upid_type: u32, mut view: ByteCursor<'_>, ctx: &mut WalkContext) -> Value {
    let raw = view.remaining();
    match UPIDS.get(upid_type).and_then(|e| e.decode) {
        Some(decode) => decode(&mut view, ctx).unwrap_or_else(|_| Value::Bytes(raw.to_vec())),
        None => Value::Bytes(raw.to_vec()),
    }
}

fn segmentation_descriptor(c: &mut ByteCursor<'_>, ctx: &mut WalkContext) -> Result<Value, CursorError> {
    use self::segmentation as tag;

    let mut r = FieldReader::new(c);
    r.uint(tag::IDENTIFIER, "identifier", 4)?;
    r.uint(tag::EVENT_ID, "segmentation_event_id", 4)?;
    let cancel = r.flag(tag::CANCEL, "segmentation_event_cancel_indicator")?;
    r.reserved(7)?;
    if cancel {
        return Ok(r.finish());
    }
    let program = r.flag(4, "program_segmentation_flag")?;
    let has_duration = r.flag(5, "segmentation_duration_flag")?;
    let not_restricted = r.flag(6, "delivery_not_restricted_flag")?;
    if not_restricted {
        r.reserved(5)?;
    } else {
        r.flag(7, "web_delivery_allowed_flag")?;
        r.flag(8, "no_regional_blackout_flag")?;
        r.flag(9, "archive_allowed_flag")?;
        r.bits(10, "device_restrictions", 2)?;
    }
    if !program {
        let count = r.uint(18, "component_count", 1)?;
        for _ in 0..count {
            let start = r.c.position();
            let mut sub = FieldReader::new(&mut *r.c);
            sub.uint(1, "component_tag", 1)?;
            sub.reserved(7)?;
            sub.bits(2, "pts_offset", 33)?;
            let value = sub.finish();
            r.push(19, "component", start, value);
        }
    }
    if has_duration {
        r.uint(tag::DURATION, "segmentation_duration", 5)?;
    }
    let upid_type = r.uint(tag::UPID_TYPE, "segmentation_upid_type", 1)? as u32;
    let upid_len = r.uint(tag::UPID_LENGTH, "segmentation_upid_length", 1)? as usize;
    let upid_start = r.c.position();
    let view = r.c.take(upid_len)?;
    let upid = upid_value(upid_type, view, ctx);
    r.push(tag::UPID, "segmentation_upid", upid_start, upid);
    let type_id = r.uint(tag::TYPE_ID, "segmentation_type_id", 1)?;
    r.uint(tag::SEGMENT_NUM, "segment_num", 1)?;
    r.uint(tag::SEGMENTS_EXPECTED, "segments_expected", 1)?;
    if matches!(type_id, 0x34 | 0x36 | 0x38 | 0x3A) && r.c.remaining_len() >= 2 {
        r.uint(20, "sub_segment_num", 1)?;
        r.uint(21, "sub_segments_expected", 1)?;
    }
    Ok(r.finish())
}

/// Read the whole section into `r`; returns the summary line.
fn read_section(r: &mut FieldReader<'_, '_>, ctx: &mut WalkContext) -> Result<String, CursorError> {
    let table_id = r.uint(TAG_TABLE_ID, "table_id", 1)?;
    if table_id != TABLE_ID as u64 {
        log::debug!("{}: table_id 0x{:02x}, expected 0x{:02x}", NAME, table_id, TABLE_ID);
    }
    r.flag(2, "section_syntax_indicator")?;
    r.flag(3, "private_indicator")?;
    r.bits(4, "sap_type", 2)?;
    let section_length = r.bits(TAG_SECTION_LENGTH, "section_length", 12)? as usize;
    let available = r.c.end();
    let mut section_end = 3 + section_length;
    if section_end > available {
        ctx.report(NAME, Some(TAG_SECTION_LENGTH), 1, MalformedKind::Overrun { declared: section_length, available: available - 3 });
        section_end = available;
    }

    r.uint(6, "protocol_version", 1)?;
    let encrypted = r.flag(TAG_ENCRYPTED, "encrypted_packet")?;
    r.bits(8, "encryption_algorithm", 6)?;
    r.bits(TAG_PTS_ADJUSTMENT, "pts_adjustment", 33)?;
    r.uint(10, "cw_index", 1)?;
    r.bits(11, "tier", 12)?;
    let command_length = r.bits(TAG_COMMAND_LENGTH, "splice_command_length", 12)? as usize;
    let command_type = r.uint(TAG_COMMAND_TYPE, "splice_command_type", 1)? as u8;
    let name = command_name(command_type);

    let command_start = r.c.position();
    let body_end = section_end.saturating_sub(CRC_LEN).max(command_start);
    let mut command = if command_length == UNKNOWN_COMMAND_LENGTH {
        ByteCursor::bounded(r.c.buffer(), command_start, body_end)
    } else {
        r.c.view(command_start, command_start + command_length)?
    };
    let raw = command.remaining();
    let value = match splice_command(command_type, &mut command) {
        Ok(Some(v)) => v,
        Ok(None) if command_length == UNKNOWN_COMMAND_LENGTH => {
            ctx.report(NAME, Some(TAG_COMMAND_LENGTH), command_start, MalformedKind::BadLength { declared: command_length });
            r.c.seek(body_end)?;
            r.push(TAG_COMMAND, name, command_start, Value::Bytes(raw.to_vec()));
            return Ok(name.to_string());
        }
        Ok(None) => Value::Bytes(raw.to_vec()),
        Err(e) => {
            ctx.report(NAME, Some(TAG_COMMAND), command_start, MalformedKind::Decode(e));
            if command_length == UNKNOWN_COMMAND_LENGTH {
                r.c.seek(body_end)?;
                r.push(TAG_COMMAND, name, command_start, Value::Bytes(raw.to_vec()));
                return Ok(name.to_string());
            }
            Value::Bytes(raw.to_vec())
        }
    };
    let command_end = if command_length == UNKNOWN_COMMAND_LENGTH { command.position() } else { command_start + command_length };
    r.c.seek(command_end)?;
    r.push(TAG_COMMAND, name, command_start, value);

    let loop_length = r.uint(TAG_DESCRIPTOR_LOOP_LENGTH, "descriptor_loop_length", 2)? as usize;
    let loop_start = r.c.position();
    let mut loop_end = loop_start + loop_length;
    if loop_end > body_end {
        ctx.report(
            NAME,
            Some(TAG_DESCRIPTOR_LOOP_LENGTH),
            loop_start - 2,
            MalformedKind::Overrun { declared: loop_length, available: body_end.saturating_sub(loop_start) },
        );
        loop_end = body_end.max(loop_start);
    }
    let mut descriptors = ByteCursor::bounded(r.c.buffer(), loop_start, loop_end);
    let fields = walk::walk_in(&mut descriptors, &DESCRIPTORS, ctx);
    let count = fields.len();
    r.c.seek(loop_end)?;
    r.push(TAG_DESCRIPTORS, "splice_descriptors", loop_start, Value::Fields(fields));

    let trailer = section_end.saturating_sub(r.c.position());
    if trailer > CRC_LEN {
        let stuffing = if encrypted { trailer.saturating_sub(2 * CRC_LEN) } else { trailer - CRC_LEN };
        if stuffing > 0 {
            r.bytes(TAG_STUFFING, "alignment_stuffing", stuffing)?;
        }
        if encrypted && trailer >= 2 * CRC_LEN {
            r.uint(TAG_E_CRC, "E_CRC_32", 4)?;
        }
    }
    if section_end >= r.c.position() + CRC_LEN {
        r.uint(TAG_CRC, "CRC_32", 4)?;
    }

    Ok(match count {
        0 => name.to_string(),
        1 => format!("{} (1 descriptor)", name),
        n => format!("{} ({} descriptors)", name, n),
    })
}

/// Segmentation type ids found in a decoded section's descriptor loop.
pub fn segmentation_types(fields: &[DecodedField]) -> Vec<u8> {
    fields
        .iter()
        .filter(|f| f.tag == TAG_DESCRIPTORS)
        .filter_map(|f| f.value.as_fields())
        .flatten()
        .filter(|d| d.tag == DESCRIPTOR_SEGMENTATION)
        .filter_map(|d| d.child(segmentation::TYPE_ID))
        .filter_map(|t| t.value.as_u64())
        .map(|t| t as u8)
        .collect()
}

pub struct Scte35;

impl Dissector for Scte35 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn dissect(&self, _meta: &MessageMeta, data: &[u8], cx: &mut DissectContext<'_>) -> Dissection {
        let mut d = Dissection::new(NAME);
        let mut ctx = WalkContext::new(cx.limits);
        let mut c = ByteCursor::new(data);
        let mut r = FieldReader::new(&mut c);
        let result = read_section(&mut r, &mut ctx);
        let at = r.c.position();
        d.fields = r.out;
        match result {
            Ok(summary) => {
                d.summary = summary;
                for t in segmentation_types(&d.fields) {
                    d.summary.push_str(&format!(", {}", segmentation_type_name(t)));
                }
            }
            Err(e) => {
                header_failure(NAME, data, at, e, &mut d.fields, &mut ctx);
                d.summary = "malformed splice_info_section".to_string();
            }
        }
        d.malformed = ctx.into_reports();
        d
    }
}
