//! # tlvmatch — TLV record walking and request/response matching for captured protocols
//!
//! Two engines with thin protocol handlers on top:
//!
//! - **Walker** ([`walk`]): turns a byte range into [`DecodedField`] records using a static
//!   [`TagTable`] (tag → length class → decode function). Lengths are checked against the walked
//!   range before any value is read; an overrun stops the walk with a malformed report and keeps
//!   the fields decoded so far. Unknown tags become opaque fields.
//! - **Matcher** ([`matcher`]): per-session [`FlowTable`] of pending calls keyed by
//!   conversation, sequence number and message category. Responses go to the latest request
//!   with the same key; repeated requests are new requests or duplicates depending on the time
//!   since the last one (300 s when answered, 1800 s otherwise).
//!
//! ## Protocols
//!
//! | Module | Transport | Matching |
//! |--------|-----------|----------|
//! | [`protocols::ras`] | UDP 1718/1719 | `requestSeqNum`, `category = tag / 3` |
//! | [`protocols::radius`] | UDP 1812/1813/1645/1646/3799 | identifier |
//! | [`protocols::dlep`] | TCP/UDP 854 | none |
//! | [`protocols::scte35`] | by name or port override | none |
//! | [`protocols::zabbix`] | TCP 10050/10051 | one exchange per connection |
//!
//! ## Usage
//!
//! ```ignore
//! use tlvmatch::{Session, MessageMeta};
//!
//! let mut session = Session::with_defaults();
//! for (meta, payload) in messages {
//!     if let Some(d) = session.dissect_by_port(&meta, payload) {
//!         println!("{}", tlvmatch::dump::dissection_to_string(&meta, &d));
//!     }
//! }
//! ```
//!
//! The `dissect_pcap` binary does this for a pcap or pcapng file.

pub mod capture;
pub mod config;
pub mod cursor;
pub mod dump;
pub mod matcher;
pub mod protocols;
pub mod session;
pub mod table;
pub mod value;
pub mod walk;

pub use capture::{CaptureError, CapturedPacket, ConversationTable, Transport, TransportPayload};
pub use config::{Config, ConfigError};
pub use cursor::{ByteCursor, CursorError, Endianness};
pub use matcher::{
    CallId, ConversationId, CorrelationId, FlowTable, MessageType, PendingCall, RequestMatch, ResponseMatch, Role,
    TimeDelta, Timestamp, TransactionInfo, TransactionKey,
};
pub use session::{DissectContext, Dissection, Dissector, MessageMeta, Registry, Session, SessionError};
pub use table::{FieldTag, HeaderFormat, LengthClass, TagEntry, TagTable};
pub use value::{find_field, DecodedField, Value, UNREADABLE_TAG};
pub use walk::{walk, walk_with, MalformedKind, MalformedReport, WalkContext, WalkLimits, WalkResult};
