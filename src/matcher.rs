//! Request/response correlation keyed by (conversation, sequence number, message category).
//!
//! Every [`TransactionKey`] owns a short chain of [`PendingCall`]s in insertion order (oldest
//! request first). Chains live in one arena inside [`FlowTable`] and link through [`CallId`]
//! handles, so nothing is ever freed individually: the whole table is dropped or
//! [`reset`](FlowTable::reset) at the end of a capture.
//!
//! ## Requests
//!
//! [`FlowTable::on_request`] walks the chain for the key:
//!
//! - a node with the same request frame is returned unchanged (the frame is being decoded
//!   again);
//! - at the tail, a request is *new* only if it comes after the tail's last frame and the tail's
//!   request is old enough: more than [`ANSWERED_REPEAT_SECS`] if the tail was answered, more
//!   than [`UNANSWERED_REPEAT_SECS`] if not. A new request is appended as the new tail.
//! - otherwise the incoming frame is a retransmission: it is flagged duplicate and no node is
//!   created or changed.
//!
//! Elapsed time is the nanosecond delta truncated to whole seconds, recomputed on every decision; timestamps are
//! not assumed to be monotonic.
//!
//! ## Responses
//!
//! [`FlowTable::on_response`] stops at a node already holding this response frame, otherwise
//! falls through to the chain tail. Only the tail is eligible: earlier unanswered siblings are
//! never retried. The first response is recorded; a different frame answering an answered call
//! is flagged duplicate and leaves the recorded frame untouched.
//!
//! ## Categories and roles
//!
//! Protocols that number their message types in request/confirm/reject triples (H.225 RAS)
//! derive both from the tag: `category = tag / 3`, `role = tag % 3`
//! (see [`MessageType::from_tag`]). Other protocols build [`MessageType`] themselves.

use std::collections::HashMap;
use std::fmt;

/// A repeated request to an answered call is a new request after this many seconds.
pub const ANSWERED_REPEAT_SECS: i64 = 300;
/// A repeated request to an unanswered call is a new request after this many seconds.
pub const UNANSWERED_REPEAT_SECS: i64 = 1800;

/// Absolute capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(secs: i64, nanos: u32) -> Self {
        Timestamp { secs, nanos }
    }

    pub const fn from_secs(secs: i64) -> Self {
        Timestamp { secs, nanos: 0 }
    }

    pub fn from_micros(secs: i64, micros: u32) -> Self {
        Timestamp { secs, nanos: micros.saturating_mul(1000).min(999_999_999) }
    }

    /// Signed difference `self - earlier`.
    pub fn delta(self, earlier: Timestamp) -> TimeDelta {
        let a = self.secs as i128 * 1_000_000_000 + self.nanos as i128;
        let b = earlier.secs as i128 * 1_000_000_000 + earlier.nanos as i128;
        TimeDelta { nanos: (a - b).clamp(i64::MIN as i128, i64::MAX as i128) as i64 }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:09}", self.secs, self.nanos)
    }
}

/// Signed time difference, nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDelta {
    nanos: i64,
}

impl TimeDelta {
    pub const fn from_nanos(nanos: i64) -> Self {
        TimeDelta { nanos }
    }

    pub const fn from_secs(secs: i64) -> Self {
        TimeDelta { nanos: secs * 1_000_000_000 }
    }

    pub fn as_nanos(&self) -> i64 {
        self.nanos
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.nanos as f64 / 1e9
    }
}

impl fmt::Display for TimeDelta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.nanos < 0 { "-" } else { "" };
        let abs = self.nanos.unsigned_abs();
        write!(f, "{}{}.{:09}", sign, abs / 1_000_000_000, abs % 1_000_000_000)
    }
}

/// Host-assigned identity of a bidirectional flow. Only compared for equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationId(pub u64);

/// Opaque 16-byte correlation value carried by a request (conference GUID, authenticator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub [u8; 16]);

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Request,
    /// Positive reply.
    Confirm,
    /// Negative reply.
    Reject,
}

impl Role {
    pub fn is_request(self) -> bool {
        self == Role::Request
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageType {
    pub category: u32,
    pub role: Role,
}

impl MessageType {
    /// Request/confirm/reject triples: `category = tag / 3`, `role = tag % 3`.
    pub fn from_tag(tag: u32) -> Self {
        let role = match tag % 3 {
            0 => Role::Request,
            1 => Role::Confirm,
            _ => Role::Reject,
        };
        MessageType { category: tag / 3, role }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionKey {
    pub conversation: ConversationId,
    pub sequence: u32,
    pub category: u32,
}

/// Handle of a [`PendingCall`] in its [`FlowTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(usize);

impl CallId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingCall {
    pub request_frame: u32,
    /// 0 until the first response is seen; set once.
    pub response_frame: u32,
    pub request_time: Timestamp,
    pub correlation_id: Option<CorrelationId>,
    pub responded: bool,
    /// Next (younger) request with the same key.
    pub next: Option<CallId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestMatch {
    /// The new node, the node already holding this frame, or the tail the duplicate repeats.
    pub call: CallId,
    pub is_duplicate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseMatch {
    pub call: CallId,
    pub is_duplicate: bool,
    /// Response time minus request time.
    pub latency: TimeDelta,
}

/// Cross-reference attached to a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionInfo {
    pub role: Role,
    /// For a request, the response frame (if answered); for a response, the request frame.
    pub peer_frame: Option<u32>,
    /// Responses only.
    pub latency: Option<TimeDelta>,
    pub is_duplicate: bool,
    pub correlation_id: Option<CorrelationId>,
}

/// Per-session table of pending calls, keyed by [`TransactionKey`].
#[derive(Debug, Default)]
pub struct FlowTable {
    calls: Vec<PendingCall>,
    heads: HashMap<TransactionKey, CallId>,
}

impl FlowTable {
    pub fn new() -> Self {
        FlowTable::default()
    }

    /// Forget every call (start of a new capture).
    pub fn reset(&mut self) {
        self.calls.clear();
        self.heads.clear();
    }

    /// Number of calls across all chains.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn call(&self, id: CallId) -> Option<&PendingCall> {
        self.calls.get(id.0)
    }

    /// Calls for `key`, oldest first.
    pub fn chain(&self, key: &TransactionKey) -> Chain<'_> {
        Chain { table: self, next: self.heads.get(key).copied() }
    }

    fn push(&mut self, frame: u32, time: Timestamp, correlation_id: Option<CorrelationId>) -> CallId {
        let id = CallId(self.calls.len());
        self.calls.push(PendingCall {
            request_frame: frame,
            response_frame: 0,
            request_time: time,
            correlation_id,
            responded: false,
            next: None,
        });
        id
    }

    pub fn on_request(
        &mut self,
        key: TransactionKey,
        frame: u32,
        time: Timestamp,
        correlation_id: Option<CorrelationId>,
    ) -> RequestMatch {
        let mut id = match self.heads.get(&key) {
            Some(&head) => head,
            None => {
                let id = self.push(frame, time, correlation_id);
                self.heads.insert(key, id);
                log::debug!("frame {}: new call {:?} seq {} category {}", frame, key.conversation, key.sequence, key.category);
                return RequestMatch { call: id, is_duplicate: false };
            }
        };

        loop {
            let call = &self.calls[id.0];
            if call.request_frame == frame {
                return RequestMatch { call: id, is_duplicate: false };
            }
            match call.next {
                Some(next) => id = next,
                None => break,
            }
        }

        let (tail_request, tail_response, tail_time) = {
            let tail = &self.calls[id.0];
            (tail.request_frame, tail.response_frame, tail.request_time)
        };
        // Truncated whole seconds of the true delta.
        let elapsed = time.delta(tail_time).as_nanos() / 1_000_000_000;
        let new_request = if tail_response != 0 {
            frame > tail_response && elapsed > ANSWERED_REPEAT_SECS
        } else {
            frame > tail_request && elapsed > UNANSWERED_REPEAT_SECS
        };
        if new_request {
            let new = self.push(frame, time, correlation_id);
            self.calls[id.0].next = Some(new);
            log::debug!("frame {}: new request after {}s, seq {} category {}", frame, elapsed, key.sequence, key.category);
            RequestMatch { call: new, is_duplicate: false }
        } else {
            log::debug!("frame {}: duplicate of request in frame {}", frame, tail_request);
            RequestMatch { call: id, is_duplicate: true }
        }
    }

    /// `None` when no request was seen for `key`.
    pub fn on_response(&mut self, key: TransactionKey, frame: u32, time: Timestamp) -> Option<ResponseMatch> {
        let mut id = *self.heads.get(&key)?;
        loop {
            let call = &self.calls[id.0];
            if call.response_frame == frame {
                break;
            }
            match call.next {
                Some(next) => id = next,
                None => break,
            }
        }

        let call = &mut self.calls[id.0];
        let is_duplicate = if call.response_frame == 0 {
            call.response_frame = frame;
            false
        } else {
            call.response_frame != frame
        };
        call.responded = true;
        if is_duplicate {
            log::debug!("frame {}: duplicate response, first in frame {}", frame, call.response_frame);
        }
        Some(ResponseMatch { call: id, is_duplicate, latency: time.delta(call.request_time) })
    }

    /// Run the matcher for one message and build its cross-reference.
    /// Returns `None` for a response with no request on record.
    pub fn correlate(
        &mut self,
        key: TransactionKey,
        role: Role,
        frame: u32,
        time: Timestamp,
        correlation_id: Option<CorrelationId>,
    ) -> Option<TransactionInfo> {
        if role.is_request() {
            let m = self.on_request(key, frame, time, correlation_id);
            let call = &self.calls[m.call.0];
            Some(TransactionInfo {
                role,
                peer_frame: (call.response_frame != 0).then_some(call.response_frame),
                latency: None,
                is_duplicate: m.is_duplicate,
                correlation_id: call.correlation_id,
            })
        } else {
            let m = self.on_response(key, frame, time)?;
            let call = &self.calls[m.call.0];
            Some(TransactionInfo {
                role,
                peer_frame: Some(call.request_frame),
                latency: Some(m.latency),
                is_duplicate: m.is_duplicate,
                correlation_id: call.correlation_id,
            })
        }
    }
}

/// Iterator over one key's chain, oldest request first.
pub struct Chain<'a> {
    table: &'a FlowTable,
    next: Option<CallId>,
}

impl<'a> Iterator for Chain<'a> {
    type Item = (CallId, &'a PendingCall);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let call = self.table.calls.get(id.0)?;
        self.next = call.next;
        Some((id, call))
    }
}
