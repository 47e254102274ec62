//! Transaction matcher tests: idempotent re-dissection, single response acceptance, repeat
//! thresholds, tail-only matching and category/role derivation.

use tlvmatch::matcher::{
    ConversationId, CorrelationId, FlowTable, MessageType, Role, TimeDelta, Timestamp, TransactionKey,
    ANSWERED_REPEAT_SECS, UNANSWERED_REPEAT_SECS,
};

fn key(sequence: u32, category: u32) -> TransactionKey {
    TransactionKey { conversation: ConversationId(1), sequence, category }
}

fn t(secs: i64) -> Timestamp {
    Timestamp::from_secs(secs)
}

#[test]
fn test_first_request_creates_call() {
    let mut flows = FlowTable::new();
    let corr = CorrelationId([7; 16]);
    let m = flows.on_request(key(5, 2), 1, t(10), Some(corr));
    assert!(!m.is_duplicate);
    let call = flows.call(m.call).expect("call");
    assert_eq!(call.request_frame, 1);
    assert_eq!(call.response_frame, 0);
    assert_eq!(call.request_time, t(10));
    assert_eq!(call.correlation_id, Some(corr));
    assert!(!call.responded);
    assert_eq!(call.next, None);
}

#[test]
fn test_same_request_frame_is_idempotent() {
    let mut flows = FlowTable::new();
    let a = flows.on_request(key(5, 2), 10, t(0), None);
    let b = flows.on_request(key(5, 2), 10, t(0), None);
    assert_eq!(a, b);
    assert!(!b.is_duplicate);
    assert_eq!(flows.len(), 1);
    assert_eq!(flows.chain(&key(5, 2)).count(), 1);
}

#[test]
fn test_single_response_acceptance() {
    let mut flows = FlowTable::new();
    let k = key(5, 2);
    let req = flows.on_request(k, 1, t(0), None);

    let first = flows.on_response(k, 2, t(1)).expect("first response");
    assert_eq!(first.call, req.call);
    assert!(!first.is_duplicate);

    let second = flows.on_response(k, 3, t(2)).expect("second response");
    assert_eq!(second.call, req.call);
    assert!(second.is_duplicate);

    let call = flows.call(req.call).expect("call");
    assert_eq!(call.response_frame, 2);
    assert!(call.responded);

    // Decoding the first response frame again is not a duplicate.
    let replay = flows.on_response(k, 2, t(1)).expect("replay");
    assert!(!replay.is_duplicate);
    assert_eq!(flows.call(req.call).map(|c| c.response_frame), Some(2));
}

#[test]
fn test_answered_chain_threshold() {
    let k = key(1, 0);
    for (elapsed, expect_new) in [(ANSWERED_REPEAT_SECS - 1, false), (ANSWERED_REPEAT_SECS, false), (ANSWERED_REPEAT_SECS + 1, true)] {
        let mut flows = FlowTable::new();
        flows.on_request(k, 1, t(1000), None);
        flows.on_response(k, 2, t(1000)).expect("response");
        let m = flows.on_request(k, 3, t(1000 + elapsed), None);
        assert_eq!(m.is_duplicate, !expect_new, "elapsed {}", elapsed);
        assert_eq!(flows.len(), if expect_new { 2 } else { 1 }, "elapsed {}", elapsed);
    }
}

#[test]
fn test_unanswered_chain_threshold() {
    let k = key(1, 0);
    for (elapsed, expect_new) in [(ANSWERED_REPEAT_SECS + 1, false), (UNANSWERED_REPEAT_SECS, false), (UNANSWERED_REPEAT_SECS + 1, true)] {
        let mut flows = FlowTable::new();
        flows.on_request(k, 1, t(1000), None);
        let m = flows.on_request(k, 2, t(1000 + elapsed), None);
        assert_eq!(m.is_duplicate, !expect_new, "elapsed {}", elapsed);
        assert_eq!(flows.len(), if expect_new { 2 } else { 1 });
    }
}

#[test]
fn test_threshold_uses_whole_seconds() {
    let k = key(1, 0);
    let mut flows = FlowTable::new();
    flows.on_request(k, 1, Timestamp::new(1000, 900_000_000), None);
    flows.on_response(k, 2, t(1001)).expect("response");
    // 300.05 s later in wall time, but only 300 whole seconds apart.
    let m = flows.on_request(k, 3, Timestamp::new(1300, 950_000_000), None);
    assert!(m.is_duplicate);
}

#[test]
fn test_threshold_counts_elapsed_time_across_second_boundary() {
    let k = key(1, 0);
    let mut flows = FlowTable::new();
    flows.on_request(k, 1, Timestamp::new(1000, 900_000_000), None);
    flows.on_response(k, 2, t(1001)).expect("response");
    // Seconds fields differ by 301 but only 300.2 s have elapsed.
    let m = flows.on_request(k, 3, Timestamp::new(1301, 100_000_000), None);
    assert!(m.is_duplicate);
    assert_eq!(flows.len(), 1);

    let other = key(2, 0);
    flows.on_request(other, 4, Timestamp::new(1000, 100_000_000), None);
    flows.on_response(other, 5, t(1001)).expect("response");
    // 300.8 s elapsed: still not more than 300 whole seconds.
    let m = flows.on_request(other, 6, Timestamp::new(1300, 900_000_000), None);
    assert!(m.is_duplicate);

    // 301.0 s elapsed is a new request.
    let m = flows.on_request(other, 7, Timestamp::new(1301, 100_000_000), None);
    assert!(!m.is_duplicate);
    assert_eq!(flows.len(), 3);
}

#[test]
fn test_unanswered_threshold_counts_elapsed_time_across_second_boundary() {
    let k = key(3, 0);
    let mut flows = FlowTable::new();
    flows.on_request(k, 1, Timestamp::new(1000, 900_000_000), None);
    let m = flows.on_request(k, 2, Timestamp::new(2801, 100_000_000), None);
    assert!(m.is_duplicate);
    let m = flows.on_request(k, 3, Timestamp::new(2801, 900_000_000), None);
    assert!(!m.is_duplicate);
}

#[test]
fn test_request_before_recorded_response_is_duplicate() {
    let k = key(1, 0);
    let mut flows = FlowTable::new();
    flows.on_request(k, 10, t(0), None);
    flows.on_response(k, 20, t(1)).expect("response");
    // Old enough, but the frame comes before the recorded response.
    let m = flows.on_request(k, 15, t(5000), None);
    assert!(m.is_duplicate);
    assert_eq!(flows.len(), 1);
}

#[test]
fn test_duplicate_request_does_not_change_state() {
    let k = key(9, 3);
    let mut flows = FlowTable::new();
    let first = flows.on_request(k, 1, t(0), Some(CorrelationId([1; 16])));
    let dup = flows.on_request(k, 2, t(10), Some(CorrelationId([2; 16])));
    assert!(dup.is_duplicate);
    assert_eq!(dup.call, first.call);
    let call = flows.call(first.call).expect("call");
    assert_eq!(call.request_frame, 1);
    assert_eq!(call.correlation_id, Some(CorrelationId([1; 16])));
    assert_eq!(call.request_time, t(0));
}

#[test]
fn test_response_latency_and_duplicate_scenario() {
    let k = key(42, 2);
    let mut flows = FlowTable::new();
    flows.on_request(k, 100, t(1000), None);

    let r1 = flows.on_response(k, 105, t(1002)).expect("response 105");
    assert!(!r1.is_duplicate);
    assert_eq!(r1.latency, TimeDelta::from_secs(2));
    assert_eq!(r1.latency.to_string(), "2.000000000");
    assert_eq!(flows.call(r1.call).map(|c| c.response_frame), Some(105));

    let r2 = flows.on_response(k, 110, t(1500)).expect("response 110");
    assert!(r2.is_duplicate);
    assert_eq!(r2.call, r1.call);
    assert_eq!(flows.call(r2.call).map(|c| c.response_frame), Some(105));
}

#[test]
fn test_response_without_request() {
    let mut flows = FlowTable::new();
    assert!(flows.on_response(key(1, 1), 3, t(0)).is_none());
    assert!(flows.correlate(key(1, 1), Role::Confirm, 3, t(0), None).is_none());
    assert!(flows.is_empty());
}

#[test]
fn test_only_tail_is_matched() {
    let k = key(3, 1);
    let mut flows = FlowTable::new();
    let old = flows.on_request(k, 1, t(0), None);
    let new = flows.on_request(k, 2, t(UNANSWERED_REPEAT_SECS + 1), None);
    assert!(!new.is_duplicate);
    assert_ne!(old.call, new.call);

    let r = flows.on_response(k, 3, t(UNANSWERED_REPEAT_SECS + 2)).expect("response");
    assert_eq!(r.call, new.call);
    assert!(!flows.call(old.call).expect("old").responded);

    let chain: Vec<u32> = flows.chain(&k).map(|(_, c)| c.request_frame).collect();
    assert_eq!(chain, vec![1, 2]);
}

#[test]
fn test_keys_are_independent() {
    let mut flows = FlowTable::new();
    flows.on_request(key(1, 0), 1, t(0), None);
    let other_category = flows.on_request(key(1, 1), 2, t(0), None);
    let other_conversation =
        flows.on_request(TransactionKey { conversation: ConversationId(2), sequence: 1, category: 0 }, 3, t(0), None);
    assert!(!other_category.is_duplicate);
    assert!(!other_conversation.is_duplicate);
    assert_eq!(flows.len(), 3);
}

#[test]
fn test_correlate_cross_references() {
    let k = key(7, 3);
    let corr = CorrelationId([0xAB; 16]);
    let mut flows = FlowTable::new();

    let req = flows.correlate(k, Role::Request, 1, t(100), Some(corr)).expect("request info");
    assert_eq!(req.role, Role::Request);
    assert_eq!(req.peer_frame, None);
    assert_eq!(req.latency, None);
    assert!(!req.is_duplicate);

    let resp = flows.correlate(k, Role::Reject, 4, t(103), None).expect("response info");
    assert_eq!(resp.peer_frame, Some(1));
    assert_eq!(resp.latency, Some(TimeDelta::from_secs(3)));
    assert_eq!(resp.correlation_id, Some(corr));

    // Re-dissecting the request now shows its answer.
    let again = flows.correlate(k, Role::Request, 1, t(100), Some(corr)).expect("request info");
    assert_eq!(again.peer_frame, Some(4));
    assert!(!again.is_duplicate);
}

#[test]
fn test_reset_forgets_calls() {
    let mut flows = FlowTable::new();
    flows.on_request(key(1, 0), 1, t(0), None);
    flows.reset();
    assert!(flows.is_empty());
    assert!(flows.on_response(key(1, 0), 2, t(1)).is_none());
}

#[test]
fn test_category_and_role_from_tag() {
    for tag in 0..=20u32 {
        let mt = MessageType::from_tag(tag);
        assert_eq!(mt.category, tag / 3);
        let expected = match tag % 3 {
            0 => Role::Request,
            1 => Role::Confirm,
            _ => Role::Reject,
        };
        assert_eq!(mt.role, expected, "tag {}", tag);
    }
    assert!(MessageType::from_tag(18).role.is_request());
    assert_eq!(MessageType::from_tag(10), MessageType { category: 3, role: Role::Confirm });
}

#[test]
fn test_timestamp_delta_and_display() {
    let a = Timestamp::from_micros(10, 250_000);
    let b = Timestamp::new(12, 0);
    assert_eq!(b.delta(a), TimeDelta::from_nanos(1_750_000_000));
    assert_eq!(a.delta(b).to_string(), "-1.750000000");
    assert_eq!(a.to_string(), "10.250000000");
    assert_eq!(CorrelationId([0x11; 16]).to_string(), "11111111-1111-1111-1111-111111111111");
}
