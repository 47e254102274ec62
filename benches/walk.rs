//! Benchmark: raw attribute walk vs full session dissection vs matcher-only, over a synthetic
//! batch of RADIUS request/accept pairs and DLEP sessions. Prints records/s and MB/s for the
//! walk after the criterion runs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::net::SocketAddr;
use tlvmatch::matcher::{ConversationId, FlowTable, Role, Timestamp, TransactionKey};
use tlvmatch::protocols::{dlep, radius};
use tlvmatch::{walk, MessageMeta, Session};

const PAIRS: usize = 2_000;

fn attr(tag: u8, value: &[u8]) -> Vec<u8> {
    let mut v = vec![tag, (value.len() + 2) as u8];
    v.extend_from_slice(value);
    v
}

fn radius_packet(code: u8, ident: u8, attrs: &[u8]) -> Vec<u8> {
    let mut v = vec![code, ident];
    v.extend_from_slice(&((20 + attrs.len()) as u16).to_be_bytes());
    v.extend_from_slice(&[ident; 16]);
    v.extend_from_slice(attrs);
    v
}

fn access_request(i: usize) -> Vec<u8> {
    let mut attrs = attr(1, format!("user{}", i).as_bytes());
    attrs.extend(attr(4, &[10, 0, (i >> 8) as u8, i as u8]));
    attrs.extend(attr(5, &(i as u32).to_be_bytes()));
    attrs.extend(attr(31, b"00-11-22-33-44-55"));
    let mut cisco = 9u32.to_be_bytes().to_vec();
    cisco.extend(attr(1, b"shell:priv-lvl=15"));
    attrs.extend(attr(26, &cisco));
    attrs.extend(attr(80, &[0xA5; 16]));
    radius_packet(1, i as u8, &attrs)
}

fn dlep_update(i: usize) -> Vec<u8> {
    let mut items = Vec::new();
    for (tag, value) in [(12u16, 8usize), (13, 8), (14, 8), (15, 8), (16, 8), (17, 1), (18, 1), (19, 1)] {
        items.extend_from_slice(&tag.to_be_bytes());
        items.extend_from_slice(&(value as u16).to_be_bytes());
        items.extend(std::iter::repeat(i as u8).take(value));
    }
    let mut v = 13u16.to_be_bytes().to_vec();
    v.extend_from_slice(&(items.len() as u16).to_be_bytes());
    v.extend(items);
    v
}

fn meta(frame: u32, conversation: u64, src: u16, dst: u16) -> MessageMeta {
    MessageMeta {
        frame,
        time: Timestamp::from_secs(frame as i64),
        conversation: ConversationId(conversation),
        source: SocketAddr::from(([10, 0, 0, 1], src)),
        destination: SocketAddr::from(([10, 0, 0, 2], dst)),
    }
}

/// (meta, protocol, payload) in capture order: request then reply, per conversation.
fn messages() -> Vec<(MessageMeta, &'static str, Vec<u8>)> {
    let mut out = Vec::with_capacity(PAIRS * 3);
    let mut frame = 0u32;
    for i in 0..PAIRS {
        let conv = (i / 256) as u64;
        frame += 1;
        out.push((meta(frame, conv, 40000, 1812), radius::NAME, access_request(i)));
        frame += 1;
        out.push((meta(frame, conv, 1812, 40000), radius::NAME, radius_packet(2, i as u8, &attr(18, b"ok"))));
        frame += 1;
        out.push((meta(frame, conv, 40000, dlep::PORT), dlep::NAME, dlep_update(i)));
    }
    out
}

fn bench_walk(c: &mut Criterion) {
    let requests: Vec<Vec<u8>> = (0..PAIRS).map(access_request).collect();
    let total_bytes: usize = requests.iter().map(|p| p.len() - radius::HEADER_LEN).sum();
    let total_records: usize =
        requests.iter().map(|p| walk(p, radius::HEADER_LEN, p.len(), &radius::ATTRIBUTES).fields.len()).sum();
    eprintln!("walk: {} packets, {} attributes, {} bytes (one warm-up pass)", requests.len(), total_records, total_bytes);

    c.bench_function("walk_radius_attributes", |b| {
        b.iter(|| {
            let mut records = 0usize;
            for p in &requests {
                records += walk(black_box(p), radius::HEADER_LEN, p.len(), &radius::ATTRIBUTES).fields.len();
            }
            black_box(records)
        });
    });

    let msgs = messages();
    c.bench_function("session_dissect_mixed", |b| {
        b.iter(|| {
            let mut session = Session::with_defaults();
            let mut duplicates = 0usize;
            for (m, proto, data) in &msgs {
                if let Ok(d) = session.dissect(proto, m, black_box(data)) {
                    duplicates += d.is_duplicate() as usize;
                }
            }
            black_box(duplicates)
        });
    });

    c.bench_function("flow_table_correlate", |b| {
        b.iter(|| {
            let mut flows = FlowTable::new();
            for i in 0..PAIRS as u32 {
                let key = TransactionKey { conversation: ConversationId((i / 256) as u64), sequence: i % 256, category: 0 };
                let t = Timestamp::from_secs(i as i64);
                flows.correlate(key, Role::Request, 2 * i + 1, t, None);
                black_box(flows.correlate(key, Role::Confirm, 2 * i + 2, t, None));
            }
            black_box(flows.len())
        });
    });

    const ITERS: u32 = 1_000;
    let start = std::time::Instant::now();
    for _ in 0..ITERS {
        for p in &requests {
            black_box(walk(p, radius::HEADER_LEN, p.len(), &radius::ATTRIBUTES));
        }
    }
    let ns = start.elapsed().as_nanos() / (ITERS as u128);
    let records_per_sec = total_records as f64 / (ns as f64 / 1e9);
    let mb_per_sec = total_bytes as f64 / (ns as f64 / 1e9) / 1e6;
    eprintln!("walk: {:.0} records/s, {:.1} MB/s", records_per_sec, mb_per_sec);
}

criterion_group!(benches, bench_walk);
criterion_main!(benches);
