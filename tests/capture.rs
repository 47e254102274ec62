//! Capture tests: legacy pcap and pcapng reading (timestamps, link types), transport payload
//! extraction and conversation ids.

use pcap_parser::Linktype;
use std::io::Write;
use std::net::SocketAddr;
use tlvmatch::capture::{self, pcapng_timestamp, transport_payload, units_per_second};
use tlvmatch::matcher::Timestamp;
use tlvmatch::{CaptureError, ConversationId, ConversationTable, Transport};

// ---------------------------------------------------------------- frame builders

fn ipv4(proto: u8, src: [u8; 4], dst: [u8; 4], l4: &[u8]) -> Vec<u8> {
    let total = (20 + l4.len()) as u16;
    let mut v = vec![0x45, 0x00];
    v.extend_from_slice(&total.to_be_bytes());
    v.extend_from_slice(&[0x12, 0x34, 0x00, 0x00, 64, proto, 0x00, 0x00]);
    v.extend_from_slice(&src);
    v.extend_from_slice(&dst);
    v.extend_from_slice(l4);
    v
}

fn udp(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    let mut v = sport.to_be_bytes().to_vec();
    v.extend_from_slice(&dport.to_be_bytes());
    v.extend_from_slice(&((8 + payload.len()) as u16).to_be_bytes());
    v.extend_from_slice(&[0, 0]);
    v.extend_from_slice(payload);
    v
}

/// TCP segment with `options` bytes of header options (multiple of 4).
fn tcp(sport: u16, dport: u16, options: usize, payload: &[u8]) -> Vec<u8> {
    let mut v = sport.to_be_bytes().to_vec();
    v.extend_from_slice(&dport.to_be_bytes());
    v.extend_from_slice(&[0, 0, 0, 1, 0, 0, 0, 0]);
    v.push((((20 + options) / 4) as u8) << 4);
    v.extend_from_slice(&[0x18, 0xFF, 0xFF, 0, 0, 0, 0]);
    v.extend(std::iter::repeat(1u8).take(options));
    v.extend_from_slice(payload);
    v
}

fn ethernet(ethertype: u16, l3: &[u8]) -> Vec<u8> {
    let mut v = vec![0x02, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0x02];
    v.extend_from_slice(&ethertype.to_be_bytes());
    v.extend_from_slice(l3);
    v
}

fn udp_frame(sport: u16, dport: u16, payload: &[u8]) -> Vec<u8> {
    ethernet(0x0800, &ipv4(17, [10, 0, 0, 1], [10, 0, 0, 2], &udp(sport, dport, payload)))
}

fn addr(ip: [u8; 4], port: u16) -> SocketAddr {
    SocketAddr::from((ip, port))
}

// ---------------------------------------------------------------- file builders

fn legacy_pcap(magic: u32, linktype: u32, records: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    let mut v = magic.to_le_bytes().to_vec();
    v.extend_from_slice(&2u16.to_le_bytes());
    v.extend_from_slice(&4u16.to_le_bytes());
    v.extend_from_slice(&0i32.to_le_bytes());
    v.extend_from_slice(&0u32.to_le_bytes());
    v.extend_from_slice(&65535u32.to_le_bytes());
    v.extend_from_slice(&linktype.to_le_bytes());
    for (sec, frac, data) in records {
        v.extend_from_slice(&sec.to_le_bytes());
        v.extend_from_slice(&frac.to_le_bytes());
        v.extend_from_slice(&(data.len() as u32).to_le_bytes());
        v.extend_from_slice(&(data.len() as u32).to_le_bytes());
        v.extend_from_slice(data);
    }
    v
}

fn pcapng_block(kind: u32, body: &[u8]) -> Vec<u8> {
    let pad = (4 - body.len() % 4) % 4;
    let total = (12 + body.len() + pad) as u32;
    let mut v = kind.to_le_bytes().to_vec();
    v.extend_from_slice(&total.to_le_bytes());
    v.extend_from_slice(body);
    v.extend(std::iter::repeat(0u8).take(pad));
    v.extend_from_slice(&total.to_le_bytes());
    v
}

fn section_header() -> Vec<u8> {
    let mut body = 0x1A2B_3C4Du32.to_le_bytes().to_vec();
    body.extend_from_slice(&1u16.to_le_bytes());
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&(-1i64).to_le_bytes());
    pcapng_block(0x0A0D_0D0A, &body)
}

fn interface(linktype: u16, tsresol: Option<u8>) -> Vec<u8> {
    let mut body = linktype.to_le_bytes().to_vec();
    body.extend_from_slice(&0u16.to_le_bytes());
    body.extend_from_slice(&65535u32.to_le_bytes());
    if let Some(r) = tsresol {
        body.extend_from_slice(&[9, 0, 1, 0, r, 0, 0, 0]);
        body.extend_from_slice(&[0, 0, 0, 0]);
    }
    pcapng_block(1, &body)
}

fn enhanced_packet(if_id: u32, ts: u64, data: &[u8]) -> Vec<u8> {
    let mut body = if_id.to_le_bytes().to_vec();
    body.extend_from_slice(&((ts >> 32) as u32).to_le_bytes());
    body.extend_from_slice(&(ts as u32).to_le_bytes());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(&(data.len() as u32).to_le_bytes());
    body.extend_from_slice(data);
    pcapng_block(6, &body)
}

/// (frame, time, linktype, data) of every packet.
fn collect(bytes: &[u8]) -> Result<Vec<(u32, Timestamp, Linktype, Vec<u8>)>, CaptureError> {
    let mut out = Vec::new();
    let n = capture::read_packets(bytes, |p| out.push((p.frame, p.time, p.linktype, p.data.to_vec())))?;
    assert_eq!(n as usize, out.len());
    Ok(out)
}

// ---------------------------------------------------------------- reading

#[test]
fn test_read_legacy_pcap_file() {
    let f1 = udp_frame(40000, 1812, b"first");
    let f2 = udp_frame(1812, 40000, b"second");
    let bytes = legacy_pcap(0xa1b2_c3d4, 1, &[(1000, 250_000, f1.clone()), (1001, 5, f2.clone())]);

    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(&bytes).expect("write");
    file.flush().expect("flush");

    let mut seen = Vec::new();
    let n = capture::read_file(file.path(), |p| seen.push((p.frame, p.time, p.linktype, p.data.to_vec()))).expect("read");
    assert_eq!(n, 2);
    assert_eq!(seen[0], (1, Timestamp::new(1000, 250_000_000), Linktype(1), f1));
    assert_eq!(seen[1], (2, Timestamp::new(1001, 5_000), Linktype(1), f2));
}

#[test]
fn test_read_legacy_pcap_nanoseconds() {
    let frame = udp_frame(1, 2, b"x");
    let bytes = legacy_pcap(0xa1b2_3c4d, 1, &[(7, 123_456_789, frame)]);
    let packets = collect(&bytes).expect("read");
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].1, Timestamp::new(7, 123_456_789));
}

#[test]
fn test_read_legacy_pcap_raw_linktype() {
    let l3 = ipv4(17, [192, 168, 0, 1], [192, 168, 0, 2], &udp(5000, 854, b"dlep"));
    let bytes = legacy_pcap(0xa1b2_c3d4, 101, &[(1, 0, l3.clone())]);
    let packets = collect(&bytes).expect("read");
    assert_eq!(packets[0].2, Linktype(101));
    let tp = transport_payload(packets[0].2, &packets[0].3).expect("payload");
    assert_eq!(tp.payload, b"dlep");
    assert_eq!(tp.destination, addr([192, 168, 0, 2], 854));
}

#[test]
fn test_read_pcapng() {
    let f1 = udp_frame(40000, 1719, b"ras");
    let raw = ipv4(17, [10, 1, 1, 1], [10, 1, 1, 2], &udp(40000, 10050, b"zbx"));
    let mut bytes = section_header();
    bytes.extend(interface(1, Some(9)));
    bytes.extend(interface(101, None));
    bytes.extend(enhanced_packet(0, 1_500_000_000_123, &f1));
    bytes.extend(enhanced_packet(1, 2_000_000_500, &raw));

    let packets = collect(&bytes).expect("read");
    assert_eq!(packets.len(), 2);
    assert_eq!(packets[0].0, 1);
    assert_eq!(packets[0].1, Timestamp::new(1500, 123));
    assert_eq!(packets[0].2, Linktype(1));
    assert_eq!(packets[0].3, f1);
    assert_eq!(packets[1].0, 2);
    assert_eq!(packets[1].1, Timestamp::new(2000, 500_000));
    assert_eq!(packets[1].2, Linktype(101));
    assert_eq!(packets[1].3, raw);
}

#[test]
fn test_unknown_format() {
    match collect(b"GARBAGE!") {
        Err(CaptureError::UnknownFormat(magic)) => assert_eq!(&magic, b"GARB"),
        other => panic!("expected UnknownFormat, got {:?}", other.map(|p| p.len())),
    }
    assert!(matches!(collect(b"ab"), Err(CaptureError::Io(_))));
    assert!(matches!(
        capture::read_file(std::path::Path::new("/nonexistent/capture.pcap"), |_| {}),
        Err(CaptureError::Io(_))
    ));
}

#[test]
fn test_pcapng_timestamp_resolution() {
    assert_eq!(units_per_second(6), 1_000_000);
    assert_eq!(units_per_second(9), 1_000_000_000);
    assert_eq!(units_per_second(0x80 | 10), 1024);
    assert_eq!(pcapng_timestamp(0, 3_000_001, 6), Timestamp::new(3, 1_000));
    assert_eq!(pcapng_timestamp(0, 2048 + 512, 0x80 | 10), Timestamp::new(2, 500_000_000));
    let raw: u64 = 1_700_000_000_000_000_000;
    assert_eq!(pcapng_timestamp((raw >> 32) as u32, raw as u32, 9), Timestamp::new(1_700_000_000, 0));
}

// ---------------------------------------------------------------- transport payloads

#[test]
fn test_udp_payload_ignores_ethernet_padding() {
    let mut frame = udp_frame(40000, 1812, b"hi");
    frame.extend_from_slice(&[0; 16]);
    let tp = transport_payload(Linktype(1), &frame).expect("payload");
    assert_eq!(tp.transport, Transport::Udp);
    assert_eq!(tp.payload, b"hi");
    assert_eq!(tp.source, addr([10, 0, 0, 1], 40000));
    assert_eq!(tp.destination, addr([10, 0, 0, 2], 1812));
}

#[test]
fn test_tcp_payload_with_options() {
    let l3 = ipv4(6, [10, 0, 0, 1], [10, 0, 0, 2], &tcp(40000, 10050, 12, b"ZBXD"));
    let frame = ethernet(0x0800, &l3);
    let tp = transport_payload(Linktype(1), &frame).expect("payload");
    assert_eq!(tp.transport, Transport::Tcp);
    assert_eq!(tp.payload, b"ZBXD");
    assert_eq!(tp.destination.port(), 10050);

    let bare = ipv4(6, [10, 0, 0, 1], [10, 0, 0, 2], &tcp(40000, 10050, 0, b""));
    let tp = transport_payload(Linktype(101), &bare).expect("payload");
    assert!(tp.payload.is_empty());
}

#[test]
fn test_vlan_and_linux_sll() {
    let l3 = ipv4(17, [10, 0, 0, 1], [10, 0, 0, 2], &udp(1, 2, b"v"));
    let mut tagged = vec![0x02, 0, 0, 0, 0, 0x01, 0x02, 0, 0, 0, 0, 0x02];
    tagged.extend_from_slice(&[0x88, 0xa8, 0x00, 0x64, 0x81, 0x00, 0x00, 0x0A, 0x08, 0x00]);
    tagged.extend_from_slice(&l3);
    assert_eq!(transport_payload(Linktype(1), &tagged).map(|t| t.payload), Some(&b"v"[..]));

    let mut sll = vec![0, 0, 0, 1, 0, 6, 2, 0, 0, 0, 0, 1, 0, 0];
    sll.extend_from_slice(&[0x08, 0x00]);
    sll.extend_from_slice(&l3);
    assert_eq!(transport_payload(Linktype(113), &sll).map(|t| t.payload), Some(&b"v"[..]));
}

#[test]
fn test_frames_without_payload() {
    // IPv6, ARP and unsupported link types.
    assert!(transport_payload(Linktype(1), &ethernet(0x86DD, &[0x60; 40])).is_none());
    assert!(transport_payload(Linktype(1), &ethernet(0x0806, &[0; 28])).is_none());
    assert!(transport_payload(Linktype(105), &udp_frame(1, 2, b"x")).is_none());

    // Non-first fragment.
    let mut l3 = ipv4(17, [10, 0, 0, 1], [10, 0, 0, 2], &udp(1, 2, b"x"));
    l3[7] = 0x10;
    assert!(transport_payload(Linktype(101), &l3).is_none());

    // ICMP.
    assert!(transport_payload(Linktype(101), &ipv4(1, [10, 0, 0, 1], [10, 0, 0, 2], &[8, 0, 0, 0])).is_none());

    // Truncated headers and a UDP length beyond the datagram.
    let frame = udp_frame(1, 2, b"abc");
    for cut in [10, 20, 30, 40] {
        assert!(transport_payload(Linktype(1), &frame[..cut]).is_none(), "cut {}", cut);
    }
    let mut l4 = udp(1, 2, b"abc");
    l4[5] = 200;
    assert!(transport_payload(Linktype(101), &ipv4(17, [10, 0, 0, 1], [10, 0, 0, 2], &l4)).is_none());
}

// ---------------------------------------------------------------- conversations

#[test]
fn test_conversation_ids() {
    let a = addr([10, 0, 0, 1], 40000);
    let b = addr([10, 0, 0, 2], 1812);
    let c = addr([10, 0, 0, 3], 1812);
    let mut table = ConversationTable::new();
    assert!(table.is_empty());

    assert_eq!(table.id_for(Transport::Udp, a, b), ConversationId(0));
    assert_eq!(table.id_for(Transport::Udp, b, a), ConversationId(0));
    assert_eq!(table.id_for(Transport::Udp, a, c), ConversationId(1));
    assert_eq!(table.id_for(Transport::Tcp, a, b), ConversationId(2));
    assert_eq!(table.id_for(Transport::Udp, c, a), ConversationId(1));
    assert_eq!(table.len(), 3);

    table.clear();
    assert_eq!(table.id_for(Transport::Tcp, a, b), ConversationId(0));
}
