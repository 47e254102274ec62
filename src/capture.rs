//! Capture input: legacy pcap and pcapng files, link-layer stripping and conversation ids.
//!
//! Packets are handed to a callback as they are read, numbered from 1 in file order. The
//! payload slices borrow the reader's buffer and are only valid during the callback.

use crate::matcher::{ConversationId, Timestamp};
use pcap_parser::pcapng::Block as PcapNgBlock;
use pcap_parser::traits::{PcapNGPacketBlock, PcapReaderIterator};
use pcap_parser::{Linktype, PcapBlockOwned, PcapError};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

const READER_CAPACITY: usize = 1 << 20;
const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];
const NANOSECOND_MAGIC: [u32; 2] = [0xa1b2_3c4d, 0x4d3c_b2a1];
/// pcapng default `if_tsresol`: microseconds.
const DEFAULT_TSRESOL: u8 = 6;

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("not a pcap or pcapng file (magic {0:02x?})")]
    UnknownFormat([u8; 4]),
    #[error("pcap read error: {0}")]
    Pcap(String),
}

fn pcap_error<E: std::fmt::Debug>(e: E) -> CaptureError {
    CaptureError::Pcap(format!("{:?}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapturedPacket<'a> {
    /// 1-based position in the file.
    pub frame: u32,
    pub time: Timestamp,
    pub linktype: Linktype,
    pub data: &'a [u8],
}

/// Read every packet of a pcap or pcapng file. Returns the number of packets.
pub fn read_file<F>(path: &Path, on_packet: F) -> Result<u32, CaptureError>
where
    F: FnMut(&CapturedPacket<'_>),
{
    read_packets(File::open(path)?, on_packet)
}

/// Probe the magic and read a pcap or pcapng stream.
pub fn read_packets<R, F>(mut input: R, on_packet: F) -> Result<u32, CaptureError>
where
    R: Read,
    F: FnMut(&CapturedPacket<'_>),
{
    let mut probe = [0u8; 4];
    input.read_exact(&mut probe)?;
    let stream = io::Cursor::new(probe).chain(input);
    if probe == PCAPNG_MAGIC {
        read_pcapng(stream, on_packet)
    } else {
        let magic = u32::from_le_bytes(probe);
        let known = [0xa1b2_c3d4, 0xd4c3_b2a1, NANOSECOND_MAGIC[0], NANOSECOND_MAGIC[1]];
        if !known.contains(&magic) {
            return Err(CaptureError::UnknownFormat(probe));
        }
        read_legacy(stream, on_packet)
    }
}

fn read_legacy<R: Read, F: FnMut(&CapturedPacket<'_>)>(input: R, mut on_packet: F) -> Result<u32, CaptureError> {
    let mut reader = pcap_parser::pcap::LegacyPcapReader::new(READER_CAPACITY, input).map_err(pcap_error)?;
    let mut linktype = Linktype(1);
    let mut nanos = false;
    let mut frame = 0u32;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                match block {
                    PcapBlockOwned::LegacyHeader(h) => {
                        linktype = h.network;
                        nanos = NANOSECOND_MAGIC.contains(&h.magic_number);
                        log::debug!("pcap: linktype {}, {} timestamps", linktype.0, if nanos { "ns" } else { "us" });
                    }
                    PcapBlockOwned::Legacy(b) => {
                        frame += 1;
                        let time = if nanos {
                            Timestamp::new(b.ts_sec as i64, b.ts_usec)
                        } else {
                            Timestamp::from_micros(b.ts_sec as i64, b.ts_usec)
                        };
                        on_packet(&CapturedPacket { frame, time, linktype, data: b.data });
                    }
                    PcapBlockOwned::NG(_) => {}
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(pcap_error)?;
            }
            Err(e) => return Err(pcap_error(e)),
        }
    }
    Ok(frame)
}

#[derive(Debug, Clone, Copy)]
struct Interface {
    linktype: Linktype,
    tsresol: u8,
}

/// Timestamp units per second for a pcapng `if_tsresol` value.
pub fn units_per_second(tsresol: u8) -> u64 {
    let exp = (tsresol & 0x7f) as u32;
    if tsresol & 0x80 != 0 {
        1u64.checked_shl(exp).unwrap_or(u64::MAX)
    } else {
        10u64.checked_pow(exp).unwrap_or(u64::MAX)
    }
}

/// Convert a raw 64-bit pcapng timestamp to seconds and nanoseconds.
pub fn pcapng_timestamp(ts_high: u32, ts_low: u32, tsresol: u8) -> Timestamp {
    let raw = ((ts_high as u64) << 32) | ts_low as u64;
    let units = units_per_second(tsresol);
    let secs = raw / units;
    let frac = raw % units;
    let nanos = (frac as u128 * 1_000_000_000 / units as u128) as u32;
    Timestamp::new(secs as i64, nanos)
}

fn read_pcapng<R: Read, F: FnMut(&CapturedPacket<'_>)>(input: R, mut on_packet: F) -> Result<u32, CaptureError> {
    let mut reader = pcap_parser::pcapng::PcapNGReader::new(READER_CAPACITY, input).map_err(pcap_error)?;
    let mut interfaces: Vec<Interface> = Vec::new();
    let mut last_time = Timestamp::default();
    let mut frame = 0u32;
    loop {
        match reader.next() {
            Ok((offset, block)) => {
                if let PcapBlockOwned::NG(b) = block {
                    match &b {
                        PcapNgBlock::SectionHeader(_) => interfaces.clear(),
                        PcapNgBlock::InterfaceDescription(idb) => {
                            let tsresol = if idb.if_tsresol == 0 { DEFAULT_TSRESOL } else { idb.if_tsresol };
                            interfaces.push(Interface { linktype: idb.linktype, tsresol });
                        }
                        PcapNgBlock::EnhancedPacket(epb) => {
                            frame += 1;
                            let iface = interfaces
                                .get(epb.if_id as usize)
                                .copied()
                                .unwrap_or(Interface { linktype: Linktype(1), tsresol: DEFAULT_TSRESOL });
                            let time = pcapng_timestamp(epb.ts_high, epb.ts_low, iface.tsresol);
                            last_time = time;
                            on_packet(&CapturedPacket { frame, time, linktype: iface.linktype, data: epb.packet_data() });
                        }
                        PcapNgBlock::SimplePacket(spb) => {
                            frame += 1;
                            let linktype = interfaces.first().map(|i| i.linktype).unwrap_or(Linktype(1));
                            // No timestamp in a simple packet block.
                            on_packet(&CapturedPacket { frame, time: last_time, linktype, data: spb.packet_data() });
                        }
                        _ => {}
                    }
                }
                reader.consume(offset);
            }
            Err(PcapError::Eof) => break,
            Err(PcapError::Incomplete(_)) => {
                reader.refill().map_err(pcap_error)?;
            }
            Err(e) => return Err(pcap_error(e)),
        }
    }
    Ok(frame)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Transport {
    Udp,
    Tcp,
}

/// Transport payload of one captured frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportPayload<'a> {
    pub transport: Transport,
    pub source: SocketAddr,
    pub destination: SocketAddr,
    pub payload: &'a [u8],
}

/// Extract the UDP or TCP payload of an IPv4 frame. Lengths come from the IPv4 and UDP headers
/// so Ethernet padding is not included. `None` for other link types, non-IPv4, non-first
/// fragments and truncated headers.
pub fn transport_payload(linktype: Linktype, frame: &[u8]) -> Option<TransportPayload<'_>> {
    let l3 = match linktype.0 {
        1 => ethernet_l3(frame)?,
        101 => frame,
        113 => linux_sll_l3(frame)?,
        _ => return None,
    };
    ipv4_transport(l3)
}

fn be16(b: &[u8], at: usize) -> Option<u16> {
    Some(u16::from_be_bytes([*b.get(at)?, *b.get(at + 1)?]))
}

fn ethernet_l3(frame: &[u8]) -> Option<&[u8]> {
    let mut off = 12usize;
    let mut ethertype = be16(frame, off)?;
    off += 2;
    // 802.1Q / 802.1ad tags
    while ethertype == 0x8100 || ethertype == 0x88a8 {
        ethertype = be16(frame, off + 2)?;
        off += 4;
    }
    match ethertype {
        0x0800 => frame.get(off..),
        _ => None,
    }
}

fn linux_sll_l3(frame: &[u8]) -> Option<&[u8]> {
    match be16(frame, 14)? {
        0x0800 => frame.get(16..),
        _ => None,
    }
}

fn ipv4_transport(l3: &[u8]) -> Option<TransportPayload<'_>> {
    let ver_ihl = *l3.first()?;
    if ver_ihl >> 4 != 4 {
        return None;
    }
    let ihl = (ver_ihl & 0x0f) as usize * 4;
    if ihl < 20 || l3.len() < ihl {
        return None;
    }
    let total_len = be16(l3, 2)? as usize;
    if total_len < ihl {
        return None;
    }
    let fragment_offset = be16(l3, 6)? & 0x1fff;
    if fragment_offset != 0 {
        return None;
    }
    let l3 = if total_len <= l3.len() { &l3[..total_len] } else { l3 };
    let src = Ipv4Addr::new(l3[12], l3[13], l3[14], l3[15]);
    let dst = Ipv4Addr::new(l3[16], l3[17], l3[18], l3[19]);
    let l4 = &l3[ihl..];
    let (transport, payload) = match l3[9] {
        17 => {
            let udp_len = be16(l4, 4)? as usize;
            if udp_len < 8 || l4.len() < udp_len {
                return None;
            }
            (Transport::Udp, &l4[8..udp_len])
        }
        6 => {
            let data_offset = (*l4.get(12)? >> 4) as usize * 4;
            if data_offset < 20 {
                return None;
            }
            (Transport::Tcp, l4.get(data_offset..)?)
        }
        _ => return None,
    };
    Some(TransportPayload {
        transport,
        source: SocketAddr::new(IpAddr::V4(src), be16(l4, 0)?),
        destination: SocketAddr::new(IpAddr::V4(dst), be16(l4, 2)?),
        payload,
    })
}

/// Stable ids for bidirectional flows, assigned in first-seen order.
#[derive(Debug, Default)]
pub struct ConversationTable {
    ids: HashMap<(Transport, SocketAddr, SocketAddr), ConversationId>,
}

impl ConversationTable {
    pub fn new() -> Self {
        ConversationTable::default()
    }

    /// Both directions of a flow map to the same id.
    pub fn id_for(&mut self, transport: Transport, a: SocketAddr, b: SocketAddr) -> ConversationId {
        let key = if a <= b { (transport, a, b) } else { (transport, b, a) };
        let next = ConversationId(self.ids.len() as u64);
        *self.ids.entry(key).or_insert(next)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
