//! Synthetic Ethernet/IP/TCP traffic.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use pcap::{Capture, Linktype, Packet, PacketHeader, Precision};
use pnet::packet::ethernet::{EtherTypes, MutableEthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::{self, MutableIpv4Packet};
use pnet::packet::ipv6::MutableIpv6Packet;
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags};
use pnet::util::MacAddr;

use mongoreplay_record::PreciseTime;

const ETH_LEN: usize = 14;
const IPV4_LEN: usize = 20;
const IPV6_LEN: usize = 40;
const TCP_LEN: usize = 20;

/// TCP flags to set on a synthetic segment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpFlagSet {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

impl TcpFlagSet {
    fn bits(self) -> u16 {
        let mut bits = 0u16;
        if self.syn {
            bits |= u16::from(TcpFlags::SYN);
        }
        if self.ack {
            bits |= u16::from(TcpFlags::ACK);
        }
        if self.fin {
            bits |= u16::from(TcpFlags::FIN);
        }
        if self.rst {
            bits |= u16::from(TcpFlags::RST);
        }
        bits
    }
}

/// Build an Ethernet frame carrying one TCP segment.
///
/// Both addresses must be of the same family.
pub fn tcp_frame(
    src: SocketAddr,
    dst: SocketAddr,
    seq: u32,
    flags: TcpFlagSet,
    payload: &[u8],
) -> Vec<u8> {
    let ip_len = if src.is_ipv4() { IPV4_LEN } else { IPV6_LEN };
    let mut frame = vec![0u8; ETH_LEN + ip_len + TCP_LEN + payload.len()];

    {
        let mut eth = MutableEthernetPacket::new(&mut frame[..]).unwrap();
        eth.set_source(MacAddr::new(2, 0, 0, 0, 0, 1));
        eth.set_destination(MacAddr::new(2, 0, 0, 0, 0, 2));
        eth.set_ethertype(if src.is_ipv4() {
            EtherTypes::Ipv4
        } else {
            EtherTypes::Ipv6
        });
    }

    {
        let seg = &mut frame[ETH_LEN + ip_len..];
        let mut tcp = MutableTcpPacket::new(seg).unwrap();
        tcp.set_source(src.port());
        tcp.set_destination(dst.port());
        tcp.set_sequence(seq);
        tcp.set_data_offset((TCP_LEN / 4) as u8);
        tcp.set_flags(flags.bits().try_into().unwrap());
        tcp.set_window(65_535);
        tcp.set_payload(payload);
    }

    let ip = &mut frame[ETH_LEN..];
    match (src.ip(), dst.ip()) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            {
                let tcp_bytes = &mut ip[IPV4_LEN..];
                let mut tcp = MutableTcpPacket::new(tcp_bytes).unwrap();
                let sum = tcp::ipv4_checksum(&tcp.to_immutable(), &s, &d);
                tcp.set_checksum(sum);
            }
            let mut v4 = MutableIpv4Packet::new(ip).unwrap();
            v4.set_version(4);
            v4.set_header_length((IPV4_LEN / 4) as u8);
            v4.set_total_length((IPV4_LEN + TCP_LEN + payload.len()) as u16);
            v4.set_ttl(64);
            v4.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
            v4.set_source(s);
            v4.set_destination(d);
            let sum = ipv4::checksum(&v4.to_immutable());
            v4.set_checksum(sum);
        }
        (IpAddr::V6(s), IpAddr::V6(d)) => {
            {
                let tcp_bytes = &mut ip[IPV6_LEN..];
                let mut tcp = MutableTcpPacket::new(tcp_bytes).unwrap();
                let sum = tcp::ipv6_checksum(&tcp.to_immutable(), &s, &d);
                tcp.set_checksum(sum);
            }
            let mut v6 = MutableIpv6Packet::new(ip).unwrap();
            v6.set_version(6);
            v6.set_payload_length((TCP_LEN + payload.len()) as u16);
            v6.set_next_header(IpNextHeaderProtocols::Tcp);
            v6.set_hop_limit(64);
            v6.set_source(s);
            v6.set_destination(d);
        }
        _ => panic!("mixed address families: {src} -> {dst}"),
    }
    frame
}

/// A TCP conversation that tracks sequence numbers in both directions.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub client: SocketAddr,
    pub server: SocketAddr,
    client_seq: u32,
    server_seq: u32,
}

impl Conversation {
    pub fn new(client: &str, server: &str) -> Self {
        Self {
            client: client.parse().unwrap(),
            server: server.parse().unwrap(),
            client_seq: 1000,
            server_seq: 5000,
        }
    }

    /// Start both directions at the given initial sequence numbers.
    pub fn with_isn(mut self, client_isn: u32, server_isn: u32) -> Self {
        self.client_seq = client_isn;
        self.server_seq = server_isn;
        self
    }

    /// SYN and SYN-ACK.
    pub fn open(&mut self) -> Vec<Vec<u8>> {
        let syn = TcpFlagSet {
            syn: true,
            ..TcpFlagSet::default()
        };
        let syn_ack = TcpFlagSet { ack: true, ..syn };
        let out = vec![
            tcp_frame(self.client, self.server, self.client_seq, syn, &[]),
            tcp_frame(self.server, self.client, self.server_seq, syn_ack, &[]),
        ];
        self.client_seq = self.client_seq.wrapping_add(1);
        self.server_seq = self.server_seq.wrapping_add(1);
        out
    }

    /// One client segment carrying `payload`.
    pub fn client_sends(&mut self, payload: &[u8]) -> Vec<u8> {
        let f = tcp_frame(self.client, self.server, self.client_seq, ack(), payload);
        self.client_seq = self.client_seq.wrapping_add(payload.len() as u32);
        f
    }

    /// One server segment carrying `payload`.
    pub fn server_sends(&mut self, payload: &[u8]) -> Vec<u8> {
        let f = tcp_frame(self.server, self.client, self.server_seq, ack(), payload);
        self.server_seq = self.server_seq.wrapping_add(payload.len() as u32);
        f
    }

    /// Client payload split into segments of at most `mss` bytes.
    pub fn client_sends_split(&mut self, payload: &[u8], mss: usize) -> Vec<Vec<u8>> {
        payload.chunks(mss).map(|c| self.client_sends(c)).collect()
    }

    /// FIN from each side, client first.
    pub fn close(&mut self) -> Vec<Vec<u8>> {
        let fin = TcpFlagSet {
            fin: true,
            ack: true,
            ..TcpFlagSet::default()
        };
        vec![
            tcp_frame(self.client, self.server, self.client_seq, fin, &[]),
            tcp_frame(self.server, self.client, self.server_seq, fin, &[]),
        ]
    }

    /// RST from the server.
    pub fn reset(&mut self) -> Vec<u8> {
        let rst = TcpFlagSet {
            rst: true,
            ..TcpFlagSet::default()
        };
        tcp_frame(self.server, self.client, self.server_seq, rst, &[])
    }
}

fn ack() -> TcpFlagSet {
    TcpFlagSet {
        ack: true,
        ..TcpFlagSet::default()
    }
}

/// Write Ethernet frames to a pcap file with microsecond timestamps.
pub fn write_pcap(path: &Path, packets: &[(PreciseTime, Vec<u8>)]) -> Result<(), pcap::Error> {
    let dead = Capture::dead_with_precision(Linktype::ETHERNET, Precision::Micro)?;
    let mut out = dead.savefile(path)?;
    for (ts, data) in packets {
        let header = PacketHeader {
            ts: libc::timeval {
                tv_sec: ts.sec() as libc::time_t,
                tv_usec: (ts.nsec() / 1_000) as libc::suseconds_t,
            },
            caplen: data.len() as u32,
            len: data.len() as u32,
        };
        out.write(&Packet::new(&header, data));
    }
    out.flush()
}
