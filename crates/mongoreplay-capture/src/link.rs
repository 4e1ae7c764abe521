//! Link, network and transport header decoding.
//!
//! Only TCP over IPv4 or IPv6 is of interest; everything else yields
//! `None`. IPv4 fragments and IPv6 extension headers are not followed.

use std::net::{IpAddr, SocketAddr};

use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::ipv6::Ipv6Packet;
use pnet::packet::sll::SLLPacket;
use pnet::packet::tcp::{TcpFlags, TcpPacket};

use crate::error::CaptureError;

/// Link-layer framings the capture understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkType {
    /// DLT_EN10MB.
    Ethernet,
    /// DLT_LINUX_SLL ("any" interface on Linux).
    LinuxSll,
    /// DLT_NULL: BSD loopback, 4-byte host-order family.
    Null,
    /// DLT_LOOP: OpenBSD loopback, 4-byte network-order family.
    Loop,
    /// Bare IP packets with no link header.
    Raw,
}

impl LinkType {
    /// Map a DLT value onto a supported link type.
    pub fn from_dlt(dlt: i32) -> Result<Self, CaptureError> {
        Ok(match dlt {
            1 => Self::Ethernet,
            113 => Self::LinuxSll,
            0 => Self::Null,
            108 => Self::Loop,
            12 | 14 | 101 | 228 | 229 => Self::Raw,
            other => return Err(CaptureError::UnsupportedLinkType { linktype: other }),
        })
    }
}

/// A TCP segment stripped of its headers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TcpSegment<'a> {
    /// Sender address.
    pub src: SocketAddr,
    /// Receiver address.
    pub dst: SocketAddr,
    /// Sequence number of the first payload byte (or of the SYN).
    pub seq: u32,
    /// SYN flag.
    pub syn: bool,
    /// FIN flag.
    pub fin: bool,
    /// RST flag.
    pub rst: bool,
    /// Segment payload.
    pub payload: &'a [u8],
}

const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;

/// Decode a captured frame down to its TCP segment.
pub fn parse_segment(link: LinkType, data: &[u8]) -> Option<TcpSegment<'_>> {
    match link {
        LinkType::Ethernet => {
            let eth = EthernetPacket::new(data)?;
            let mut ethertype = eth.get_ethertype();
            let mut offset = EthernetPacket::minimum_packet_size();
            // Strip any stacked 802.1Q tags.
            while ethertype.0 == ETHERTYPE_VLAN || ethertype.0 == ETHERTYPE_QINQ {
                let tag = data.get(offset..offset + 4)?;
                ethertype = EtherType(u16::from_be_bytes([tag[2], tag[3]]));
                offset += 4;
            }
            parse_network(ethertype, data.get(offset..)?)
        }
        LinkType::LinuxSll => {
            let sll = SLLPacket::new(data)?;
            parse_network(
                sll.get_protocol(),
                data.get(SLLPacket::minimum_packet_size()..)?,
            )
        }
        LinkType::Null | LinkType::Loop => {
            let fam = data.get(..4)?;
            let family = if link == LinkType::Null {
                u32::from_ne_bytes([fam[0], fam[1], fam[2], fam[3]])
            } else {
                u32::from_be_bytes([fam[0], fam[1], fam[2], fam[3]])
            };
            let ethertype = match family {
                2 => EtherTypes::Ipv4,
                // AF_INET6 differs across BSDs, macOS and Linux.
                10 | 24 | 28 | 30 => EtherTypes::Ipv6,
                _ => return None,
            };
            parse_network(ethertype, &data[4..])
        }
        LinkType::Raw => {
            let ethertype = match data.first()? >> 4 {
                4 => EtherTypes::Ipv4,
                6 => EtherTypes::Ipv6,
                _ => return None,
            };
            parse_network(ethertype, data)
        }
    }
}

fn parse_network(ethertype: EtherType, data: &[u8]) -> Option<TcpSegment<'_>> {
    if ethertype == EtherTypes::Ipv4 {
        let ip = Ipv4Packet::new(data)?;
        if ip.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
            return None;
        }
        // Non-first fragments carry no TCP header.
        if ip.get_fragment_offset() != 0 {
            return None;
        }
        let header_len = usize::from(ip.get_header_length()) * 4;
        let total_len = usize::from(ip.get_total_length()).min(data.len());
        let payload = data.get(header_len..total_len)?;
        parse_tcp(
            IpAddr::V4(ip.get_source()),
            IpAddr::V4(ip.get_destination()),
            payload,
        )
    } else if ethertype == EtherTypes::Ipv6 {
        let ip = Ipv6Packet::new(data)?;
        if ip.get_next_header() != IpNextHeaderProtocols::Tcp {
            return None;
        }
        let header_len = Ipv6Packet::minimum_packet_size();
        let end = (header_len + usize::from(ip.get_payload_length())).min(data.len());
        let payload = data.get(header_len..end)?;
        parse_tcp(
            IpAddr::V6(ip.get_source()),
            IpAddr::V6(ip.get_destination()),
            payload,
        )
    } else {
        None
    }
}

fn parse_tcp(src_ip: IpAddr, dst_ip: IpAddr, data: &[u8]) -> Option<TcpSegment<'_>> {
    let tcp = TcpPacket::new(data)?;
    let header_len = usize::from(tcp.get_data_offset()) * 4;
    if header_len < TcpPacket::minimum_packet_size() || header_len > data.len() {
        return None;
    }
    let flags = u16::from(tcp.get_flags());
    Some(TcpSegment {
        src: SocketAddr::new(src_ip, tcp.get_source()),
        dst: SocketAddr::new(dst_ip, tcp.get_destination()),
        seq: tcp.get_sequence(),
        syn: flags & u16::from(TcpFlags::SYN) != 0,
        fin: flags & u16::from(TcpFlags::FIN) != 0,
        rst: flags & u16::from(TcpFlags::RST) != 0,
        payload: &data[header_len..],
    })
}
