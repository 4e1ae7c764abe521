//! Packet sources.

use std::collections::VecDeque;

use pcap::{Activated, Capture, Precision};

use mongoreplay_record::PreciseTime;

use crate::config::{CaptureConfig, CaptureSource};
use crate::error::CaptureError;
use crate::link::LinkType;

/// A captured frame and its timestamp.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RawPacket<'a> {
    /// Capture time.
    pub ts: PreciseTime,
    /// Frame bytes, starting at the link-layer header.
    pub data: &'a [u8],
}

/// Outcome of one read from a [`PacketSource`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketEvent<'a> {
    /// A packet arrived.
    Packet(RawPacket<'a>),
    /// The read timeout elapsed with nothing to report.
    Timeout,
    /// The source is exhausted.
    End,
}

/// Packet counters reported by the capture library.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureStats {
    /// Packets received by the filter.
    pub received: u32,
    /// Packets dropped for lack of buffer space.
    pub dropped: u32,
    /// Packets dropped by the interface or its driver.
    pub if_dropped: u32,
}

impl CaptureStats {
    /// Whether any packet was lost.
    pub fn lost_packets(&self) -> bool {
        self.dropped > 0 || self.if_dropped > 0
    }
}

/// Anything that yields link-layer frames.
pub trait PacketSource {
    /// Framing of every packet from this source.
    fn link_type(&self) -> LinkType;

    /// Read the next packet, blocking at most the source's read timeout.
    fn next_packet(&mut self) -> Result<PacketEvent<'_>, CaptureError>;

    /// Loss counters. Offline sources report zeros.
    fn stats(&mut self) -> Result<CaptureStats, CaptureError>;
}

// ── pcap ────────────────────────────────────────────────────────

/// A live interface or capture file opened through libpcap.
pub struct PcapSource {
    capture: Capture<dyn Activated>,
    link: LinkType,
    live: bool,
    nanos: bool,
}

impl PcapSource {
    /// Open the source named by `config` and install its BPF filter.
    pub fn open(config: &CaptureConfig) -> Result<Self, CaptureError> {
        config.validate()?;
        let (mut capture, live, nanos): (Capture<dyn Activated>, bool, bool) =
            match &config.source {
                CaptureSource::Interface(name) => {
                    let cap = Capture::from_device(name.as_str())?
                        .promisc(config.promisc)
                        .snaplen(config.snaplen)
                        .buffer_size(config.buffer_size)
                        .timeout(config.read_timeout_ms)
                        .open()?;
                    (cap.into(), true, false)
                }
                CaptureSource::File(path) => {
                    let cap = Capture::from_file_with_precision(path, Precision::Nano)?;
                    (cap.into(), false, true)
                }
            };
        let filter = config.effective_filter();
        capture.filter(filter, true)?;
        let link = LinkType::from_dlt(capture.get_datalink().0)?;
        tracing::info!(source = ?config.source, filter, link = ?link, "capture opened");
        Ok(Self {
            capture,
            link,
            live,
            nanos,
        })
    }
}

impl PacketSource for PcapSource {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn next_packet(&mut self) -> Result<PacketEvent<'_>, CaptureError> {
        let nanos = self.nanos;
        match self.capture.next_packet() {
            Ok(packet) => {
                let sec = i64::from(packet.header.ts.tv_sec);
                let frac = i64::from(packet.header.ts.tv_usec);
                let nsec = if nanos { frac } else { frac * 1_000 };
                Ok(PacketEvent::Packet(RawPacket {
                    ts: PreciseTime::new(sec, nsec),
                    data: packet.data,
                }))
            }
            Err(pcap::Error::TimeoutExpired) => Ok(PacketEvent::Timeout),
            Err(pcap::Error::NoMorePackets) => Ok(PacketEvent::End),
            Err(e) => Err(e.into()),
        }
    }

    fn stats(&mut self) -> Result<CaptureStats, CaptureError> {
        if !self.live {
            return Ok(CaptureStats::default());
        }
        let s = self.capture.stats()?;
        Ok(CaptureStats {
            received: s.received,
            dropped: s.dropped,
            if_dropped: s.if_dropped,
        })
    }
}

// ── In-memory ───────────────────────────────────────────────────

/// Packets held in memory, for synthetic traffic and tests.
///
/// A `None` entry reads as [`PacketEvent::Timeout`].
#[derive(Clone, Debug)]
pub struct MemorySource {
    link: LinkType,
    packets: VecDeque<Option<(PreciseTime, Vec<u8>)>>,
    current: Vec<u8>,
    stats: CaptureStats,
}

impl MemorySource {
    /// An empty source of the given link type.
    pub fn new(link: LinkType) -> Self {
        Self {
            link,
            packets: VecDeque::new(),
            current: Vec::new(),
            stats: CaptureStats::default(),
        }
    }

    /// Queue a packet.
    pub fn push(&mut self, ts: PreciseTime, data: Vec<u8>) {
        self.packets.push_back(Some((ts, data)));
    }

    /// Queue a read timeout.
    pub fn push_timeout(&mut self) {
        self.packets.push_back(None);
    }

    /// Counters to report from [`PacketSource::stats`].
    pub fn set_stats(&mut self, stats: CaptureStats) {
        self.stats = stats;
    }
}

impl PacketSource for MemorySource {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn next_packet(&mut self) -> Result<PacketEvent<'_>, CaptureError> {
        match self.packets.pop_front() {
            None => Ok(PacketEvent::End),
            Some(None) => Ok(PacketEvent::Timeout),
            Some(Some((ts, data))) => {
                self.current = data;
                Ok(PacketEvent::Packet(RawPacket {
                    ts,
                    data: &self.current,
                }))
            }
        }
    }

    fn stats(&mut self) -> Result<CaptureStats, CaptureError> {
        Ok(self.stats)
    }
}
