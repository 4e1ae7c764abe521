//! Packet capture and stream demultiplexing for mongoreplay.
//!
//! Turns packets from a live interface or a capture file into framed
//! [`RecordedOp`](mongoreplay_record::RecordedOp)s.
//!
//! # Architecture
//!
//! ```text
//! PacketSource ──> link::parse_segment ──> StreamDemux ──> RecordingWriter
//!  (pcap live/file)   (pnet: L2/L3/L4)      per 4-tuple:
//!                                           connection number,
//!                                           two Reassemblers,
//!                                           EOF on FIN/FIN or RST
//! ```
//!
//! - [`PacketSource`] abstracts packet input; [`PcapSource`] is the pcap
//!   implementation
//! - [`parse_segment`] strips link, network and transport headers
//! - [`Reassembler`] orders one direction's TCP payload and frames ops
//! - [`StreamDemux`] owns all connections and emits recorded ops
//! - [`record`] runs a full session into a recording file

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod demux;
pub mod error;
pub mod link;
pub mod reassembly;
pub mod session;
pub mod signal;
pub mod source;

pub use config::{CaptureConfig, CaptureSource};
pub use demux::{DemuxStats, StreamDemux};
pub use error::CaptureError;
pub use link::{parse_segment, LinkType, TcpSegment};
pub use reassembly::{Frame, Reassembler, ReassemblyStats, MAX_PENDING_BYTES};
pub use session::{record, run_capture, CaptureReport};
pub use signal::install_stop_handler;
pub use source::{CaptureStats, MemorySource, PacketEvent, PacketSource, PcapSource, RawPacket};
