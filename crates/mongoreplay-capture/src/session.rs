//! Capture sessions: packets in, recording out.

use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use mongoreplay_record::{
    create_recording, PlaybackFileMetadata, PreciseTime, RecordingWriter, WriterOptions,
};

use crate::config::CaptureConfig;
use crate::demux::{DemuxStats, StreamDemux};
use crate::error::CaptureError;
use crate::link::parse_segment;
use crate::source::{CaptureStats, PacketEvent, PacketSource, PcapSource};

/// Summary of a finished capture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureReport {
    /// Packets read from the source.
    pub packets: u64,
    /// Packets that were not TCP over IP or could not be decoded.
    pub skipped_packets: u64,
    /// Records written, EOF markers included.
    pub ops_written: u64,
    /// Demultiplexer totals.
    pub demux: DemuxStats,
    /// Loss counters from the capture library.
    pub capture: CaptureStats,
    /// Whether the session ended on a stop request rather than end of input.
    pub stopped: bool,
}

/// Pump `source` through `demux` into `writer` until the source ends or
/// `stop` is raised, then flush every open connection.
///
/// The writer is flushed but not closed.
pub fn run_capture<S, W>(
    source: &mut S,
    demux: &mut StreamDemux,
    writer: &mut RecordingWriter<W>,
    stop: &AtomicBool,
) -> Result<CaptureReport, CaptureError>
where
    S: PacketSource + ?Sized,
    W: Write,
{
    let link = source.link_type();
    let mut report = CaptureReport::default();
    let mut last_ts: Option<PreciseTime> = None;
    let written_before = writer.ops_written();

    loop {
        if stop.load(Ordering::Relaxed) {
            report.stopped = true;
            break;
        }
        match source.next_packet()? {
            PacketEvent::Packet(packet) => {
                report.packets += 1;
                last_ts = Some(packet.ts);
                let Some(segment) = parse_segment(link, packet.data) else {
                    report.skipped_packets += 1;
                    continue;
                };
                for op in demux.handle(packet.ts, &segment) {
                    writer.write_op(&op)?;
                }
            }
            PacketEvent::Timeout => continue,
            PacketEvent::End => break,
        }
    }

    let flush_at = last_ts.unwrap_or_else(PreciseTime::now);
    for op in demux.flush(flush_at) {
        writer.write_op(&op)?;
    }
    writer.flush()?;

    report.ops_written = writer.ops_written() - written_before;
    report.demux = demux.stats();
    report.capture = source.stats()?;
    Ok(report)
}

/// Record traffic described by `config` into a new file at `path`.
///
/// The file is complete and closed before loss is reported: a session
/// that dropped packets returns [`CaptureError::PacketsDropped`] with the
/// recording intact on disk.
pub fn record(
    config: &CaptureConfig,
    path: &Path,
    options: &WriterOptions,
    stop: &AtomicBool,
) -> Result<CaptureReport, CaptureError> {
    let mut source = PcapSource::open(config)?;
    let mut writer = create_recording(path, &PlaybackFileMetadata::default(), options)?;
    let mut demux = StreamDemux::new(config.max_pending_bytes);

    let report = run_capture(&mut source, &mut demux, &mut writer, stop)?;
    writer.close()?;

    tracing::info!(
        packets = report.packets,
        ops = report.ops_written,
        connections = report.demux.connections_opened,
        received = report.capture.received,
        dropped = report.capture.dropped,
        if_dropped = report.capture.if_dropped,
        stopped = report.stopped,
        path = %path.display(),
        "capture finished"
    );
    if report.capture.lost_packets() {
        return Err(CaptureError::PacketsDropped {
            dropped: report.capture.dropped,
            if_dropped: report.capture.if_dropped,
        });
    }
    Ok(report)
}
