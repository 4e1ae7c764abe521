//! Core data types for recordings.

use mongoreplay_wire::{Op, RawOp, WireError};

use crate::time::PreciseTime;
use crate::PLAYBACK_FILE_VERSION;

/// Header document at the start of a recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackFileMetadata {
    /// Format version; see [`PLAYBACK_FILE_VERSION`].
    pub playback_file_version: i32,
    /// Whether driver housekeeping ops were already removed.
    pub driver_ops_filtered: bool,
}

impl Default for PlaybackFileMetadata {
    fn default() -> Self {
        Self {
            playback_file_version: PLAYBACK_FILE_VERSION,
            driver_ops_filtered: false,
        }
    }
}

/// One captured op with its capture context.
///
/// Created by the capture layer (or read from a file), annotated by the
/// playback scheduler, and discarded after execution or serialization.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct RecordedOp {
    /// Undecoded frame. Empty for EOF markers.
    pub raw: RawOp,
    /// Capture timestamp.
    pub seen: PreciseTime,
    /// Scheduled replay time, set by the scheduler.
    pub play_at: Option<PreciseTime>,
    /// Marks the end of a connection.
    pub eof: bool,
    /// Sender `host:port`.
    pub src_endpoint: String,
    /// Receiver `host:port`.
    pub dst_endpoint: String,
    /// Connection number assigned at capture time.
    pub seen_connection_num: i64,
    /// Connection number of the live session that replayed the op.
    pub played_connection_num: i64,
    /// Time the op was actually sent during replay.
    pub played_at: Option<PreciseTime>,
    /// Replay pass that produced this op (see `--repeat`).
    pub generation: i32,
    /// Position in the replayed stream across all generations.
    pub order: i64,
}

impl RecordedOp {
    /// Wrap a captured frame.
    pub fn new(
        raw: RawOp,
        seen: PreciseTime,
        src_endpoint: impl Into<String>,
        dst_endpoint: impl Into<String>,
        seen_connection_num: i64,
    ) -> Self {
        Self {
            raw,
            seen,
            src_endpoint: src_endpoint.into(),
            dst_endpoint: dst_endpoint.into(),
            seen_connection_num,
            ..Self::default()
        }
    }

    /// End-of-connection marker.
    pub fn eof_marker(
        seen: PreciseTime,
        src_endpoint: impl Into<String>,
        dst_endpoint: impl Into<String>,
        seen_connection_num: i64,
    ) -> Self {
        Self {
            eof: true,
            ..Self::new(
                RawOp::default(),
                seen,
                src_endpoint,
                dst_endpoint,
                seen_connection_num,
            )
        }
    }

    /// Decode the recorded frame.
    pub fn parse(&self) -> Result<Op, WireError> {
        self.raw.parse()
    }

    /// Whether the frame was sent by a server.
    ///
    /// Decided from the header alone: legacy and command replies have
    /// their own op codes, and an OP_MSG is a reply when `responseTo`
    /// is set.
    pub fn is_reply(&self) -> bool {
        use mongoreplay_wire::OpCode;
        match self.raw.header.op_code() {
            Some(OpCode::Reply | OpCode::CommandReply) => true,
            Some(OpCode::Msg | OpCode::Compressed) => self.raw.header.response_to != 0,
            _ => false,
        }
    }
}
