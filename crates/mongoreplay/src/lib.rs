//! mongoreplay: record MongoDB wire traffic and replay it against a live
//! server.
//!
//! This is the facade crate that re-exports the public API of the
//! mongoreplay sub-crates.
//!
//! # Quick start
//!
//! ```rust
//! use mongoreplay::prelude::*;
//! use mongoreplay::wire::{MsgHeader, OpCode};
//!
//! // An OP_INSERT frame as it would appear on the wire.
//! let doc = bson::doc! { "x": 1 };
//! let op = Op::Insert(mongoreplay::wire::InsertOp {
//!     header: MsgHeader::new(OpCode::Insert, 7, 0),
//!     flags: 0,
//!     full_collection_name: "app.events".into(),
//!     documents: vec![doc],
//! });
//! let raw = RawOp::from_op(&op).unwrap();
//!
//! // Record it with a timestamp and a connection number.
//! let recorded = RecordedOp::new(
//!     raw,
//!     PreciseTime::new(1_700_000_000, 0),
//!     "10.0.0.1:50000",
//!     "10.0.0.2:27017",
//!     1,
//! );
//!
//! let mut file = Vec::new();
//! let mut writer = RecordingWriter::new(&mut file, &PlaybackFileMetadata::default()).unwrap();
//! writer.write_op(&recorded).unwrap();
//! drop(writer);
//!
//! let mut reader = RecordingReader::open(file.as_slice()).unwrap();
//! let back = reader.next_op().unwrap().unwrap();
//! let parsed = back.parse().unwrap();
//! assert_eq!(parsed.header().request_id, 7);
//! assert_eq!(parsed.meta().namespace, "app.events");
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`wire`] | `mongoreplay-wire` | Wire protocol ops, cursor access, execution over a socket |
//! | [`record`] | `mongoreplay-record` | Recording format, readers, writers, parallel decode |
//! | [`capture`] | `mongoreplay-capture` | Packet sources, TCP reassembly, `record` |
//! | [`engine`] | `mongoreplay-engine` | Playback scheduler, cursor correlation, stats |
//! | [`filter`] | `mongoreplay-filter` | Windowing, driver-op removal, splitting |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Wire protocol (`mongoreplay-wire`).
///
/// [`wire::Op`] is the decoded form of every supported opcode;
/// [`wire::execute`] sends one over a socket and reads the reply.
pub use mongoreplay_wire as wire;

/// Recording format (`mongoreplay-record`).
///
/// Write recordings with [`record::RecordingWriter`] and read them back
/// with [`record::RecordingReader`] or the threaded [`record::OpStream`].
pub use mongoreplay_record as record;

/// Traffic capture (`mongoreplay-capture`).
pub use mongoreplay_capture as capture;

/// Playback (`mongoreplay-engine`).
///
/// [`engine::play`] replays a recording file; [`engine::replay`] replays
/// any op iterator.
pub use mongoreplay_engine as engine;

/// Offline recording transforms (`mongoreplay-filter`).
pub use mongoreplay_filter as filter;

/// Common imports for typical mongoreplay usage.
///
/// ```rust
/// use mongoreplay::prelude::*;
/// ```
pub mod prelude {
    // Wire
    pub use mongoreplay_wire::{CursorBearing, MsgHeader, Op, OpCode, RawOp, Reply, Replyable};

    // Recording
    pub use mongoreplay_record::{
        open_recording, PlaybackFileMetadata, PreciseTime, RecordedOp, RecordingReader,
        RecordingWriter, WriterOptions,
    };

    // Capture
    pub use mongoreplay_capture::{record, CaptureConfig, CaptureSource};

    // Engine
    pub use mongoreplay_engine::{play, PlaybackConfig, PlaybackReport, StatSink};

    // Filter
    pub use mongoreplay_filter::{filter, FilterConfig, FilterReport};

    // Errors
    pub use mongoreplay_capture::CaptureError;
    pub use mongoreplay_engine::ReplayError;
    pub use mongoreplay_filter::FilterError;
    pub use mongoreplay_record::RecordError;
    pub use mongoreplay_wire::WireError;
}
