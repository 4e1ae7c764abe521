//! Recording file format for mongoreplay.
//!
//! A recording is the captured traffic of one session: a metadata
//! document followed by one BSON document per [`RecordedOp`]. The whole
//! stream may be gzip-compressed; readers detect compression from the
//! magic bytes.
//!
//! # Architecture
//!
//! - [`RecordingWriter`] appends ops to any `Write` sink
//! - [`RecordingReader`] reads ops back from any `Read` source
//! - [`OpStream`] decodes a recording on a pool of worker threads,
//!   preserving file order, and optionally repeats it for several
//!   generations
//! - [`PreciseTime`] is the nanosecond capture timestamp
//! - All document conversion is hand-written (no serde dependency)
//!
//! # Format
//!
//! ```text
//! { playbackfileversion: i32, driveropsfiltered: bool }
//! { rawop: { header: {...}, body: Binary }, seen: { sec, nsec }, ... }
//! { rawop: ... }
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod error;
pub mod reader;
pub mod stream;
pub mod time;
pub mod types;
pub mod writer;

pub use error::RecordError;
pub use reader::{open_recording, FileSource, OpIter, RecordingReader};
pub use stream::{OpStream, OpStreamConfig};
pub use time::PreciseTime;
pub use types::{PlaybackFileMetadata, RecordedOp};
pub use writer::{create_recording, FileSink, RecordingWriter, WriterOptions};

/// Current recording format version.
///
/// History:
/// - v0: no metadata document; the file starts with the first op
/// - v1: metadata document with `driveropsfiltered`
pub const PLAYBACK_FILE_VERSION: i32 = 1;

/// Leading bytes of a gzip stream.
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
