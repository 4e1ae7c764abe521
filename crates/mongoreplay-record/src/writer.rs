//! Recording writer.
//!
//! [`RecordingWriter`] streams ops to any `Write` sink. The metadata
//! document is written immediately on construction.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::debug;

use crate::codec::{metadata_to_document, op_to_document, write_document};
use crate::error::RecordError;
use crate::types::{PlaybackFileMetadata, RecordedOp};

/// Output options for recording files.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriterOptions {
    /// Compress the whole file with gzip.
    pub gzip: bool,
    /// Size of the write buffer in bytes.
    pub buffer_size: usize,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            gzip: false,
            buffer_size: 64 * 1024,
        }
    }
}

/// Writes recorded ops to a byte stream.
///
/// Generic over `W: Write` so tests can use `Vec<u8>` and production
/// code can use a [`FileSink`].
///
/// # Examples
///
/// ```
/// use mongoreplay_record::{PlaybackFileMetadata, PreciseTime, RecordedOp, RecordingReader, RecordingWriter};
///
/// let mut buf = Vec::new();
/// let mut writer = RecordingWriter::new(&mut buf, &PlaybackFileMetadata::default()).unwrap();
/// writer
///     .write_op(&RecordedOp::eof_marker(PreciseTime::new(1, 0), "a:1", "b:2", 0))
///     .unwrap();
/// assert_eq!(writer.ops_written(), 1);
/// drop(writer);
///
/// let mut reader = RecordingReader::open(buf.as_slice()).unwrap();
/// assert!(!reader.metadata().driver_ops_filtered);
/// assert!(reader.next_op().unwrap().unwrap().eof);
/// assert!(reader.next_op().unwrap().is_none());
/// ```
pub struct RecordingWriter<W: Write> {
    writer: W,
    ops_written: u64,
}

impl<W: Write> RecordingWriter<W> {
    /// Create a writer, immediately writing the metadata document.
    pub fn new(mut writer: W, metadata: &PlaybackFileMetadata) -> Result<Self, RecordError> {
        write_document(&mut writer, &metadata_to_document(metadata))?;
        Ok(Self {
            writer,
            ops_written: 0,
        })
    }

    /// Append one op.
    pub fn write_op(&mut self, op: &RecordedOp) -> Result<(), RecordError> {
        write_document(&mut self.writer, &op_to_document(op))?;
        self.ops_written += 1;
        Ok(())
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> Result<(), RecordError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Number of ops written so far.
    pub fn ops_written(&self) -> u64 {
        self.ops_written
    }

    /// Consume the writer and return the underlying `Write` sink.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl RecordingWriter<FileSink> {
    /// Flush, finish the gzip trailer if any, and close the file.
    pub fn close(self) -> Result<u64, RecordError> {
        let ops = self.ops_written;
        self.writer.finish()?;
        Ok(ops)
    }
}

/// Buffered file output, optionally gzip-compressed.
pub enum FileSink {
    /// Uncompressed output.
    Plain(BufWriter<File>),
    /// Gzip-compressed output.
    Gzip(GzEncoder<BufWriter<File>>),
}

impl FileSink {
    /// Flush everything and write the gzip trailer.
    pub fn finish(self) -> io::Result<()> {
        let mut inner = match self {
            Self::Plain(w) => w,
            Self::Gzip(enc) => enc.finish()?,
        };
        inner.flush()?;
        inner.get_ref().sync_data()
    }
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Plain(w) => w.write(buf),
            Self::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Plain(w) => w.flush(),
            Self::Gzip(w) => w.flush(),
        }
    }
}

/// Create (or truncate) a recording file at `path`.
pub fn create_recording(
    path: &Path,
    metadata: &PlaybackFileMetadata,
    options: &WriterOptions,
) -> Result<RecordingWriter<FileSink>, RecordError> {
    let file = File::create(path)?;
    let buffered = BufWriter::with_capacity(options.buffer_size.max(1), file);
    let sink = if options.gzip {
        FileSink::Gzip(GzEncoder::new(buffered, Compression::default()))
    } else {
        FileSink::Plain(buffered)
    };
    debug!(path = %path.display(), gzip = options.gzip, "created recording");
    RecordingWriter::new(sink, metadata)
}
