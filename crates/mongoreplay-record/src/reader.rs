//! Recording reader.
//!
//! [`RecordingReader`] reads ops from any `Read` source. The metadata
//! document is validated on construction.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

use bson::Document;
use flate2::read::MultiGzDecoder;
use tracing::debug;

use crate::codec::{metadata_from_document, op_from_bytes, read_raw_document};
use crate::error::RecordError;
use crate::types::{PlaybackFileMetadata, RecordedOp};
use crate::{GZIP_MAGIC, PLAYBACK_FILE_VERSION};

/// Reads recorded ops from a byte stream.
///
/// Generic over `R: Read` so tests can use `&[u8]` and production code
/// can use the [`FileSource`] returned by [`open_recording`].
pub struct RecordingReader<R: Read> {
    reader: R,
    metadata: PlaybackFileMetadata,
    /// First op of a version-0 file, read while probing for metadata.
    pending: Option<Vec<u8>>,
    ops_read: u64,
}

impl<R: Read> RecordingReader<R> {
    /// Open a recording stream, reading and validating the metadata.
    ///
    /// Files written before the metadata document existed start directly
    /// with an op; they open as version 0 with `driver_ops_filtered`
    /// unset.
    pub fn open(mut reader: R) -> Result<Self, RecordError> {
        let first = read_raw_document(&mut reader)?.ok_or(RecordError::Empty)?;
        let doc = Document::from_reader(first.as_slice())?;
        let (metadata, pending) = if doc.contains_key("rawop") {
            (
                PlaybackFileMetadata {
                    playback_file_version: 0,
                    driver_ops_filtered: false,
                },
                Some(first),
            )
        } else {
            (metadata_from_document(&doc)?, None)
        };
        if metadata.playback_file_version > PLAYBACK_FILE_VERSION {
            return Err(RecordError::UnsupportedVersion {
                found: metadata.playback_file_version,
            });
        }
        Ok(Self {
            reader,
            metadata,
            pending,
            ops_read: 0,
        })
    }

    /// Metadata from the recording header.
    pub fn metadata(&self) -> &PlaybackFileMetadata {
        &self.metadata
    }

    /// Read the undecoded bytes of the next op document.
    pub fn next_raw(&mut self) -> Result<Option<Vec<u8>>, RecordError> {
        let raw = match self.pending.take() {
            Some(bytes) => Some(bytes),
            None => read_raw_document(&mut self.reader)?,
        };
        if raw.is_some() {
            self.ops_read += 1;
        }
        Ok(raw)
    }

    /// Read the next op, or `None` if the stream is exhausted.
    pub fn next_op(&mut self) -> Result<Option<RecordedOp>, RecordError> {
        match self.next_raw()? {
            Some(bytes) => Ok(Some(op_from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Number of ops read so far.
    pub fn ops_read(&self) -> u64 {
        self.ops_read
    }

    /// Convert into an op iterator.
    pub fn ops(self) -> OpIter<R> {
        OpIter {
            reader: self,
            done: false,
        }
    }
}

/// Iterator adapter over recorded ops.
pub struct OpIter<R: Read> {
    reader: RecordingReader<R>,
    done: bool,
}

impl<R: Read> Iterator for OpIter<R> {
    type Item = Result<RecordedOp, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_op() {
            Ok(Some(op)) => Some(Ok(op)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Source returned by [`open_recording`]: plain or gunzipped file bytes.
pub type FileSource = Box<dyn Read + Send>;

/// Open the recording at `path`, detecting gzip compression from its
/// first two bytes.
pub fn open_recording(path: &Path) -> Result<RecordingReader<FileSource>, RecordError> {
    let file = File::open(path)?;
    let mut buffered = BufReader::with_capacity(64 * 1024, file);
    let gzip = buffered.fill_buf()?.starts_with(&GZIP_MAGIC);
    let source: FileSource = if gzip {
        Box::new(BufReader::new(MultiGzDecoder::new(buffered)))
    } else {
        Box::new(buffered)
    };
    debug!(path = %path.display(), gzip, "opened recording");
    RecordingReader::open(source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{op_to_document, write_document};
    use crate::time::PreciseTime;
    use crate::writer::RecordingWriter;

    fn eof(conn: i64) -> RecordedOp {
        RecordedOp::eof_marker(PreciseTime::new(conn, 0), "c:1", "s:2", conn)
    }

    #[test]
    fn empty_stream_is_an_error() {
        assert!(matches!(
            RecordingReader::open(&[][..]),
            Err(RecordError::Empty)
        ));
    }

    #[test]
    fn iterator_yields_all_ops_in_order() {
        let mut buf = Vec::new();
        let mut w = RecordingWriter::new(&mut buf, &PlaybackFileMetadata::default()).unwrap();
        for c in 0..5 {
            w.write_op(&eof(c)).unwrap();
        }
        drop(w);
        let conns: Vec<i64> = RecordingReader::open(buf.as_slice())
            .unwrap()
            .ops()
            .map(|op| op.unwrap().seen_connection_num)
            .collect();
        assert_eq!(conns, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn legacy_file_without_metadata_opens_as_version_zero() {
        let mut buf = Vec::new();
        write_document(&mut buf, &op_to_document(&eof(7))).unwrap();
        write_document(&mut buf, &op_to_document(&eof(8))).unwrap();
        let mut r = RecordingReader::open(buf.as_slice()).unwrap();
        assert_eq!(r.metadata().playback_file_version, 0);
        assert_eq!(r.next_op().unwrap().unwrap().seen_connection_num, 7);
        assert_eq!(r.next_op().unwrap().unwrap().seen_connection_num, 8);
        assert_eq!(r.ops_read(), 2);
    }

    #[test]
    fn newer_version_is_rejected() {
        let meta = PlaybackFileMetadata {
            playback_file_version: PLAYBACK_FILE_VERSION + 1,
            driver_ops_filtered: false,
        };
        let mut buf = Vec::new();
        drop(RecordingWriter::new(&mut buf, &meta).unwrap());
        assert!(matches!(
            RecordingReader::open(buf.as_slice()),
            Err(RecordError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn iterator_stops_after_error() {
        let mut buf = Vec::new();
        let mut w = RecordingWriter::new(&mut buf, &PlaybackFileMetadata::default()).unwrap();
        w.write_op(&eof(1)).unwrap();
        drop(w);
        buf.extend_from_slice(&[40, 0, 0]);
        let mut it = RecordingReader::open(buf.as_slice()).unwrap().ops();
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().unwrap().is_err());
        assert!(it.next().is_none());
    }
}
