//! Fan-out of recorded ops to one or more output files.
//!
//! Every output is owned by its own writer thread fed through a bounded
//! channel. An op goes to output `seen_connection_num mod n`, so each
//! connection lands in exactly one file with its ops in input order.

use std::fs;
use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Sender;

use mongoreplay_record::{
    create_recording, FileSink, PlaybackFileMetadata, RecordError, RecordedOp, RecordingWriter,
    WriterOptions,
};

use crate::error::FilterError;

/// Outcome for one output file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputReport {
    /// Where the output was written.
    pub path: PathBuf,
    /// Ops written.
    pub ops_written: u64,
    /// Whether the file was deleted for being empty.
    pub removed: bool,
}

struct Output {
    path: PathBuf,
    tx: Sender<RecordedOp>,
    handle: JoinHandle<Result<u64, RecordError>>,
}

/// Writes ops to `n` outputs on `n` threads.
pub struct SplitWriter {
    outputs: Vec<Output>,
}

impl SplitWriter {
    /// Create every output file and start its writer thread.
    ///
    /// Files are created up front so an unwritable destination fails
    /// before any input is read.
    pub fn create(
        paths: Vec<PathBuf>,
        metadata: &PlaybackFileMetadata,
        options: &WriterOptions,
        capacity: usize,
    ) -> Result<Self, FilterError> {
        let mut outputs = Vec::with_capacity(paths.len());
        for (i, path) in paths.into_iter().enumerate() {
            let writer = create_recording(&path, metadata, options)?;
            let (tx, rx) = crossbeam_channel::bounded::<RecordedOp>(capacity);
            let handle = thread::Builder::new()
                .name(format!("mongoreplay-split-{i}"))
                .spawn(move || write_loop(writer, rx))
                .map_err(|e| FilterError::ThreadSpawnFailed {
                    reason: format!("writer {i}: {e}"),
                })?;
            outputs.push(Output { path, tx, handle });
        }
        Ok(Self { outputs })
    }

    /// Number of outputs.
    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    /// Whether there are no outputs.
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Index of the output that receives ops of `connection`.
    pub fn output_for(&self, connection: i64) -> usize {
        connection.rem_euclid(self.outputs.len().max(1) as i64) as usize
    }

    /// Queue `op` on its output. Returns `false` if that writer has
    /// already stopped; its error is reported by [`finish`](Self::finish).
    pub fn send(&self, op: RecordedOp) -> bool {
        let i = self.output_for(op.seen_connection_num);
        match self.outputs.get(i) {
            Some(output) => output.tx.send(op).is_ok(),
            None => false,
        }
    }

    /// Close every output, delete the empty ones and report.
    ///
    /// All writers are joined even if one fails; the first failure is
    /// returned.
    pub fn finish(self) -> Result<Vec<OutputReport>, FilterError> {
        let mut reports = Vec::with_capacity(self.outputs.len());
        let mut first_error = None;
        for Output { path, tx, handle } in self.outputs {
            drop(tx);
            let written = match handle.join() {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    first_error.get_or_insert(FilterError::Record(e));
                    continue;
                }
                Err(_) => {
                    first_error.get_or_insert(FilterError::WriterPanicked { path });
                    continue;
                }
            };
            let removed = written == 0;
            if removed {
                if let Err(e) = fs::remove_file(&path) {
                    first_error.get_or_insert(FilterError::Io(e));
                }
                tracing::debug!(path = %path.display(), "removed empty output");
            }
            reports.push(OutputReport {
                path,
                ops_written: written,
                removed,
            });
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(reports),
        }
    }
}

fn write_loop(
    mut writer: RecordingWriter<FileSink>,
    rx: crossbeam_channel::Receiver<RecordedOp>,
) -> Result<u64, RecordError> {
    for op in rx {
        writer.write_op(&op)?;
    }
    writer.close()
}
