//! Throwaway recordings.

use std::path::Path;

use mongoreplay_record::{
    create_recording, open_recording, PlaybackFileMetadata, RecordedOp, WriterOptions,
};

/// Write `ops` to a recording at `path`.
pub fn write_recording(path: &Path, ops: &[RecordedOp], driver_ops_filtered: bool, gzip: bool) {
    let meta = PlaybackFileMetadata {
        driver_ops_filtered,
        ..PlaybackFileMetadata::default()
    };
    let options = WriterOptions {
        gzip,
        ..WriterOptions::default()
    };
    let mut w = create_recording(path, &meta, &options).unwrap();
    for op in ops {
        w.write_op(op).unwrap();
    }
    w.close().unwrap();
}

/// Read every op back from the recording at `path`.
pub fn read_recording(path: &Path) -> (PlaybackFileMetadata, Vec<RecordedOp>) {
    let reader = open_recording(path).unwrap();
    let meta = reader.metadata().clone();
    let ops = reader.ops().map(Result::unwrap).collect();
    (meta, ops)
}
