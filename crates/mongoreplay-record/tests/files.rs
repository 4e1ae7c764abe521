//! File-level recording tests: plain and gzip output, compression
//! detection, and streamed decoding from disk.

use bson::doc;
use mongoreplay_record::{
    create_recording, open_recording, OpStream, OpStreamConfig, PlaybackFileMetadata,
    PreciseTime, RecordedOp, WriterOptions, GZIP_MAGIC,
};
use mongoreplay_wire::{InsertOp, MsgHeader, Op, OpCode, RawOp};

// ── Helpers ─────────────────────────────────────────────────────

fn insert(request_id: i32, conn: i64, sec: i64) -> RecordedOp {
    let op = Op::Insert(InsertOp {
        header: MsgHeader::new(OpCode::Insert, request_id, 0),
        flags: 0,
        full_collection_name: "test.coll".into(),
        documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
    });
    RecordedOp::new(
        RawOp::from_op(&op).unwrap(),
        PreciseTime::new(sec, 0),
        "127.0.0.1:50000",
        "127.0.0.1:27017",
        conn,
    )
}

fn write(path: &std::path::Path, gzip: bool, ops: &[RecordedOp]) {
    let options = WriterOptions {
        gzip,
        ..WriterOptions::default()
    };
    let meta = PlaybackFileMetadata {
        driver_ops_filtered: true,
        ..PlaybackFileMetadata::default()
    };
    let mut w = create_recording(path, &meta, &options).unwrap();
    for op in ops {
        w.write_op(op).unwrap();
    }
    assert_eq!(w.close().unwrap(), ops.len() as u64);
}

// ── Tests ───────────────────────────────────────────────────────

#[test]
fn gzip_file_is_detected_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.bson.gz");
    let ops: Vec<_> = (0..20).map(|i| insert(i, i64::from(i % 3), i64::from(i))).collect();
    write(&path, true, &ops);

    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(bytes[..2], GZIP_MAGIC);

    let reader = open_recording(&path).unwrap();
    assert!(reader.metadata().driver_ops_filtered);
    let back: Vec<RecordedOp> = reader.ops().map(Result::unwrap).collect();
    assert_eq!(back, ops);
}

#[test]
fn plain_file_parses_to_original_ops() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.bson");
    let ops = vec![insert(1, 0, 100), insert(2, 0, 101)];
    write(&path, false, &ops);

    let mut reader = open_recording(&path).unwrap();
    let first = reader.next_op().unwrap().unwrap();
    match first.parse().unwrap() {
        Op::Insert(ins) => {
            assert_eq!(ins.full_collection_name, "test.coll");
            assert_eq!(ins.documents.len(), 2);
        }
        other => panic!("expected insert, got {other:?}"),
    }
}

#[test]
fn op_stream_reads_gzip_file_repeatedly() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("capture.bson.gz");
    let ops: Vec<_> = (0..50).map(|i| insert(i, 0, i64::from(i))).collect();
    write(&path, true, &ops);

    let config = OpStreamConfig {
        decode_workers: 3,
        capacity: 8,
        repeat: 2,
    };
    let open_path = path.clone();
    let stream = OpStream::spawn(move || open_recording(&open_path), &config).unwrap();
    let got: Vec<RecordedOp> = stream.map(Result::unwrap).collect();
    assert_eq!(got.len(), 100);
    assert!(got.windows(2).all(|w| w[0].seen <= w[1].seen));
    assert_eq!(got[50].generation, 1);
    assert_eq!(got[50].seen, PreciseTime::new(49, 0));
    assert_eq!(got[99].order, 99);
}
