//! File-to-file filter runs.

use std::path::Path;
use std::time::Duration;

use bson::doc;
use mongoreplay_filter::{filter, FilterConfig, FilterError};
use mongoreplay_record::{PreciseTime, RecordedOp};
use mongoreplay_test_utils::ops::{eof, insert, msg, msg_reply, recorded};
use mongoreplay_test_utils::recording::{read_recording, write_recording};

fn ins(id: i32, sec: i64, conn: i64) -> RecordedOp {
    recorded(&insert(id, "db.c", vec![doc! { "i": id }]), sec, conn)
}

fn seen_secs(path: &Path) -> Vec<i64> {
    read_recording(path).1.iter().map(|o| o.seen.sec()).collect()
}

#[test]
fn window_keeps_ops_from_start_for_duration() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bson");
    let output = dir.path().join("out.bson");
    let ops: Vec<RecordedOp> = (0..10).map(|s| ins(s as i32, 100 + s, 1)).collect();
    write_recording(&input, &ops, false, false);

    let config = FilterConfig {
        start_at: Some(PreciseTime::new(103, 0)),
        duration: Some(Duration::from_secs(4)),
        ..FilterConfig::default()
    };
    let report = filter(&input, &output, &config).unwrap();
    assert_eq!(seen_secs(&output), vec![103, 104, 105, 106]);
    assert_eq!(report.ops_read, 10);
    assert_eq!(report.ops_written, 4);
    assert_eq!(report.outside_window, 6);
}

#[test]
fn start_before_first_op_uses_first_op() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bson");
    let output = dir.path().join("out.bson");
    let ops: Vec<RecordedOp> = (0..5).map(|s| ins(s as i32, 50 + s, 1)).collect();
    write_recording(&input, &ops, false, true);

    let config = FilterConfig {
        start_at: Some(PreciseTime::new(1, 0)),
        duration: Some(Duration::from_secs(2)),
        ..FilterConfig::default()
    };
    filter(&input, &output, &config).unwrap();
    assert_eq!(seen_secs(&output), vec![50, 51]);
}

#[test]
fn removing_driver_ops_marks_the_output() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bson");
    let output = dir.path().join("out.bson");
    let ops = vec![
        recorded(&msg(1, doc! { "isMaster": 1, "$db": "admin" }), 0, 1),
        recorded(&msg_reply(2, 1, doc! { "ok": 1 }), 0, 1),
        ins(3, 1, 1),
        eof(2, 1),
    ];
    write_recording(&input, &ops, false, false);

    let config = FilterConfig {
        remove_driver_ops: true,
        ..FilterConfig::default()
    };
    let report = filter(&input, &output, &config).unwrap();
    assert_eq!(report.driver_ops_removed, 2);
    let (meta, kept) = read_recording(&output);
    assert!(meta.driver_ops_filtered);
    assert_eq!(kept.len(), 2);
    assert!(kept[1].eof);
}

#[test]
fn already_filtered_input_stays_marked() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bson");
    let output = dir.path().join("out.bson");
    write_recording(&input, &[ins(1, 0, 1)], true, false);
    filter(&input, &output, &FilterConfig::default()).unwrap();
    assert!(read_recording(&output).0.driver_ops_filtered);
}

#[test]
fn split_routes_each_connection_to_one_file_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.bson");
    let output = dir.path().join("split.bson");
    // Connections 1, 2, 4 and 5 over three outputs; output 0 gets nothing.
    let mut ops = Vec::new();
    for round in 0..3 {
        for conn in [1, 2, 4, 5] {
            ops.push(ins((round * 10 + conn) as i32, round, conn));
        }
    }
    write_recording(&input, &ops, false, false);

    let config = FilterConfig {
        split: 3,
        ..FilterConfig::default()
    };
    let report = filter(&input, &output, &config).unwrap();
    assert_eq!(report.ops_written, 12);

    let out0 = dir.path().join("split_0.bson");
    let out1 = dir.path().join("split_1.bson");
    let out2 = dir.path().join("split_2.bson");
    assert!(!out0.exists());
    assert!(report.outputs[0].removed);

    let (_, ops1) = read_recording(&out1);
    let ids1: Vec<(i64, i32)> = ops1
        .iter()
        .map(|o| (o.seen_connection_num, o.raw.header.request_id))
        .collect();
    assert_eq!(ids1, vec![(1, 1), (4, 4), (1, 11), (4, 14), (1, 21), (4, 24)]);

    let (_, ops2) = read_recording(&out2);
    assert!(ops2.iter().all(|o| o.seen_connection_num % 3 == 2));
    assert_eq!(ops2.len(), 6);
}

#[test]
fn missing_input_fails_before_writing() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.bson");
    let err = filter(&dir.path().join("absent.bson"), &output, &FilterConfig::default()).unwrap_err();
    assert!(matches!(err, FilterError::Record(_)));
    assert!(!output.exists());
}
