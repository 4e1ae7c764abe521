//! End-to-end playback of recordings against a scripted server.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bson::doc;
use mongoreplay_engine::{play, MemoryStatSink, PlaybackConfig, PlaybackReport};
use mongoreplay_record::RecordedOp;
use mongoreplay_test_utils::ops::{
    cursor_body, eof, get_more, msg, msg_get_more, msg_reply, query, recorded, reply,
};
use mongoreplay_test_utils::recording::write_recording;
use mongoreplay_test_utils::MockServer;
use mongoreplay_wire::Op;

/// A server that opens a new live cursor, numbered from `first`, for every
/// query or find, and exhausts every getMore.
fn cursor_server(first: i64) -> MockServer {
    let next = AtomicI64::new(first);
    MockServer::start(move |op| match op {
        Op::Query(_) => (next.fetch_add(1, Ordering::SeqCst), doc! { "ok": 1.0 }),
        Op::Msg(m) if m.command_name() == Some("find") => {
            (next.fetch_add(1, Ordering::SeqCst), doc! { "ok": 1.0 })
        }
        _ => (0, doc! { "ok": 1.0 }),
    })
    .unwrap()
}

fn run(server: &MockServer, ops: &[RecordedOp], configure: impl FnOnce(&mut PlaybackConfig)) -> PlaybackReport {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traffic.bson");
    write_recording(&path, ops, true, false);
    let mut config = PlaybackConfig::new(server.uri());
    config.full_speed = true;
    configure(&mut config);
    play(&path, &config, Arc::new(MemoryStatSink::new())).unwrap()
}

fn legacy_get_more_cursors(server: &MockServer) -> Vec<i64> {
    server
        .received()
        .iter()
        .filter_map(|op| match op {
            Op::GetMore(g) => Some(g.cursor_id),
            _ => None,
        })
        .collect()
}

fn single_connection_cursor() -> Vec<RecordedOp> {
    vec![
        recorded(&query(1, "db.c", doc! { "x": 1 }), 0, 1),
        recorded(&reply(2, 1, 111, vec![doc! { "x": 1 }]), 0, 1),
        recorded(&get_more(3, "db.c", 111), 1, 1),
        recorded(&reply(4, 3, 0, vec![]), 1, 1),
        eof(2, 1),
    ]
}

#[test]
fn recorded_cursor_is_rewritten_to_live_cursor() {
    for preprocess in [false, true] {
        let server = cursor_server(999);
        let report = run(&server, &single_connection_cursor(), |c| c.preprocess = preprocess);
        assert_eq!(legacy_get_more_cursors(&server), vec![999], "preprocess={preprocess}");
        assert_eq!(report.ops_played, 2);
        assert_eq!(report.ops_dropped, 0);
        assert_eq!(report.correlation.pairs_committed, 1);
    }
}

#[test]
fn cursor_produced_on_another_connection_is_awaited() {
    let server = cursor_server(4242);
    let ops = vec![
        recorded(&query(1, "db.c", doc! {}), 0, 1),
        recorded(&reply(2, 1, 111, vec![]), 0, 1),
        recorded(&get_more(7, "db.c", 111), 1, 2),
    ];
    let report = run(&server, &ops, |c| c.preprocess = true);
    assert_eq!(legacy_get_more_cursors(&server), vec![4242]);
    assert_eq!(report.connections, 2);
    assert_eq!(report.correlation.cursor_wait_timeouts, 0);
}

#[test]
fn msg_cursors_are_rewritten_across_connections() {
    let server = cursor_server(777);
    let ops = vec![
        recorded(&msg(1, doc! { "find": "c", "$db": "db" }), 0, 1),
        recorded(&msg_reply(2, 1, cursor_body(5, "db.c", vec![])), 0, 1),
        recorded(&msg_get_more(3, "db", "c", 5), 1, 2),
    ];
    run(&server, &ops, |c| c.preprocess = true);
    let sent: Vec<i64> = server
        .received()
        .iter()
        .filter_map(|op| match op {
            Op::Msg(m) if m.command_name() == Some("getMore") => {
                m.body().and_then(|b| b.get_i64("getMore").ok())
            }
            _ => None,
        })
        .collect();
    assert_eq!(sent, vec![777]);
}

#[test]
fn unknown_cursor_is_dropped() {
    let server = cursor_server(999);
    let ops = vec![recorded(&get_more(3, "db.c", 555), 0, 1)];
    let report = run(&server, &ops, |c| c.preprocess = false);
    assert_eq!(report.ops_dropped, 1);
    assert_eq!(report.ops_played, 0);
    assert!(legacy_get_more_cursors(&server).is_empty());
}

#[test]
fn repeated_generations_get_their_own_live_cursors() {
    let server = cursor_server(1000);
    let report = run(&server, &single_connection_cursor(), |c| c.repeat = 2);
    assert_eq!(legacy_get_more_cursors(&server), vec![1000, 1001]);
    assert_eq!(report.played_per_generation.get(&0), Some(&2));
    assert_eq!(report.played_per_generation.get(&1), Some(&2));
    // Both generations share one connection; only the last EOF closes it.
    assert_eq!(report.connections, 1);
}

#[test]
fn unreachable_target_counts_drops() {
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("traffic.bson");
    write_recording(&path, &single_connection_cursor(), true, true);
    let mut config = PlaybackConfig::new(addr.to_string());
    config.full_speed = true;
    let report = play(&path, &config, Arc::new(MemoryStatSink::new())).unwrap();
    assert_eq!(report.connections_lost, 1);
    assert_eq!(report.ops_played, 0);
    assert_eq!(report.ops_dropped, 2);
}

#[test]
fn missing_recording_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = PlaybackConfig::new("localhost:27017");
    let err = play(
        &dir.path().join("absent.bson"),
        &config,
        Arc::new(MemoryStatSink::new()),
    )
    .unwrap_err();
    assert!(matches!(err, mongoreplay_engine::ReplayError::Record(_)));
}
