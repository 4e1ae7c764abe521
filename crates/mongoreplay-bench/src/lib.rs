//! Workloads shared by the mongoreplay benchmarks.
//!
//! - [`mixed_traffic`]: a realistic op mix (finds, inserts, getMores,
//!   OP_MSG commands and their replies)
//! - [`recorded_traffic`]: the same mix as recorded ops spread over
//!   several connections
//! - [`recording_bytes`]: an in-memory recording of that traffic

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use bson::doc;

use mongoreplay_record::{PlaybackFileMetadata, PreciseTime, RecordedOp, RecordingWriter};
use mongoreplay_test_utils::ops::{
    cursor_body, get_more, insert, msg, msg_get_more, msg_reply, query, recorded_at, reply,
};
use mongoreplay_wire::Op;

/// `n` ops cycling through the common request and reply shapes.
pub fn mixed_traffic(n: usize) -> Vec<Op> {
    (0..n)
        .map(|i| {
            let id = i as i32 + 1;
            let batch: Vec<bson::Document> = (0..8)
                .map(|j| doc! { "_id": j, "name": format!("user-{i}-{j}"), "score": j as f64 * 1.5 })
                .collect();
            match i % 6 {
                0 => query(id, "app.users", doc! { "age": { "$gt": 21 } }),
                1 => reply(id, id - 1, 4242, batch),
                2 => insert(id, "app.events", batch),
                3 => get_more(id, "app.users", 4242),
                4 => msg(id, doc! { "find": "users", "filter": { "active": true }, "$db": "app" }),
                _ => msg_reply(id, id - 1, cursor_body(777, "app.users", batch)),
            }
        })
        .chain(std::iter::once(msg_get_more(n as i32 + 1, "app", "users", 777)))
        .collect()
}

/// [`mixed_traffic`] as recorded ops over `connections` connections,
/// one millisecond apart.
pub fn recorded_traffic(n: usize, connections: i64) -> Vec<RecordedOp> {
    mixed_traffic(n)
        .iter()
        .enumerate()
        .map(|(i, op)| {
            let seen = PreciseTime::new(1_700_000_000, i as i64 * 1_000_000);
            recorded_at(op, seen, i as i64 % connections.max(1))
        })
        .collect()
}

/// An uncompressed recording of `ops`.
pub fn recording_bytes(ops: &[RecordedOp]) -> Vec<u8> {
    let mut buf = Vec::new();
    if let Ok(mut writer) = RecordingWriter::new(&mut buf, &PlaybackFileMetadata::default()) {
        for op in ops {
            if writer.write_op(op).is_err() {
                break;
            }
        }
    }
    buf
}
