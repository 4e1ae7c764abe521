//! Cursor capabilities shared by request and reply ops.
//!
//! The correlation layer works purely in terms of these two traits so it
//! never needs to match on op kind.

use std::sync::OnceLock;
use std::time::Duration;

use bson::{Bson, Document};
use smallvec::SmallVec;

use crate::error::WireError;

/// Cursor ids referenced by a single request; almost always exactly one.
pub type CursorIds = SmallVec<[i64; 1]>;

/// A request that references server-side cursors (getMore, killCursors).
pub trait CursorBearing {
    /// Cursor ids this request references.
    fn cursor_ids(&self) -> Result<CursorIds, WireError>;

    /// Replace the referenced cursor ids, e.g. with their live equivalents.
    ///
    /// `ids` has at most as many entries as [`cursor_ids`](Self::cursor_ids)
    /// returned; ops that hold a single cursor use the first entry.
    fn set_cursor_ids(&mut self, ids: &[i64]) -> Result<(), WireError>;
}

/// A server reply.
pub trait Replyable {
    /// Cursor id the reply established or continued, 0 if none.
    fn cursor_id(&self) -> Result<i64, WireError>;

    /// Round-trip latency, present only for replies read off a live socket.
    fn latency(&self) -> Option<Duration>;

    /// Number of documents returned to the client.
    fn num_returned(&self) -> usize;

    /// Error messages carried by the reply, if any.
    fn errors(&self) -> Vec<String>;
}

/// Lazily extracted `cursor.id` of a command-style reply.
///
/// The value is derived from the reply body, so it takes no part in
/// equality.
#[derive(Clone, Debug, Default)]
pub struct LazyCursorId(OnceLock<i64>);

impl LazyCursorId {
    /// Return the cached id, computing it from `body` on first access.
    pub fn get_or_extract(&self, body: Option<&Document>) -> i64 {
        *self.0.get_or_init(|| body.map(cursor_id_from_reply).unwrap_or(0))
    }
}

impl PartialEq for LazyCursorId {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

/// Read `cursor.id` out of a command reply document, 0 when absent.
pub fn cursor_id_from_reply(doc: &Document) -> i64 {
    match doc.get_document("cursor") {
        Ok(cursor) => cursor.get("id").and_then(bson_as_i64).unwrap_or(0),
        Err(_) => 0,
    }
}

/// Number of documents in `cursor.firstBatch` / `cursor.nextBatch`.
pub fn batch_len_from_reply(doc: &Document) -> usize {
    let Ok(cursor) = doc.get_document("cursor") else {
        return 0;
    };
    ["firstBatch", "nextBatch"]
        .iter()
        .find_map(|k| cursor.get_array(k).ok())
        .map(|a| a.len())
        .unwrap_or(0)
}

/// Error strings carried by a command reply (`ok: 0` plus `errmsg`, or `$err`).
pub fn errors_from_reply(doc: &Document) -> Vec<String> {
    let mut errors = Vec::new();
    if let Ok(msg) = doc.get_str("$err") {
        errors.push(msg.to_owned());
    }
    let ok = doc.get("ok").and_then(bson_as_f64).unwrap_or(1.0);
    if ok == 0.0 {
        let msg = doc.get_str("errmsg").unwrap_or("command failed");
        errors.push(msg.to_owned());
    }
    if let Ok(write_errors) = doc.get_array("writeErrors") {
        for e in write_errors {
            if let Some(msg) = e.as_document().and_then(|d| d.get_str("errmsg").ok()) {
                errors.push(msg.to_owned());
            }
        }
    }
    errors
}

/// Interpret any numeric BSON value as an i64.
pub fn bson_as_i64(v: &Bson) -> Option<i64> {
    match v {
        Bson::Int64(n) => Some(*n),
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Double(f) => Some(*f as i64),
        _ => None,
    }
}

fn bson_as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Double(f) => Some(*f),
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn cursor_id_is_read_from_nested_field() {
        let reply = doc! { "cursor": { "id": 999_i64, "ns": "test.c", "firstBatch": [ {"a": 1} ] }, "ok": 1.0 };
        assert_eq!(cursor_id_from_reply(&reply), 999);
        assert_eq!(batch_len_from_reply(&reply), 1);
    }

    #[test]
    fn missing_cursor_is_zero() {
        assert_eq!(cursor_id_from_reply(&doc! { "ok": 1.0 }), 0);
        assert_eq!(batch_len_from_reply(&doc! { "ok": 1.0 }), 0);
    }

    #[test]
    fn lazy_id_caches_first_extraction() {
        let lazy = LazyCursorId::default();
        let body = doc! { "cursor": { "id": 5_i64 } };
        assert_eq!(lazy.get_or_extract(Some(&body)), 5);
        // A different body is ignored once cached.
        assert_eq!(lazy.get_or_extract(Some(&doc! {})), 5);
    }

    #[test]
    fn failed_command_reports_errmsg() {
        let reply = doc! { "ok": 0.0, "errmsg": "cursor id 1 not found" };
        assert_eq!(errors_from_reply(&reply), vec!["cursor id 1 not found".to_owned()]);
        assert!(errors_from_reply(&doc! { "ok": 1 }).is_empty());
    }
}
