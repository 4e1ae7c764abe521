//! Detection of driver housekeeping commands.
//!
//! Drivers issue handshake, heartbeat and authentication commands on
//! their own schedule. Replaying them is usually noise, so playback and
//! the filter can drop them.

use crate::op::Op;

/// Commands treated as driver housekeeping.
pub const DRIVER_COMMANDS: [&str; 7] = [
    "isMaster",
    "ismaster",
    "hello",
    "ping",
    "getnonce",
    "saslStart",
    "saslContinue",
];

/// Command name of a command-style op, if it is one.
///
/// OP_QUERY only counts when it targets `<db>.$cmd`.
pub fn command_name(op: &Op) -> Option<&str> {
    match op {
        Op::Query(q) => q.command_name(),
        Op::Command(c) => Some(c.command_name.as_str()),
        Op::Msg(m) => m.command_name(),
        _ => None,
    }
}

/// Whether `op` is one of the [`DRIVER_COMMANDS`].
pub fn is_driver_op(op: &Op) -> bool {
    command_name(op).is_some_and(|name| DRIVER_COMMANDS.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MsgHeader, OpCode};
    use crate::ops::{MsgOp, QueryOp};
    use bson::doc;

    fn query(ns: &str, body: bson::Document) -> Op {
        Op::Query(QueryOp {
            header: MsgHeader::new(OpCode::Query, 1, 0),
            flags: 0,
            full_collection_name: ns.into(),
            number_to_skip: 0,
            number_to_return: -1,
            query: body,
            return_fields_selector: None,
        })
    }

    #[test]
    fn handshake_query_is_driver_op() {
        assert!(is_driver_op(&query("admin.$cmd", doc! { "isMaster": 1 })));
        assert!(is_driver_op(&query(
            "admin.$cmd",
            doc! { "$query": { "ismaster": 1 }, "$readPreference": { "mode": "primary" } }
        )));
    }

    #[test]
    fn plain_query_is_not_driver_op() {
        // A collection literally named like a command is still a query.
        assert!(!is_driver_op(&query("test.c", doc! { "ping": 1 })));
        assert!(!is_driver_op(&query("test.$cmd", doc! { "find": "c" })));
    }

    #[test]
    fn msg_hello_is_driver_op() {
        let op = Op::Msg(MsgOp::new(
            MsgHeader::new(OpCode::Msg, 1, 0),
            doc! { "hello": 1, "$db": "admin" },
        ));
        assert!(is_driver_op(&op));
        assert_eq!(command_name(&op), Some("hello"));
    }
}
