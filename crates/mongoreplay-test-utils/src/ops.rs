//! Op builders.

use bson::{doc, Document};

use mongoreplay_record::{PreciseTime, RecordedOp};
use mongoreplay_wire::{
    CommandOp, CommandReplyOp, GetMoreOp, InsertOp, KillCursorsOp, MsgHeader, MsgOp, MsgReplyOp,
    Op, OpCode, QueryOp, RawOp, ReplyOp,
};

/// Client endpoint used by recorded-op helpers.
pub const CLIENT: &str = "127.0.0.1:50000";
/// Server endpoint used by recorded-op helpers.
pub const SERVER: &str = "127.0.0.1:27017";

pub fn query(request_id: i32, ns: &str, query: Document) -> Op {
    Op::Query(QueryOp {
        header: MsgHeader::new(OpCode::Query, request_id, 0),
        flags: 0,
        full_collection_name: ns.into(),
        number_to_skip: 0,
        number_to_return: 0,
        query,
        return_fields_selector: None,
    })
}

pub fn reply(request_id: i32, response_to: i32, cursor_id: i64, docs: Vec<Document>) -> Op {
    Op::Reply(ReplyOp::new(
        MsgHeader::new(OpCode::Reply, request_id, response_to),
        cursor_id,
        docs,
    ))
}

pub fn insert(request_id: i32, ns: &str, documents: Vec<Document>) -> Op {
    Op::Insert(InsertOp {
        header: MsgHeader::new(OpCode::Insert, request_id, 0),
        flags: 0,
        full_collection_name: ns.into(),
        documents,
    })
}

pub fn get_more(request_id: i32, ns: &str, cursor_id: i64) -> Op {
    Op::GetMore(GetMoreOp {
        header: MsgHeader::new(OpCode::GetMore, request_id, 0),
        full_collection_name: ns.into(),
        number_to_return: 0,
        cursor_id,
    })
}

pub fn kill_cursors(request_id: i32, cursor_ids: Vec<i64>) -> Op {
    Op::KillCursors(KillCursorsOp {
        header: MsgHeader::new(OpCode::KillCursors, request_id, 0),
        cursor_ids,
    })
}

pub fn command(request_id: i32, database: &str, name: &str, args: Document) -> Op {
    Op::Command(CommandOp {
        header: MsgHeader::new(OpCode::Command, request_id, 0),
        database: database.into(),
        command_name: name.into(),
        metadata: Document::new(),
        command_args: args,
        input_docs: Vec::new(),
    })
}

pub fn command_reply(request_id: i32, response_to: i32, body: Document) -> Op {
    Op::CommandReply(CommandReplyOp::new(
        MsgHeader::new(OpCode::CommandReply, request_id, response_to),
        Document::new(),
        body,
    ))
}

pub fn msg(request_id: i32, body: Document) -> Op {
    Op::Msg(MsgOp::new(MsgHeader::new(OpCode::Msg, request_id, 0), body))
}

pub fn msg_reply(request_id: i32, response_to: i32, body: Document) -> Op {
    Op::MsgReply(MsgReplyOp::new(MsgOp::new(
        MsgHeader::new(OpCode::Msg, request_id, response_to),
        body,
    )))
}

/// Body of a `find`/`aggregate` reply that opens `cursor_id`.
pub fn cursor_body(cursor_id: i64, ns: &str, batch: Vec<Document>) -> Document {
    doc! {
        "cursor": { "id": cursor_id, "ns": ns, "firstBatch": batch },
        "ok": 1.0,
    }
}

/// An OP_MSG `getMore` for `cursor_id` on `db.coll`.
pub fn msg_get_more(request_id: i32, db: &str, coll: &str, cursor_id: i64) -> Op {
    msg(
        request_id,
        doc! { "getMore": cursor_id, "collection": coll, "$db": db },
    )
}

/// A reply to `request` in the matching wire shape.
///
/// Legacy requests get an OP_REPLY carrying `cursor_id` in its header
/// field. Command-style requests get `body`, with a `cursor` sub-document
/// added when `cursor_id` is nonzero and `body` has none.
pub fn reply_like(request: &Op, request_id: i32, cursor_id: i64, body: Document) -> Op {
    let response_to = request.header().request_id;
    let with_cursor = |mut body: Document| {
        if cursor_id != 0 && !body.contains_key("cursor") {
            body.insert("cursor", doc! { "id": cursor_id, "ns": "", "firstBatch": [] });
        }
        body
    };
    match request {
        Op::Command(_) => command_reply(request_id, response_to, with_cursor(body)),
        Op::Msg(_) => msg_reply(request_id, response_to, with_cursor(body)),
        _ => reply(request_id, response_to, cursor_id, vec![body]),
    }
}

/// Wrap `op` as sent by [`CLIENT`] to [`SERVER`] at `seen_sec`.
pub fn recorded(op: &Op, seen_sec: i64, connection: i64) -> RecordedOp {
    recorded_at(op, PreciseTime::new(seen_sec, 0), connection)
}

/// Like [`recorded`] with a precise timestamp.
pub fn recorded_at(op: &Op, seen: PreciseTime, connection: i64) -> RecordedOp {
    let (src, dst) = if op.is_reply() {
        (SERVER, CLIENT)
    } else {
        (CLIENT, SERVER)
    };
    let raw = RawOp::from_op(op).unwrap_or_default();
    RecordedOp::new(raw, seen, src, dst, connection)
}

/// EOF marker for `connection` at `seen_sec`.
pub fn eof(seen_sec: i64, connection: i64) -> RecordedOp {
    RecordedOp::eof_marker(PreciseTime::new(seen_sec, 0), CLIENT, SERVER, connection)
}
