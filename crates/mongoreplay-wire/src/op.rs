//! Raw frames and the tagged op variant.

use std::time::Duration;

use crate::buffer::BodyReader;
use crate::cursor::{CursorBearing, Replyable};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::{abbreviate, OpMetadata};
use crate::ops::{
    decompress, CommandOp, CommandReplyOp, DeleteOp, GetMoreOp, InsertOp, KillCursorsOp, MsgOp,
    MsgReplyOp, QueryOp, ReplyOp, UpdateOp,
};
use crate::{HEADER_LEN, MAX_MESSAGE_SIZE};

/// An undecoded frame as it crossed the wire.
///
/// `body` holds the complete frame, header bytes included, so it can be
/// written back verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct RawOp {
    /// Decoded copy of the first 16 bytes of `body`.
    pub header: MsgHeader,
    /// Full frame bytes.
    pub body: Vec<u8>,
}

impl RawOp {
    /// Wrap a complete frame, decoding its header.
    pub fn from_frame(frame: Vec<u8>) -> Result<Self, WireError> {
        let header = MsgHeader::from_bytes(&frame)?;
        Ok(Self {
            header,
            body: frame,
        })
    }

    /// Encode `op` into a raw frame.
    pub fn from_op(op: &Op) -> Result<Self, WireError> {
        Self::from_frame(op.encode()?)
    }

    /// Decode the frame into a typed op.
    ///
    /// Exactly `message_length - 16` body bytes are consumed; a frame that
    /// is shorter or longer than its header declares is an error.
    /// OP_COMPRESSED frames are unwrapped and the inner op returned.
    pub fn parse(&self) -> Result<Op, WireError> {
        let declared = self.header.message_length;
        if !(HEADER_LEN as i32..=MAX_MESSAGE_SIZE).contains(&declared) {
            return Err(WireError::InvalidHeader {
                message_length: declared,
                op_code: self.header.raw_op_code,
            });
        }
        let declared = declared as usize;
        if self.body.len() < declared {
            return Err(WireError::Truncated {
                field: "frame",
                needed: declared,
                remaining: self.body.len(),
            });
        }
        if self.body.len() > declared {
            return Err(WireError::TrailingBytes {
                op_code: self.header.raw_op_code,
                remaining: self.body.len() - declared,
            });
        }

        let op_code = self.header.op_code().ok_or(WireError::UnknownOpCode {
            op_code: self.header.raw_op_code,
        })?;
        let header = self.header;
        let mut r = BodyReader::new(&self.body[HEADER_LEN..]);
        let op = match op_code {
            OpCode::Reply => Op::Reply(ReplyOp::decode(header, &mut r)?),
            OpCode::Update => Op::Update(UpdateOp::decode(header, &mut r)?),
            OpCode::Insert => Op::Insert(InsertOp::decode(header, &mut r)?),
            OpCode::Query => Op::Query(QueryOp::decode(header, &mut r)?),
            OpCode::GetMore => Op::GetMore(GetMoreOp::decode(header, &mut r)?),
            OpCode::Delete => Op::Delete(DeleteOp::decode(header, &mut r)?),
            OpCode::KillCursors => Op::KillCursors(KillCursorsOp::decode(header, &mut r)?),
            OpCode::Command => Op::Command(CommandOp::decode(header, &mut r)?),
            OpCode::CommandReply => Op::CommandReply(CommandReplyOp::decode(header, &mut r)?),
            OpCode::Msg => {
                let msg = MsgOp::decode(header, &mut r)?;
                if header.response_to != 0 {
                    Op::MsgReply(MsgReplyOp::new(msg))
                } else {
                    Op::Msg(msg)
                }
            }
            OpCode::Compressed => {
                let (inner, frame) = decompress(header, &mut r)?;
                if inner.raw_op_code == OpCode::Compressed.as_i32() {
                    return Err(WireError::Malformed {
                        detail: "nested OP_COMPRESSED".into(),
                    });
                }
                return RawOp {
                    header: inner,
                    body: frame,
                }
                .parse();
            }
        };
        Ok(op)
    }
}

/// Every op shape mongoreplay understands.
#[derive(Clone, Debug, PartialEq)]
pub enum Op {
    /// Legacy OP_QUERY (including `$cmd` commands).
    Query(QueryOp),
    /// Legacy OP_INSERT.
    Insert(InsertOp),
    /// Legacy OP_UPDATE.
    Update(UpdateOp),
    /// Legacy OP_DELETE.
    Delete(DeleteOp),
    /// Legacy OP_GET_MORE.
    GetMore(GetMoreOp),
    /// Legacy OP_KILL_CURSORS.
    KillCursors(KillCursorsOp),
    /// Legacy OP_REPLY.
    Reply(ReplyOp),
    /// OP_COMMAND.
    Command(CommandOp),
    /// OP_COMMANDREPLY.
    CommandReply(CommandReplyOp),
    /// OP_MSG sent by a client.
    Msg(MsgOp),
    /// OP_MSG sent by a server.
    MsgReply(MsgReplyOp),
}

impl Op {
    /// Frame header.
    pub fn header(&self) -> &MsgHeader {
        match self {
            Self::Query(op) => &op.header,
            Self::Insert(op) => &op.header,
            Self::Update(op) => &op.header,
            Self::Delete(op) => &op.header,
            Self::GetMore(op) => &op.header,
            Self::KillCursors(op) => &op.header,
            Self::Reply(op) => &op.header,
            Self::Command(op) => &op.header,
            Self::CommandReply(op) => &op.header,
            Self::Msg(op) => &op.header,
            Self::MsgReply(op) => &op.msg.header,
        }
    }

    /// Mutable frame header, e.g. to assign a fresh request id.
    pub fn header_mut(&mut self) -> &mut MsgHeader {
        match self {
            Self::Query(op) => &mut op.header,
            Self::Insert(op) => &mut op.header,
            Self::Update(op) => &mut op.header,
            Self::Delete(op) => &mut op.header,
            Self::GetMore(op) => &mut op.header,
            Self::KillCursors(op) => &mut op.header,
            Self::Reply(op) => &mut op.header,
            Self::Command(op) => &mut op.header,
            Self::CommandReply(op) => &mut op.header,
            Self::Msg(op) => &mut op.header,
            Self::MsgReply(op) => &mut op.msg.header,
        }
    }

    /// Op code this variant encodes as.
    pub fn op_code(&self) -> OpCode {
        match self {
            Self::Query(_) => OpCode::Query,
            Self::Insert(_) => OpCode::Insert,
            Self::Update(_) => OpCode::Update,
            Self::Delete(_) => OpCode::Delete,
            Self::GetMore(_) => OpCode::GetMore,
            Self::KillCursors(_) => OpCode::KillCursors,
            Self::Reply(_) => OpCode::Reply,
            Self::Command(_) => OpCode::Command,
            Self::CommandReply(_) => OpCode::CommandReply,
            Self::Msg(_) | Self::MsgReply(_) => OpCode::Msg,
        }
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        match self {
            Self::Query(op) => op.meta(),
            Self::Insert(op) => op.meta(),
            Self::Update(op) => op.meta(),
            Self::Delete(op) => op.meta(),
            Self::GetMore(op) => op.meta(),
            Self::KillCursors(op) => op.meta(),
            Self::Reply(op) => op.meta(),
            Self::Command(op) => op.meta(),
            Self::CommandReply(op) => op.meta(),
            Self::Msg(op) => op.meta(),
            Self::MsgReply(op) => op.meta(),
        }
    }

    /// One-line description truncated to `n` characters.
    pub fn abbreviated(&self, n: usize) -> String {
        abbreviate(&self.meta().to_string(), n)
    }

    /// Encode the op into a complete frame.
    ///
    /// The header's `message_length` is recomputed from the encoded body;
    /// `self` is left untouched.
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(256);
        buf.extend_from_slice(&[0u8; HEADER_LEN]);
        match self {
            Self::Query(op) => op.encode_body(&mut buf)?,
            Self::Insert(op) => op.encode_body(&mut buf)?,
            Self::Update(op) => op.encode_body(&mut buf)?,
            Self::Delete(op) => op.encode_body(&mut buf)?,
            Self::GetMore(op) => op.encode_body(&mut buf)?,
            Self::KillCursors(op) => op.encode_body(&mut buf)?,
            Self::Reply(op) => op.encode_body(&mut buf)?,
            Self::Command(op) => op.encode_body(&mut buf)?,
            Self::CommandReply(op) => op.encode_body(&mut buf)?,
            Self::Msg(op) => op.encode_body(&mut buf)?,
            Self::MsgReply(op) => op.msg.encode_body(&mut buf)?,
        }
        if buf.len() > MAX_MESSAGE_SIZE as usize {
            return Err(WireError::Malformed {
                detail: format!("encoded op is {} bytes", buf.len()),
            });
        }
        let header = MsgHeader {
            message_length: buf.len() as i32,
            raw_op_code: self.op_code().as_i32(),
            ..*self.header()
        };
        buf[..HEADER_LEN].copy_from_slice(&header.to_bytes());
        Ok(buf)
    }

    /// Re-encode and store the resulting `message_length` in the header.
    pub fn sync_header(&mut self) -> Result<(), WireError> {
        let len = self.encode()?.len() as i32;
        self.header_mut().message_length = len;
        Ok(())
    }

    /// Cursor capability, present only when this op references cursors.
    pub fn as_cursor_bearing(&self) -> Option<&dyn CursorBearing> {
        match self {
            Self::GetMore(op) => Some(op),
            Self::KillCursors(op) => Some(op),
            Self::Command(op) if op.references_cursors() => Some(op),
            Self::Msg(op) if op.references_cursors() => Some(op),
            _ => None,
        }
    }

    /// Mutable cursor capability.
    pub fn as_cursor_bearing_mut(&mut self) -> Option<&mut dyn CursorBearing> {
        match self {
            Self::GetMore(op) => Some(op),
            Self::KillCursors(op) => Some(op),
            Self::Command(op) if op.references_cursors() => Some(op),
            Self::Msg(op) if op.references_cursors() => Some(op),
            _ => None,
        }
    }

    /// Reply capability for server-sent ops.
    pub fn as_replyable(&self) -> Option<&dyn Replyable> {
        match self {
            Self::Reply(op) => Some(op),
            Self::CommandReply(op) => Some(op),
            Self::MsgReply(op) => Some(op),
            _ => None,
        }
    }

    /// Whether this op was sent by a server.
    pub fn is_reply(&self) -> bool {
        matches!(self, Self::Reply(_) | Self::CommandReply(_) | Self::MsgReply(_))
    }

    /// Whether the server answers this op.
    pub fn expects_reply(&self) -> bool {
        match self {
            Self::Query(_) | Self::GetMore(_) | Self::Command(_) => true,
            Self::Msg(op) => !op.more_to_come(),
            Self::Insert(_)
            | Self::Update(_)
            | Self::Delete(_)
            | Self::KillCursors(_)
            | Self::Reply(_)
            | Self::CommandReply(_)
            | Self::MsgReply(_) => false,
        }
    }

    /// Convert a server-sent op into a [`Reply`].
    pub fn into_reply(self) -> Option<Reply> {
        match self {
            Self::Reply(op) => Some(Reply::Legacy(op)),
            Self::CommandReply(op) => Some(Reply::Command(op)),
            Self::MsgReply(op) => Some(Reply::Msg(op)),
            _ => None,
        }
    }
}

/// A decoded server reply of any shape.
#[derive(Clone, Debug, PartialEq)]
pub enum Reply {
    /// OP_REPLY.
    Legacy(ReplyOp),
    /// OP_COMMANDREPLY.
    Command(CommandReplyOp),
    /// OP_MSG with `responseTo` set.
    Msg(MsgReplyOp),
}

impl Reply {
    /// Frame header.
    pub fn header(&self) -> &MsgHeader {
        match self {
            Self::Legacy(op) => &op.header,
            Self::Command(op) => &op.header,
            Self::Msg(op) => &op.msg.header,
        }
    }

    /// Record the measured round-trip latency.
    pub fn set_latency(&mut self, latency: Duration) {
        match self {
            Self::Legacy(op) => op.latency = Some(latency),
            Self::Command(op) => op.latency = Some(latency),
            Self::Msg(op) => op.latency = Some(latency),
        }
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        match self {
            Self::Legacy(op) => op.meta(),
            Self::Command(op) => op.meta(),
            Self::Msg(op) => op.meta(),
        }
    }

    fn inner(&self) -> &dyn Replyable {
        match self {
            Self::Legacy(op) => op,
            Self::Command(op) => op,
            Self::Msg(op) => op,
        }
    }
}

impl Replyable for Reply {
    fn cursor_id(&self) -> Result<i64, WireError> {
        self.inner().cursor_id()
    }

    fn latency(&self) -> Option<Duration> {
        self.inner().latency()
    }

    fn num_returned(&self) -> usize {
        self.inner().num_returned()
    }

    fn errors(&self) -> Vec<String> {
        self.inner().errors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::{Section, CHECKSUM_PRESENT, MORE_TO_COME};
    use bson::doc;

    fn roundtrip(op: Op) {
        let mut op = op;
        op.sync_header().unwrap();
        let raw = RawOp::from_op(&op).unwrap();
        assert_eq!(raw.header, *op.header());
        assert_eq!(raw.parse().unwrap(), op);
    }

    fn msg_header(op: OpCode, req: i32, resp: i32) -> MsgHeader {
        MsgHeader::new(op, req, resp)
    }

    #[test]
    fn query_roundtrip_with_and_without_selector() {
        let mut q = QueryOp {
            header: msg_header(OpCode::Query, 1, 0),
            flags: 0,
            full_collection_name: "test.c".into(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "a": 1 },
            return_fields_selector: None,
        };
        roundtrip(Op::Query(q.clone()));
        q.return_fields_selector = Some(doc! { "_id": 0 });
        roundtrip(Op::Query(q));
    }

    #[test]
    fn legacy_write_ops_roundtrip() {
        roundtrip(Op::Insert(InsertOp {
            header: msg_header(OpCode::Insert, 2, 0),
            flags: 1,
            full_collection_name: "test.c".into(),
            documents: vec![doc! { "x": 1 }, doc! { "x": 2 }],
        }));
        roundtrip(Op::Update(UpdateOp {
            header: msg_header(OpCode::Update, 3, 0),
            full_collection_name: "test.c".into(),
            flags: 2,
            selector: doc! { "x": 1 },
            update: doc! { "$set": { "y": 2 } },
        }));
        roundtrip(Op::Delete(DeleteOp {
            header: msg_header(OpCode::Delete, 4, 0),
            full_collection_name: "test.c".into(),
            flags: 0,
            selector: doc! { "x": 1 },
        }));
    }

    #[test]
    fn cursor_ops_roundtrip() {
        roundtrip(Op::GetMore(GetMoreOp {
            header: msg_header(OpCode::GetMore, 5, 0),
            full_collection_name: "test.c".into(),
            number_to_return: 10,
            cursor_id: 111,
        }));
        roundtrip(Op::KillCursors(KillCursorsOp {
            header: msg_header(OpCode::KillCursors, 6, 0),
            cursor_ids: vec![1, 2, 3],
        }));
    }

    #[test]
    fn replies_roundtrip() {
        roundtrip(Op::Reply(ReplyOp::new(
            msg_header(OpCode::Reply, 7, 1),
            42,
            vec![doc! { "a": 1 }],
        )));
        roundtrip(Op::CommandReply(CommandReplyOp::new(
            msg_header(OpCode::CommandReply, 8, 2),
            doc! {},
            doc! { "ok": 1.0 },
        )));
        let msg = MsgOp::new(msg_header(OpCode::Msg, 9, 3), doc! { "ok": 1.0 });
        roundtrip(Op::MsgReply(MsgReplyOp::new(msg)));
    }

    #[test]
    fn command_roundtrip() {
        roundtrip(Op::Command(CommandOp {
            header: msg_header(OpCode::Command, 10, 0),
            database: "admin".into(),
            command_name: "ping".into(),
            metadata: doc! {},
            command_args: doc! { "ping": 1 },
            input_docs: vec![doc! { "z": 1 }],
        }));
    }

    #[test]
    fn msg_with_sequence_and_checksum_roundtrip() {
        let mut msg = MsgOp::new(
            msg_header(OpCode::Msg, 11, 0),
            doc! { "insert": "c", "$db": "test" },
        );
        msg.sections.push(Section::Sequence {
            identifier: "documents".into(),
            documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
        });
        msg.flag_bits |= CHECKSUM_PRESENT;
        msg.checksum = Some(0xdead_beef);
        roundtrip(Op::Msg(msg));
    }

    #[test]
    fn msg_with_response_to_decodes_as_reply() {
        let mut msg = MsgOp::new(msg_header(OpCode::Msg, 12, 0), doc! { "ok": 1.0 });
        msg.header.response_to = 11;
        let raw = RawOp::from_op(&Op::Msg(msg)).unwrap();
        assert!(matches!(raw.parse().unwrap(), Op::MsgReply(_)));
    }

    #[test]
    fn frame_shorter_than_declared_is_truncated() {
        let op = Op::Insert(InsertOp {
            header: msg_header(OpCode::Insert, 1, 0),
            flags: 0,
            full_collection_name: "test.c".into(),
            documents: vec![doc! { "x": 1 }],
        });
        let mut raw = RawOp::from_op(&op).unwrap();
        raw.body.truncate(raw.body.len() - 3);
        assert!(matches!(raw.parse(), Err(WireError::Truncated { .. })));
    }

    #[test]
    fn frame_longer_than_declared_is_rejected() {
        let op = Op::KillCursors(KillCursorsOp {
            header: msg_header(OpCode::KillCursors, 1, 0),
            cursor_ids: vec![7],
        });
        let mut raw = RawOp::from_op(&op).unwrap();
        raw.body.extend_from_slice(&[0, 0]);
        assert!(matches!(
            raw.parse(),
            Err(WireError::TrailingBytes { remaining: 2, .. })
        ));
    }

    #[test]
    fn cursor_capability_is_exposed_only_for_cursor_ops() {
        let find = Op::Msg(MsgOp::new(
            msg_header(OpCode::Msg, 1, 0),
            doc! { "find": "c", "$db": "test" },
        ));
        assert!(find.as_cursor_bearing().is_none());

        let mut get_more = Op::Msg(MsgOp::new(
            msg_header(OpCode::Msg, 2, 0),
            doc! { "getMore": 111_i64, "collection": "c", "$db": "test" },
        ));
        let ids = get_more.as_cursor_bearing().unwrap().cursor_ids().unwrap();
        assert_eq!(ids.as_slice(), &[111]);
        get_more
            .as_cursor_bearing_mut()
            .unwrap()
            .set_cursor_ids(&[999])
            .unwrap();
        let ids = get_more.as_cursor_bearing().unwrap().cursor_ids().unwrap();
        assert_eq!(ids.as_slice(), &[999]);
    }

    #[test]
    fn rewriting_msg_cursor_drops_checksum() {
        let mut msg = MsgOp::new(
            msg_header(OpCode::Msg, 2, 0),
            doc! { "killCursors": "c", "cursors": [1_i64, 2_i64], "$db": "test" },
        );
        msg.flag_bits |= CHECKSUM_PRESENT;
        msg.checksum = Some(1);
        msg.set_cursor_ids(&[5]).unwrap();
        assert_eq!(msg.flag_bits & CHECKSUM_PRESENT, 0);
        assert_eq!(msg.checksum, None);
        assert_eq!(msg.cursor_ids().unwrap().as_slice(), &[5]);
    }

    #[test]
    fn reply_expectations() {
        let mut msg = MsgOp::new(msg_header(OpCode::Msg, 1, 0), doc! { "insert": "c" });
        assert!(Op::Msg(msg.clone()).expects_reply());
        msg.flag_bits |= MORE_TO_COME;
        assert!(!Op::Msg(msg).expects_reply());
        let ins = Op::Insert(InsertOp {
            header: msg_header(OpCode::Insert, 1, 0),
            flags: 0,
            full_collection_name: "t.c".into(),
            documents: vec![],
        });
        assert!(!ins.expects_reply());
    }

    #[test]
    fn reply_cursor_id_prefers_legacy_field() {
        let reply = ReplyOp::new(
            msg_header(OpCode::Reply, 1, 1),
            0,
            vec![doc! { "cursor": { "id": 77_i64, "firstBatch": [] }, "ok": 1 }],
        );
        let reply = Op::Reply(reply).into_reply().unwrap();
        assert_eq!(reply.cursor_id().unwrap(), 77);
    }

    #[test]
    fn abbreviated_is_bounded() {
        let op = Op::Query(QueryOp {
            header: msg_header(OpCode::Query, 1, 0),
            flags: 0,
            full_collection_name: "test.$cmd".into(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "find": "averyveryverylongcollectionname", "filter": { "a": 1 } },
            return_fields_selector: None,
        });
        let s = op.abbreviated(20);
        assert_eq!(s.chars().count(), 20);
        assert!(s.starts_with("command test find"));
    }
}
