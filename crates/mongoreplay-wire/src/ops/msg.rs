use std::time::Duration;

use bson::Document;

use super::command::{command_cursor_ids, set_command_cursor_ids};
use crate::buffer::{put_cstring, put_document, put_i32, put_u32, BodyReader};
use crate::cursor::{
    batch_len_from_reply, errors_from_reply, CursorBearing, CursorIds, LazyCursorId, Replyable,
};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::OpMetadata;

/// Flag bit: a CRC-32C checksum trails the sections.
pub const CHECKSUM_PRESENT: u32 = 1;
/// Flag bit: the sender will not wait for a reply.
pub const MORE_TO_COME: u32 = 1 << 1;
/// Flag bit: the client accepts exhaust replies.
pub const EXHAUST_ALLOWED: u32 = 1 << 16;

const KIND_BODY: u8 = 0;
const KIND_SEQUENCE: u8 = 1;

/// One payload chunk of an OP_MSG.
#[derive(Clone, Debug, PartialEq)]
pub enum Section {
    /// Payload type 0: exactly one document.
    Body(Document),
    /// Payload type 1: a named document sequence.
    Sequence {
        /// Sequence identifier, e.g. `"documents"` for inserts.
        identifier: String,
        /// Documents in the sequence.
        documents: Vec<Document>,
    },
}

/// OP_MSG request: `flagBits u32 | sections... | [checksum u32]`.
#[derive(Clone, Debug, PartialEq)]
pub struct MsgOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Flag bits; see [`CHECKSUM_PRESENT`] and [`MORE_TO_COME`].
    pub flag_bits: u32,
    /// Sections in wire order.
    pub sections: Vec<Section>,
    /// Trailing checksum when [`CHECKSUM_PRESENT`] is set.
    pub checksum: Option<u32>,
}

impl MsgOp {
    /// Build a request with a single body section.
    pub fn new(header: MsgHeader, body: Document) -> Self {
        Self {
            header,
            flag_bits: 0,
            sections: vec![Section::Body(body)],
            checksum: None,
        }
    }

    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let flag_bits = r.read_u32("flagBits")?;
        let has_checksum = flag_bits & CHECKSUM_PRESENT != 0;
        let frame_end = r.position() + r.remaining();
        let sections_end = if has_checksum {
            frame_end.checked_sub(4).ok_or(WireError::Truncated {
                field: "checksum",
                needed: 4,
                remaining: r.remaining(),
            })?
        } else {
            frame_end
        };

        let mut sections = Vec::new();
        while r.position() < sections_end {
            let kind = r.read_u8("section kind")?;
            match kind {
                KIND_BODY => {
                    let doc = r.read_document("section body")?;
                    if r.position() > sections_end {
                        return Err(WireError::Malformed {
                            detail: "body section overruns checksum".into(),
                        });
                    }
                    sections.push(Section::Body(doc));
                }
                KIND_SEQUENCE => {
                    let start = r.position();
                    let size = r.read_i32("section size")?;
                    if size < 5 {
                        return Err(WireError::Malformed {
                            detail: format!("document sequence declares size {size}"),
                        });
                    }
                    let end = start + size as usize;
                    if end > sections_end {
                        return Err(WireError::Malformed {
                            detail: format!(
                                "document sequence of {size} bytes overruns the message"
                            ),
                        });
                    }
                    let identifier = r.read_cstring("sequence identifier")?;
                    if r.position() > end {
                        return Err(WireError::Malformed {
                            detail: "sequence identifier overruns its section".into(),
                        });
                    }
                    let documents = r.read_documents_until(end, "sequence documents")?;
                    sections.push(Section::Sequence {
                        identifier,
                        documents,
                    });
                }
                other => {
                    return Err(WireError::Malformed {
                        detail: format!("unknown section kind {other}"),
                    })
                }
            }
        }

        let checksum = if has_checksum {
            Some(r.read_u32("checksum")?)
        } else {
            None
        };
        r.finish(OpCode::Msg.as_i32())?;
        Ok(Self {
            header,
            flag_bits,
            sections,
            checksum,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_u32(buf, self.flag_bits);
        for section in &self.sections {
            match section {
                Section::Body(doc) => {
                    buf.push(KIND_BODY);
                    put_document(buf, doc)?;
                }
                Section::Sequence {
                    identifier,
                    documents,
                } => {
                    buf.push(KIND_SEQUENCE);
                    let size_at = buf.len();
                    put_i32(buf, 0);
                    put_cstring(buf, identifier);
                    for doc in documents {
                        put_document(buf, doc)?;
                    }
                    let size = (buf.len() - size_at) as i32;
                    buf[size_at..size_at + 4].copy_from_slice(&size.to_le_bytes());
                }
            }
        }
        if let Some(sum) = self.checksum {
            put_u32(buf, sum);
        }
        Ok(())
    }

    /// The payload-type-0 document.
    pub fn body(&self) -> Option<&Document> {
        self.sections.iter().find_map(|s| match s {
            Section::Body(doc) => Some(doc),
            Section::Sequence { .. } => None,
        })
    }

    fn body_mut(&mut self) -> Option<&mut Document> {
        self.sections.iter_mut().find_map(|s| match s {
            Section::Body(doc) => Some(doc),
            Section::Sequence { .. } => None,
        })
    }

    /// Command name: the first key of the body document.
    pub fn command_name(&self) -> Option<&str> {
        self.body()?.keys().next().map(String::as_str)
    }

    /// Target database from the `$db` field.
    pub fn database(&self) -> Option<&str> {
        self.body()?.get_str("$db").ok()
    }

    /// Whether the sender expects no reply.
    pub fn more_to_come(&self) -> bool {
        self.flag_bits & MORE_TO_COME != 0
    }

    /// Whether this message references cursors.
    pub fn references_cursors(&self) -> bool {
        matches!(self.command_name(), Some("getMore" | "killCursors"))
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        let command = self.command_name().unwrap_or_default().to_owned();
        let db = self.database().unwrap_or_default();
        let collection = self
            .body()
            .and_then(|b| b.get_str(&command).ok())
            .or_else(|| self.body().and_then(|b| b.get_str("collection").ok()));
        let namespace = match collection {
            Some(coll) if !db.is_empty() => format!("{db}.{coll}"),
            _ => db.to_owned(),
        };
        let meta = OpMetadata::new("op_msg", namespace, command);
        match self.body() {
            Some(body) => meta.with_data(body.clone()),
            None => meta,
        }
    }
}

impl CursorBearing for MsgOp {
    fn cursor_ids(&self) -> Result<CursorIds, WireError> {
        let name = self.command_name().ok_or(WireError::NoCursor { kind: "op_msg" })?;
        let body = self.body().ok_or(WireError::NoCursor { kind: "op_msg" })?;
        command_cursor_ids(name, body)
    }

    fn set_cursor_ids(&mut self, ids: &[i64]) -> Result<(), WireError> {
        let name = self
            .command_name()
            .ok_or(WireError::NoCursor { kind: "op_msg" })?
            .to_owned();
        let body = self.body_mut().ok_or(WireError::NoCursor { kind: "op_msg" })?;
        set_command_cursor_ids(&name, body, ids)?;
        // The recorded checksum no longer covers the rewritten body.
        self.flag_bits &= !CHECKSUM_PRESENT;
        self.checksum = None;
        Ok(())
    }
}

/// OP_MSG sent by the server (`responseTo != 0`).
#[derive(Clone, Debug, PartialEq)]
pub struct MsgReplyOp {
    /// The decoded message.
    pub msg: MsgOp,
    /// Round-trip latency, set when read off a live socket.
    pub latency: Option<Duration>,
    cursor: LazyCursorId,
}

impl MsgReplyOp {
    /// Wrap a decoded message as a reply.
    pub fn new(msg: MsgOp) -> Self {
        Self {
            msg,
            latency: None,
            cursor: LazyCursorId::default(),
        }
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        let meta = OpMetadata::new("op_msg_reply", "", "");
        match self.msg.body() {
            Some(body) => meta.with_data(body.clone()),
            None => meta,
        }
    }
}

impl Replyable for MsgReplyOp {
    fn cursor_id(&self) -> Result<i64, WireError> {
        Ok(self.cursor.get_or_extract(self.msg.body()))
    }

    fn latency(&self) -> Option<Duration> {
        self.latency
    }

    fn num_returned(&self) -> usize {
        self.msg.body().map(batch_len_from_reply).unwrap_or(0)
    }

    fn errors(&self) -> Vec<String> {
        self.msg.body().map(errors_from_reply).unwrap_or_default()
    }
}
