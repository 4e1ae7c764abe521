use std::time::Duration;

use bson::Document;

use crate::buffer::{put_document, put_i32, put_i64, BodyReader};
use crate::cursor::{errors_from_reply, LazyCursorId, Replyable};
use crate::error::WireError;
use crate::header::MsgHeader;
use crate::meta::OpMetadata;

/// Legacy OP_REPLY:
/// `responseFlags i32 | cursorID i64 | startingFrom i32 | numberReturned i32 | documents...`.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Response flag bits (bit 0: CursorNotFound, bit 1: QueryFailure).
    pub flags: i32,
    /// Cursor id for legacy queries; 0 for command replies.
    pub cursor_id: i64,
    /// Position of the first returned document in the cursor.
    pub starting_from: i32,
    /// Declared document count.
    pub number_returned: i32,
    /// Returned documents; runs to the end of the frame.
    pub documents: Vec<Document>,
    /// Round-trip latency, set when read off a live socket.
    pub latency: Option<Duration>,
    cursor: LazyCursorId,
}

/// `CursorNotFound` response flag.
const CURSOR_NOT_FOUND: i32 = 1;
/// `QueryFailure` response flag.
const QUERY_FAILURE: i32 = 1 << 1;

impl ReplyOp {
    /// Build a reply from its parts.
    pub fn new(header: MsgHeader, cursor_id: i64, documents: Vec<Document>) -> Self {
        Self {
            header,
            flags: 0,
            cursor_id,
            starting_from: 0,
            number_returned: documents.len() as i32,
            documents,
            latency: None,
            cursor: LazyCursorId::default(),
        }
    }

    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let flags = r.read_i32("responseFlags")?;
        let cursor_id = r.read_i64("cursorID")?;
        let starting_from = r.read_i32("startingFrom")?;
        let number_returned = r.read_i32("numberReturned")?;
        let end = r.position() + r.remaining();
        let documents = r.read_documents_until(end, "documents")?;
        Ok(Self {
            header,
            flags,
            cursor_id,
            starting_from,
            number_returned,
            documents,
            latency: None,
            cursor: LazyCursorId::default(),
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, self.flags);
        put_i64(buf, self.cursor_id);
        put_i32(buf, self.starting_from);
        put_i32(buf, self.number_returned);
        for doc in &self.documents {
            put_document(buf, doc)?;
        }
        Ok(())
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        let meta = OpMetadata::new("reply", "", "");
        match self.documents.first() {
            Some(doc) => meta.with_data(doc.clone()),
            None => meta,
        }
    }
}

impl Replyable for ReplyOp {
    /// The legacy `cursorID` field when set, otherwise the `cursor.id` of
    /// a command reply carried as the first document.
    fn cursor_id(&self) -> Result<i64, WireError> {
        if self.cursor_id != 0 {
            return Ok(self.cursor_id);
        }
        Ok(self.cursor.get_or_extract(self.documents.first()))
    }

    fn latency(&self) -> Option<Duration> {
        self.latency
    }

    fn num_returned(&self) -> usize {
        match self.documents.first() {
            Some(doc) if self.cursor_id == 0 && doc.contains_key("cursor") => {
                crate::cursor::batch_len_from_reply(doc)
            }
            _ => self.documents.len(),
        }
    }

    fn errors(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.flags & CURSOR_NOT_FOUND != 0 {
            errors.push("cursor not found".to_owned());
        }
        if self.flags & QUERY_FAILURE != 0 || self.cursor_id == 0 {
            if let Some(doc) = self.documents.first() {
                errors.extend(errors_from_reply(doc));
            }
        }
        errors
    }
}
