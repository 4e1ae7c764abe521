use std::time::Duration;

use bson::{Bson, Document};

use crate::buffer::{put_cstring, put_document, BodyReader};
use crate::cursor::{
    batch_len_from_reply, bson_as_i64, errors_from_reply, CursorBearing, CursorIds, LazyCursorId,
    Replyable,
};
use crate::error::WireError;
use crate::header::MsgHeader;
use crate::meta::OpMetadata;

/// Cluster-internal OP_COMMAND:
/// `database cstring | commandName cstring | metadata doc | commandArgs doc | inputDocs...`.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Database the command runs against.
    pub database: String,
    /// Command name.
    pub command_name: String,
    /// Routing metadata.
    pub metadata: Document,
    /// Command body.
    pub command_args: Document,
    /// Trailing input documents.
    pub input_docs: Vec<Document>,
}

impl CommandOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let database = r.read_cstring("database")?;
        let command_name = r.read_cstring("commandName")?;
        let metadata = r.read_document("metadata")?;
        let command_args = r.read_document("commandArgs")?;
        let end = r.position() + r.remaining();
        let input_docs = r.read_documents_until(end, "inputDocs")?;
        Ok(Self {
            header,
            database,
            command_name,
            metadata,
            command_args,
            input_docs,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_cstring(buf, &self.database);
        put_cstring(buf, &self.command_name);
        put_document(buf, &self.metadata)?;
        put_document(buf, &self.command_args)?;
        for doc in &self.input_docs {
            put_document(buf, doc)?;
        }
        Ok(())
    }

    /// Whether this command references cursors.
    pub fn references_cursors(&self) -> bool {
        matches!(self.command_name.as_str(), "getMore" | "killCursors")
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        OpMetadata::new("op_command", self.database.clone(), self.command_name.clone())
            .with_data(self.command_args.clone())
    }
}

impl CursorBearing for CommandOp {
    fn cursor_ids(&self) -> Result<CursorIds, WireError> {
        command_cursor_ids(&self.command_name, &self.command_args)
    }

    fn set_cursor_ids(&mut self, ids: &[i64]) -> Result<(), WireError> {
        set_command_cursor_ids(&self.command_name, &mut self.command_args, ids)
    }
}

/// Cursor ids referenced by a `getMore` or `killCursors` command body.
pub(crate) fn command_cursor_ids(name: &str, body: &Document) -> Result<CursorIds, WireError> {
    match name {
        "getMore" => {
            let id = body
                .get("getMore")
                .and_then(bson_as_i64)
                .ok_or(WireError::NoCursor { kind: "getMore" })?;
            Ok(smallvec::smallvec![id])
        }
        "killCursors" => {
            let cursors = body
                .get_array("cursors")
                .map_err(|_| WireError::NoCursor { kind: "killCursors" })?;
            Ok(cursors.iter().filter_map(bson_as_i64).collect())
        }
        _ => Err(WireError::NoCursor { kind: "command" }),
    }
}

/// Rewrite the cursor ids in a `getMore` or `killCursors` command body.
pub(crate) fn set_command_cursor_ids(
    name: &str,
    body: &mut Document,
    ids: &[i64],
) -> Result<(), WireError> {
    match name {
        "getMore" => {
            let id = ids.first().ok_or(WireError::Malformed {
                detail: "getMore requires exactly one cursor id".into(),
            })?;
            body.insert("getMore", Bson::Int64(*id));
            Ok(())
        }
        "killCursors" => {
            let arr: Vec<Bson> = ids.iter().map(|id| Bson::Int64(*id)).collect();
            body.insert("cursors", arr);
            Ok(())
        }
        _ => Err(WireError::NoCursor { kind: "command" }),
    }
}

/// Reply to OP_COMMAND: `metadata doc | commandReply doc | outputDocs...`.
#[derive(Clone, Debug, PartialEq)]
pub struct CommandReplyOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Routing metadata.
    pub metadata: Document,
    /// Command result.
    pub command_reply: Document,
    /// Trailing output documents.
    pub output_docs: Vec<Document>,
    /// Round-trip latency, set when read off a live socket.
    pub latency: Option<Duration>,
    cursor: LazyCursorId,
}

impl CommandReplyOp {
    /// Build a reply from its parts.
    pub fn new(header: MsgHeader, metadata: Document, command_reply: Document) -> Self {
        Self {
            header,
            metadata,
            command_reply,
            output_docs: Vec::new(),
            latency: None,
            cursor: LazyCursorId::default(),
        }
    }

    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let metadata = r.read_document("metadata")?;
        let command_reply = r.read_document("commandReply")?;
        let end = r.position() + r.remaining();
        let output_docs = r.read_documents_until(end, "outputDocs")?;
        Ok(Self {
            header,
            metadata,
            command_reply,
            output_docs,
            latency: None,
            cursor: LazyCursorId::default(),
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_document(buf, &self.metadata)?;
        put_document(buf, &self.command_reply)?;
        for doc in &self.output_docs {
            put_document(buf, doc)?;
        }
        Ok(())
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        OpMetadata::new("op_command_reply", "", "").with_data(self.command_reply.clone())
    }
}

impl Replyable for CommandReplyOp {
    fn cursor_id(&self) -> Result<i64, WireError> {
        Ok(self.cursor.get_or_extract(Some(&self.command_reply)))
    }

    fn latency(&self) -> Option<Duration> {
        self.latency
    }

    fn num_returned(&self) -> usize {
        batch_len_from_reply(&self.command_reply).max(self.output_docs.len())
    }

    fn errors(&self) -> Vec<String> {
        errors_from_reply(&self.command_reply)
    }
}
