use bson::Document;

use crate::buffer::{put_cstring, put_document, put_i32, BodyReader};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::OpMetadata;

/// Legacy OP_QUERY.
///
/// ```text
/// flags i32 | fullCollectionName cstring | numberToSkip i32 | numberToReturn i32
/// | query doc | [returnFieldsSelector doc]
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct QueryOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Query flag bits.
    pub flags: i32,
    /// `db.collection`, or `db.$cmd` for commands.
    pub full_collection_name: String,
    /// Documents to skip.
    pub number_to_skip: i32,
    /// Batch size hint.
    pub number_to_return: i32,
    /// Query or command document.
    pub query: Document,
    /// Optional projection.
    pub return_fields_selector: Option<Document>,
}

impl QueryOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let flags = r.read_i32("flags")?;
        let full_collection_name = r.read_cstring("fullCollectionName")?;
        let number_to_skip = r.read_i32("numberToSkip")?;
        let number_to_return = r.read_i32("numberToReturn")?;
        let query = r.read_document("query")?;
        let return_fields_selector = if r.is_empty() {
            None
        } else {
            Some(r.read_document("returnFieldsSelector")?)
        };
        r.finish(OpCode::Query.as_i32())?;
        Ok(Self {
            header,
            flags,
            full_collection_name,
            number_to_skip,
            number_to_return,
            query,
            return_fields_selector,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, self.flags);
        put_cstring(buf, &self.full_collection_name);
        put_i32(buf, self.number_to_skip);
        put_i32(buf, self.number_to_return);
        put_document(buf, &self.query)?;
        if let Some(sel) = &self.return_fields_selector {
            put_document(buf, sel)?;
        }
        Ok(())
    }

    /// Whether this query is a command run against `<db>.$cmd`.
    pub fn is_command(&self) -> bool {
        self.full_collection_name.ends_with(".$cmd")
    }

    /// The command document, unwrapping the `$query` / `query` envelope
    /// older drivers add when read preferences are attached.
    pub fn command_document(&self) -> &Document {
        ["$query", "query"]
            .iter()
            .find_map(|k| self.query.get_document(k).ok())
            .unwrap_or(&self.query)
    }

    /// Command name for `$cmd` queries.
    pub fn command_name(&self) -> Option<&str> {
        if !self.is_command() {
            return None;
        }
        self.command_document().keys().next().map(String::as_str)
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        match self.command_name() {
            Some(name) => OpMetadata::new(
                "command",
                super::database_of(&self.full_collection_name),
                name,
            )
            .with_data(self.command_document().clone()),
            None => OpMetadata::new("query", self.full_collection_name.clone(), "")
                .with_data(self.query.clone()),
        }
    }
}
