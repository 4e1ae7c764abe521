use bson::Document;

use crate::buffer::{put_cstring, put_document, put_i32, BodyReader};
use crate::error::WireError;
use crate::header::MsgHeader;
use crate::meta::OpMetadata;

/// Legacy OP_INSERT: `flags i32 | fullCollectionName cstring | documents...`.
#[derive(Clone, Debug, PartialEq)]
pub struct InsertOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Insert flag bits (bit 0: ContinueOnError).
    pub flags: i32,
    /// Target namespace.
    pub full_collection_name: String,
    /// Documents to insert; runs to the end of the frame.
    pub documents: Vec<Document>,
}

impl InsertOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let flags = r.read_i32("flags")?;
        let full_collection_name = r.read_cstring("fullCollectionName")?;
        let end = r.position() + r.remaining();
        let documents = r.read_documents_until(end, "documents")?;
        Ok(Self {
            header,
            flags,
            full_collection_name,
            documents,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, self.flags);
        put_cstring(buf, &self.full_collection_name);
        for doc in &self.documents {
            put_document(buf, doc)?;
        }
        Ok(())
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        let meta = OpMetadata::new("insert", self.full_collection_name.clone(), "");
        match self.documents.first() {
            Some(doc) => meta.with_data(doc.clone()),
            None => meta,
        }
    }
}
