use bson::{doc, Document};

use crate::buffer::{put_cstring, put_document, put_i32, BodyReader};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::OpMetadata;

/// Legacy OP_UPDATE:
/// `ZERO i32 | fullCollectionName cstring | flags i32 | selector doc | update doc`.
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Target namespace.
    pub full_collection_name: String,
    /// Update flag bits (bit 0: Upsert, bit 1: MultiUpdate).
    pub flags: i32,
    /// Documents to match.
    pub selector: Document,
    /// Update document.
    pub update: Document,
}

impl UpdateOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let _zero = r.read_i32("ZERO")?;
        let full_collection_name = r.read_cstring("fullCollectionName")?;
        let flags = r.read_i32("flags")?;
        let selector = r.read_document("selector")?;
        let update = r.read_document("update")?;
        r.finish(OpCode::Update.as_i32())?;
        Ok(Self {
            header,
            full_collection_name,
            flags,
            selector,
            update,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, 0);
        put_cstring(buf, &self.full_collection_name);
        put_i32(buf, self.flags);
        put_document(buf, &self.selector)?;
        put_document(buf, &self.update)?;
        Ok(())
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        OpMetadata::new("update", self.full_collection_name.clone(), "").with_data(doc! {
            "q": self.selector.clone(),
            "u": self.update.clone(),
        })
    }
}
