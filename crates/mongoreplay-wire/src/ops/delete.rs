use bson::Document;

use crate::buffer::{put_cstring, put_document, put_i32, BodyReader};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::OpMetadata;

/// Legacy OP_DELETE:
/// `ZERO i32 | fullCollectionName cstring | flags i32 | selector doc`.
#[derive(Clone, Debug, PartialEq)]
pub struct DeleteOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Target namespace.
    pub full_collection_name: String,
    /// Delete flag bits (bit 0: SingleRemove).
    pub flags: i32,
    /// Documents to remove.
    pub selector: Document,
}

impl DeleteOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let _zero = r.read_i32("ZERO")?;
        let full_collection_name = r.read_cstring("fullCollectionName")?;
        let flags = r.read_i32("flags")?;
        let selector = r.read_document("selector")?;
        r.finish(OpCode::Delete.as_i32())?;
        Ok(Self {
            header,
            full_collection_name,
            flags,
            selector,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, 0);
        put_cstring(buf, &self.full_collection_name);
        put_i32(buf, self.flags);
        put_document(buf, &self.selector)
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        OpMetadata::new("remove", self.full_collection_name.clone(), "")
            .with_data(self.selector.clone())
    }
}
