use bson::doc;

use crate::buffer::{put_cstring, put_i32, put_i64, BodyReader};
use crate::cursor::{CursorBearing, CursorIds};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::OpMetadata;

/// Legacy OP_GET_MORE:
/// `ZERO i32 | fullCollectionName cstring | numberToReturn i32 | cursorID i64`.
#[derive(Clone, Debug, PartialEq)]
pub struct GetMoreOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Namespace the cursor iterates.
    pub full_collection_name: String,
    /// Batch size hint.
    pub number_to_return: i32,
    /// Cursor to continue.
    pub cursor_id: i64,
}

impl GetMoreOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let _zero = r.read_i32("ZERO")?;
        let full_collection_name = r.read_cstring("fullCollectionName")?;
        let number_to_return = r.read_i32("numberToReturn")?;
        let cursor_id = r.read_i64("cursorID")?;
        r.finish(OpCode::GetMore.as_i32())?;
        Ok(Self {
            header,
            full_collection_name,
            number_to_return,
            cursor_id,
        })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, 0);
        put_cstring(buf, &self.full_collection_name);
        put_i32(buf, self.number_to_return);
        put_i64(buf, self.cursor_id);
        Ok(())
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        OpMetadata::new("getmore", self.full_collection_name.clone(), "")
            .with_data(doc! { "cursorId": self.cursor_id })
    }
}

impl CursorBearing for GetMoreOp {
    fn cursor_ids(&self) -> Result<CursorIds, WireError> {
        Ok(smallvec::smallvec![self.cursor_id])
    }

    fn set_cursor_ids(&mut self, ids: &[i64]) -> Result<(), WireError> {
        let id = ids.first().ok_or(WireError::Malformed {
            detail: "getmore requires exactly one cursor id".into(),
        })?;
        self.cursor_id = *id;
        Ok(())
    }
}
