use bson::doc;

use crate::buffer::{put_i32, put_i64, BodyReader};
use crate::cursor::{CursorBearing, CursorIds};
use crate::error::WireError;
use crate::header::{MsgHeader, OpCode};
use crate::meta::OpMetadata;

/// Legacy OP_KILL_CURSORS:
/// `ZERO i32 | numberOfCursorIDs i32 | cursorIDs i64...`.
#[derive(Clone, Debug, PartialEq)]
pub struct KillCursorsOp {
    /// Frame header.
    pub header: MsgHeader,
    /// Cursors to close.
    pub cursor_ids: Vec<i64>,
}

impl KillCursorsOp {
    pub(crate) fn decode(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<Self, WireError> {
        let _zero = r.read_i32("ZERO")?;
        let count = r.read_i32("numberOfCursorIDs")?;
        if count < 0 || count as usize * 8 > r.remaining() {
            return Err(WireError::Malformed {
                detail: format!(
                    "killcursors declares {count} ids but only {} bytes remain",
                    r.remaining()
                ),
            });
        }
        let mut cursor_ids = Vec::with_capacity(count as usize);
        for _ in 0..count {
            cursor_ids.push(r.read_i64("cursorIDs")?);
        }
        r.finish(OpCode::KillCursors.as_i32())?;
        Ok(Self { header, cursor_ids })
    }

    pub(crate) fn encode_body(&self, buf: &mut Vec<u8>) -> Result<(), WireError> {
        put_i32(buf, 0);
        put_i32(buf, self.cursor_ids.len() as i32);
        for id in &self.cursor_ids {
            put_i64(buf, *id);
        }
        Ok(())
    }

    /// Telemetry summary.
    pub fn meta(&self) -> OpMetadata {
        OpMetadata::new("killcursors", "", "").with_data(doc! { "cursors": self.cursor_ids.clone() })
    }
}

impl CursorBearing for KillCursorsOp {
    fn cursor_ids(&self) -> Result<CursorIds, WireError> {
        Ok(self.cursor_ids.iter().copied().collect())
    }

    fn set_cursor_ids(&mut self, ids: &[i64]) -> Result<(), WireError> {
        self.cursor_ids = ids.to_vec();
        Ok(())
    }
}
