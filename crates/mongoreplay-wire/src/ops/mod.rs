//! Per-variant op layouts.
//!
//! Each op type decodes from a [`BodyReader`](crate::buffer::BodyReader)
//! positioned just past a validated header and encodes its body back to
//! bytes. The frame header is written by [`Op::encode`](crate::Op::encode).

mod command;
mod compressed;
mod delete;
mod get_more;
mod insert;
mod kill_cursors;
mod msg;
mod query;
mod reply;
mod update;

pub use command::{CommandOp, CommandReplyOp};
pub use compressed::{decompress, CompressorId};
pub use delete::DeleteOp;
pub use get_more::GetMoreOp;
pub use insert::InsertOp;
pub use kill_cursors::KillCursorsOp;
pub use msg::{MsgOp, MsgReplyOp, Section, CHECKSUM_PRESENT, EXHAUST_ALLOWED, MORE_TO_COME};
pub use query::QueryOp;
pub use reply::ReplyOp;
pub use update::UpdateOp;

/// Split `db.collection` into its database part.
pub(crate) fn database_of(namespace: &str) -> &str {
    namespace.split_once('.').map(|(db, _)| db).unwrap_or(namespace)
}
