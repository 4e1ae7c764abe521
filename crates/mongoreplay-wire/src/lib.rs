//! MongoDB wire protocol op codec.
//!
//! This is the leaf crate of the mongoreplay workspace. It decodes and
//! encodes every message shape mongoreplay understands, exposes the
//! cursor capabilities the correlation layer needs, and executes a single
//! op against a live socket.
//!
//! # Architecture
//!
//! - [`MsgHeader`] is the 16-byte frame prefix; [`MsgHeader::looks_real`]
//!   is the desynchronisation check used by the stream demultiplexer
//! - [`RawOp`] is an undecoded frame; [`RawOp::parse`] yields an [`Op`]
//! - [`Op`] is the tagged variant over all op shapes
//! - [`CursorBearing`] and [`Replyable`] are the cursor capabilities
//! - [`execute`] sends an op and waits for its reply
//!
//! # Frame layout
//!
//! ```text
//! [messageLength i32][requestID i32][responseTo i32][opCode i32][body ...]
//! ```
//!
//! All integers are little-endian. `messageLength` includes the header.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod exec;
pub mod header;
pub mod meta;
pub mod op;
pub mod ops;

pub use cursor::{CursorBearing, CursorIds, Replyable};
pub use driver::{command_name, is_driver_op, DRIVER_COMMANDS};
pub use error::WireError;
pub use exec::{execute, read_raw_op};
pub use header::{MsgHeader, OpCode};
pub use meta::OpMetadata;
pub use op::{Op, RawOp, Reply};
pub use ops::{
    CommandOp, CommandReplyOp, CompressorId, DeleteOp, GetMoreOp, InsertOp, KillCursorsOp, MsgOp,
    MsgReplyOp, QueryOp, ReplyOp, Section, UpdateOp,
};

/// Largest message a server accepts, in bytes.
pub const MAX_MESSAGE_SIZE: i32 = 48_000_000;

/// Size of [`MsgHeader`] on the wire.
pub const HEADER_LEN: usize = 16;

/// Smallest frame that can be real traffic (an empty OP_KILL_CURSORS).
pub const MIN_MESSAGE_SIZE: i32 = 24;
