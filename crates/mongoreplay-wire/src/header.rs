//! The 16-byte message header and the op code set.

use std::fmt;
use std::io::Write;

use crate::error::WireError;
use crate::{HEADER_LEN, MAX_MESSAGE_SIZE, MIN_MESSAGE_SIZE};

/// Op codes mongoreplay recognizes.
///
/// Frames carrying any other op code are treated as desynchronised
/// stream data by [`MsgHeader::looks_real`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(i32)]
pub enum OpCode {
    /// Legacy reply to OP_QUERY / OP_GET_MORE.
    Reply = 1,
    /// Legacy update.
    Update = 2001,
    /// Legacy insert.
    Insert = 2002,
    /// Legacy query, also used for commands on `<db>.$cmd`.
    Query = 2004,
    /// Legacy cursor continuation.
    GetMore = 2005,
    /// Legacy delete.
    Delete = 2006,
    /// Legacy cursor kill.
    KillCursors = 2007,
    /// Cluster-internal command request.
    Command = 2010,
    /// Reply to [`OpCode::Command`].
    CommandReply = 2011,
    /// Compressed wrapper around another op.
    Compressed = 2012,
    /// Extensible message format (3.6+).
    Msg = 2013,
}

impl OpCode {
    /// Map a raw wire value onto a known op code.
    pub fn from_i32(v: i32) -> Option<Self> {
        Some(match v {
            1 => Self::Reply,
            2001 => Self::Update,
            2002 => Self::Insert,
            2004 => Self::Query,
            2005 => Self::GetMore,
            2006 => Self::Delete,
            2007 => Self::KillCursors,
            2010 => Self::Command,
            2011 => Self::CommandReply,
            2012 => Self::Compressed,
            2013 => Self::Msg,
            _ => return None,
        })
    }

    /// Raw wire value.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Short lowercase name used in logs and stats.
    pub fn name(self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Update => "update",
            Self::Insert => "insert",
            Self::Query => "query",
            Self::GetMore => "getmore",
            Self::Delete => "delete",
            Self::KillCursors => "killcursors",
            Self::Command => "op_command",
            Self::CommandReply => "op_command_reply",
            Self::Compressed => "op_compressed",
            Self::Msg => "op_msg",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Frame prefix shared by every wire message.
///
/// `op_code` is kept raw so that a header can be decoded before it is
/// known to be valid; use [`MsgHeader::op_code`] for the typed value.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub struct MsgHeader {
    /// Total frame size including this header.
    pub message_length: i32,
    /// Sender-assigned identifier for this message.
    pub request_id: i32,
    /// `request_id` of the request this message answers, or 0.
    pub response_to: i32,
    /// Raw op code.
    pub raw_op_code: i32,
}

impl MsgHeader {
    /// Build a header for a known op code.
    pub fn new(op_code: OpCode, request_id: i32, response_to: i32) -> Self {
        Self {
            message_length: 0,
            request_id,
            response_to,
            raw_op_code: op_code.as_i32(),
        }
    }

    /// Decode a header from the first 16 bytes of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::Truncated {
                field: "header",
                needed: HEADER_LEN,
                remaining: bytes.len(),
            });
        }
        let word = |i: usize| i32::from_le_bytes([bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]);
        Ok(Self {
            message_length: word(0),
            request_id: word(4),
            response_to: word(8),
            raw_op_code: word(12),
        })
    }

    /// Encode to the 16-byte wire form.
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.message_length.to_le_bytes());
        out[4..8].copy_from_slice(&self.request_id.to_le_bytes());
        out[8..12].copy_from_slice(&self.response_to.to_le_bytes());
        out[12..16].copy_from_slice(&self.raw_op_code.to_le_bytes());
        out
    }

    /// Write the 16-byte wire form.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<(), WireError> {
        w.write_all(&self.to_bytes())?;
        Ok(())
    }

    /// Typed op code, if known.
    pub fn op_code(&self) -> Option<OpCode> {
        OpCode::from_i32(self.raw_op_code)
    }

    /// Body length implied by `message_length`.
    pub fn body_len(&self) -> usize {
        (self.message_length as usize).saturating_sub(HEADER_LEN)
    }

    /// Whether this header could plausibly begin a real frame.
    ///
    /// A frame must be between [`MIN_MESSAGE_SIZE`] and
    /// [`MAX_MESSAGE_SIZE`] bytes, carry non-negative ids, and use a known
    /// op code. Anything else means the byte stream is out of sync.
    pub fn looks_real(&self) -> bool {
        if self.message_length < MIN_MESSAGE_SIZE || self.message_length > MAX_MESSAGE_SIZE {
            return false;
        }
        if self.request_id < 0 || self.response_to < 0 {
            return false;
        }
        self.op_code().is_some()
    }
}
