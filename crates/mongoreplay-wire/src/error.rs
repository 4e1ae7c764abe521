//! Error types for the wire codec.

use std::fmt;
use std::io;

/// Errors that can occur while decoding, encoding, or executing an op.
#[derive(Debug)]
pub enum WireError {
    /// An I/O error occurred on the underlying stream.
    Io(io::Error),
    /// The 16-byte header failed the sanity bounds.
    InvalidHeader {
        /// Declared message length.
        message_length: i32,
        /// Raw op code value.
        op_code: i32,
    },
    /// The op code is not one mongoreplay understands.
    UnknownOpCode {
        /// The unrecognized op code.
        op_code: i32,
    },
    /// The body ended before a field could be read.
    Truncated {
        /// Which field was being read.
        field: &'static str,
        /// Bytes needed.
        needed: usize,
        /// Bytes remaining in the frame.
        remaining: usize,
    },
    /// The body is structurally invalid.
    Malformed {
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// Bytes were left over after the last field of a fixed-layout op.
    TrailingBytes {
        /// Op code of the frame.
        op_code: i32,
        /// Unconsumed byte count.
        remaining: usize,
    },
    /// A BSON document failed to decode or encode.
    Bson {
        /// Description from the BSON library.
        detail: String,
    },
    /// An OP_COMPRESSED frame used a compressor that is not supported.
    UnsupportedCompressor {
        /// Compressor id from the frame.
        id: u8,
    },
    /// The op does not carry the cursor information that was requested.
    NoCursor {
        /// Op kind that was asked for a cursor.
        kind: &'static str,
    },
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::InvalidHeader {
                message_length,
                op_code,
            } => write!(
                f,
                "header does not look real (length {message_length}, op code {op_code})"
            ),
            Self::UnknownOpCode { op_code } => write!(f, "unknown op code {op_code}"),
            Self::Truncated {
                field,
                needed,
                remaining,
            } => write!(
                f,
                "truncated frame reading {field}: need {needed} bytes, {remaining} remaining"
            ),
            Self::Malformed { detail } => write!(f, "malformed op: {detail}"),
            Self::TrailingBytes { op_code, remaining } => {
                write!(f, "{remaining} trailing bytes after op code {op_code}")
            }
            Self::Bson { detail } => write!(f, "BSON error: {detail}"),
            Self::UnsupportedCompressor { id } => write!(f, "unsupported compressor id {id}"),
            Self::NoCursor { kind } => write!(f, "{kind} carries no cursor id"),
        }
    }
}

impl std::error::Error for WireError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WireError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bson::de::Error> for WireError {
    fn from(e: bson::de::Error) -> Self {
        Self::Bson {
            detail: e.to_string(),
        }
    }
}

impl From<bson::ser::Error> for WireError {
    fn from(e: bson::ser::Error) -> Self {
        Self::Bson {
            detail: e.to_string(),
        }
    }
}
