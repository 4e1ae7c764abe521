//! Error types for the recording format.

use std::fmt;
use std::io;

use mongoreplay_wire::WireError;

/// Errors that can occur while writing, reading, or decoding a recording.
#[derive(Debug)]
pub enum RecordError {
    /// An I/O error occurred during read or write.
    Io(io::Error),
    /// A BSON document failed to decode or encode.
    Bson {
        /// Description from the BSON library.
        detail: String,
    },
    /// A recorded frame could not be parsed as an op.
    Wire(WireError),
    /// A required field is missing from a document.
    MissingField {
        /// Name of the field.
        field: &'static str,
    },
    /// A field holds a value of the wrong type or range.
    InvalidField {
        /// Name of the field.
        field: &'static str,
        /// Human-readable description of what went wrong.
        detail: String,
    },
    /// The file declares a format version this build does not read.
    UnsupportedVersion {
        /// The version found in the file.
        found: i32,
    },
    /// The stream ended inside a document.
    Truncated {
        /// Bytes the document declared.
        needed: usize,
        /// Bytes actually available.
        available: usize,
    },
    /// The recording holds no metadata document.
    Empty,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Bson { detail } => write!(f, "BSON error: {detail}"),
            Self::Wire(e) => write!(f, "recorded op: {e}"),
            Self::MissingField { field } => write!(f, "missing field `{field}`"),
            Self::InvalidField { field, detail } => {
                write!(f, "invalid field `{field}`: {detail}")
            }
            Self::UnsupportedVersion { found } => {
                write!(f, "unsupported recording version {found}")
            }
            Self::Truncated { needed, available } => write!(
                f,
                "recording truncated: document needs {needed} bytes, {available} available"
            ),
            Self::Empty => write!(f, "recording is empty"),
        }
    }
}

impl std::error::Error for RecordError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for RecordError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<WireError> for RecordError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<bson::de::Error> for RecordError {
    fn from(e: bson::de::Error) -> Self {
        Self::Bson {
            detail: e.to_string(),
        }
    }
}

impl From<bson::ser::Error> for RecordError {
    fn from(e: bson::ser::Error) -> Self {
        Self::Bson {
            detail: e.to_string(),
        }
    }
}
