//! Error types for filtering.

use std::fmt;
use std::io;
use std::path::PathBuf;

use mongoreplay_record::RecordError;

use crate::config::FilterConfigError;

/// Errors that abort a filter run.
#[derive(Debug)]
pub enum FilterError {
    /// The filter configuration is invalid.
    Config(FilterConfigError),
    /// Reading the input or writing an output failed.
    Record(RecordError),
    /// An I/O error occurred.
    Io(io::Error),
    /// A writer thread could not be spawned.
    ThreadSpawnFailed {
        /// Which thread failed.
        reason: String,
    },
    /// A writer thread panicked.
    WriterPanicked {
        /// Output the writer owned.
        path: PathBuf,
    },
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration: {e}"),
            Self::Record(e) => write!(f, "recording: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
            Self::WriterPanicked { path } => {
                write!(f, "writer for {} panicked", path.display())
            }
        }
    }
}

impl std::error::Error for FilterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Record(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FilterConfigError> for FilterError {
    fn from(e: FilterConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<RecordError> for FilterError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

impl From<io::Error> for FilterError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
