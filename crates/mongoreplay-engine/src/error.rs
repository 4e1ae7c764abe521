//! Error types for replay.

use std::fmt;
use std::io;

use mongoreplay_record::RecordError;
use mongoreplay_wire::WireError;

use crate::config::ConfigError;

/// Errors that abort a replay run.
///
/// Per-op and per-connection failures do not surface here; they are
/// counted in the [`PlaybackReport`](crate::PlaybackReport).
#[derive(Debug)]
pub enum ReplayError {
    /// The playback configuration is invalid.
    Config(ConfigError),
    /// The recording could not be read.
    Record(RecordError),
    /// An op could not be decoded or encoded.
    Wire(WireError),
    /// An I/O error occurred.
    Io(io::Error),
    /// A background thread could not be spawned.
    ThreadSpawnFailed {
        /// Which thread failed.
        reason: String,
    },
    /// A connection worker panicked.
    WorkerPanicked {
        /// Recorded connection number of the worker.
        connection: i64,
    },
}

impl fmt::Display for ReplayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration: {e}"),
            Self::Record(e) => write!(f, "recording: {e}"),
            Self::Wire(e) => write!(f, "wire: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ThreadSpawnFailed { reason } => write!(f, "thread spawn failed: {reason}"),
            Self::WorkerPanicked { connection } => {
                write!(f, "worker for connection {connection} panicked")
            }
        }
    }
}

impl std::error::Error for ReplayError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Record(e) => Some(e),
            Self::Wire(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for ReplayError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<RecordError> for ReplayError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

impl From<WireError> for ReplayError {
    fn from(e: WireError) -> Self {
        Self::Wire(e)
    }
}

impl From<io::Error> for ReplayError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}
