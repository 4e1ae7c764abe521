//! Error types for packet capture.

use std::fmt;
use std::io;

use mongoreplay_record::RecordError;

/// Errors that can occur while capturing or recording traffic.
#[derive(Debug)]
pub enum CaptureError {
    /// The packet capture library reported an error.
    Pcap(pcap::Error),
    /// An I/O error occurred.
    Io(io::Error),
    /// Writing the recording failed.
    Record(RecordError),
    /// The capture handle uses a link layer that cannot be decoded.
    UnsupportedLinkType {
        /// Raw DLT value.
        linktype: i32,
    },
    /// The capture configuration is invalid.
    InvalidConfig {
        /// Description of which setting is wrong.
        reason: String,
    },
    /// The termination-signal handler could not be installed.
    Signal {
        /// Description from the signal library.
        detail: String,
    },
    /// Packets were lost; the recording is complete but has gaps.
    PacketsDropped {
        /// Packets dropped by the kernel buffer.
        dropped: u32,
        /// Packets dropped by the interface or driver.
        if_dropped: u32,
    },
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pcap(e) => write!(f, "pcap: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Record(e) => write!(f, "recording: {e}"),
            Self::UnsupportedLinkType { linktype } => {
                write!(f, "unsupported link type {linktype}")
            }
            Self::InvalidConfig { reason } => write!(f, "invalid capture config: {reason}"),
            Self::Signal { detail } => write!(f, "cannot install signal handler: {detail}"),
            Self::PacketsDropped {
                dropped,
                if_dropped,
            } => write!(
                f,
                "{dropped} packets dropped by the kernel and {if_dropped} by the interface; \
                 the recording is incomplete"
            ),
        }
    }
}

impl std::error::Error for CaptureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Pcap(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Record(e) => Some(e),
            _ => None,
        }
    }
}

impl From<pcap::Error> for CaptureError {
    fn from(e: pcap::Error) -> Self {
        Self::Pcap(e)
    }
}

impl From<io::Error> for CaptureError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<RecordError> for CaptureError {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}
