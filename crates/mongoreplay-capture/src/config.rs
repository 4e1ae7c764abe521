//! Capture configuration.

use std::path::PathBuf;

use crate::error::CaptureError;
use crate::reassembly::MAX_PENDING_BYTES;

/// Where packets come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureSource {
    /// Live capture on a network interface.
    Interface(String),
    /// A previously written pcap / pcapng file.
    File(PathBuf),
}

/// Settings for a capture session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Packet source.
    pub source: CaptureSource,
    /// BPF filter expression. Default: `"tcp"`.
    pub bpf_filter: Option<String>,
    /// Put the interface in promiscuous mode. Live only. Default: false.
    pub promisc: bool,
    /// Bytes captured per packet. Default: 65535.
    pub snaplen: i32,
    /// Kernel buffer size in bytes. Live only. Default: 16 MiB.
    pub buffer_size: i32,
    /// Read timeout in milliseconds; bounds how long a stop request waits
    /// on an idle interface. Default: 500.
    pub read_timeout_ms: i32,
    /// Out-of-order bytes buffered per direction before the gap is
    /// abandoned. Default: [`MAX_PENDING_BYTES`].
    pub max_pending_bytes: usize,
}

impl CaptureConfig {
    /// Defaults for reading `source`.
    pub fn new(source: CaptureSource) -> Self {
        Self {
            source,
            bpf_filter: None,
            promisc: false,
            snaplen: 65_535,
            buffer_size: 16 * 1024 * 1024,
            read_timeout_ms: 500,
            max_pending_bytes: MAX_PENDING_BYTES,
        }
    }

    /// The filter actually installed on the handle.
    pub fn effective_filter(&self) -> &str {
        match self.bpf_filter.as_deref() {
            Some(f) if !f.trim().is_empty() => f,
            _ => "tcp",
        }
    }

    /// Check settings before any handle is opened.
    pub fn validate(&self) -> Result<(), CaptureError> {
        if let CaptureSource::Interface(name) = &self.source {
            if name.is_empty() {
                return Err(CaptureError::InvalidConfig {
                    reason: "interface name is empty".into(),
                });
            }
        }
        if self.snaplen < 64 {
            return Err(CaptureError::InvalidConfig {
                reason: format!("snaplen {} is too small to hold TCP headers", self.snaplen),
            });
        }
        if self.buffer_size <= 0 {
            return Err(CaptureError::InvalidConfig {
                reason: format!("buffer_size must be positive, got {}", self.buffer_size),
            });
        }
        if self.read_timeout_ms <= 0 {
            return Err(CaptureError::InvalidConfig {
                reason: format!(
                    "read_timeout_ms must be positive, got {}",
                    self.read_timeout_ms
                ),
            });
        }
        if self.max_pending_bytes == 0 {
            return Err(CaptureError::InvalidConfig {
                reason: "max_pending_bytes must be at least 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = CaptureConfig::new(CaptureSource::Interface("lo".into()));
        cfg.validate().unwrap();
        assert_eq!(cfg.effective_filter(), "tcp");
    }

    #[test]
    fn blank_filter_falls_back_to_tcp() {
        let mut cfg = CaptureConfig::new(CaptureSource::File("x.pcap".into()));
        cfg.bpf_filter = Some("  ".into());
        assert_eq!(cfg.effective_filter(), "tcp");
        cfg.bpf_filter = Some("tcp port 27017".into());
        assert_eq!(cfg.effective_filter(), "tcp port 27017");
    }

    #[test]
    fn tiny_snaplen_is_rejected() {
        let mut cfg = CaptureConfig::new(CaptureSource::Interface("eth0".into()));
        cfg.snaplen = 20;
        assert!(matches!(
            cfg.validate(),
            Err(CaptureError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn empty_interface_is_rejected() {
        let cfg = CaptureConfig::new(CaptureSource::Interface(String::new()));
        assert!(cfg.validate().is_err());
    }
}
