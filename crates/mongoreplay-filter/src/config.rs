//! Filter configuration and output naming.

use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use mongoreplay_record::{PreciseTime, WriterOptions};

/// What to keep and where to write it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FilterConfig {
    /// Drop ops seen before this instant.
    pub start_at: Option<PreciseTime>,
    /// Keep only ops seen within this long of the first retained op.
    pub duration: Option<Duration>,
    /// Drop driver housekeeping commands and their replies.
    pub remove_driver_ops: bool,
    /// Number of output files. Default: 1.
    pub split: usize,
    /// Options for every output file.
    pub writer: WriterOptions,
    /// Ops buffered per output writer thread. Default: 10 000.
    pub channel_capacity: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            start_at: None,
            duration: None,
            remove_driver_ops: false,
            split: 1,
            writer: WriterOptions::default(),
            channel_capacity: 10_000,
        }
    }
}

impl FilterConfig {
    /// Check every setting before any file is touched.
    pub fn validate(&self) -> Result<(), FilterConfigError> {
        if self.split == 0 {
            return Err(FilterConfigError::ZeroSplit);
        }
        if self.channel_capacity == 0 {
            return Err(FilterConfigError::ZeroCapacity);
        }
        if self.duration.is_some_and(|d| d.is_zero()) {
            return Err(FilterConfigError::ZeroDuration);
        }
        Ok(())
    }

    /// Paths of the outputs for `output`.
    ///
    /// A single output is written to `output` itself. With a split of `n`
    /// the outputs are `<stem>_<i><.ext>` next to it, `i` in `0..n`.
    pub fn output_paths(&self, output: &Path) -> Vec<PathBuf> {
        if self.split <= 1 {
            return vec![output.to_path_buf()];
        }
        let stem = output
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = output
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (0..self.split)
            .map(|i| output.with_file_name(format!("{stem}_{i}{ext}")))
            .collect()
    }
}

/// Invalid filter settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterConfigError {
    /// `split` is zero.
    ZeroSplit,
    /// `channel_capacity` is zero.
    ZeroCapacity,
    /// `duration` is zero, which would keep nothing.
    ZeroDuration,
}

impl fmt::Display for FilterConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroSplit => write!(f, "split must be at least 1"),
            Self::ZeroCapacity => write!(f, "channel capacity must be at least 1"),
            Self::ZeroDuration => write!(f, "duration must be positive"),
        }
    }
}

impl Error for FilterConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(FilterConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_split_rejected() {
        let c = FilterConfig {
            split: 0,
            ..FilterConfig::default()
        };
        assert_eq!(c.validate(), Err(FilterConfigError::ZeroSplit));
    }

    #[test]
    fn zero_duration_rejected() {
        let c = FilterConfig {
            duration: Some(Duration::ZERO),
            ..FilterConfig::default()
        };
        assert_eq!(c.validate(), Err(FilterConfigError::ZeroDuration));
    }

    #[test]
    fn single_output_keeps_its_name() {
        let c = FilterConfig::default();
        assert_eq!(
            c.output_paths(Path::new("/tmp/out.bson")),
            vec![PathBuf::from("/tmp/out.bson")]
        );
    }

    #[test]
    fn split_outputs_are_numbered_before_the_extension() {
        let c = FilterConfig {
            split: 3,
            ..FilterConfig::default()
        };
        let names: Vec<PathBuf> = c.output_paths(Path::new("/tmp/out.bson"));
        assert_eq!(
            names,
            vec![
                PathBuf::from("/tmp/out_0.bson"),
                PathBuf::from("/tmp/out_1.bson"),
                PathBuf::from("/tmp/out_2.bson"),
            ]
        );
        let bare = c.output_paths(Path::new("traffic"));
        assert_eq!(bare[2], PathBuf::from("traffic_2"));
    }
}
