//! Filter a recording file into one or more outputs.

use std::path::Path;

use mongoreplay_record::{open_recording, PlaybackFileMetadata, RecordError, RecordedOp};

use crate::config::FilterConfig;
use crate::error::FilterError;
use crate::select::{Rejection, Selector};
use crate::split::{OutputReport, SplitWriter};

/// Summary of a filter run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FilterReport {
    /// Ops read from the input.
    pub ops_read: u64,
    /// Ops written across all outputs.
    pub ops_written: u64,
    /// Ops outside the time window.
    pub outside_window: u64,
    /// Driver ops (and their replies) removed.
    pub driver_ops_removed: u64,
    /// One entry per output, in output order.
    pub outputs: Vec<OutputReport>,
}

/// Filter the recording at `input` into `output` (or, when splitting,
/// into the files named by [`FilterConfig::output_paths`]).
pub fn filter(input: &Path, output: &Path, config: &FilterConfig) -> Result<FilterReport, FilterError> {
    config.validate()?;
    let reader = open_recording(input)?;
    let input_meta = *reader.metadata();
    tracing::info!(
        input = %input.display(),
        output = %output.display(),
        split = config.split,
        remove_driver_ops = config.remove_driver_ops,
        "filtering recording"
    );
    filter_ops(reader.ops(), input_meta, output, config)
}

/// Filter `ops` read from a recording with metadata `input_meta`.
///
/// The outputs record `driver_ops_filtered` if the input already did or
/// if this run removes driver ops. A read error stops the run after every
/// output has been closed.
pub fn filter_ops<I>(
    ops: I,
    input_meta: PlaybackFileMetadata,
    output: &Path,
    config: &FilterConfig,
) -> Result<FilterReport, FilterError>
where
    I: IntoIterator<Item = Result<RecordedOp, RecordError>>,
{
    config.validate()?;
    let meta = PlaybackFileMetadata {
        driver_ops_filtered: input_meta.driver_ops_filtered || config.remove_driver_ops,
        ..input_meta
    };
    let writers = SplitWriter::create(
        config.output_paths(output),
        &meta,
        &config.writer,
        config.channel_capacity,
    )?;
    let mut selector = Selector::new(config.start_at, config.duration, config.remove_driver_ops);
    let mut report = FilterReport::default();
    let mut failure = None;

    for op in ops {
        let op = match op {
            Ok(op) => op,
            Err(e) => {
                failure = Some(FilterError::Record(e));
                break;
            }
        };
        report.ops_read += 1;
        match selector.check(&op) {
            Ok(()) => {
                if !writers.send(op) {
                    // The writer's own error surfaces from finish().
                    break;
                }
                report.ops_written += 1;
            }
            Err(Rejection::OutsideWindow) => report.outside_window += 1,
            Err(Rejection::DriverOp) => report.driver_ops_removed += 1,
        }
    }

    let outputs = writers.finish()?;
    if let Some(e) = failure {
        return Err(e);
    }
    report.outputs = outputs;
    tracing::info!(
        read = report.ops_read,
        written = report.ops_written,
        outside_window = report.outside_window,
        driver_ops_removed = report.driver_ops_removed,
        outputs = report.outputs.iter().filter(|o| !o.removed).count(),
        "filter finished"
    );
    Ok(report)
}
