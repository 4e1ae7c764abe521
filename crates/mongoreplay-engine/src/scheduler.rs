//! Timed dispatch of recorded ops to per-connection workers.
//!
//! # Architecture
//!
//! ```text
//! OpStream ──> Scheduler ──(bounded per connection)──> ConnectionWorker ──> server
//!               play_at = start + (seen - first_seen) / speed
//!               lookahead every QUEUE_GRANULARITY ops
//!               EOF retires one channel
//! ```
//!
//! The scheduler runs on the caller's thread. It never sends anything
//! itself; it stamps `play_at`, routes each op by its recorded connection
//! number, and throttles reading so it stays at most `queue_time` ahead
//! of real time.

use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use indexmap::IndexMap;

use mongoreplay_record::{open_recording, OpStream, OpStreamConfig, PreciseTime, RecordError, RecordedOp};
use mongoreplay_wire::is_driver_op;

use crate::config::{PlaybackConfig, QUEUE_GRANULARITY};
use crate::context::{CursorMap, ExecutionContext};
use crate::cursor_map::LiveCursorMap;
use crate::error::ReplayError;
use crate::preprocess::preprocess;
use crate::stats::{PlaybackReport, StatSink, WorkerReport};
use crate::worker::{sleep_until, ConnectionWorker};

/// Offset from playback start at which an op seen at `seen` is due.
///
/// Saturates at [`Duration::MAX`] when a tiny `speed` pushes the offset
/// out of range.
pub fn schedule_offset(seen: PreciseTime, recording_start: PreciseTime, speed: f64) -> Duration {
    let recorded = seen.saturating_duration_since(recording_start);
    Duration::try_from_secs_f64(recorded.as_secs_f64() / speed).unwrap_or(Duration::MAX)
}

/// Routes ops to connection workers at their scheduled time.
pub struct Scheduler {
    target: String,
    speed: f64,
    queue_time: Duration,
    connection_capacity: usize,
    dial_lead: Duration,
    context: Arc<ExecutionContext>,
    sink: Arc<dyn StatSink>,

    workers: IndexMap<i64, Sender<RecordedOp>>,
    handles: Vec<(i64, JoinHandle<WorkerReport>)>,
    recording_start: Option<PreciseTime>,
    playback_start: PreciseTime,
    started: Option<Instant>,

    ops_read: u64,
    /// Ops read since the lookahead window was last checked.
    since_window: u64,
    driver_ops_skipped: u64,
    undeliverable: u64,
    next_played_connection: i64,
}

impl Scheduler {
    /// Validate `config` and prepare to dispatch.
    pub fn new(
        config: &PlaybackConfig,
        context: Arc<ExecutionContext>,
        sink: Arc<dyn StatSink>,
    ) -> Result<Self, ReplayError> {
        config.validate()?;
        Ok(Self {
            target: config.resolved_target()?,
            speed: config.speed,
            queue_time: config.queue_time,
            connection_capacity: config.connection_capacity,
            dial_lead: config.dial_lead,
            context,
            sink,
            workers: IndexMap::new(),
            handles: Vec::new(),
            recording_start: None,
            playback_start: PreciseTime::EPOCH,
            started: None,
            ops_read: 0,
            since_window: 0,
            driver_ops_skipped: 0,
            undeliverable: 0,
            next_played_connection: 1,
        })
    }

    /// Connections with an open channel.
    pub fn open_connections(&self) -> usize {
        self.workers.len()
    }

    /// Schedule one op and hand it to its connection's worker.
    ///
    /// Blocks when the worker's channel is full or when the op is due
    /// further ahead than `queue_time`. The window is checked once every
    /// `QUEUE_GRANULARITY` ops read; when that op is a skipped driver op
    /// the check moves to the next scheduled op.
    pub fn dispatch(&mut self, mut op: RecordedOp) -> Result<(), ReplayError> {
        self.ops_read += 1;
        self.since_window += 1;
        if !op.eof && !op.is_reply() && !self.context.driver_ops_filtered() {
            if let Ok(parsed) = op.parse() {
                if is_driver_op(&parsed) {
                    self.driver_ops_skipped += 1;
                    return Ok(());
                }
            }
        }

        let recording_start = *self.recording_start.get_or_insert(op.seen);
        if self.started.is_none() {
            self.started = Some(Instant::now());
            self.playback_start = PreciseTime::now();
        }
        let play_at = self.playback_start + schedule_offset(op.seen, recording_start, self.speed);
        op.play_at = Some(play_at);

        if self.since_window >= QUEUE_GRANULARITY {
            self.since_window = 0;
            if !self.context.full_speed() {
                self.wait_for_window(play_at);
            }
        }

        if op.eof {
            if self.workers.shift_remove(&op.seen_connection_num).is_some() {
                tracing::debug!(connection = op.seen_connection_num, "connection retired");
            }
            return Ok(());
        }

        let connection = op.seen_connection_num;
        if !self.workers.contains_key(&connection) {
            self.spawn_worker(connection)?;
        }
        if let Some(tx) = self.workers.get(&connection) {
            if tx.send(op).is_err() {
                // Only a panicked worker hangs up early.
                self.undeliverable += 1;
                self.workers.shift_remove(&connection);
            }
        }
        Ok(())
    }

    fn wait_for_window(&self, play_at: PreciseTime) {
        let horizon = PreciseTime::now() + self.queue_time;
        if play_at > horizon {
            let resume = PreciseTime::new(
                play_at.sec() - self.queue_time.as_secs() as i64,
                i64::from(play_at.nsec()) - i64::from(self.queue_time.subsec_nanos()),
            );
            tracing::trace!(ops = self.ops_read, "scheduler waiting for the lookahead window");
            sleep_until(resume);
        }
    }

    fn spawn_worker(&mut self, connection: i64) -> Result<(), ReplayError> {
        let (tx, rx) = crossbeam_channel::bounded(self.connection_capacity);
        let played_connection = self.next_played_connection;
        self.next_played_connection += 1;
        let worker = ConnectionWorker {
            connection,
            played_connection,
            target: self.target.clone(),
            ops: rx,
            context: Arc::clone(&self.context),
            sink: Arc::clone(&self.sink),
            dial_lead: self.dial_lead,
        };
        let handle = thread::Builder::new()
            .name(format!("mongoreplay-conn-{connection}"))
            .spawn(move || worker.run())
            .map_err(|e| ReplayError::ThreadSpawnFailed {
                reason: format!("worker for connection {connection}: {e}"),
            })?;
        tracing::debug!(connection, played_connection, "worker started");
        self.workers.insert(connection, tx);
        self.handles.push((connection, handle));
        Ok(())
    }

    /// Close every channel, wait for all workers and summarise the run.
    pub fn finish(mut self) -> Result<PlaybackReport, ReplayError> {
        self.workers.clear();
        let mut totals = WorkerReport::default();
        let mut connections_lost = 0;
        let mut panicked = None;
        let connections = self.handles.len() as u64;
        for (connection, handle) in self.handles.drain(..) {
            match handle.join() {
                Ok(report) => {
                    if report.connection_lost {
                        connections_lost += 1;
                    }
                    totals.absorb(&report);
                }
                Err(_) => {
                    tracing::warn!(connection, "connection worker panicked");
                    panicked.get_or_insert(connection);
                }
            }
        }
        if let Some(connection) = panicked {
            return Err(ReplayError::WorkerPanicked { connection });
        }
        let correlation = self.context.stats();
        let report = PlaybackReport {
            ops_read: self.ops_read,
            ops_played: totals.played,
            ops_dropped: totals.dropped + self.undeliverable,
            ops_failed: totals.failed,
            driver_ops_skipped: self.driver_ops_skipped,
            connections,
            connections_lost,
            elapsed: self.started.map(|s| s.elapsed()).unwrap_or_default(),
            played_per_generation: totals.played_per_generation,
            correlation,
        };
        tracing::info!(
            played = report.ops_played,
            dropped = report.ops_dropped,
            failed = report.ops_failed,
            connections = report.connections,
            elapsed = ?report.elapsed,
            "playback finished"
        );
        Ok(report)
    }
}

/// Replay `ops` against `config.target`.
///
/// A read error stops dispatch; workers still drain what they were given
/// before the error is returned.
pub fn replay<I>(
    ops: I,
    config: &PlaybackConfig,
    context: Arc<ExecutionContext>,
    sink: Arc<dyn StatSink>,
) -> Result<PlaybackReport, ReplayError>
where
    I: IntoIterator<Item = Result<RecordedOp, RecordError>>,
{
    let mut scheduler = Scheduler::new(config, context, sink)?;
    let mut failure = None;
    for op in ops {
        let dispatched = op.map_err(ReplayError::from).and_then(|op| scheduler.dispatch(op));
        if let Err(e) = dispatched {
            failure = Some(e);
            break;
        }
    }
    let report = scheduler.finish()?;
    match failure {
        Some(e) => Err(e),
        None => Ok(report),
    }
}

/// Replay the recording at `path`.
///
/// Opens the file once for its metadata, once more if cursor preprocessing
/// is enabled, and once per generation for the replay itself.
pub fn play(
    path: &Path,
    config: &PlaybackConfig,
    sink: Arc<dyn StatSink>,
) -> Result<PlaybackReport, ReplayError> {
    config.validate()?;
    let metadata = *open_recording(path)?.metadata();
    tracing::info!(
        path = %path.display(),
        version = metadata.playback_file_version,
        driver_ops_filtered = metadata.driver_ops_filtered,
        repeat = config.repeat,
        speed = config.speed,
        "starting playback"
    );

    let mut stream_config = OpStreamConfig {
        repeat: config.repeat,
        ..OpStreamConfig::default()
    };
    if let Some(workers) = config.decode_workers {
        stream_config.decode_workers = workers;
    }

    let cursors = if config.preprocess {
        let stream = spawn_stream(path, &stream_config)?;
        CursorMap::Preprocessed(preprocess(stream)?)
    } else {
        CursorMap::Live(LiveCursorMap::new())
    };
    let context = Arc::new(ExecutionContext::new(
        cursors,
        config.reply_ttl,
        config.cursor_wait,
        config.full_speed,
        metadata.driver_ops_filtered,
    ));

    let mut stream = spawn_stream(path, &stream_config)?;
    let result = replay(stream.by_ref(), config, context, sink);
    stream.join();
    result
}

fn spawn_stream(path: &Path, config: &OpStreamConfig) -> Result<OpStream, ReplayError> {
    let path = path.to_path_buf();
    Ok(OpStream::spawn(move || open_recording(&path), config)?)
}
