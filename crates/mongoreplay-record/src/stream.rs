//! Parallel, order-preserving op decoding with repeat support.
//!
//! # Architecture
//!
//! ```text
//! Reader Thread          Decode Workers (N)          Collector Thread
//!     |                        |                           |
//!     | next_raw()             |                           |
//!     |--(seq, gen, bytes)---->| op_from_bytes()           |
//!     |   [bounded(cap)]       |--(seq, gen, op)---------->| reorder by seq
//!     |                        |   [bounded(cap)]          | shift seen by gen
//!     |                        |                           |--> OpStream::next()
//!     |                        |                           |   [bounded(cap)]
//! ```
//!
//! The reader re-opens the recording once per generation. The collector
//! releases ops strictly in file order, so consumers observe exactly the
//! sequence a single-threaded reader would produce.

use std::collections::BTreeMap;
use std::io::Read;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, warn};

use crate::codec::op_from_bytes;
use crate::error::RecordError;
use crate::reader::RecordingReader;
use crate::time::PreciseTime;
use crate::types::RecordedOp;

/// Tuning for [`OpStream`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpStreamConfig {
    /// Number of decode worker threads. At least one is always spawned.
    pub decode_workers: usize,
    /// Capacity of each internal channel and of the output channel.
    pub capacity: usize,
    /// Number of passes over the recording. Zero is treated as one.
    pub repeat: u32,
}

impl Default for OpStreamConfig {
    fn default() -> Self {
        Self {
            decode_workers: thread::available_parallelism()
                .map(|n| n.get().min(4))
                .unwrap_or(2),
            capacity: 10_000,
            repeat: 1,
        }
    }
}

struct Job {
    seq: u64,
    generation: i32,
    bytes: Result<Vec<u8>, RecordError>,
}

struct Decoded {
    generation: i32,
    op: Result<RecordedOp, RecordError>,
}

/// Stream of decoded ops, produced on background threads.
///
/// Iterating yields ops in file order. Each pass over the file is a
/// generation: its `seen` times are shifted past the previous pass, its
/// `generation` is stamped, and `order` counts across all passes. EOF
/// markers are only emitted in the final generation, so a connection
/// stays open across passes.
///
/// The first error ends the stream.
pub struct OpStream {
    rx: Receiver<Result<RecordedOp, RecordError>>,
    threads: Vec<JoinHandle<()>>,
}

impl OpStream {
    /// Start decoding. `open` is called once per generation.
    pub fn spawn<R, F>(open: F, config: &OpStreamConfig) -> Result<Self, RecordError>
    where
        R: Read,
        F: FnMut() -> Result<RecordingReader<R>, RecordError> + Send + 'static,
    {
        let capacity = config.capacity.max(1);
        let repeat = config.repeat.max(1);
        let workers = config.decode_workers.max(1);

        let (job_tx, job_rx) = crossbeam_channel::bounded::<Job>(capacity);
        let (done_tx, done_rx) = crossbeam_channel::bounded::<(u64, Decoded)>(capacity);
        let (out_tx, out_rx) = crossbeam_channel::bounded(capacity);

        let mut threads = Vec::with_capacity(workers + 2);
        threads.push(
            thread::Builder::new()
                .name("mongoreplay-read".into())
                .spawn(move || read_loop(open, repeat, job_tx))?,
        );
        for i in 0..workers {
            let job_rx = job_rx.clone();
            let done_tx = done_tx.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("mongoreplay-decode-{i}"))
                    .spawn(move || decode_loop(job_rx, done_tx))?,
            );
        }
        drop(job_rx);
        drop(done_tx);
        threads.push(
            thread::Builder::new()
                .name("mongoreplay-collect".into())
                .spawn(move || collect_loop(done_rx, out_tx, repeat))?,
        );

        Ok(Self {
            rx: out_rx,
            threads,
        })
    }

    /// Stop consuming and wait for the background threads to exit.
    pub fn join(self) {
        let Self { rx, threads } = self;
        drop(rx);
        for handle in threads {
            if handle.join().is_err() {
                warn!("op stream thread panicked");
            }
        }
    }
}

impl Iterator for OpStream {
    type Item = Result<RecordedOp, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

fn read_loop<R, F>(mut open: F, repeat: u32, job_tx: Sender<Job>)
where
    R: Read,
    F: FnMut() -> Result<RecordingReader<R>, RecordError>,
{
    let mut seq = 0u64;
    for generation in 0..repeat as i32 {
        let mut reader = match open() {
            Ok(r) => r,
            Err(e) => {
                let _ = job_tx.send(Job {
                    seq,
                    generation,
                    bytes: Err(e),
                });
                return;
            }
        };
        loop {
            let bytes = match reader.next_raw() {
                Ok(Some(b)) => Ok(b),
                Ok(None) => break,
                Err(e) => Err(e),
            };
            let failed = bytes.is_err();
            if job_tx
                .send(Job {
                    seq,
                    generation,
                    bytes,
                })
                .is_err()
                || failed
            {
                return;
            }
            seq += 1;
        }
        debug!(generation, ops = reader.ops_read(), "finished reading generation");
    }
}

fn decode_loop(job_rx: Receiver<Job>, done_tx: Sender<(u64, Decoded)>) {
    for job in job_rx {
        let op = job.bytes.and_then(|b| op_from_bytes(&b));
        let decoded = Decoded {
            generation: job.generation,
            op,
        };
        if done_tx.send((job.seq, decoded)).is_err() {
            return;
        }
    }
}

/// Generation bookkeeping applied in file order.
struct Repeater {
    repeat: u32,
    generation: i32,
    first: Option<PreciseTime>,
    last: PreciseTime,
    loop_delta: Duration,
    order: i64,
}

impl Repeater {
    fn new(repeat: u32) -> Self {
        Self {
            repeat,
            generation: 0,
            first: None,
            last: PreciseTime::EPOCH,
            loop_delta: Duration::ZERO,
            order: 0,
        }
    }

    /// Stamp `op`; returns `None` for EOF markers outside the last pass.
    fn apply(&mut self, generation: i32, mut op: RecordedOp) -> Option<RecordedOp> {
        if generation != self.generation {
            if let Some(first) = self.first.take() {
                self.loop_delta += self.last.saturating_duration_since(first);
            }
            self.generation = generation;
        }
        self.last = op.seen;
        self.first.get_or_insert(op.seen);

        op.seen = op.seen + self.loop_delta;
        op.generation = generation;
        op.order = self.order;
        self.order += 1;

        let last_generation = generation == self.repeat as i32 - 1;
        if op.eof && !last_generation {
            None
        } else {
            Some(op)
        }
    }
}

fn collect_loop(
    done_rx: Receiver<(u64, Decoded)>,
    out_tx: Sender<Result<RecordedOp, RecordError>>,
    repeat: u32,
) {
    let mut pending: BTreeMap<u64, Decoded> = BTreeMap::new();
    let mut next_seq = 0u64;
    let mut repeater = Repeater::new(repeat);

    for (seq, decoded) in done_rx {
        pending.insert(seq, decoded);
        while let Some(decoded) = pending.remove(&next_seq) {
            next_seq += 1;
            let item = match decoded.op {
                Ok(op) => match repeater.apply(decoded.generation, op) {
                    Some(op) => Ok(op),
                    None => continue,
                },
                Err(e) => Err(e),
            };
            let failed = item.is_err();
            if out_tx.send(item).is_err() || failed {
                return;
            }
        }
    }
}
