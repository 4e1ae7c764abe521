//! Per-op telemetry and the end-of-run report.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use mongoreplay_record::PreciseTime;

use crate::context::CorrelationStats;

/// What happened to one replayed op.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct OpStat {
    /// Operation kind, e.g. `"query"` or `"op_msg"`.
    pub kind: String,
    /// Namespace or database.
    pub namespace: String,
    /// Command name for command-style ops.
    pub command: String,
    /// Abbreviated op body.
    pub message: String,
    /// Round-trip latency of the live reply.
    pub latency: Option<Duration>,
    /// Documents returned by the live reply.
    pub num_returned: usize,
    /// Errors carried by the live reply.
    pub errors: Vec<String>,
    /// Connection number in the recording.
    pub seen_connection_num: i64,
    /// Connection number during replay.
    pub played_connection_num: i64,
    /// Scheduled send time.
    pub play_at: Option<PreciseTime>,
    /// Actual send time.
    pub played_at: Option<PreciseTime>,
    /// Replay generation.
    pub generation: i32,
    /// Request id as sent.
    pub request_id: i32,
}

/// Receives an [`OpStat`] for every executed op.
///
/// Called concurrently from every connection worker.
pub trait StatSink: Send + Sync {
    /// Record one executed op.
    fn record(&self, stat: OpStat);
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStatSink;

impl StatSink for NullStatSink {
    fn record(&self, _stat: OpStat) {}
}

/// Logs every op through `tracing` at debug level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingStatSink;

impl StatSink for TracingStatSink {
    fn record(&self, stat: OpStat) {
        tracing::debug!(
            kind = %stat.kind,
            ns = %stat.namespace,
            command = %stat.command,
            latency_us = stat.latency.map(|d| d.as_micros() as u64),
            returned = stat.num_returned,
            errors = stat.errors.len(),
            connection = stat.seen_connection_num,
            played_connection = stat.played_connection_num,
            generation = stat.generation,
            message = %stat.message,
            "op played"
        );
        for err in &stat.errors {
            tracing::debug!(connection = stat.seen_connection_num, error = %err, "reply error");
        }
    }
}

/// Keeps every stat in memory.
#[derive(Debug, Default)]
pub struct MemoryStatSink {
    stats: Mutex<Vec<OpStat>>,
}

impl MemoryStatSink {
    /// An empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far, in arrival order.
    pub fn snapshot(&self) -> Vec<OpStat> {
        self.stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

impl StatSink for MemoryStatSink {
    fn record(&self, stat: OpStat) {
        self.stats
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(stat);
    }
}

/// Counters from a single connection worker.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkerReport {
    /// Ops sent to the server.
    pub played: u64,
    /// Ops not sent: unmappable cursors, or lost with the connection.
    pub dropped: u64,
    /// Ops that failed to decode or execute.
    pub failed: u64,
    /// Recorded replies handed to the correlation cache.
    pub replies_recorded: u64,
    /// Ops played per generation.
    pub played_per_generation: BTreeMap<i32, u64>,
    /// Whether the worker gave up on its socket.
    pub connection_lost: bool,
}

impl WorkerReport {
    pub(crate) fn absorb(&mut self, other: &WorkerReport) {
        self.played += other.played;
        self.dropped += other.dropped;
        self.failed += other.failed;
        self.replies_recorded += other.replies_recorded;
        for (g, n) in &other.played_per_generation {
            *self.played_per_generation.entry(*g).or_default() += n;
        }
        self.connection_lost |= other.connection_lost;
    }
}

/// Summary of a replay run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackReport {
    /// Ops read from the recording, EOF markers included.
    pub ops_read: u64,
    /// Ops sent to the server.
    pub ops_played: u64,
    /// Ops not sent.
    pub ops_dropped: u64,
    /// Ops that failed to decode or execute.
    pub ops_failed: u64,
    /// Driver handshake ops skipped.
    pub driver_ops_skipped: u64,
    /// Live connections opened.
    pub connections: u64,
    /// Connections whose worker gave up on its socket.
    pub connections_lost: u64,
    /// Wall time from the first op to the last worker finishing.
    pub elapsed: Duration,
    /// Ops played per generation.
    pub played_per_generation: BTreeMap<i32, u64>,
    /// Cursor correlation counters.
    pub correlation: CorrelationStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_sink_keeps_order() {
        let sink = MemoryStatSink::new();
        for i in 0..3 {
            sink.record(OpStat {
                request_id: i,
                ..OpStat::default()
            });
        }
        let ids: Vec<i32> = sink.snapshot().iter().map(|s| s.request_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn worker_reports_merge_per_generation() {
        let mut a = WorkerReport::default();
        a.played = 2;
        a.played_per_generation.insert(0, 2);
        let mut b = WorkerReport::default();
        b.played = 3;
        b.dropped = 1;
        b.played_per_generation.insert(0, 1);
        b.played_per_generation.insert(1, 2);
        a.absorb(&b);
        assert_eq!(a.played, 5);
        assert_eq!(a.dropped, 1);
        assert_eq!(a.played_per_generation[&0], 3);
        assert_eq!(a.played_per_generation[&1], 2);
    }
}
