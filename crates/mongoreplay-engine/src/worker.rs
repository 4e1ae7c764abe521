//! Per-connection replay worker.
//!
//! Each recorded connection gets one worker thread that owns one live
//! socket. Ops arrive over a bounded channel in recording order. Recorded
//! replies are never sent; they only feed the correlation cache. When the
//! scheduler drops the sender (EOF or end of stream) the worker finishes
//! its queue, closes the socket and returns its counters.

use std::io;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::Receiver;

use mongoreplay_record::{PreciseTime, RecordedOp};
use mongoreplay_wire::{execute, Op, Replyable, WireError};

use crate::context::ExecutionContext;
use crate::stats::{OpStat, StatSink, WorkerReport};

/// Characters of the op body kept in an [`OpStat`] message.
const STAT_MESSAGE_LEN: usize = 128;

/// Sleep until wall-clock time `at`; returns at once if it has passed.
pub(crate) fn sleep_until(at: PreciseTime) {
    if let Some(wait) = at.checked_duration_since(PreciseTime::now()) {
        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

/// Everything a worker thread owns.
pub(crate) struct ConnectionWorker {
    pub connection: i64,
    pub played_connection: i64,
    pub target: String,
    pub ops: Receiver<RecordedOp>,
    pub context: Arc<ExecutionContext>,
    pub sink: Arc<dyn StatSink>,
    pub dial_lead: Duration,
}

impl ConnectionWorker {
    /// Run until the channel closes.
    pub fn run(self) -> WorkerReport {
        let mut report = WorkerReport::default();
        let Ok(first) = self.ops.recv() else {
            return report;
        };

        if !self.context.full_speed() {
            if let Some(play_at) = first.play_at {
                sleep_until(play_at_minus(play_at, self.dial_lead));
            }
        }
        let mut stream = match dial(&self.target) {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(
                    connection = self.connection,
                    target = %self.target,
                    error = %e,
                    "failed to connect"
                );
                report.connection_lost = true;
                self.drop_remaining(Some(first), &mut report);
                return report;
            }
        };
        tracing::debug!(
            connection = self.connection,
            played_connection = self.played_connection,
            "connected"
        );

        let mut next = Some(first);
        while let Some(op) = next.take().or_else(|| self.ops.recv().ok()) {
            if let Err(e) = self.handle(op, &mut stream, &mut report) {
                tracing::warn!(
                    connection = self.connection,
                    error = %e,
                    "connection lost; dropping its remaining ops"
                );
                report.connection_lost = true;
                self.drop_remaining(None, &mut report);
                break;
            }
        }
        tracing::debug!(
            connection = self.connection,
            played = report.played,
            dropped = report.dropped,
            failed = report.failed,
            "connection finished"
        );
        report
    }

    /// Process one op. Only errors that leave the socket unusable are
    /// returned: I/O failures and a reply header that fails the sanity
    /// check, after which the stream is out of sync. Everything else is
    /// counted and the worker carries on.
    fn handle(
        &self,
        mut op: RecordedOp,
        stream: &mut TcpStream,
        report: &mut WorkerReport,
    ) -> Result<(), WireError> {
        if op.is_reply() {
            self.record_file_reply(&op, report);
            self.context.commit();
            return Ok(());
        }

        let mut parsed = match op.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!(connection = self.connection, error = %e, "dropping undecodable op");
                report.failed += 1;
                return Ok(());
            }
        };
        match self
            .context
            .rewrite_cursors(&mut parsed, self.connection, op.generation)
        {
            Ok(true) => {}
            Ok(false) => {
                report.dropped += 1;
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(connection = self.connection, error = %e, "cursor rewrite failed");
                report.failed += 1;
                return Ok(());
            }
        }

        if !self.context.full_speed() {
            if let Some(play_at) = op.play_at {
                sleep_until(play_at);
            }
        }
        let played_at = PreciseTime::now();
        op.played_at = Some(played_at);
        op.played_connection_num = self.played_connection;

        let reply = match execute(&parsed, stream) {
            Ok(reply) => reply,
            Err(e @ (WireError::Io(_) | WireError::InvalidHeader { .. })) => {
                self.context.mark_failed(&op);
                self.context.commit();
                report.dropped += 1;
                return Err(e);
            }
            Err(e) => {
                tracing::warn!(connection = self.connection, error = %e, "op failed");
                self.context.mark_failed(&op);
                self.context.commit();
                report.failed += 1;
                return Ok(());
            }
        };

        let mut stat = self.stat_for(&parsed, &op, played_at);
        if let Some(reply) = reply {
            stat.latency = reply.latency();
            stat.num_returned = reply.num_returned();
            stat.errors = reply.errors();
            let live_cursor = reply.cursor_id().unwrap_or(0);
            if live_cursor == 0 || !stat.errors.is_empty() {
                self.context.mark_failed(&op);
            }
            if live_cursor != 0 {
                if let Err(e) = self.context.add_from_wire(reply, &op) {
                    tracing::debug!(connection = self.connection, error = %e, "unusable live reply");
                }
            }
        }
        self.context.commit();

        report.played += 1;
        *report.played_per_generation.entry(op.generation).or_default() += 1;
        self.sink.record(stat);
        Ok(())
    }

    fn record_file_reply(&self, op: &RecordedOp, report: &mut WorkerReport) {
        let reply = match op.parse().map(Op::into_reply) {
            Ok(Some(reply)) => reply,
            Ok(None) => return,
            Err(e) => {
                tracing::debug!(connection = self.connection, error = %e, "undecodable recorded reply");
                report.failed += 1;
                return;
            }
        };
        match self.context.add_from_file(reply, op) {
            Ok(()) => report.replies_recorded += 1,
            Err(e) => {
                tracing::debug!(connection = self.connection, error = %e, "unusable recorded reply");
                report.failed += 1;
            }
        }
    }

    fn stat_for(&self, parsed: &Op, op: &RecordedOp, played_at: PreciseTime) -> OpStat {
        let meta = parsed.meta();
        OpStat {
            kind: meta.op.to_owned(),
            namespace: meta.namespace,
            command: meta.command,
            message: parsed.abbreviated(STAT_MESSAGE_LEN),
            seen_connection_num: self.connection,
            played_connection_num: self.played_connection,
            play_at: op.play_at,
            played_at: Some(played_at),
            generation: op.generation,
            request_id: parsed.header().request_id,
            ..OpStat::default()
        }
    }

    /// Count every op still queued (plus `first`) as dropped, draining the
    /// channel so the scheduler never blocks on this connection.
    fn drop_remaining(&self, first: Option<RecordedOp>, report: &mut WorkerReport) {
        for op in first.into_iter().chain(self.ops.iter()) {
            if op.is_reply() {
                continue;
            }
            self.context.mark_failed(&op);
            report.dropped += 1;
        }
        self.context.commit();
    }
}

fn play_at_minus(at: PreciseTime, lead: Duration) -> PreciseTime {
    let lead_nanos = i64::try_from(lead.as_nanos()).unwrap_or(i64::MAX);
    PreciseTime::new(at.sec(), i64::from(at.nsec()).saturating_sub(lead_nanos))
}

fn dial(target: &str) -> io::Result<TcpStream> {
    let stream = TcpStream::connect(target)?;
    stream.set_nodelay(true)?;
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor_map::LiveCursorMap;
    use crate::context::CursorMap;
    use crate::stats::MemoryStatSink;
    use bson::doc;
    use mongoreplay_test_utils::ops::{get_more, insert, query, recorded, reply};
    use mongoreplay_test_utils::MockServer;

    fn context() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(
            CursorMap::Live(LiveCursorMap::new()),
            Duration::from_secs(60),
            Duration::from_millis(100),
            true,
            false,
        ))
    }

    fn run(target: String, ops: Vec<RecordedOp>, ctx: Arc<ExecutionContext>) -> (WorkerReport, Arc<MemoryStatSink>) {
        let (tx, rx) = crossbeam_channel::bounded(ops.len().max(1));
        for op in ops {
            tx.send(op).unwrap();
        }
        drop(tx);
        let sink = Arc::new(MemoryStatSink::new());
        let worker = ConnectionWorker {
            connection: 1,
            played_connection: 7,
            target,
            ops: rx,
            context: ctx,
            sink: sink.clone(),
            dial_lead: Duration::ZERO,
        };
        (worker.run(), sink)
    }

    #[test]
    fn play_at_minus_borrows_seconds() {
        let t = play_at_minus(PreciseTime::new(10, 100), Duration::from_secs(5));
        assert_eq!(t, PreciseTime::new(5, 100));
        let t = play_at_minus(PreciseTime::new(10, 0), Duration::from_millis(1));
        assert_eq!(t, PreciseTime::new(9, 999_000_000));
    }

    #[test]
    fn plays_requests_and_skips_recorded_replies() {
        let server = MockServer::start_ok().unwrap();
        let ops = vec![
            recorded(&query(1, "db.c", doc! { "a": 1 }), 0, 1),
            recorded(&reply(2, 1, 0, vec![]), 0, 1),
            recorded(&insert(3, "db.c", vec![doc! { "x": 1 }]), 0, 1),
        ];
        let (report, sink) = run(server.uri(), ops, context());
        assert_eq!(report.played, 2);
        assert_eq!(report.dropped, 0);
        assert!(!report.connection_lost);

        let stats = sink.snapshot();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].kind, "query");
        assert!(stats[0].latency.is_some());
        assert_eq!(stats[0].played_connection_num, 7);
        assert!(stats[1].latency.is_none());
    }

    #[test]
    fn unmapped_get_more_is_dropped_not_sent() {
        let server = MockServer::start_ok().unwrap();
        let ops = vec![recorded(&get_more(1, "db.c", 111), 0, 1)];
        let (report, _) = run(server.uri(), ops, context());
        assert_eq!(report.played, 0);
        assert_eq!(report.dropped, 1);
        assert!(server.received().is_empty());
    }

    #[test]
    fn garbage_reply_header_ends_the_connection() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            mongoreplay_wire::read_raw_op(&mut conn).unwrap();
            // message_length 5 can never be a real frame.
            let mut bad = [0u8; 16];
            bad[..4].copy_from_slice(&5i32.to_le_bytes());
            io::Write::write_all(&mut conn, &bad).unwrap();
            // Hold the socket open until the worker hangs up.
            let mut rest = Vec::new();
            let _ = io::Read::read_to_end(&mut conn, &mut rest);
        });
        let ops = vec![
            recorded(&query(1, "db.c", doc! {}), 0, 1),
            recorded(&query(2, "db.c", doc! {}), 0, 1),
            recorded(&insert(3, "db.c", vec![doc! { "x": 1 }]), 0, 1),
        ];
        let (report, _) = run(addr.to_string(), ops, context());
        assert!(report.connection_lost);
        assert_eq!(report.played, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.dropped, 3);
        server.join().unwrap();
    }

    #[test]
    fn refused_connection_drops_everything() {
        // Bind then release a port so nothing is listening on it.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let ops = vec![
            recorded(&query(1, "db.c", doc! {}), 0, 1),
            recorded(&reply(2, 1, 0, vec![]), 0, 1),
            recorded(&query(3, "db.c", doc! {}), 0, 1),
        ];
        let (report, _) = run(addr.to_string(), ops, context());
        assert!(report.connection_lost);
        assert_eq!(report.played, 0);
        assert_eq!(report.dropped, 2);
    }
}
