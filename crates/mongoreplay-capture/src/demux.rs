//! Connection tracking across both directions of every TCP stream.

use std::collections::HashMap;
use std::net::SocketAddr;

use mongoreplay_record::{PreciseTime, RecordedOp};
use mongoreplay_wire::RawOp;

use crate::link::TcpSegment;
use crate::reassembly::{Frame, Reassembler, ReassemblyStats};

/// Running totals for a demux session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DemuxStats {
    /// TCP segments handled.
    pub segments: u64,
    /// Ops emitted, EOF markers excluded.
    pub ops: u64,
    /// Connections opened.
    pub connections_opened: u64,
    /// Connections closed by FIN, RST or a final flush.
    pub connections_closed: u64,
    /// Retransmitted payload bytes ignored.
    pub retransmitted_bytes: u64,
    /// Sequence gaps abandoned.
    pub gaps_skipped: u64,
    /// Framing restarts after a bad header.
    pub resyncs: u64,
    /// Bytes discarded while out of sync or at connection close.
    pub discarded_bytes: u64,
}

impl DemuxStats {
    fn absorb(&mut self, r: ReassemblyStats) {
        self.retransmitted_bytes += r.retransmitted_bytes;
        self.gaps_skipped += r.gaps_skipped;
        self.resyncs += r.resyncs;
        self.discarded_bytes += r.discarded_bytes;
    }
}

/// Order-independent key for a bidirectional 4-tuple.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ConnKey(SocketAddr, SocketAddr);

impl ConnKey {
    fn of(a: SocketAddr, b: SocketAddr) -> Self {
        if a <= b {
            Self(a, b)
        } else {
            Self(b, a)
        }
    }
}

#[derive(Debug)]
struct Connection {
    num: i64,
    /// Sender of the first segment seen.
    client: SocketAddr,
    server: SocketAddr,
    /// `[client → server, server → client]`.
    halves: [Reassembler; 2],
    fin: [bool; 2],
}

impl Connection {
    fn half(&self, src: SocketAddr) -> usize {
        usize::from(src != self.client)
    }

    fn eof(&self, ts: PreciseTime) -> RecordedOp {
        RecordedOp::eof_marker(
            ts,
            self.client.to_string(),
            self.server.to_string(),
            self.num,
        )
    }

    fn stats(&self) -> [ReassemblyStats; 2] {
        [self.halves[0].stats(), self.halves[1].stats()]
    }

    fn leftover_bytes(&self) -> u64 {
        self.halves.iter().map(|h| h.buffered_bytes() as u64).sum()
    }
}

/// Splits TCP segments into connections and emits [`RecordedOp`]s.
///
/// Every bidirectional 4-tuple receives a number from a strictly
/// increasing counter the first time it carries data or a SYN. Both
/// directions share the number. A connection is closed, with a single EOF
/// marker, on RST or once both sides have sent FIN; a later segment on
/// the same tuple opens a new connection with a new number.
#[derive(Debug)]
pub struct StreamDemux {
    connections: HashMap<ConnKey, Connection>,
    next_connection_num: i64,
    max_pending_bytes: usize,
    stats: DemuxStats,
}

impl StreamDemux {
    /// Create a demux whose reassemblers buffer at most
    /// `max_pending_bytes` of out-of-order data per direction.
    pub fn new(max_pending_bytes: usize) -> Self {
        Self {
            connections: HashMap::new(),
            next_connection_num: 1,
            max_pending_bytes,
            stats: DemuxStats::default(),
        }
    }

    /// Number of connections currently open.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }

    /// Totals so far, including connections still open.
    pub fn stats(&self) -> DemuxStats {
        let mut out = self.stats;
        for conn in self.connections.values() {
            for s in conn.stats() {
                out.absorb(s);
            }
        }
        out
    }

    /// Handle one segment captured at `ts`.
    pub fn handle(&mut self, ts: PreciseTime, seg: &TcpSegment<'_>) -> Vec<RecordedOp> {
        self.stats.segments += 1;
        let key = ConnKey::of(seg.src, seg.dst);
        let mut out = Vec::new();

        if !self.connections.contains_key(&key) {
            // Bare ACKs and teardown stragglers do not open connections.
            if seg.payload.is_empty() && !seg.syn {
                return out;
            }
            let num = self.next_connection_num;
            self.next_connection_num += 1;
            self.stats.connections_opened += 1;
            tracing::debug!(connection = num, src = %seg.src, dst = %seg.dst, "new connection");
            self.connections.insert(
                key,
                Connection {
                    num,
                    client: seg.src,
                    server: seg.dst,
                    halves: [
                        Reassembler::new(self.max_pending_bytes),
                        Reassembler::new(self.max_pending_bytes),
                    ],
                    fin: [false; 2],
                },
            );
        }
        let Some(conn) = self.connections.get_mut(&key) else {
            return out;
        };

        let half = conn.half(seg.src);
        let frames = conn.halves[half].push(seg.seq, seg.syn, seg.payload, ts);
        for Frame { ts, bytes } in frames {
            match RawOp::from_frame(bytes) {
                Ok(raw) => {
                    out.push(RecordedOp::new(
                        raw,
                        ts,
                        seg.src.to_string(),
                        seg.dst.to_string(),
                        conn.num,
                    ));
                    self.stats.ops += 1;
                }
                Err(e) => {
                    tracing::warn!(connection = conn.num, error = %e, "dropping unframeable op");
                }
            }
        }

        if seg.fin {
            conn.fin[half] = true;
        }
        if seg.rst || conn.fin == [true, true] {
            tracing::debug!(connection = conn.num, rst = seg.rst, "connection closed");
            out.push(conn.eof(ts));
            self.close(key);
        }
        out
    }

    /// Close every open connection, in connection-number order, emitting
    /// one EOF marker each.
    pub fn flush(&mut self, ts: PreciseTime) -> Vec<RecordedOp> {
        let mut keys: Vec<(i64, ConnKey)> = self
            .connections
            .iter()
            .map(|(k, c)| (c.num, *k))
            .collect();
        keys.sort_unstable_by_key(|(num, _)| *num);
        let mut out = Vec::with_capacity(keys.len());
        for (_, key) in keys {
            if let Some(conn) = self.connections.get(&key) {
                out.push(conn.eof(ts));
            }
            self.close(key);
        }
        out
    }

    fn close(&mut self, key: ConnKey) {
        if let Some(conn) = self.connections.remove(&key) {
            for s in conn.stats() {
                self.stats.absorb(s);
            }
            self.stats.discarded_bytes += conn.leftover_bytes();
            self.stats.connections_closed += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongoreplay_test_utils::ops::{query, reply};
    use mongoreplay_wire::Op;

    const CLIENT: &str = "10.0.0.1:50000";
    const SERVER: &str = "10.0.0.2:27017";

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    fn seg<'a>(src: &str, dst: &str, seq: u32, payload: &'a [u8]) -> TcpSegment<'a> {
        TcpSegment {
            src: addr(src),
            dst: addr(dst),
            seq,
            syn: false,
            fin: false,
            rst: false,
            payload,
        }
    }

    fn bytes(op: &Op) -> Vec<u8> {
        op.encode().unwrap()
    }

    fn t(sec: i64) -> PreciseTime {
        PreciseTime::new(sec, 0)
    }

    #[test]
    fn request_and_reply_share_connection_number() {
        let mut d = StreamDemux::new(1024);
        let q = bytes(&query(5, "test.$cmd", bson::doc! { "ping": 1 }));
        let r = bytes(&reply(6, 5, 0, vec![bson::doc! { "ok": 1 }]));

        let out = d.handle(t(1), &seg(CLIENT, SERVER, 0, &q));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].src_endpoint, CLIENT);
        assert_eq!(out[0].dst_endpoint, SERVER);

        let out2 = d.handle(t(2), &seg(SERVER, CLIENT, 0, &r));
        assert_eq!(out2.len(), 1);
        assert_eq!(out2[0].seen_connection_num, out[0].seen_connection_num);
        assert!(out2[0].is_reply());
        assert_eq!(out2[0].seen, t(2));
    }

    #[test]
    fn fin_from_both_sides_emits_one_eof() {
        let mut d = StreamDemux::new(1024);
        let q = bytes(&query(1, "test.coll", bson::doc! {}));
        d.handle(t(1), &seg(CLIENT, SERVER, 0, &q));

        let mut fin = seg(CLIENT, SERVER, q.len() as u32, &[]);
        fin.fin = true;
        assert!(d.handle(t(2), &fin).is_empty());

        let mut fin_back = seg(SERVER, CLIENT, 0, &[]);
        fin_back.fin = true;
        let out = d.handle(t(3), &fin_back);
        assert_eq!(out.len(), 1);
        assert!(out[0].eof);
        assert_eq!(out[0].src_endpoint, CLIENT);
        assert_eq!(d.open_connections(), 0);

        // The last ACK after teardown opens nothing.
        assert!(d.handle(t(4), &seg(CLIENT, SERVER, 0, &[])).is_empty());
        assert_eq!(d.open_connections(), 0);
    }

    #[test]
    fn rst_closes_immediately_and_tuple_reuse_gets_new_number() {
        let mut d = StreamDemux::new(1024);
        let q = bytes(&query(1, "test.coll", bson::doc! {}));
        let first = d.handle(t(1), &seg(CLIENT, SERVER, 0, &q));

        let mut rst = seg(SERVER, CLIENT, 0, &[]);
        rst.rst = true;
        let out = d.handle(t(2), &rst);
        assert!(out[0].eof);
        assert_eq!(out[0].seen_connection_num, first[0].seen_connection_num);

        let again = d.handle(t(3), &seg(CLIENT, SERVER, 5000, &q));
        assert!(again[0].seen_connection_num > first[0].seen_connection_num);
        assert_eq!(d.stats().connections_opened, 2);
        assert_eq!(d.stats().connections_closed, 1);
    }

    #[test]
    fn flush_closes_in_connection_order() {
        let mut d = StreamDemux::new(1024);
        let q = bytes(&query(1, "test.coll", bson::doc! {}));
        for port in [50003, 50001, 50002] {
            let src = format!("10.0.0.1:{port}");
            d.handle(t(1), &seg(&src, SERVER, 0, &q));
        }
        let out = d.flush(t(9));
        let nums: Vec<i64> = out.iter().map(|op| op.seen_connection_num).collect();
        assert_eq!(nums, vec![1, 2, 3]);
        assert!(out.iter().all(|op| op.eof && op.seen == t(9)));
        assert_eq!(d.open_connections(), 0);
    }

    #[test]
    fn desync_in_one_direction_leaves_the_other_alone() {
        let mut d = StreamDemux::new(1024);
        let q = bytes(&query(1, "test.coll", bson::doc! {}));
        let r = bytes(&reply(2, 1, 0, vec![]));
        d.handle(t(1), &seg(CLIENT, SERVER, 0, &[0xee; 32]));
        let out = d.handle(t(2), &seg(SERVER, CLIENT, 0, &r));
        assert_eq!(out.len(), 1);
        let out = d.handle(t(3), &seg(CLIENT, SERVER, 32, &q));
        assert_eq!(out.len(), 1);
        assert_eq!(d.stats().resyncs, 1);
    }
}
