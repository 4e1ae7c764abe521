//! One-direction TCP reassembly and wire framing.
//!
//! A [`Reassembler`] accepts segments for a single direction of a
//! connection in whatever order they arrive and yields complete wire
//! frames in stream order. Sequence numbers are widened to `u64` so that
//! 32-bit wrap-around needs no special casing downstream.

use std::collections::{BTreeMap, VecDeque};

use mongoreplay_record::PreciseTime;
use mongoreplay_wire::{MsgHeader, HEADER_LEN};

/// Default cap on out-of-order bytes held per direction.
pub const MAX_PENDING_BYTES: usize = 4 * 1024 * 1024;

/// A complete wire frame cut from the byte stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Capture time of the segment that completed the frame.
    pub ts: PreciseTime,
    /// The full frame, header included.
    pub bytes: Vec<u8>,
}

/// Counters for one direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    /// Frames emitted.
    pub frames: u64,
    /// Payload bytes already delivered that arrived again.
    pub retransmitted_bytes: u64,
    /// Gaps abandoned because too much data was queued behind them.
    pub gaps_skipped: u64,
    /// Times framing restarted after a bad header.
    pub resyncs: u64,
    /// Stream bytes thrown away while out of sync.
    pub discarded_bytes: u64,
}

/// Reassembles and frames one direction of a TCP stream.
#[derive(Debug)]
pub struct Reassembler {
    /// Absolute sequence number of the next expected byte.
    next_seq: Option<u64>,
    /// Last raw sequence number seen, with its absolute value.
    anchor: Option<(u32, u64)>,
    pending: BTreeMap<u64, (PreciseTime, Vec<u8>)>,
    pending_bytes: usize,
    max_pending_bytes: usize,
    buf: Vec<u8>,
    /// Offsets into `buf` at which a segment began.
    boundaries: VecDeque<usize>,
    stats: ReassemblyStats,
}

impl Reassembler {
    /// Create a reassembler holding at most `max_pending_bytes` of
    /// out-of-order data.
    pub fn new(max_pending_bytes: usize) -> Self {
        Self {
            next_seq: None,
            anchor: None,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            max_pending_bytes,
            buf: Vec::new(),
            boundaries: VecDeque::new(),
            stats: ReassemblyStats::default(),
        }
    }

    /// Counters so far.
    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Bytes held that have not yet formed a frame.
    pub fn buffered_bytes(&self) -> usize {
        self.buf.len() + self.pending_bytes
    }

    /// Feed one segment. Returns every frame it completed.
    pub fn push(&mut self, seq: u32, syn: bool, payload: &[u8], ts: PreciseTime) -> Vec<Frame> {
        let abs = self.widen(seq);
        if syn {
            // SYN consumes one sequence number; payload, if any, follows it.
            self.reset_stream();
            self.next_seq = Some(abs + 1);
            return self.accept(abs + 1, payload, ts);
        }
        if payload.is_empty() {
            return Vec::new();
        }
        if self.next_seq.is_none() {
            // Joined mid-stream: the first byte seen is the first byte kept.
            self.next_seq = Some(abs);
        }
        self.accept(abs, payload, ts)
    }

    fn accept(&mut self, abs: u64, payload: &[u8], ts: PreciseTime) -> Vec<Frame> {
        let mut frames = Vec::new();
        let Some(next) = self.next_seq else {
            return frames;
        };
        if payload.is_empty() {
            return frames;
        }
        let end = abs + payload.len() as u64;

        if end <= next {
            self.stats.retransmitted_bytes += payload.len() as u64;
            return frames;
        }
        if abs > next {
            self.queue(abs, payload, ts);
            if self.pending_bytes > self.max_pending_bytes {
                self.skip_gap();
            } else {
                return frames;
            }
        } else {
            let skip = (next - abs) as usize;
            self.stats.retransmitted_bytes += skip as u64;
            self.append(&payload[skip..]);
            self.next_seq = Some(end);
            self.frame_into(ts, &mut frames);
        }
        self.drain_pending(&mut frames);
        frames
    }

    fn queue(&mut self, abs: u64, payload: &[u8], ts: PreciseTime) {
        match self.pending.get_mut(&abs) {
            Some((_, existing)) if existing.len() >= payload.len() => {
                self.stats.retransmitted_bytes += payload.len() as u64;
            }
            Some(entry) => {
                self.pending_bytes += payload.len() - entry.1.len();
                *entry = (ts, payload.to_vec());
            }
            None => {
                self.pending_bytes += payload.len();
                self.pending.insert(abs, (ts, payload.to_vec()));
            }
        }
    }

    /// Give up on the missing bytes and continue from the earliest queued
    /// segment. Whatever was buffered can no longer be framed.
    fn skip_gap(&mut self) {
        let Some((&first, _)) = self.pending.iter().next() else {
            return;
        };
        tracing::debug!(
            skipped = first.saturating_sub(self.next_seq.unwrap_or(first)),
            pending = self.pending_bytes,
            "abandoning TCP gap"
        );
        self.stats.gaps_skipped += 1;
        self.stats.discarded_bytes += self.buf.len() as u64;
        self.buf.clear();
        self.boundaries.clear();
        self.next_seq = Some(first);
    }

    fn drain_pending(&mut self, frames: &mut Vec<Frame>) {
        while let Some(entry) = self.pending.first_entry() {
            let abs = *entry.key();
            let Some(next) = self.next_seq else { break };
            if abs > next {
                break;
            }
            let (ts, data) = entry.remove();
            self.pending_bytes -= data.len();
            let end = abs + data.len() as u64;
            if end <= next {
                self.stats.retransmitted_bytes += data.len() as u64;
                continue;
            }
            let skip = (next - abs) as usize;
            self.stats.retransmitted_bytes += skip as u64;
            self.append(&data[skip..]);
            self.next_seq = Some(end);
            self.frame_into(ts, frames);
        }
    }

    fn append(&mut self, data: &[u8]) {
        self.boundaries.push_back(self.buf.len());
        self.buf.extend_from_slice(data);
    }

    fn frame_into(&mut self, ts: PreciseTime, frames: &mut Vec<Frame>) {
        while self.buf.len() >= HEADER_LEN {
            let header = match MsgHeader::from_bytes(&self.buf[..HEADER_LEN]) {
                Ok(h) if h.looks_real() => h,
                _ => {
                    self.resync();
                    continue;
                }
            };
            let len = header.message_length as usize;
            if self.buf.len() < len {
                break;
            }
            let bytes: Vec<u8> = self.buf.drain(..len).collect();
            self.consume_boundaries(len);
            self.stats.frames += 1;
            frames.push(Frame { ts, bytes });
        }
    }

    /// Drop bytes up to the next segment boundary after the current head.
    fn resync(&mut self) {
        self.stats.resyncs += 1;
        let cut = self
            .boundaries
            .iter()
            .copied()
            .find(|&b| b > 0)
            .unwrap_or(self.buf.len());
        tracing::trace!(discarded = cut, "framing out of sync");
        self.stats.discarded_bytes += cut as u64;
        self.buf.drain(..cut);
        self.consume_boundaries(cut);
    }

    fn consume_boundaries(&mut self, n: usize) {
        while self.boundaries.front().is_some_and(|&b| b < n) {
            self.boundaries.pop_front();
        }
        for b in self.boundaries.iter_mut() {
            *b -= n;
        }
        if !self.buf.is_empty() && self.boundaries.front() != Some(&0) {
            // The remaining bytes continue a segment whose head was framed.
            self.boundaries.push_front(0);
        }
    }

    fn reset_stream(&mut self) {
        self.stats.discarded_bytes += self.buffered_bytes() as u64;
        self.pending.clear();
        self.pending_bytes = 0;
        self.buf.clear();
        self.boundaries.clear();
    }

    /// Map a 32-bit sequence number onto the absolute 64-bit space,
    /// choosing the value nearest the last one seen.
    fn widen(&mut self, seq: u32) -> u64 {
        let abs = match self.anchor {
            None => (1u64 << 32) | u64::from(seq),
            Some((raw, abs)) => {
                let delta = i64::from(seq.wrapping_sub(raw) as i32);
                abs.wrapping_add_signed(delta)
            }
        };
        self.anchor = Some((seq, abs));
        abs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongoreplay_wire::OpCode;

    fn frame(request_id: i32, body_len: usize) -> Vec<u8> {
        let header = MsgHeader {
            message_length: (HEADER_LEN + body_len) as i32,
            request_id,
            response_to: 0,
            raw_op_code: OpCode::Msg.as_i32(),
        };
        let mut out = header.to_bytes().to_vec();
        out.extend((0..body_len).map(|i| i as u8));
        out
    }

    fn ts(sec: i64) -> PreciseTime {
        PreciseTime::new(sec, 0)
    }

    fn ids(frames: &[Frame]) -> Vec<i32> {
        frames
            .iter()
            .map(|f| MsgHeader::from_bytes(&f.bytes).unwrap().request_id)
            .collect()
    }

    #[test]
    fn in_order_segments_frame_cleanly() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        assert!(r.push(99, true, &[], ts(0)).is_empty());
        let a = frame(1, 10);
        let b = frame(2, 12);
        let got = r.push(100, false, &a, ts(1));
        assert_eq!(ids(&got), vec![1]);
        let got = r.push(100 + a.len() as u32, false, &b, ts(2));
        assert_eq!(ids(&got), vec![2]);
        assert_eq!(got[0].ts, ts(2));
        assert_eq!(r.buffered_bytes(), 0);
    }

    #[test]
    fn frame_split_across_segments_takes_last_timestamp() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        let a = frame(7, 40);
        assert!(r.push(0, false, &a[..20], ts(1)).is_empty());
        let got = r.push(20, false, &a[20..], ts(5));
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].bytes, a);
        assert_eq!(got[0].ts, ts(5));
    }

    #[test]
    fn out_of_order_segments_are_held_until_gap_fills() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        r.push(999, true, &[], ts(0));
        let a = frame(1, 8);
        let b = frame(2, 8);
        let second_at = 1000 + a.len() as u32;
        assert!(r.push(second_at, false, &b, ts(2)).is_empty());
        let got = r.push(1000, false, &a, ts(3));
        assert_eq!(ids(&got), vec![1, 2]);
        assert_eq!(got[1].ts, ts(2));
    }

    #[test]
    fn retransmissions_are_trimmed() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        let a = frame(1, 30);
        assert!(r.push(0, false, &a[..25], ts(1)).is_empty());
        // Overlaps the first 25 bytes, adds the rest.
        let got = r.push(0, false, &a, ts(2));
        assert_eq!(ids(&got), vec![1]);
        // Pure duplicate.
        assert!(r.push(0, false, &a, ts(3)).is_empty());
        assert_eq!(r.stats().retransmitted_bytes, 25 + a.len() as u64);
    }

    #[test]
    fn sequence_wrap_is_transparent() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        let a = frame(1, 20);
        let start = u32::MAX - 9;
        assert!(r.push(start, false, &a[..10], ts(1)).is_empty());
        let got = r.push(start.wrapping_add(10), false, &a[10..], ts(2));
        assert_eq!(ids(&got), vec![1]);
    }

    #[test]
    fn garbage_resyncs_at_next_segment_boundary() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        let junk = vec![0xffu8; 24];
        assert!(r.push(0, false, &junk, ts(1)).is_empty());
        let a = frame(3, 8);
        let got = r.push(24, false, &a, ts(2));
        assert_eq!(ids(&got), vec![3]);
        assert_eq!(r.stats().resyncs, 1);
        assert_eq!(r.stats().discarded_bytes, 24);
    }

    #[test]
    fn garbage_without_boundary_is_dropped_entirely() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        assert!(r.push(0, false, &[0u8; 40], ts(1)).is_empty());
        assert_eq!(r.buffered_bytes(), 0);
    }

    #[test]
    fn gap_is_abandoned_past_pending_limit() {
        let mut r = Reassembler::new(64);
        let lost = frame(1, 16);
        let after = frame(2, 80);
        let at = lost.len() as u32;
        r.push(0, false, &lost[..4], ts(1));
        // A hole from 4..32 and 96 bytes queued past it.
        let got = r.push(at, false, &after, ts(2));
        assert_eq!(ids(&got), vec![2]);
        assert_eq!(r.stats().gaps_skipped, 1);
    }

    #[test]
    fn syn_restarts_the_stream() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        r.push(0, false, &frame(1, 30)[..10], ts(1));
        r.push(5000, true, &[], ts(2));
        assert_eq!(r.buffered_bytes(), 0);
        let got = r.push(5001, false, &frame(9, 8), ts(3));
        assert_eq!(ids(&got), vec![9]);
    }

    #[test]
    fn two_frames_in_one_segment() {
        let mut r = Reassembler::new(MAX_PENDING_BYTES);
        let mut both = frame(1, 9);
        both.extend(frame(2, 20));
        let got = r.push(0, false, &both, ts(1));
        assert_eq!(ids(&got), vec![1, 2]);
    }

    #[cfg(not(miri))]
    mod proptests {
        use super::*;
        use mongoreplay_wire::OpCode;
        use proptest::prelude::*;

        fn stream(body_lens: &[usize]) -> Vec<u8> {
            let mut out = Vec::new();
            for (i, &len) in body_lens.iter().enumerate() {
                let header = MsgHeader {
                    message_length: (HEADER_LEN + len) as i32,
                    request_id: i as i32 + 1,
                    response_to: 0,
                    raw_op_code: OpCode::Query.as_i32(),
                };
                out.extend_from_slice(&header.to_bytes());
                out.extend(std::iter::repeat_n(0xab, len));
            }
            out
        }

        /// Initial sequence number, the stream, and its segments in arrival order.
        fn shuffled_segments() -> impl Strategy<Value = (u32, Vec<u8>, Vec<(usize, usize)>)> {
            (
                any::<u32>(),
                prop::collection::vec(8usize..200, 1..8),
                1usize..300,
            )
                .prop_flat_map(|(isn, lens, mss)| {
                    let bytes = stream(&lens);
                    let spans: Vec<(usize, usize)> = (0..bytes.len())
                        .step_by(mss)
                        .map(|s| (s, (s + mss).min(bytes.len())))
                        .collect();
                    (Just(isn), Just(bytes), Just(spans).prop_shuffle())
                })
        }

        proptest! {
            #[test]
            fn any_arrival_order_frames_the_whole_stream((isn, bytes, spans) in shuffled_segments()) {
                let mut r = Reassembler::new(MAX_PENDING_BYTES);
                let ts = PreciseTime::new(1, 0);
                r.push(isn, true, &[], ts);
                let mut framed = Vec::new();
                for (start, end) in spans {
                    let seq = isn.wrapping_add(1).wrapping_add(start as u32);
                    for f in r.push(seq, false, &bytes[start..end], ts) {
                        framed.extend_from_slice(&f.bytes);
                    }
                }
                prop_assert_eq!(framed, bytes);
                prop_assert_eq!(r.buffered_bytes(), 0);
                prop_assert_eq!(r.stats().resyncs, 0);
            }
        }
    }
}
