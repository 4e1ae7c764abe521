//! Reply correlation and cursor rewriting shared by all connection workers.
//!
//! Every recorded reply that carries a cursor is paired with the live
//! reply to the same request. A pair is keyed by the request's correlation
//! key (see [`correlation_key`]); once both halves are present it is
//! committed, which teaches the cursor map that the recorded cursor id
//! corresponds to the live one. Requests that reference cursors are then
//! rewritten through that map before they are sent.
//!
//! All correlation state sits behind one `Mutex`. That lock is the only
//! point of contention between workers and is never held while waiting
//! for another connection.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use smallvec::SmallVec;

use mongoreplay_record::RecordedOp;
use mongoreplay_wire::{Op, Reply, Replyable};

use crate::cache::ExpiringCache;
use crate::cursor_map::{CursorKey, LiveCursorMap, Lookup, PreprocessedCursorMap};
use crate::error::ReplayError;

/// Correlation key of a request: `"{client}:{server}:{request_id}:{generation}"`.
///
/// For a request executed live the endpoints are its `(src, dst)` and
/// the id is its `request_id`; for a recorded reply they are its
/// `(dst, src)` and the id is its `response_to`.
pub fn correlation_key(client: &str, server: &str, id: i32, generation: i32) -> String {
    format!("{client}:{server}:{id}:{generation}")
}

/// The two replies to one request.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReplyPair {
    /// Reply read off the live socket.
    pub from_wire: Option<Reply>,
    /// Reply found in the recording.
    pub from_file: Option<Reply>,
    /// Replay generation of the request.
    pub generation: i32,
}

impl ReplyPair {
    /// Whether both replies are present.
    pub fn is_complete(&self) -> bool {
        self.from_wire.is_some() && self.from_file.is_some()
    }

    fn cursor_ids(&self) -> Option<(i64, i64)> {
        let recorded = self.from_file.as_ref()?.cursor_id().ok()?;
        let live = self.from_wire.as_ref()?.cursor_id().ok()?;
        Some((recorded, live))
    }
}

/// Which half of a pair a reply fills.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Side {
    Wire,
    File,
}

/// Strategy for resolving recorded cursor ids.
#[derive(Debug)]
pub enum CursorMap {
    /// Learn mappings during replay only.
    Live(LiveCursorMap),
    /// Seeded by a scan of the recording.
    Preprocessed(PreprocessedCursorMap),
}

impl CursorMap {
    fn set(&mut self, key: CursorKey, live_id: i64) {
        match self {
            Self::Live(m) => m.set(key, live_id),
            Self::Preprocessed(m) => m.resolve(key, live_id),
        }
    }

    fn mark_failed(&mut self, key: CursorKey) {
        match self {
            Self::Live(m) => m.mark_failed(key),
            Self::Preprocessed(m) => m.mark_failed(key),
        }
    }

    fn lookup(&mut self, key: CursorKey, connection: i64) -> Lookup {
        match self {
            Self::Live(m) => m.lookup(key),
            Self::Preprocessed(m) => m.lookup(key, connection),
        }
    }
}

/// Counters kept by the context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CorrelationStats {
    /// Pairs committed into the cursor map.
    pub pairs_committed: u64,
    /// Unpaired replies evicted after their time-to-live.
    pub pairs_expired: u64,
    /// Cursor ids that could not be mapped.
    pub unmapped_cursors: u64,
    /// Waits for another connection's cursor that timed out.
    pub cursor_wait_timeouts: u64,
}

struct State {
    incomplete: ExpiringCache<String, ReplyPair>,
    complete: HashMap<String, ReplyPair>,
    cursors: CursorMap,
    stats: CorrelationStats,
}

type Clock = Box<dyn Fn() -> Instant + Send + Sync>;

/// Correlation state for one replay run.
pub struct ExecutionContext {
    state: Mutex<State>,
    cursor_wait: Duration,
    full_speed: bool,
    driver_ops_filtered: bool,
    clock: Clock,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("cursor_wait", &self.cursor_wait)
            .field("full_speed", &self.full_speed)
            .field("driver_ops_filtered", &self.driver_ops_filtered)
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Create a context.
    ///
    /// Unpaired replies expire after `reply_ttl`; a request waits at most
    /// `cursor_wait` for a cursor produced on another connection.
    pub fn new(
        cursors: CursorMap,
        reply_ttl: Duration,
        cursor_wait: Duration,
        full_speed: bool,
        driver_ops_filtered: bool,
    ) -> Self {
        Self {
            state: Mutex::new(State {
                incomplete: ExpiringCache::new(reply_ttl),
                complete: HashMap::new(),
                cursors,
                stats: CorrelationStats::default(),
            }),
            cursor_wait,
            full_speed,
            driver_ops_filtered,
            clock: Box::new(Instant::now),
        }
    }

    /// Replace the clock used for reply expiry.
    pub fn with_clock(mut self, clock: impl Fn() -> Instant + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Whether recorded timing is ignored.
    pub fn full_speed(&self) -> bool {
        self.full_speed
    }

    /// Whether the recording was written without driver ops.
    pub fn driver_ops_filtered(&self) -> bool {
        self.driver_ops_filtered
    }

    /// Counters so far.
    pub fn stats(&self) -> CorrelationStats {
        self.lock().stats
    }

    /// Replies waiting for their other half.
    pub fn incomplete_len(&self) -> usize {
        self.lock().incomplete.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the live reply to `request`. Replies without a cursor are
    /// ignored.
    pub fn add_from_wire(&self, reply: Reply, request: &RecordedOp) -> Result<(), ReplayError> {
        if reply.cursor_id()? == 0 {
            return Ok(());
        }
        let key = correlation_key(
            &request.src_endpoint,
            &request.dst_endpoint,
            request.raw.header.request_id,
            request.generation,
        );
        self.add(key, Side::Wire, reply, request.generation);
        Ok(())
    }

    /// Record a reply found in the recording. Replies without a cursor
    /// are ignored.
    pub fn add_from_file(&self, reply: Reply, recorded: &RecordedOp) -> Result<(), ReplayError> {
        if reply.cursor_id()? == 0 {
            return Ok(());
        }
        let key = correlation_key(
            &recorded.dst_endpoint,
            &recorded.src_endpoint,
            reply.header().response_to,
            recorded.generation,
        );
        self.add(key, Side::File, reply, recorded.generation);
        Ok(())
    }

    fn add(&self, key: String, side: Side, reply: Reply, generation: i32) {
        let now = (self.clock)();
        let mut guard = self.lock();
        let state = &mut *guard;
        let slot = |pair: &mut ReplyPair| match side {
            Side::Wire => pair.from_wire = Some(reply),
            Side::File => pair.from_file = Some(reply),
        };
        match state.incomplete.get_mut(&key, now) {
            Some(pair) => {
                slot(pair);
                if pair.is_complete() {
                    if let Some(pair) = state.incomplete.remove(&key) {
                        state.complete.insert(key, pair);
                    }
                }
            }
            None => {
                let mut pair = ReplyPair {
                    generation,
                    ..ReplyPair::default()
                };
                slot(&mut pair);
                // An expired half is replaced, not completed.
                state.incomplete.insert(key, pair, now);
            }
        }
    }

    /// Move completed pairs into the cursor map and evict expired
    /// incomplete ones. Cheap when there is nothing to do; run after
    /// every op.
    pub fn commit(&self) {
        let now = (self.clock)();
        let mut state = self.lock();
        let state = &mut *state;
        for (key, pair) in state.complete.drain() {
            if let Some((recorded, live)) = pair.cursor_ids() {
                tracing::trace!(key, recorded, live, "cursor mapped");
                state
                    .cursors
                    .set(CursorKey::new(recorded, pair.generation), live);
                state.stats.pairs_committed += 1;
            }
        }
        for (key, pair) in state.incomplete.sweep(now) {
            state.stats.pairs_expired += 1;
            // A recorded cursor the live server never produced.
            if let Some(recorded) = pair.from_file.as_ref().and_then(|r| r.cursor_id().ok()) {
                tracing::debug!(key, recorded, "reply expired unpaired");
                state
                    .cursors
                    .mark_failed(CursorKey::new(recorded, pair.generation));
            }
        }
    }

    /// The request `request` was expected to create a cursor but failed
    /// or came back without one. Its pending cursor is marked failed and
    /// anyone waiting on it is released.
    pub fn mark_failed(&self, request: &RecordedOp) {
        let key = correlation_key(
            &request.src_endpoint,
            &request.dst_endpoint,
            request.raw.header.request_id,
            request.generation,
        );
        let mut state = self.lock();
        let state = &mut *state;
        let pending = state.incomplete.remove(&key);
        match &mut state.cursors {
            CursorMap::Preprocessed(m) => {
                m.mark_producer_failed(&key);
            }
            CursorMap::Live(m) => {
                if let Some(recorded) = pending
                    .as_ref()
                    .and_then(|p| p.from_file.as_ref())
                    .and_then(|r| r.cursor_id().ok())
                {
                    m.mark_failed(CursorKey::new(recorded, request.generation));
                }
            }
        }
    }

    /// Map every cursor id referenced by `op` to its live equivalent.
    ///
    /// Ids without a mapping are removed. Returns `false`, leaving `op`
    /// untouched, when no id could be mapped; the op must then be
    /// dropped. Ops that reference no cursor are left alone and return
    /// `true`.
    pub fn rewrite_cursors(
        &self,
        op: &mut Op,
        connection: i64,
        generation: i32,
    ) -> Result<bool, ReplayError> {
        let Some(bearing) = op.as_cursor_bearing_mut() else {
            return Ok(true);
        };
        let recorded = bearing.cursor_ids()?;
        let mut live: SmallVec<[i64; 1]> = SmallVec::new();
        for id in recorded.iter().copied() {
            let key = CursorKey::new(id, generation);
            match self.resolve(key, connection) {
                Some(live_id) => live.push(live_id),
                None => {
                    tracing::debug!(connection, cursor = id, generation, "no live cursor");
                    let mut state = self.lock();
                    state.stats.unmapped_cursors += 1;
                    state.cursors.mark_failed(key);
                }
            }
        }
        if live.is_empty() {
            return Ok(false);
        }
        bearing.set_cursor_ids(&live)?;
        Ok(true)
    }

    fn resolve(&self, key: CursorKey, connection: i64) -> Option<i64> {
        let mut waited = false;
        loop {
            let lookup = self.lock().cursors.lookup(key, connection);
            match lookup {
                Lookup::Live(id) => return Some(id),
                Lookup::Missing | Lookup::Failed => return None,
                Lookup::Wait(_) if waited => return None,
                Lookup::Wait(rx) => {
                    waited = true;
                    match rx.recv_timeout(self.cursor_wait) {
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => continue,
                        Err(RecvTimeoutError::Timeout) => {
                            tracing::warn!(
                                connection,
                                cursor = key.recorded_id,
                                wait = ?self.cursor_wait,
                                "timed out waiting for cursor from another connection"
                            );
                            self.lock().stats.cursor_wait_timeouts += 1;
                            return None;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    use bson::doc;
    use mongoreplay_test_utils::ops::{cursor_body, get_more, msg_reply, query, recorded, reply};

    fn live_ctx() -> ExecutionContext {
        ExecutionContext::new(
            CursorMap::Live(LiveCursorMap::new()),
            Duration::from_secs(60),
            Duration::from_millis(200),
            false,
            false,
        )
    }

    fn as_reply(op: mongoreplay_wire::Op) -> Reply {
        op.into_reply().unwrap()
    }

    #[test]
    fn correlation_key_format() {
        assert_eq!(correlation_key("a:1", "b:2", 7, 0), "a:1:b:2:7:0");
    }

    #[test]
    fn paired_replies_rewrite_getmore() {
        let ctx = live_ctx();
        let find = recorded(&query(10, "db.c", doc! {}), 0, 1);
        let recorded_reply = recorded(&reply(20, 10, 111, vec![]), 1, 1);

        ctx.add_from_file(as_reply(reply(20, 10, 111, vec![])), &recorded_reply)
            .unwrap();
        assert_eq!(ctx.incomplete_len(), 1);
        ctx.add_from_wire(as_reply(reply(5, 10, 999, vec![])), &find)
            .unwrap();
        assert_eq!(ctx.incomplete_len(), 0);
        ctx.commit();
        assert_eq!(ctx.stats().pairs_committed, 1);

        let mut gm = get_more(11, "db.c", 111);
        assert!(ctx.rewrite_cursors(&mut gm, 1, 0).unwrap());
        let ids = gm.as_cursor_bearing().unwrap().cursor_ids().unwrap();
        assert_eq!(ids.as_slice(), &[999]);
    }

    #[test]
    fn cursorless_replies_are_ignored() {
        let ctx = live_ctx();
        let find = recorded(&query(10, "db.c", doc! {}), 0, 1);
        ctx.add_from_wire(as_reply(reply(5, 10, 0, vec![])), &find)
            .unwrap();
        let r = msg_reply(3, 10, doc! { "ok": 1 });
        ctx.add_from_file(as_reply(r.clone()), &recorded(&r, 1, 1))
            .unwrap();
        assert_eq!(ctx.incomplete_len(), 0);
    }

    #[test]
    fn unmapped_getmore_is_dropped() {
        let ctx = live_ctx();
        let mut gm = get_more(11, "db.c", 111);
        assert!(!ctx.rewrite_cursors(&mut gm, 1, 0).unwrap());
        assert_eq!(ctx.stats().unmapped_cursors, 1);
        // Left untouched.
        let ids = gm.as_cursor_bearing().unwrap().cursor_ids().unwrap();
        assert_eq!(ids.as_slice(), &[111]);
    }

    #[test]
    fn msg_reply_cursor_is_learned() {
        let ctx = live_ctx();
        let find = recorded(&query(10, "db.c", doc! {}), 0, 1);
        let file = msg_reply(20, 10, cursor_body(111, "db.c", vec![]));
        ctx.add_from_file(as_reply(file.clone()), &recorded(&file, 1, 1))
            .unwrap();
        ctx.add_from_wire(as_reply(msg_reply(5, 10, cursor_body(999, "db.c", vec![]))), &find)
            .unwrap();
        ctx.commit();
        let mut gm = get_more(11, "db.c", 111);
        assert!(ctx.rewrite_cursors(&mut gm, 1, 0).unwrap());
    }

    #[test]
    fn expired_half_pairs_are_swept_on_commit() {
        let t0 = Instant::now();
        let offset = Arc::new(AtomicU64::new(0));
        let clock_offset = Arc::clone(&offset);
        let ctx = live_ctx()
            .with_clock(move || t0 + Duration::from_secs(clock_offset.load(Ordering::SeqCst)));
        let r = reply(20, 10, 111, vec![]);
        ctx.add_from_file(as_reply(r.clone()), &recorded(&r, 1, 1))
            .unwrap();
        ctx.commit();
        assert_eq!(ctx.incomplete_len(), 1);

        offset.store(61, Ordering::SeqCst);
        ctx.commit();
        assert_eq!(ctx.incomplete_len(), 0);
        assert_eq!(ctx.stats().pairs_expired, 1);
    }

    #[test]
    fn mark_failed_releases_cross_connection_waiter() {
        let mut map = PreprocessedCursorMap::new();
        let find = recorded(&query(10, "db.c", doc! {}), 0, 1);
        let producer = correlation_key(&find.src_endpoint, &find.dst_endpoint, 10, 0);
        map.register(CursorKey::new(111, 0), producer, 1);
        map.note_use(CursorKey::new(111, 0));
        let ctx = Arc::new(ExecutionContext::new(
            CursorMap::Preprocessed(map),
            Duration::from_secs(60),
            Duration::from_secs(10),
            false,
            false,
        ));

        let waiter_ctx = Arc::clone(&ctx);
        let waiter = std::thread::spawn(move || {
            let mut gm = get_more(11, "db.c", 111);
            waiter_ctx.rewrite_cursors(&mut gm, 2, 0).unwrap()
        });
        std::thread::sleep(Duration::from_millis(50));
        ctx.mark_failed(&find);
        assert!(!waiter.join().unwrap());
        assert_eq!(ctx.stats().cursor_wait_timeouts, 0);
    }

    #[test]
    fn cross_connection_wait_times_out() {
        let mut map = PreprocessedCursorMap::new();
        map.register(CursorKey::new(7, 0), "nobody".into(), 1);
        map.note_use(CursorKey::new(7, 0));
        let ctx = ExecutionContext::new(
            CursorMap::Preprocessed(map),
            Duration::from_secs(60),
            Duration::from_millis(20),
            false,
            false,
        );
        let mut gm = get_more(11, "db.c", 7);
        assert!(!ctx.rewrite_cursors(&mut gm, 2, 0).unwrap());
        assert_eq!(ctx.stats().cursor_wait_timeouts, 1);
    }

    #[test]
    fn ops_without_cursors_pass_through() {
        let ctx = live_ctx();
        let mut q = query(1, "db.c", doc! {});
        assert!(ctx.rewrite_cursors(&mut q, 1, 0).unwrap());
    }
}
