//! Recorded → live cursor id maps.
//!
//! Two strategies are offered. [`LiveCursorMap`] learns mappings only as
//! replies are paired during replay; a lookup that finds nothing is a
//! miss. [`PreprocessedCursorMap`] is seeded by a scan of the recording
//! and knows, before replay starts, which request produces each recorded
//! cursor, on which connection, and how many later ops use it. A lookup
//! for a cursor still being produced on another connection hands back a
//! channel to wait on.

use std::collections::{HashMap, HashSet};

use crossbeam_channel::{Receiver, Sender};

/// A recorded cursor id within one replay generation.
///
/// Cursor ids repeat across generations of a repeated recording, while
/// the live server hands out fresh ones for each pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CursorKey {
    /// Cursor id as recorded.
    pub recorded_id: i64,
    /// Replay generation.
    pub generation: i32,
}

impl CursorKey {
    /// Key for `recorded_id` in `generation`.
    pub fn new(recorded_id: i64, generation: i32) -> Self {
        Self {
            recorded_id,
            generation,
        }
    }
}

/// Result of resolving one recorded cursor id.
#[derive(Debug)]
pub enum Lookup {
    /// The live cursor id to send.
    Live(i64),
    /// No mapping exists and none is expected.
    Missing,
    /// The producing request failed or produced no cursor.
    Failed,
    /// The producer has not committed yet; the receiver is signalled (or
    /// disconnected) when it does or fails.
    Wait(Receiver<()>),
}

// ── Live ──────────────────────────────────────────────────────────

/// Mappings learned during replay only.
#[derive(Debug, Default)]
pub struct LiveCursorMap {
    live: HashMap<CursorKey, i64>,
    failed: HashSet<CursorKey>,
}

impl LiveCursorMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `key` maps to `live_id`. A zero live id marks failure.
    pub fn set(&mut self, key: CursorKey, live_id: i64) {
        if live_id == 0 {
            self.mark_failed(key);
            return;
        }
        self.failed.remove(&key);
        self.live.insert(key, live_id);
    }

    /// Resolve `key`.
    pub fn lookup(&self, key: CursorKey) -> Lookup {
        if let Some(&id) = self.live.get(&key) {
            Lookup::Live(id)
        } else if self.failed.contains(&key) {
            Lookup::Failed
        } else {
            Lookup::Missing
        }
    }

    /// Remember that `key` will never resolve.
    pub fn mark_failed(&mut self, key: CursorKey) {
        self.live.remove(&key);
        self.failed.insert(key);
    }

    /// Number of live mappings held.
    pub fn len(&self) -> usize {
        self.live.len()
    }

    /// Whether no live mapping is held.
    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

// ── Preprocessed ──────────────────────────────────────────────────

#[derive(Debug)]
enum CursorState {
    Pending(Vec<Sender<()>>),
    Live(i64),
    Failed,
}

#[derive(Debug)]
struct KnownCursor {
    producer: String,
    connection: i64,
    uses: usize,
    state: CursorState,
}

/// Mappings seeded from a scan of the recording.
#[derive(Debug, Default)]
pub struct PreprocessedCursorMap {
    cursors: HashMap<CursorKey, KnownCursor>,
    by_producer: HashMap<String, CursorKey>,
}

impl PreprocessedCursorMap {
    /// An empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare that the request with correlation key `producer`, sent on
    /// `connection`, creates the recorded cursor `key`. The first producer
    /// of a key wins; replies to later getMores repeat the id.
    pub fn register(&mut self, key: CursorKey, producer: String, connection: i64) {
        if self.cursors.contains_key(&key) {
            return;
        }
        self.by_producer.insert(producer.clone(), key);
        self.cursors.insert(
            key,
            KnownCursor {
                producer,
                connection,
                uses: 0,
                state: CursorState::Pending(Vec::new()),
            },
        );
    }

    /// Count one later op referencing `key`. Unknown keys are ignored.
    pub fn note_use(&mut self, key: CursorKey) {
        if let Some(c) = self.cursors.get_mut(&key) {
            c.uses += 1;
        }
    }

    /// Forget cursors that no op ever references.
    pub fn retain_used(&mut self) {
        let by_producer = &mut self.by_producer;
        self.cursors.retain(|_, c| {
            if c.uses == 0 {
                by_producer.remove(&c.producer);
            }
            c.uses > 0
        });
    }

    /// Outstanding uses of `key`, if it is known.
    pub fn uses(&self, key: CursorKey) -> Option<usize> {
        self.cursors.get(&key).map(|c| c.uses)
    }

    /// Number of cursors tracked.
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether no cursor is tracked.
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }

    /// Resolve `key` for a request sent on `connection`.
    ///
    /// Resolved lookups consume one use; the mapping is released when the
    /// last use is consumed. A cursor still pending on the requesting
    /// connection itself resolves as [`Lookup::Missing`]: its producer has
    /// already run there, so waiting could never succeed.
    pub fn lookup(&mut self, key: CursorKey, connection: i64) -> Lookup {
        let Some(cursor) = self.cursors.get_mut(&key) else {
            return Lookup::Missing;
        };
        let outcome = match &mut cursor.state {
            CursorState::Live(id) => Lookup::Live(*id),
            CursorState::Failed => Lookup::Failed,
            CursorState::Pending(_) if cursor.connection == connection => Lookup::Missing,
            CursorState::Pending(waiters) => {
                let (tx, rx) = crossbeam_channel::bounded(1);
                waiters.push(tx);
                return Lookup::Wait(rx);
            }
        };
        self.consume(key);
        outcome
    }

    /// Record the live id for `key`, releasing waiters. A zero live id
    /// marks failure. Unknown keys are ignored.
    pub fn resolve(&mut self, key: CursorKey, live_id: i64) {
        if live_id == 0 {
            self.mark_failed(key);
            return;
        }
        if let Some(c) = self.cursors.get_mut(&key) {
            let old = std::mem::replace(&mut c.state, CursorState::Live(live_id));
            notify(old);
        }
    }

    /// Mark `key` failed, releasing waiters.
    pub fn mark_failed(&mut self, key: CursorKey) {
        if let Some(c) = self.cursors.get_mut(&key) {
            let old = std::mem::replace(&mut c.state, CursorState::Failed);
            notify(old);
        }
    }

    /// Mark failed whatever cursor the request `producer` was expected to
    /// create. Returns whether such a cursor existed.
    pub fn mark_producer_failed(&mut self, producer: &str) -> bool {
        match self.by_producer.get(producer).copied() {
            Some(key) => {
                self.mark_failed(key);
                true
            }
            None => false,
        }
    }

    /// Consume one use of `key` without resolving it.
    pub fn consume(&mut self, key: CursorKey) {
        let Some(c) = self.cursors.get_mut(&key) else {
            return;
        };
        c.uses = c.uses.saturating_sub(1);
        if c.uses == 0 {
            if let Some(c) = self.cursors.remove(&key) {
                self.by_producer.remove(&c.producer);
                notify(c.state);
            }
        }
    }
}

fn notify(state: CursorState) {
    if let CursorState::Pending(waiters) = state {
        for tx in waiters {
            let _ = tx.try_send(());
        }
    }
}
