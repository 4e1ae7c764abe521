//! Cursor correlation and timed playback of recorded MongoDB traffic.
//!
//! Replays a recording against a live server with the original relative
//! timing, one live socket per recorded connection, and rewrites the
//! cursor ids the server hands out so that later getMores and
//! killCursors refer to the live cursors rather than the recorded ones.
//!
//! # Architecture
//!
//! - [`play`] is the entry point: reads the file (optionally twice, see
//!   [`preprocess()`]), drives a [`Scheduler`] and returns a
//!   [`PlaybackReport`]
//! - [`Scheduler`] stamps `play_at` and routes ops to per-connection
//!   workers over bounded channels
//! - [`ExecutionContext`] pairs recorded and live replies and owns the
//!   [`CursorMap`]; it is shared by every worker behind one mutex
//! - [`ExpiringCache`] holds unpaired replies until their time-to-live
//! - [`StatSink`] receives an [`OpStat`] per executed op

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod cache;
pub mod config;
pub mod context;
pub mod cursor_map;
pub mod error;
pub mod preprocess;
pub mod scheduler;
pub mod stats;
mod worker;

pub use cache::ExpiringCache;
pub use config::{parse_target, ConfigError, PlaybackConfig, DEFAULT_PORT, QUEUE_GRANULARITY};
pub use context::{correlation_key, CorrelationStats, CursorMap, ExecutionContext, ReplyPair};
pub use cursor_map::{CursorKey, LiveCursorMap, Lookup, PreprocessedCursorMap};
pub use error::ReplayError;
pub use preprocess::preprocess;
pub use scheduler::{play, replay, schedule_offset, Scheduler};
pub use stats::{MemoryStatSink, NullStatSink, OpStat, PlaybackReport, StatSink, TracingStatSink, WorkerReport};
