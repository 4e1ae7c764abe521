//! Non-executing scan that seeds a [`PreprocessedCursorMap`].

use mongoreplay_record::{RecordError, RecordedOp};
use mongoreplay_wire::Replyable;

use crate::context::correlation_key;
use crate::cursor_map::{CursorKey, PreprocessedCursorMap};
use crate::error::ReplayError;

/// Learn from `ops` which recorded cursors are produced, by which request,
/// on which connection, and how often they are used afterwards.
///
/// `ops` must carry the same generation stamps the replay will see.
/// Undecodable ops are skipped; they are reported again during replay.
pub fn preprocess<I>(ops: I) -> Result<PreprocessedCursorMap, ReplayError>
where
    I: IntoIterator<Item = Result<RecordedOp, RecordError>>,
{
    let mut map = PreprocessedCursorMap::new();
    let mut scanned = 0u64;
    for op in ops {
        let op = op?;
        scanned += 1;
        if op.eof {
            continue;
        }
        let parsed = match op.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::debug!(connection = op.seen_connection_num, error = %e, "skipping undecodable op");
                continue;
            }
        };
        if parsed.is_reply() {
            let Some(reply) = parsed.into_reply() else {
                continue;
            };
            let cursor = reply.cursor_id().unwrap_or(0);
            if cursor != 0 {
                let producer = correlation_key(
                    &op.dst_endpoint,
                    &op.src_endpoint,
                    op.raw.header.response_to,
                    op.generation,
                );
                map.register(
                    CursorKey::new(cursor, op.generation),
                    producer,
                    op.seen_connection_num,
                );
            }
        } else if let Some(bearing) = parsed.as_cursor_bearing() {
            for id in bearing.cursor_ids().unwrap_or_default() {
                map.note_use(CursorKey::new(id, op.generation));
            }
        }
    }
    map.retain_used();
    tracing::info!(ops = scanned, cursors = map.len(), "preprocessing finished");
    Ok(map)
}
