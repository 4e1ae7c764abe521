//! Per-op keep/drop decisions.

use std::collections::HashSet;
use std::time::Duration;

use mongoreplay_record::{PreciseTime, RecordedOp};
use mongoreplay_wire::is_driver_op;

/// Why an op was not kept.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// Seen before `start_at` or at/after the end of the window.
    OutsideWindow,
    /// A driver housekeeping command or its reply.
    DriverOp,
}

/// Stateful op selector.
///
/// The window is `[max(start_at, first), first + duration)`, where
/// `first` is the `seen` time of the first op that passes `start_at`.
#[derive(Debug)]
pub struct Selector {
    start_at: Option<PreciseTime>,
    duration: Option<Duration>,
    remove_driver_ops: bool,
    window_end: Option<PreciseTime>,
    /// `(connection, request_id)` of driver requests already removed.
    removed_requests: HashSet<(i64, i32)>,
}

impl Selector {
    /// A selector with the given window and driver-op policy.
    pub fn new(
        start_at: Option<PreciseTime>,
        duration: Option<Duration>,
        remove_driver_ops: bool,
    ) -> Self {
        Self {
            start_at,
            duration,
            remove_driver_ops,
            window_end: None,
            removed_requests: HashSet::new(),
        }
    }

    /// End of the window, once the first op has been retained.
    pub fn window_end(&self) -> Option<PreciseTime> {
        self.window_end
    }

    /// Decide whether to keep `op`.
    pub fn check(&mut self, op: &RecordedOp) -> Result<(), Rejection> {
        if self.start_at.is_some_and(|start| op.seen < start) {
            return Err(Rejection::OutsideWindow);
        }
        if self.window_end.is_some_and(|end| op.seen >= end) {
            return Err(Rejection::OutsideWindow);
        }
        if self.remove_driver_ops && !op.eof && self.is_driver_traffic(op) {
            return Err(Rejection::DriverOp);
        }
        if self.window_end.is_none() {
            if let Some(duration) = self.duration {
                self.window_end = Some(op.seen + duration);
            }
        }
        Ok(())
    }

    fn is_driver_traffic(&mut self, op: &RecordedOp) -> bool {
        let header = op.raw.header;
        if op.is_reply() {
            return self
                .removed_requests
                .remove(&(op.seen_connection_num, header.response_to));
        }
        match op.parse() {
            Ok(parsed) if is_driver_op(&parsed) => {
                if parsed.expects_reply() {
                    self.removed_requests
                        .insert((op.seen_connection_num, header.request_id));
                }
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::debug!(connection = op.seen_connection_num, error = %e, "undecodable op kept");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use mongoreplay_test_utils::ops::{
        command, command_reply, eof, insert, msg, msg_reply, query, recorded, reply,
    };

    fn ins(sec: i64) -> RecordedOp {
        recorded(&insert(1, "db.c", vec![doc! {}]), sec, 1)
    }

    #[test]
    fn start_at_is_absolute() {
        let mut s = Selector::new(Some(PreciseTime::new(10, 0)), None, false);
        assert_eq!(s.check(&ins(9)), Err(Rejection::OutsideWindow));
        assert_eq!(s.check(&ins(10)), Ok(()));
        assert_eq!(s.check(&ins(500)), Ok(()));
    }

    #[test]
    fn duration_counts_from_first_retained_op() {
        let mut s = Selector::new(
            Some(PreciseTime::new(10, 0)),
            Some(Duration::from_secs(5)),
            false,
        );
        assert!(s.check(&ins(8)).is_err());
        assert!(s.window_end().is_none());
        assert!(s.check(&ins(12)).is_ok());
        assert_eq!(s.window_end(), Some(PreciseTime::new(17, 0)));
        assert!(s.check(&ins(16)).is_ok());
        assert_eq!(s.check(&ins(17)), Err(Rejection::OutsideWindow));
    }

    #[test]
    fn eof_markers_follow_the_window() {
        let mut s = Selector::new(None, Some(Duration::from_secs(1)), true);
        assert!(s.check(&eof(0, 1)).is_ok());
        assert!(s.check(&eof(2, 2)).is_err());
    }

    #[test]
    fn driver_commands_and_their_replies_are_removed() {
        let mut s = Selector::new(None, None, true);
        let hello = recorded(&msg(5, doc! { "hello": 1, "$db": "admin" }), 0, 1);
        let hello_reply = recorded(&msg_reply(6, 5, doc! { "ok": 1 }), 0, 1);
        let find = recorded(&msg(7, doc! { "find": "c", "$db": "db" }), 0, 1);
        let find_reply = recorded(&msg_reply(8, 7, doc! { "ok": 1 }), 0, 1);
        assert_eq!(s.check(&hello), Err(Rejection::DriverOp));
        assert_eq!(s.check(&hello_reply), Err(Rejection::DriverOp));
        assert_eq!(s.check(&find), Ok(()));
        assert_eq!(s.check(&find_reply), Ok(()));

        let ping = recorded(&command(9, "admin", "ping", doc! {}), 0, 2);
        let ping_reply = recorded(&command_reply(10, 9, doc! { "ok": 1 }), 0, 2);
        assert_eq!(s.check(&ping), Err(Rejection::DriverOp));
        // Same request id on another connection is unrelated.
        let other = recorded(&reply(11, 9, 0, vec![]), 0, 3);
        assert_eq!(s.check(&other), Ok(()));
        assert_eq!(s.check(&ping_reply), Err(Rejection::DriverOp));
    }

    #[test]
    fn driver_ops_kept_when_not_removing() {
        let mut s = Selector::new(None, None, false);
        let is_master = recorded(&query(1, "admin.$cmd", doc! { "isMaster": 1 }), 0, 1);
        assert_eq!(s.check(&is_master), Ok(()));
    }
}
