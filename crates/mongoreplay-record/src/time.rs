//! Nanosecond wall-clock timestamps.

use std::fmt;
use std::ops::Add;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, SecondsFormat, Utc};

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Wall-clock instant with nanosecond precision.
///
/// Stored as seconds since the Unix epoch plus a sub-second part that is
/// always normalised into `0..1_000_000_000`, so the derived ordering is
/// chronological.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PreciseTime {
    sec: i64,
    nsec: i32,
}

impl PreciseTime {
    /// The Unix epoch.
    pub const EPOCH: Self = Self { sec: 0, nsec: 0 };

    /// Build from seconds and nanoseconds, normalising overflowing or
    /// negative nanoseconds into the seconds part.
    pub fn new(sec: i64, nsec: i64) -> Self {
        let sec = sec.saturating_add(nsec.div_euclid(NANOS_PER_SEC));
        let nsec = nsec.rem_euclid(NANOS_PER_SEC) as i32;
        Self { sec, nsec }
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        Self::from(SystemTime::now())
    }

    /// Seconds since the Unix epoch.
    pub fn sec(&self) -> i64 {
        self.sec
    }

    /// Sub-second nanoseconds.
    pub fn nsec(&self) -> i32 {
        self.nsec
    }

    /// Nanoseconds since the Unix epoch.
    pub fn as_unix_nanos(&self) -> i128 {
        i128::from(self.sec) * i128::from(NANOS_PER_SEC) + i128::from(self.nsec)
    }

    /// Time elapsed since `earlier`, or `None` if `earlier` is later.
    pub fn checked_duration_since(&self, earlier: PreciseTime) -> Option<Duration> {
        let diff = self.as_unix_nanos() - earlier.as_unix_nanos();
        u64::try_from(diff).ok().map(Duration::from_nanos)
    }

    /// Time elapsed since `earlier`, zero if `earlier` is later.
    pub fn saturating_duration_since(&self, earlier: PreciseTime) -> Duration {
        self.checked_duration_since(earlier).unwrap_or_default()
    }

    /// Convert to a chrono timestamp, if representable.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.sec, self.nsec as u32)
    }
}

impl Add<Duration> for PreciseTime {
    type Output = PreciseTime;

    fn add(self, rhs: Duration) -> PreciseTime {
        let secs = i64::try_from(rhs.as_secs()).unwrap_or(i64::MAX);
        PreciseTime::new(
            self.sec.saturating_add(secs),
            i64::from(self.nsec) + i64::from(rhs.subsec_nanos()),
        )
    }
}

impl From<SystemTime> for PreciseTime {
    fn from(t: SystemTime) -> Self {
        match t.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::EPOCH + d,
            Err(e) => {
                let d = e.duration();
                Self::new(-(d.as_secs() as i64), -i64::from(d.subsec_nanos()))
            }
        }
    }
}

impl From<DateTime<Utc>> for PreciseTime {
    fn from(t: DateTime<Utc>) -> Self {
        Self::new(t.timestamp(), i64::from(t.timestamp_subsec_nanos()))
    }
}

impl fmt::Display for PreciseTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(dt) => f.write_str(&dt.to_rfc3339_opts(SecondsFormat::Nanos, true)),
            None => write!(f, "{}.{:09}", self.sec, self.nsec),
        }
    }
}
