//! Playback configuration and validation.

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// Ops between two lookahead checks in the scheduler.
pub const QUEUE_GRANULARITY: u64 = 1000;

/// Port used when a target omits one.
pub const DEFAULT_PORT: u16 = 27017;

// ── PlaybackConfig ────────────────────────────────────────────────

/// Settings for one replay run.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackConfig {
    /// Server to replay against: `mongodb://host[:port][/...]` or
    /// `host[:port]`.
    pub target: String,
    /// Playback speed multiplier. Default: 1.0.
    pub speed: f64,
    /// Number of passes over the recording. Default: 1.
    pub repeat: u32,
    /// How far ahead of real time the scheduler may queue ops.
    /// Default: 15 s.
    pub queue_time: Duration,
    /// Scan the recording for cursor producers before replaying.
    /// Default: true.
    pub preprocess: bool,
    /// Ignore recorded timing and send every op as soon as possible.
    /// Default: false.
    pub full_speed: bool,
    /// Bounded channel capacity per connection worker. Default: 10 000.
    pub connection_capacity: usize,
    /// How long before its first op a worker dials. Default: 5 s.
    pub dial_lead: Duration,
    /// Time-to-live of unpaired replies. Default: 60 s.
    pub reply_ttl: Duration,
    /// Longest a request waits for a cursor produced on another
    /// connection. Default: 30 s.
    pub cursor_wait: Duration,
    /// Threads decoding the recording. `None` picks a default.
    pub decode_workers: Option<usize>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            target: format!("localhost:{DEFAULT_PORT}"),
            speed: 1.0,
            repeat: 1,
            queue_time: Duration::from_secs(15),
            preprocess: true,
            full_speed: false,
            connection_capacity: 10_000,
            dial_lead: Duration::from_secs(5),
            reply_ttl: Duration::from_secs(60),
            cursor_wait: Duration::from_secs(30),
            decode_workers: None,
        }
    }
}

impl PlaybackConfig {
    /// Defaults for replaying against `target`.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Check every setting before any work starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.speed.is_finite() || self.speed <= 0.0 {
            return Err(ConfigError::InvalidSpeed { value: self.speed });
        }
        if self.repeat == 0 {
            return Err(ConfigError::InvalidRepeat);
        }
        if self.queue_time.is_zero() {
            return Err(ConfigError::InvalidQueueTime);
        }
        if self.connection_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.decode_workers == Some(0) {
            return Err(ConfigError::ZeroDecodeWorkers);
        }
        self.resolved_target()?;
        Ok(())
    }

    /// `host:port` to dial.
    pub fn resolved_target(&self) -> Result<String, ConfigError> {
        parse_target(&self.target)
    }
}

/// Reduce a connection string to `host:port`.
///
/// Only a single host is accepted; credentials, database and options are
/// ignored.
pub fn parse_target(target: &str) -> Result<String, ConfigError> {
    let invalid = |reason: &str| ConfigError::InvalidTarget {
        target: target.to_owned(),
        reason: reason.to_owned(),
    };
    let rest = target.trim();
    let rest = match rest.split_once("://") {
        Some(("mongodb", rest)) => rest,
        Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme {scheme:?}"))),
        None => rest,
    };
    let authority = rest.split(['/', '?']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    if host_port.is_empty() {
        return Err(invalid("no host"));
    }
    if host_port.contains(',') {
        return Err(invalid("replay needs exactly one host"));
    }

    // Bracketed IPv6 literal.
    if let Some(inner) = host_port.strip_prefix('[') {
        let (host, after) = inner
            .split_once(']')
            .ok_or_else(|| invalid("unterminated IPv6 literal"))?;
        let port = match after.strip_prefix(':') {
            Some(p) => parse_port(p).ok_or_else(|| invalid("bad port"))?,
            None if after.is_empty() => DEFAULT_PORT,
            None => return Err(invalid("junk after IPv6 literal")),
        };
        return Ok(format!("[{host}]:{port}"));
    }

    match host_port.rsplit_once(':') {
        Some((host, port)) => {
            if host.is_empty() {
                return Err(invalid("no host"));
            }
            let port = parse_port(port).ok_or_else(|| invalid("bad port"))?;
            Ok(format!("{host}:{port}"))
        }
        None => Ok(format!("{host_port}:{DEFAULT_PORT}")),
    }
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|&p| p != 0)
}

// ── ConfigError ───────────────────────────────────────────────────

/// Errors detected by [`PlaybackConfig::validate()`].
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// Speed is NaN, infinite, zero or negative.
    InvalidSpeed {
        /// The invalid value.
        value: f64,
    },
    /// Repeat count is zero.
    InvalidRepeat,
    /// Queue time is zero.
    InvalidQueueTime,
    /// Per-connection channel capacity is zero.
    ZeroCapacity,
    /// Decode worker count is zero.
    ZeroDecodeWorkers,
    /// The target cannot be dialled.
    InvalidTarget {
        /// The target as given.
        target: String,
        /// What is wrong with it.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidSpeed { value } => {
                write!(f, "speed must be finite and positive, got {value}")
            }
            Self::InvalidRepeat => write!(f, "repeat must be at least 1"),
            Self::InvalidQueueTime => write!(f, "queue time must be positive"),
            Self::ZeroCapacity => write!(f, "connection channel capacity must be at least 1"),
            Self::ZeroDecodeWorkers => write!(f, "decode workers must be at least 1"),
            Self::InvalidTarget { target, reason } => {
                write!(f, "invalid target {target:?}: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        PlaybackConfig::default().validate().unwrap();
    }

    #[test]
    fn bad_speed_is_rejected() {
        for speed in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let cfg = PlaybackConfig {
                speed,
                ..PlaybackConfig::default()
            };
            assert!(matches!(
                cfg.validate(),
                Err(ConfigError::InvalidSpeed { .. })
            ));
        }
    }

    #[test]
    fn zero_repeat_is_rejected() {
        let cfg = PlaybackConfig {
            repeat: 0,
            ..PlaybackConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::InvalidRepeat));
    }

    #[test]
    fn targets_resolve_to_host_port() {
        assert_eq!(parse_target("localhost").unwrap(), "localhost:27017");
        assert_eq!(parse_target("db1:27018").unwrap(), "db1:27018");
        assert_eq!(parse_target("mongodb://db1").unwrap(), "db1:27017");
        assert_eq!(
            parse_target("mongodb://user:pw@db1:4000/admin?ssl=false").unwrap(),
            "db1:4000"
        );
        assert_eq!(parse_target("mongodb://[::1]:4000").unwrap(), "[::1]:4000");
        assert_eq!(parse_target("[::1]").unwrap(), "[::1]:27017");
    }

    #[test]
    fn bad_targets_are_rejected() {
        for t in [
            "",
            "mongodb://",
            "http://db1",
            "mongodb://a:1,b:2",
            "db1:notaport",
            "db1:0",
            "[::1",
        ] {
            assert!(parse_target(t).is_err(), "{t:?} should be rejected");
        }
    }
}
