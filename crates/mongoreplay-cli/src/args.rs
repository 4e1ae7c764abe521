//! Command-line arguments and their mapping onto library configs.

use std::path::PathBuf;
use std::time::Duration;

use chrono::DateTime;
use clap::{ArgGroup, Args, Parser, Subcommand};

use mongoreplay_capture::{CaptureConfig, CaptureSource};
use mongoreplay_engine::PlaybackConfig;
use mongoreplay_filter::FilterConfig;
use mongoreplay_record::{PreciseTime, WriterOptions};

#[derive(Debug, Parser)]
#[command(name = "mongoreplay")]
#[command(about = "Record MongoDB wire traffic and replay it against a live server", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Log filter, e.g. `debug` or `mongoreplay_engine=trace`. Overrides RUST_LOG.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture traffic from an interface or pcap file into a recording
    Record(RecordArgs),
    /// Replay a recording against a server
    Play(PlayArgs),
    /// Window, clean up or split a recording
    Filter(FilterArgs),
}

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("input").required(true).args(["interface", "file"])))]
pub struct RecordArgs {
    /// Network interface to capture on
    #[arg(short, long)]
    pub interface: Option<String>,
    /// pcap file to read instead of a live interface
    #[arg(short, long)]
    pub file: Option<PathBuf>,
    /// BPF filter expression (default: tcp)
    #[arg(short = 'e', long)]
    pub expr: Option<String>,
    /// Recording to write
    #[arg(short, long)]
    pub playback_file: PathBuf,
    /// Compress the recording with gzip
    #[arg(long)]
    pub gzip: bool,
    /// Capture in promiscuous mode
    #[arg(long)]
    pub promisc: bool,
    /// Bytes captured per packet
    #[arg(long, default_value_t = 65_535)]
    pub snaplen: i32,
    /// Kernel capture buffer in bytes (live capture only; default 16 MiB)
    #[arg(long)]
    pub buffer_size: Option<i32>,
}

impl RecordArgs {
    pub fn capture_config(&self) -> CaptureConfig {
        let source = match (&self.interface, &self.file) {
            (Some(name), _) => CaptureSource::Interface(name.clone()),
            (None, Some(path)) => CaptureSource::File(path.clone()),
            // clap enforces one of the two.
            (None, None) => CaptureSource::Interface(String::new()),
        };
        let mut config = CaptureConfig::new(source);
        config.bpf_filter = self.expr.clone();
        config.promisc = self.promisc;
        config.snaplen = self.snaplen;
        if let Some(size) = self.buffer_size {
            config.buffer_size = size;
        }
        config
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            gzip: self.gzip,
            ..WriterOptions::default()
        }
    }
}

#[derive(Debug, Args)]
pub struct PlayArgs {
    /// Recording to replay
    #[arg(short, long)]
    pub playback_file: PathBuf,
    /// Target server: mongodb://host[:port] or host:port
    #[arg(long, default_value = "mongodb://localhost:27017")]
    pub host: String,
    /// Playback speed multiplier
    #[arg(long, default_value_t = 1.0)]
    pub speed: f64,
    /// Number of passes over the recording
    #[arg(long, default_value_t = 1)]
    pub repeat: u32,
    /// Seconds the scheduler may queue ahead of real time
    #[arg(long, default_value = "15", value_parser = parse_duration)]
    pub queue_time: Duration,
    /// Skip the cursor preprocessing pass
    #[arg(long)]
    pub no_preprocess: bool,
    /// Ignore recorded timing and send every op as soon as possible
    #[arg(long)]
    pub full_speed: bool,
}

impl PlayArgs {
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            speed: self.speed,
            repeat: self.repeat,
            queue_time: self.queue_time,
            preprocess: !self.no_preprocess,
            full_speed: self.full_speed,
            ..PlaybackConfig::new(self.host.clone())
        }
    }
}

#[derive(Debug, Args)]
pub struct FilterArgs {
    /// Recording to read
    #[arg(short, long)]
    pub playback_file: PathBuf,
    /// Recording to write; numbered when splitting
    #[arg(short, long)]
    pub output_file: PathBuf,
    /// Drop ops seen before this time (RFC 3339 or Unix seconds)
    #[arg(long, value_parser = parse_time)]
    pub start_at: Option<PreciseTime>,
    /// Keep this long after the first retained op, e.g. `90s`, `5m`, `1h`
    #[arg(long, value_parser = parse_duration)]
    pub duration: Option<Duration>,
    /// Drop driver handshake, heartbeat and auth commands
    #[arg(long)]
    pub remove_driver_ops: bool,
    /// Split into this many files by connection
    #[arg(long, default_value_t = 1)]
    pub split: usize,
    /// Compress the outputs with gzip
    #[arg(long)]
    pub gzip: bool,
}

impl FilterArgs {
    pub fn filter_config(&self) -> FilterConfig {
        FilterConfig {
            start_at: self.start_at,
            duration: self.duration,
            remove_driver_ops: self.remove_driver_ops,
            split: self.split,
            writer: WriterOptions {
                gzip: self.gzip,
                ..WriterOptions::default()
            },
            ..FilterConfig::default()
        }
    }
}

/// Seconds (fractional allowed), or a number with an `ms`, `s`, `m` or
/// `h` suffix.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (number, unit) = s.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration {s:?}"))?;
    let scale = match unit.trim() {
        "" | "s" => 1.0,
        "ms" => 0.001,
        "m" => 60.0,
        "h" => 3600.0,
        other => return Err(format!("unknown duration unit {other:?}")),
    };
    Duration::try_from_secs_f64(value * scale).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

/// RFC 3339 timestamp or Unix seconds.
pub fn parse_time(s: &str) -> Result<PreciseTime, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<i64>() {
        return Ok(PreciseTime::new(secs, 0));
    }
    let dt = DateTime::parse_from_rfc3339(s).map_err(|e| format!("invalid time {s:?}: {e}"))?;
    Ok(PreciseTime::new(
        dt.timestamp(),
        i64::from(dt.timestamp_subsec_nanos()),
    ))
}
