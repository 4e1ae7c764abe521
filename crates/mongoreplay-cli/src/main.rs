//! mongoreplay command-line tool.

mod args;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::{Cli, Command, FilterArgs, PlayArgs, RecordArgs};
use mongoreplay_capture::{install_stop_handler, record};
use mongoreplay_engine::{play, TracingStatSink};
use mongoreplay_filter::filter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref())?;

    match cli.command {
        Command::Record(args) => run_record(&args),
        Command::Play(args) => run_play(&args),
        Command::Filter(args) => run_filter(&args),
    }
}

fn init_logging(level: Option<&str>) -> Result<()> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level).with_context(|| format!("invalid log level {level:?}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn run_record(args: &RecordArgs) -> Result<()> {
    let config = args.capture_config();
    config.validate().context("invalid capture options")?;
    let stop = install_stop_handler()?;
    let report = record(&config, &args.playback_file, &args.writer_options(), &stop)
        .with_context(|| format!("recording to {}", args.playback_file.display()))?;
    println!(
        "recorded {} ops from {} packets on {} connections",
        report.ops_written, report.packets, report.demux.connections_opened
    );
    Ok(())
}

fn run_play(args: &PlayArgs) -> Result<()> {
    let config = args.playback_config();
    config.validate().context("invalid playback options")?;
    let report = play(&args.playback_file, &config, Arc::new(TracingStatSink))
        .with_context(|| format!("replaying {}", args.playback_file.display()))?;
    println!(
        "played {} ops ({} dropped, {} failed, {} driver ops skipped) on {} connections in {:.3}s",
        report.ops_played,
        report.ops_dropped,
        report.ops_failed,
        report.driver_ops_skipped,
        report.connections,
        report.elapsed.as_secs_f64()
    );
    if report.connections_lost > 0 {
        tracing::warn!(
            connections = report.connections_lost,
            "some connections were lost during playback"
        );
    }
    Ok(())
}

fn run_filter(args: &FilterArgs) -> Result<()> {
    let config = args.filter_config();
    let report = filter(&args.playback_file, &args.output_file, &config)
        .with_context(|| format!("filtering {}", args.playback_file.display()))?;
    for output in report.outputs.iter().filter(|o| !o.removed) {
        println!("{}: {} ops", output.path.display(), output.ops_written);
    }
    println!(
        "kept {} of {} ops ({} outside the window, {} driver ops removed)",
        report.ops_written, report.ops_read, report.outside_window, report.driver_ops_removed
    );
    Ok(())
}
