//! Termination-signal handling for capture sessions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::CaptureError;

/// Install a SIGINT/SIGTERM handler that raises the returned flag.
///
/// The capture loop checks the flag between packets and on every read
/// timeout, then flushes and closes the recording. A second signal while
/// the flag is already set exits the process immediately.
///
/// Only one handler can be installed per process.
pub fn install_stop_handler() -> Result<Arc<AtomicBool>, CaptureError> {
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            tracing::warn!("second termination signal, exiting without flushing");
            std::process::exit(130);
        }
        tracing::info!("termination signal received, finishing capture");
    })
    .map_err(|e| CaptureError::Signal {
        detail: e.to_string(),
    })?;
    Ok(stop)
}
