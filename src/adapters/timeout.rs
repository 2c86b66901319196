//! Bounded waits for blocking adapter calls.

use crate::audio::playback::CancelToken;
use crate::error::{ParlanceError, Result};
use crossbeam_channel::{RecvTimeoutError, bounded};
use std::thread;
use std::time::Duration;
use tracing::warn;

/// How long a timed-out call gets to stop its provider after cancellation.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

/// Runs `call` on a worker thread and waits at most `timeout` for it.
///
/// On timeout the token handed to `call` is cancelled and the call gets
/// [`CANCEL_GRACE`] to wind down (command providers kill their process),
/// after which the worker is detached and its result discarded. A panicking
/// call is reported as [`ParlanceError::Other`].
///
/// # Errors
/// `AdapterTimeout` if no result arrived in time, or whatever `call` returns.
pub fn call_with_timeout<T, F>(adapter: &'static str, timeout: Duration, call: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&CancelToken) -> Result<T> + Send + 'static,
{
    let (tx, rx) = bounded(1);
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    thread::Builder::new()
        .name(format!("adapter-{adapter}"))
        .spawn(move || {
            let _ = tx.send(call(&worker_cancel));
        })
        .map_err(|e| ParlanceError::Other(format!("Failed to spawn {adapter} call: {e}")))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => {
            warn!(adapter, timeout_ms = timeout.as_millis() as u64, "adapter call timed out");
            cancel.cancel();
            if rx.recv_timeout(CANCEL_GRACE).is_err() {
                warn!(adapter, "adapter call still running after cancellation");
            }
            Err(ParlanceError::AdapterTimeout { adapter, timeout })
        }
        Err(RecvTimeoutError::Disconnected) => Err(ParlanceError::Other(format!(
            "{adapter} call panicked"
        ))),
    }
}
