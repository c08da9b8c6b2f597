use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `RunWithTimeoutError` values.
pub enum RunWithTimeoutError {
    #[error("call did not return within {} ms", .0.as_millis())]
    TimedOut(Duration),
    #[error("call panicked before returning a value")]
    Panicked,
    #[error("failed to spawn helper thread: {0}")]
    Spawn(String),
}

/// Runs `f` on a helper thread and waits at most `timeout` for its result.
///
/// A timed-out call keeps running on its detached thread; use a child process
/// when the work must actually be stopped.
pub fn run_with_timeout<T, F>(f: F, timeout: Duration) -> Result<T, RunWithTimeoutError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let (sender, receiver) = mpsc::sync_channel(1);
    thread::Builder::new()
        .name("run-with-timeout".to_string())
        .spawn(move || {
            let _ = sender.send(f());
        })
        .map_err(|error| RunWithTimeoutError::Spawn(error.to_string()))?;

    match receiver.recv_timeout(timeout) {
        Ok(value) => Ok(value),
        Err(RecvTimeoutError::Timeout) => Err(RunWithTimeoutError::TimedOut(timeout)),
        Err(RecvTimeoutError::Disconnected) => Err(RunWithTimeoutError::Panicked),
    }
}
