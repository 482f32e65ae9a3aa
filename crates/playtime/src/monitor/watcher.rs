use playtime_core::{ProcessError, ProcessId, ProcessWaiter, WaitHandle, WaitOutcome};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why an [`ExitSignal`] resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCause {
    /// The process terminated
    Exited,
    /// The OS wait failed; the process is assumed to have exited
    WaitFailed,
    /// The watcher was stopped before the process exited
    Stopped,
}

impl ExitCause {
    /// Whether the session should treat the process as gone
    pub fn process_gone(self) -> bool {
        !matches!(self, ExitCause::Stopped)
    }
}

/// One-shot exit notification produced by [`ProcessWatcher::start`]
#[derive(Debug)]
pub struct ExitSignal {
    rx: oneshot::Receiver<ExitCause>,
}

impl ExitSignal {
    /// Resolves exactly once, when the watched process exits, the wait fails,
    /// or the watcher is stopped
    pub async fn recv(self) -> ExitCause {
        self.rx.await.unwrap_or(ExitCause::Stopped)
    }
}

/// Watches a single OS process for exit.
///
/// The OS handle is owned by a blocking task that waits in bounded slices, so
/// a [`stop`](Self::stop) request is observed within one slice without
/// spinning. Dropping the watcher stops it.
#[derive(Debug)]
pub struct ProcessWatcher {
    pid: ProcessId,
    stop: CancellationToken,
}

impl ProcessWatcher {
    /// Open `pid` and start waiting for it to exit.
    ///
    /// An error means the process could not be referenced (already exited,
    /// permission denied); callers treat that as "already exited".
    pub fn start(
        waiter: &dyn ProcessWaiter,
        pid: ProcessId,
        wait_slice: Duration,
    ) -> Result<(Self, ExitSignal), ProcessError> {
        let handle = waiter.open(pid)?;
        let (tx, rx) = oneshot::channel();
        let stop = CancellationToken::new();

        let loop_stop = stop.clone();
        tokio::task::spawn_blocking(move || {
            wait_in_slices(handle, pid, wait_slice, loop_stop, tx);
        });

        info!(pid = %pid, "Watching process for exit");
        Ok((Self { pid, stop }, ExitSignal { rx }))
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Request the wait loop to end and release the handle. Idempotent and
    /// safe after the process already exited.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!(pid = %self.pid, "Stopping process watcher");
            self.stop.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Block until `pid` exits or `timeout` elapses.
    ///
    /// Returns `true` on exit (or when the process cannot be opened at all)
    /// and `false` on timeout, after stopping the watcher.
    pub async fn wait_for_exit(
        waiter: &dyn ProcessWaiter,
        pid: ProcessId,
        wait_slice: Duration,
        timeout: Duration,
    ) -> bool {
        let (watcher, signal) = match Self::start(waiter, pid, wait_slice) {
            Ok(started) => started,
            Err(e) => {
                debug!(pid = %pid, error = %e, "Process not watchable, treating as exited");
                return true;
            }
        };

        match tokio::time::timeout(timeout, signal.recv()).await {
            Ok(cause) => cause.process_gone(),
            Err(_) => {
                watcher.stop();
                false
            }
        }
    }
}

impl Drop for ProcessWatcher {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

fn wait_in_slices(
    mut handle: Box<dyn WaitHandle>,
    pid: ProcessId,
    wait_slice: Duration,
    stop: CancellationToken,
    tx: oneshot::Sender<ExitCause>,
) {
    let cause = loop {
        if stop.is_cancelled() || tx.is_closed() {
            break None;
        }

        match handle.wait_timeout(wait_slice) {
            WaitOutcome::Exited => break Some(ExitCause::Exited),
            WaitOutcome::TimedOut => continue,
            WaitOutcome::Failed(reason) => {
                warn!(pid = %pid, reason = %reason, "Process wait failed, assuming exit");
                break Some(ExitCause::WaitFailed);
            }
        }
    };

    // Release the OS handle before anyone observes the signal
    drop(handle);

    match cause {
        Some(cause) => {
            debug!(pid = %pid, cause = ?cause, "Process watch finished");
            let _ = tx.send(cause);
        }
        None => debug!(pid = %pid, "Process watch stopped"),
    }
}
