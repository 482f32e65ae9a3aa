use playtime_core::{ForegroundQuery, ProcessError, ProcessId, TrackerConfig};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Focus transition for a watched process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusEvent {
    pub pid: ProcessId,
    pub is_focused: bool,
}

/// Polling cadence for a [`FocusPoller`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FocusSettings {
    pub poll_interval: Duration,
    pub revalidate_interval: Duration,
    pub event_capacity: usize,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self::from_config(&TrackerConfig::default())
    }
}

impl FocusSettings {
    pub fn from_config(config: &TrackerConfig) -> Self {
        Self {
            poll_interval: config.focus_poll_interval(),
            revalidate_interval: config.focus_revalidate_interval(),
            event_capacity: config.focus_event_capacity,
        }
    }
}

/// Samples the foreground window owner and reports transitions for one pid.
///
/// Events go out on a bounded channel and are dropped when it is full. A
/// slower revalidation tick re-derives the state and re-publishes it, which
/// repairs both a drifted [`is_focused`](Self::is_focused) and a consumer that
/// missed a dropped transition.
#[derive(Debug)]
pub struct FocusPoller {
    pid: ProcessId,
    focused: Arc<AtomicBool>,
    stop: CancellationToken,
}

impl FocusPoller {
    /// Probe the foreground primitive once and start polling.
    ///
    /// Fails when the primitive is unavailable so callers can select a
    /// different strategy up front.
    pub fn start(
        query: Arc<dyn ForegroundQuery>,
        pid: ProcessId,
        settings: FocusSettings,
    ) -> Result<(Self, mpsc::Receiver<FocusEvent>), ProcessError> {
        let initial = query.is_focused(pid)?;
        let (tx, rx) = mpsc::channel(settings.event_capacity.max(1));
        let focused = Arc::new(AtomicBool::new(initial));
        let stop = CancellationToken::new();

        tokio::spawn(poll_focus(
            query,
            pid,
            settings,
            focused.clone(),
            stop.clone(),
            tx,
        ));

        debug!(pid = %pid, focused = initial, "Focus poller started");
        Ok((Self { pid, focused, stop }, rx))
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Last known focus state
    pub fn is_focused(&self) -> bool {
        self.focused.load(Ordering::Acquire)
    }

    /// Halt both tickers. The event channel closes once the poll task exits.
    pub fn stop(&self) {
        if !self.stop.is_cancelled() {
            debug!(pid = %self.pid, "Stopping focus poller");
            self.stop.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for FocusPoller {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

async fn poll_focus(
    query: Arc<dyn ForegroundQuery>,
    pid: ProcessId,
    settings: FocusSettings,
    focused: Arc<AtomicBool>,
    stop: CancellationToken,
    tx: mpsc::Sender<FocusEvent>,
) {
    let now = Instant::now();
    let mut poll = tokio::time::interval_at(now + settings.poll_interval, settings.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut revalidate = tokio::time::interval_at(
        now + settings.revalidate_interval,
        settings.revalidate_interval,
    );
    revalidate.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = revalidate.tick() => {
                let Some(actual) = sample(&*query, pid) else { continue };
                let previous = focused.swap(actual, Ordering::AcqRel);
                if previous != actual {
                    warn!(pid = %pid, focused = actual, "Focus state drifted, corrected");
                }
                publish(&tx, FocusEvent { pid, is_focused: actual });
            }
            _ = poll.tick() => {
                let Some(actual) = sample(&*query, pid) else { continue };
                if focused.swap(actual, Ordering::AcqRel) != actual {
                    publish(&tx, FocusEvent { pid, is_focused: actual });
                }
            }
        }
    }

    debug!(pid = %pid, "Focus poller stopped");
    // `tx` drops here, closing the channel exactly once
}

fn sample(query: &dyn ForegroundQuery, pid: ProcessId) -> Option<bool> {
    match query.is_focused(pid) {
        Ok(focused) => Some(focused),
        Err(e) => {
            debug!(pid = %pid, error = %e, "Foreground query failed, keeping last state");
            None
        }
    }
}

fn publish(tx: &mpsc::Sender<FocusEvent>, event: FocusEvent) {
    match tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            debug!(pid = %event.pid, focused = event.is_focused, "Focus event channel full, dropped");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}
