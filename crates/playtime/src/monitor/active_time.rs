use parking_lot::Mutex;
use playtime_core::{ForegroundQuery, GameId, ProcessId, TrackerConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::focus::{FocusEvent, FocusPoller, FocusSettings};
use crate::registry::TrackingSession;

/// How an accumulator learns about focus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusStrategy {
    /// Transitions arrive from a [`FocusPoller`]
    Events,
    /// The foreground owner is queried on every tick; used when the poller
    /// cannot start
    Polling,
}

/// Returned by [`ActiveTimeAccumulator::start_tracking`]
#[derive(Debug, Clone)]
pub struct ActiveTimeHandle {
    game_id: GameId,
    strategy: FocusStrategy,
}

impl ActiveTimeHandle {
    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn strategy(&self) -> FocusStrategy {
        self.strategy
    }
}

struct TrackingEntry {
    session: Arc<TrackingSession>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Counts the seconds a tracked process owns the foreground window.
///
/// One loop per game increments the session's counter once per tick while
/// focused. The counter lives on the [`TrackingSession`] under its own lock.
pub struct ActiveTimeAccumulator {
    foreground: Arc<dyn ForegroundQuery>,
    focus: FocusSettings,
    tick: Duration,
    entries: Mutex<HashMap<GameId, TrackingEntry>>,
}

impl ActiveTimeAccumulator {
    pub fn new(foreground: Arc<dyn ForegroundQuery>, focus: FocusSettings, tick: Duration) -> Self {
        Self {
            foreground,
            focus,
            tick,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(foreground: Arc<dyn ForegroundQuery>, config: &TrackerConfig) -> Self {
        Self::new(
            foreground,
            FocusSettings::from_config(config),
            config.active_tick(),
        )
    }

    /// Start counting focused time of `pid` into `session`.
    ///
    /// Restarting a game that is already tracked replaces its loop; the
    /// counter on the session is kept.
    pub fn start_tracking(&self, session: &Arc<TrackingSession>, pid: ProcessId) -> ActiveTimeHandle {
        let game_id = session.game_id().clone();

        let source = match FocusPoller::start(self.foreground.clone(), pid, self.focus) {
            Ok((poller, events)) => {
                let focused = poller.is_focused();
                FocusSource::Events {
                    poller,
                    events,
                    focused,
                }
            }
            Err(e) => {
                warn!(
                    game_id = %game_id,
                    pid = %pid,
                    error = %e,
                    "Focus events unavailable, falling back to polling"
                );
                FocusSource::Polling
            }
        };
        let strategy = source.strategy();

        let cancel = session.cancel_token().child_token();
        let task = tokio::spawn(accumulate(
            session.clone(),
            pid,
            self.foreground.clone(),
            source,
            self.tick,
            cancel.clone(),
        ));

        let previous = self.entries.lock().insert(
            game_id.clone(),
            TrackingEntry {
                session: session.clone(),
                cancel,
                task,
            },
        );
        if let Some(previous) = previous {
            debug!(game_id = %game_id, "Replacing existing active-time loop");
            previous.cancel.cancel();
        }

        info!(game_id = %game_id, pid = %pid, strategy = ?strategy, "Active-time tracking started");
        ActiveTimeHandle { game_id, strategy }
    }

    /// Stop counting and return the accumulated seconds; 0 for a game that
    /// was never tracked
    pub async fn stop_tracking(&self, game_id: &GameId) -> u64 {
        let Some(entry) = self.entries.lock().remove(game_id) else {
            return 0;
        };

        entry.cancel.cancel();
        if let Err(e) = entry.task.await {
            warn!(game_id = %game_id, error = %e, "Active-time loop ended abnormally");
        }

        let seconds = entry.session.active_seconds();
        info!(game_id = %game_id, active_seconds = seconds, "Active-time tracking stopped");
        seconds
    }

    pub fn is_tracking(&self, game_id: &GameId) -> bool {
        self.entries.lock().contains_key(game_id)
    }
}

enum FocusSource {
    Events {
        poller: FocusPoller,
        events: mpsc::Receiver<FocusEvent>,
        focused: bool,
    },
    Polling,
}

impl FocusSource {
    fn strategy(&self) -> FocusStrategy {
        match self {
            FocusSource::Events { .. } => FocusStrategy::Events,
            FocusSource::Polling => FocusStrategy::Polling,
        }
    }
}

async fn accumulate(
    session: Arc<TrackingSession>,
    pid: ProcessId,
    foreground: Arc<dyn ForegroundQuery>,
    mut source: FocusSource,
    tick: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let mut degrade = false;

        match &mut source {
            FocusSource::Events {
                events, focused, ..
            } => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => *focused = event.is_focused,
                        None => degrade = true,
                    },
                    _ = ticker.tick() => {
                        if *focused {
                            session.add_active_second();
                        }
                    }
                }
            }
            FocusSource::Polling => {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if polled_focus(&*foreground, pid) {
                            session.add_active_second();
                        }
                    }
                }
            }
        }

        if degrade {
            warn!(
                game_id = %session.game_id(),
                pid = %pid,
                "Focus event stream ended, falling back to polling"
            );
            source = FocusSource::Polling;
        }
    }

    if let FocusSource::Events { poller, .. } = &source {
        poller.stop();
    }
    debug!(game_id = %session.game_id(), "Active-time loop finished");
}

/// Direct focus check for the polling strategy. An unavailable primitive
/// counts as focused so the session still records time.
fn polled_focus(query: &dyn ForegroundQuery, pid: ProcessId) -> bool {
    match query.foreground_pid() {
        Ok(owner) => owner == Some(pid),
        Err(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{Reservation, TrackingRegistry};
    use playtime_core::{NoForegroundQuery, ProcessError};

    #[derive(Default)]
    struct ScriptedForeground {
        owner: Mutex<Option<ProcessId>>,
    }

    impl ScriptedForeground {
        fn set(&self, owner: Option<ProcessId>) {
            *self.owner.lock() = owner;
        }
    }

    impl ForegroundQuery for ScriptedForeground {
        fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError> {
            Ok(*self.owner.lock())
        }
    }

    const GAME_PID: ProcessId = ProcessId(900);

    fn tracked_session(registry: &TrackingRegistry, id: &str) -> Arc<TrackingSession> {
        match registry.reserve(&GameId::from(id)) {
            Reservation::New(session) => session,
            Reservation::Existing(_) => panic!("game already tracked"),
        }
    }

    fn accumulator(foreground: Arc<dyn ForegroundQuery>) -> ActiveTimeAccumulator {
        ActiveTimeAccumulator::from_config(foreground, &TrackerConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_counts_only_focused_seconds() {
        let _ = tracing_subscriber::fmt::try_init();
        let registry = TrackingRegistry::default();
        let session = tracked_session(&registry, "hollow-knight");
        let foreground = Arc::new(ScriptedForeground::default());
        foreground.set(Some(GAME_PID));

        let tracker = accumulator(foreground.clone());
        let handle = tracker.start_tracking(&session, GAME_PID);
        assert_eq!(handle.strategy(), FocusStrategy::Events);

        // focused 0-10s, unfocused 10-15s, focused 15-20s
        tokio::time::sleep(Duration::from_secs(10)).await;
        foreground.set(Some(ProcessId(1)));
        tokio::time::sleep(Duration::from_secs(5)).await;
        foreground.set(Some(GAME_PID));
        tokio::time::sleep(Duration::from_secs(5)).await;

        let seconds = tracker.stop_tracking(handle.game_id()).await;
        assert!((14..=16).contains(&seconds), "got {seconds}");
        assert!(!tracker.is_tracking(handle.game_id()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_fallback_counts_every_tick() {
        let registry = TrackingRegistry::default();
        let session = tracked_session(&registry, "doom");

        let tracker = accumulator(Arc::new(NoForegroundQuery));
        let handle = tracker.start_tracking(&session, GAME_PID);
        assert_eq!(handle.strategy(), FocusStrategy::Polling);

        tokio::time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(tracker.stop_tracking(handle.game_id()).await, 5);
    }

    #[tokio::test]
    async fn test_stop_untracked_game_returns_zero() {
        let tracker = accumulator(Arc::new(NoForegroundQuery));
        assert_eq!(tracker.stop_tracking(&GameId::from("never")).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_cancellation_halts_counting() {
        let registry = TrackingRegistry::default();
        let session = tracked_session(&registry, "tunic");
        let foreground = Arc::new(ScriptedForeground::default());
        foreground.set(Some(GAME_PID));

        let tracker = accumulator(foreground);
        let handle = tracker.start_tracking(&session, GAME_PID);

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        session.cancel_token().cancel();
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(tracker.stop_tracking(handle.game_id()).await, 3);
    }
}
