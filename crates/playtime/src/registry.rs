use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use playtime_core::{GameId, ProcessId, SessionId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Where a tracking session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackingState {
    Launching,
    DeterminingTarget,
    AwaitingUserSelection,
    MonitoringSpawned,
    MonitoringExternal,
    Finalizing,
}

impl fmt::Display for TrackingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrackingState::Launching => "launching",
            TrackingState::DeterminingTarget => "determining-target",
            TrackingState::AwaitingUserSelection => "awaiting-user-selection",
            TrackingState::MonitoringSpawned => "monitoring-spawned",
            TrackingState::MonitoringExternal => "monitoring-external",
            TrackingState::Finalizing => "finalizing",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a tracking session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingSnapshot {
    pub game_id: GameId,
    pub session_id: Option<SessionId>,
    pub process_id: Option<ProcessId>,
    pub started_at: Option<DateTime<Utc>>,
    pub state: TrackingState,
    pub active_seconds: u64,
}

#[derive(Debug)]
struct SessionDetails {
    session_id: Option<SessionId>,
    process_id: Option<ProcessId>,
    started_at: Option<DateTime<Utc>>,
    state: TrackingState,
}

/// In-memory state of one in-flight game session.
///
/// The active-seconds counter has its own lock so accumulation never contends
/// with registry-wide operations.
#[derive(Debug)]
pub struct TrackingSession {
    game_id: GameId,
    cancel: CancellationToken,
    details: Mutex<SessionDetails>,
    active_seconds: Mutex<u64>,
}

impl TrackingSession {
    fn new(game_id: GameId, cancel: CancellationToken) -> Self {
        Self {
            game_id,
            cancel,
            details: Mutex::new(SessionDetails {
                session_id: None,
                process_id: None,
                started_at: None,
                state: TrackingState::Launching,
            }),
            active_seconds: Mutex::new(0),
        }
    }

    pub fn game_id(&self) -> &GameId {
        &self.game_id
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.details.lock().session_id.clone()
    }

    pub fn process_id(&self) -> Option<ProcessId> {
        self.details.lock().process_id
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.details.lock().started_at
    }

    pub fn state(&self) -> TrackingState {
        self.details.lock().state
    }

    pub(crate) fn set_started(&self, session_id: SessionId, started_at: DateTime<Utc>) {
        let mut details = self.details.lock();
        details.session_id = Some(session_id);
        details.started_at = Some(started_at);
    }

    pub(crate) fn set_process_id(&self, pid: ProcessId) {
        self.details.lock().process_id = Some(pid);
    }

    pub(crate) fn transition(&self, state: TrackingState) {
        let previous = std::mem::replace(&mut self.details.lock().state, state);
        debug!(game_id = %self.game_id, from = %previous, to = %state, "Session state changed");
    }

    /// Count one focused tick; returns the new total
    pub(crate) fn add_active_second(&self) -> u64 {
        let mut seconds = self.active_seconds.lock();
        *seconds += 1;
        *seconds
    }

    pub fn active_seconds(&self) -> u64 {
        *self.active_seconds.lock()
    }

    pub fn snapshot(&self) -> TrackingSnapshot {
        let active_seconds = self.active_seconds();
        let details = self.details.lock();
        TrackingSnapshot {
            game_id: self.game_id.clone(),
            session_id: details.session_id.clone(),
            process_id: details.process_id,
            started_at: details.started_at,
            state: details.state,
            active_seconds,
        }
    }
}

/// Outcome of [`TrackingRegistry::reserve`]
#[derive(Debug, Clone)]
pub enum Reservation {
    /// A fresh session now owns the game
    New(Arc<TrackingSession>),
    /// The game was already tracked; nothing was created
    Existing(Arc<TrackingSession>),
}

/// Map from game to its single in-flight tracking session.
///
/// Session cancellation tokens are children of the registry's root token,
/// so cancelling the root tears down every session.
#[derive(Debug)]
pub struct TrackingRegistry {
    sessions: Mutex<HashMap<GameId, Arc<TrackingSession>>>,
    root: CancellationToken,
}

impl Default for TrackingRegistry {
    fn default() -> Self {
        Self::new(CancellationToken::new())
    }
}

impl TrackingRegistry {
    pub fn new(root: CancellationToken) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            root,
        }
    }

    /// Claim `game_id`, or hand back the session that already owns it
    pub fn reserve(&self, game_id: &GameId) -> Reservation {
        let mut sessions = self.sessions.lock();
        if let Some(existing) = sessions.get(game_id) {
            return Reservation::Existing(existing.clone());
        }

        let session = Arc::new(TrackingSession::new(
            game_id.clone(),
            self.root.child_token(),
        ));
        sessions.insert(game_id.clone(), session.clone());
        debug!(game_id = %game_id, "Tracking slot reserved");
        Reservation::New(session)
    }

    pub fn get(&self, game_id: &GameId) -> Option<Arc<TrackingSession>> {
        self.sessions.lock().get(game_id).cloned()
    }

    pub fn is_tracking(&self, game_id: &GameId) -> bool {
        self.sessions.lock().contains_key(game_id)
    }

    pub fn list(&self) -> Vec<TrackingSnapshot> {
        let sessions: Vec<_> = self.sessions.lock().values().cloned().collect();
        let mut snapshots: Vec<_> = sessions.iter().map(|s| s.snapshot()).collect();
        snapshots.sort_by(|a, b| a.game_id.cmp(&b.game_id));
        snapshots
    }

    /// Remove `session` if it still owns its game. A newer session for the
    /// same game is left untouched.
    pub fn remove(&self, session: &Arc<TrackingSession>) -> bool {
        let mut sessions = self.sessions.lock();
        match sessions.get(session.game_id()) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(session.game_id());
                debug!(game_id = %session.game_id(), "Tracking session removed");
                true
            }
            _ => false,
        }
    }

    /// Request cooperative cancellation of a game's session
    pub fn cancel(&self, game_id: &GameId) -> bool {
        match self.get(game_id) {
            Some(session) => {
                session.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        self.root.cancel();
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
