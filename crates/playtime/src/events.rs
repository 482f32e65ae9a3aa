use playtime_core::{GameId, ProcessId, SessionId};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Why a session ended without a recorded row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// Shorter than the minimum session length
    TooShort,
    /// Nobody picked a process before the selection window closed
    SelectionTimedOut,
    /// Cancelled while waiting for a process selection
    SelectionCancelled,
}

impl fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            DiscardReason::TooShort => "too short",
            DiscardReason::SelectionTimedOut => "selection timed out",
            DiscardReason::SelectionCancelled => "selection cancelled",
        };
        f.write_str(reason)
    }
}

/// Which process a session ended up monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitoringPath {
    /// The launcher itself, through its child-wait primitive
    Spawned,
    /// A separate process found by name or chosen by the user
    External,
}

/// Lifecycle notifications published by the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    SessionStarted {
        game_id: GameId,
        session_id: SessionId,
    },
    /// The launcher exited and no game process could be identified; answer
    /// with `SessionOrchestrator::notify_selection`
    ProcessSelectionRequired {
        game_id: GameId,
        session_id: SessionId,
        launcher_name: String,
    },
    MonitoringStarted {
        game_id: GameId,
        pid: ProcessId,
        path: MonitoringPath,
    },
    SessionFinalized {
        game_id: GameId,
        session_id: SessionId,
        duration_secs: i64,
    },
    SessionDiscarded {
        game_id: GameId,
        session_id: SessionId,
        reason: DiscardReason,
    },
}

impl TrackerEvent {
    pub fn game_id(&self) -> &GameId {
        match self {
            TrackerEvent::SessionStarted { game_id, .. }
            | TrackerEvent::ProcessSelectionRequired { game_id, .. }
            | TrackerEvent::MonitoringStarted { game_id, .. }
            | TrackerEvent::SessionFinalized { game_id, .. }
            | TrackerEvent::SessionDiscarded { game_id, .. } => game_id,
        }
    }

    /// Whether this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackerEvent::SessionFinalized { .. } | TrackerEvent::SessionDiscarded { .. }
        )
    }
}

/// Broadcast fan-out of [`TrackerEvent`]s. Publishing with no subscribers is
/// not an error.
#[derive(Debug, Clone)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<TrackerEvent>,
}

impl EventBus {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.tx.subscribe()
    }

    pub(crate) fn publish(&self, event: TrackerEvent) {
        if self.tx.send(event).is_err() {
            debug!("No tracker event subscribers");
        }
    }
}
