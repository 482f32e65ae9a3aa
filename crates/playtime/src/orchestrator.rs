//! Session state machine: launch, decide what to monitor, finalize.

mod session_task;

use anyhow::anyhow;
use playtime_core::{
    BackupTrigger, Clock, Game, GameCatalog, GameId, ProcessBackend, ProcessBackendFactory,
    SessionStore, SystemClock, TrackerConfig, TrackerError,
};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::catch::Catch;
use crate::events::{EventBus, TrackerEvent};
use crate::monitor::ActiveTimeAccumulator;
use crate::platform_factory::PlatformBackendFactory;
use crate::registry::{Reservation, TrackingRegistry, TrackingSession, TrackingSnapshot};
use crate::selection::SelectionMailbox;
use session_task::StartReply;

const EVENT_CAPACITY: usize = 64;

/// What [`SessionOrchestrator::launch`] did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The game was spawned and a new session is being tracked
    Started(TrackingSnapshot),
    /// The game was already tracked; nothing was spawned
    AlreadyTracking(TrackingSnapshot),
}

impl LaunchOutcome {
    pub fn snapshot(&self) -> &TrackingSnapshot {
        match self {
            LaunchOutcome::Started(snapshot) | LaunchOutcome::AlreadyTracking(snapshot) => snapshot,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, LaunchOutcome::Started(_))
    }
}

/// Launches games and tracks their play time.
///
/// [`launch`](Self::launch) returns once the executable has spawned; the rest
/// of the session runs on a background task bound to the orchestrator's own
/// cancellation token, never to the caller's. Cloning is cheap and every
/// clone drives the same sessions.
#[derive(Clone)]
pub struct SessionOrchestrator {
    config: Arc<TrackerConfig>,
    backend: ProcessBackend,
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn GameCatalog>,
    backup: Arc<dyn BackupTrigger>,
    clock: Arc<dyn Clock>,
    registry: Arc<TrackingRegistry>,
    selections: Arc<SelectionMailbox>,
    active_time: Arc<ActiveTimeAccumulator>,
    events: EventBus,
    root: CancellationToken,
}

impl SessionOrchestrator {
    pub fn new(
        config: TrackerConfig,
        backend: ProcessBackend,
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn GameCatalog>,
        backup: Arc<dyn BackupTrigger>,
    ) -> Result<Self, TrackerError> {
        config
            .validate()
            .map_err(|e| TrackerError::Configuration(e.to_string()))?;

        let root = CancellationToken::new();
        let active_time = ActiveTimeAccumulator::from_config(backend.foreground.clone(), &config);

        Ok(Self {
            config: Arc::new(config),
            backend,
            store,
            catalog,
            backup,
            clock: Arc::new(SystemClock),
            registry: Arc::new(TrackingRegistry::new(root.clone())),
            selections: Arc::new(SelectionMailbox::new()),
            active_time: Arc::new(active_time),
            events: EventBus::new(EVENT_CAPACITY),
            root,
        })
    }

    /// Orchestrator over the native backend of the build platform
    pub fn native(
        config: TrackerConfig,
        store: Arc<dyn SessionStore>,
        catalog: Arc<dyn GameCatalog>,
        backup: Arc<dyn BackupTrigger>,
    ) -> Result<Self, TrackerError> {
        Self::new(
            config,
            PlatformBackendFactory::create_backend(),
            store,
            catalog,
            backup,
        )
    }

    /// Replace the wall clock used for session start and end times
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Spawn a game and start tracking it.
    ///
    /// Only failures that prevent the session from starting are returned: an
    /// unknown game, a spawn failure (nothing is persisted) or a store failure
    /// while writing the placeholder row. A game that is already tracked is
    /// not spawned again, and nothing is launched after [`shutdown`](Self::shutdown).
    ///
    /// Once the game is reserved the session belongs to a background task.
    /// Dropping the returned future before it resolves does not stop it.
    pub async fn launch(&self, game_id: &GameId) -> Result<LaunchOutcome, TrackerError> {
        if self.root.is_cancelled() {
            return Err(TrackerError::Cancelled);
        }

        let game = self
            .catalog
            .get_game(game_id)
            .await
            .catch(TrackerError::Catalog)?
            .ok_or_else(|| TrackerError::GameNotFound(game_id.clone()))?;

        let session = match self.registry.reserve(game_id) {
            Reservation::New(session) => session,
            Reservation::Existing(existing) => {
                info!(game_id = %game_id, "Game already tracked, not launching again");
                return Ok(LaunchOutcome::AlreadyTracking(existing.snapshot()));
            }
        };

        let (reply, started) = oneshot::channel();
        self.spawn_supervised(game, session, reply);

        match started.await {
            Ok(result) => result.map(LaunchOutcome::Started),
            Err(_) => Err(TrackerError::Other(anyhow!(
                "session task for {game_id} ended before the game started"
            ))),
        }
    }

    /// Deliver the user's process choice for a game awaiting selection.
    /// Returns `false`, doing nothing, when no selection is pending.
    pub fn notify_selection(&self, game_id: &GameId, process_name: &str) -> bool {
        let delivered = self.selections.notify(game_id, process_name);
        if delivered {
            info!(game_id = %game_id, process_name = %process_name, "Process selection received");
        }
        delivered
    }

    /// Cooperatively end one session. It finalizes like a natural exit, or is
    /// discarded when it was still waiting for a process selection.
    pub fn cancel(&self, game_id: &GameId) -> bool {
        let cancelled = self.registry.cancel(game_id);
        if cancelled {
            info!(game_id = %game_id, "Session cancellation requested");
        }
        cancelled
    }

    pub fn active_sessions(&self) -> Vec<TrackingSnapshot> {
        self.registry.list()
    }

    pub fn session(&self, game_id: &GameId) -> Option<TrackingSnapshot> {
        self.registry.get(game_id).map(|session| session.snapshot())
    }

    pub fn is_tracking(&self, game_id: &GameId) -> bool {
        self.registry.is_tracking(game_id)
    }

    pub fn is_awaiting_selection(&self, game_id: &GameId) -> bool {
        self.selections.is_pending(game_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Cancel every in-flight session; each one finalizes on its own task
    pub fn shutdown(&self) {
        info!(active = self.registry.len(), "Shutting down session orchestrator");
        self.root.cancel();
    }

    fn spawn_supervised(&self, game: Game, session: Arc<TrackingSession>, reply: StartReply) {
        let task = tokio::spawn(session_task::start(
            self.clone(),
            game,
            session.clone(),
            reply,
        ));

        let orchestrator = self.clone();
        tokio::spawn(async move {
            let Err(e) = task.await else { return };
            error!(
                game_id = %session.game_id(),
                panicked = e.is_panic(),
                "Session task ended abnormally, releasing game"
            );
            orchestrator.active_time.stop_tracking(session.game_id()).await;
            orchestrator.registry.remove(&session);
        });
    }
}
