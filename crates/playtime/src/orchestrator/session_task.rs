use chrono::{DateTime, Utc};
use playtime_core::{
    Game, GameId, LaunchHandle, LaunchSpec, ProcessId, SessionId, TrackerError,
    process_names_match,
};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::SessionOrchestrator;
use crate::catch::Catch;
use crate::events::{DiscardReason, MonitoringPath, TrackerEvent};
use crate::monitor::ProcessWatcher;
use crate::registry::{TrackingSession, TrackingSnapshot, TrackingState};
use crate::selection::SelectionMiss;

/// Tells `launch` whether the game started
pub(super) type StartReply = oneshot::Sender<Result<TrackingSnapshot, TrackerError>>;

/// Everything a session task owns once the game is running
struct SessionRun {
    game: Game,
    session: Arc<TrackingSession>,
    launcher: Box<dyn LaunchHandle>,
    session_id: SessionId,
    started_at: DateTime<Utc>,
}

/// Spawn the game, write its placeholder row, then run the session to its end.
/// The session goes on whether or not anyone is still waiting on `reply`.
pub(super) async fn start(
    orch: SessionOrchestrator,
    game: Game,
    session: Arc<TrackingSession>,
    reply: StartReply,
) {
    let (launcher, session_id, started_at) = match begin(&orch, &game, &session).await {
        Ok(begun) => begun,
        Err(e) => {
            orch.registry.remove(&session);
            let _ = reply.send(Err(e));
            return;
        }
    };

    if reply.send(Ok(session.snapshot())).is_err() {
        debug!(game_id = %game.id, "Launch caller went away, session continues");
    }

    run(
        orch,
        SessionRun {
            game,
            session,
            launcher,
            session_id,
            started_at,
        },
    )
    .await;
}

async fn begin(
    orch: &SessionOrchestrator,
    game: &Game,
    session: &TrackingSession,
) -> Result<(Box<dyn LaunchHandle>, SessionId, DateTime<Utc>), TrackerError> {
    let spec = LaunchSpec::for_game(game);
    let launcher = orch.backend.launcher.spawn(&spec).await.map_err(|source| {
        error!(game_id = %game.id, error = %source, "Failed to spawn game");
        TrackerError::SpawnFailed {
            game_id: game.id.clone(),
            source,
        }
    })?;

    let started_at = orch.clock.now();
    let session_id = orch
        .store
        .create_pending(&game.id, started_at)
        .await
        .catch(TrackerError::Store)
        .inspect_err(|e| {
            warn!(
                game_id = %game.id,
                error = %e,
                "Could not record session start, game keeps running untracked"
            )
        })?;

    session.set_started(session_id.clone(), started_at);
    if let Some(pid) = launcher.get_pid() {
        session.set_process_id(pid);
    }
    info!(
        game_id = %game.id,
        session_id = %session_id,
        launcher = %launcher.get_name(),
        "Session started"
    );
    orch.events.publish(TrackerEvent::SessionStarted {
        game_id: game.id.clone(),
        session_id: session_id.clone(),
    });

    Ok((launcher, session_id, started_at))
}

#[derive(Debug, Clone, Copy)]
enum Target {
    /// The launcher is the game; wait on it as our child
    Spawned,
    /// Another process is the game
    External(ProcessId),
    /// Nothing can be monitored; finalize right away
    Unmonitorable,
}

enum Detection {
    Monitor(Target),
    Discard(DiscardReason),
}

async fn run(orch: SessionOrchestrator, run: SessionRun) {
    let SessionRun {
        game,
        session,
        mut launcher,
        session_id,
        started_at,
    } = run;

    session.transition(TrackingState::DeterminingTarget);
    tokio::select! {
        _ = session.cancel_token().cancelled() => {}
        _ = tokio::time::sleep(orch.config.settle_delay()) => {}
    }

    let detection = if session.is_cancelled() {
        info!(game_id = %game.id, "Session cancelled before target detection");
        Detection::Monitor(Target::Unmonitorable)
    } else {
        determine_target(&orch, &game, &session, &session_id, &mut *launcher).await
    };

    let terminal = match detection {
        Detection::Discard(reason) => discard(&orch, &game.id, &session_id, reason).await,
        Detection::Monitor(target) => {
            monitor(&orch, &game, &session, launcher, target).await;
            finalize(&orch, &game, &session, &session_id, started_at).await
        }
    };

    orch.registry.remove(&session);
    orch.events.publish(terminal);
}

async fn determine_target(
    orch: &SessionOrchestrator,
    game: &Game,
    session: &TrackingSession,
    session_id: &SessionId,
    launcher: &mut dyn LaunchHandle,
) -> Detection {
    let launcher_name = launcher.get_name().to_string();

    if let Some(remembered) = game
        .remembered_process_name
        .as_deref()
        .filter(|name| !process_names_match(name, &launcher_name))
    {
        match find_process(orch, remembered).await {
            Some(pid) => {
                info!(
                    game_id = %game.id,
                    process_name = %remembered,
                    pid = %pid,
                    "Found remembered game process"
                );
                return Detection::Monitor(Target::External(pid));
            }
            None => warn!(
                game_id = %game.id,
                process_name = %remembered,
                "Remembered game process not running, checking launcher"
            ),
        }
    }

    if launcher_alive(orch, launcher).await {
        info!(game_id = %game.id, launcher = %launcher_name, "Launcher is the game process");
        if game.remembered_process_name.is_none() {
            remember_process_name(orch, &game.id, &launcher_name).await;
        }
        return Detection::Monitor(Target::Spawned);
    }

    await_selection(orch, game, session, session_id, &launcher_name).await
}

async fn await_selection(
    orch: &SessionOrchestrator,
    game: &Game,
    session: &TrackingSession,
    session_id: &SessionId,
    launcher_name: &str,
) -> Detection {
    session.transition(TrackingState::AwaitingUserSelection);
    let slot = orch.selections.open(&game.id);

    info!(game_id = %game.id, launcher = %launcher_name, "Launcher exited, asking user to pick the game process");
    orch.events.publish(TrackerEvent::ProcessSelectionRequired {
        game_id: game.id.clone(),
        session_id: session_id.clone(),
        launcher_name: launcher_name.to_string(),
    });

    let selected = match slot
        .wait(orch.config.selection_timeout(), session.cancel_token())
        .await
    {
        Ok(name) => name,
        Err(SelectionMiss::TimedOut) => {
            warn!(game_id = %game.id, "No process selected in time, discarding session");
            return Detection::Discard(DiscardReason::SelectionTimedOut);
        }
        Err(SelectionMiss::Cancelled) => {
            info!(game_id = %game.id, "Session cancelled while awaiting selection");
            return Detection::Discard(DiscardReason::SelectionCancelled);
        }
    };

    remember_process_name(orch, &game.id, &selected).await;
    match find_process(orch, &selected).await {
        Some(pid) => Detection::Monitor(Target::External(pid)),
        None => {
            warn!(
                game_id = %game.id,
                process_name = %selected,
                "Selected process is not running, finalizing"
            );
            Detection::Monitor(Target::Unmonitorable)
        }
    }
}

async fn monitor(
    orch: &SessionOrchestrator,
    game: &Game,
    session: &Arc<TrackingSession>,
    mut launcher: Box<dyn LaunchHandle>,
    target: Target,
) {
    let pid = match target {
        Target::Spawned => launcher.get_pid(),
        Target::External(pid) => Some(pid),
        Target::Unmonitorable => None,
    };
    if let Some(pid) = pid {
        session.set_process_id(pid);
        if orch.config.counts_active_time_only(game.use_active_time_only) {
            orch.active_time.start_tracking(session, pid);
        }
    }

    let cancel = session.cancel_token();
    let ceiling = orch.config.session_ceiling();

    match target {
        Target::Spawned => {
            session.transition(TrackingState::MonitoringSpawned);
            if let Some(pid) = pid {
                publish_monitoring(orch, &game.id, pid, MonitoringPath::Spawned);
            }

            tokio::select! {
                status = launcher.wait() => match status {
                    Ok(status) => info!(game_id = %game.id, exit_status = %status, "Game process exited"),
                    Err(e) => warn!(game_id = %game.id, error = %e, "Waiting on game process failed"),
                },
                _ = tokio::time::sleep(ceiling) => warn!(game_id = %game.id, "Session ceiling reached, finalizing"),
                _ = cancel.cancelled() => info!(game_id = %game.id, "Session cancelled, finalizing"),
            }
        }
        Target::External(pid) => {
            session.transition(TrackingState::MonitoringExternal);
            // The launcher is no longer of interest; dropping it does not kill it
            drop(launcher);

            let (watcher, exit) = match ProcessWatcher::start(
                &*orch.backend.waiter,
                pid,
                orch.config.watcher_wait_slice(),
            ) {
                Ok(started) => started,
                Err(e) => {
                    warn!(game_id = %game.id, pid = %pid, error = %e, "Cannot watch game process, finalizing");
                    return;
                }
            };
            publish_monitoring(orch, &game.id, pid, MonitoringPath::External);

            tokio::select! {
                cause = exit.recv() => info!(game_id = %game.id, pid = %pid, cause = ?cause, "Game process exited"),
                _ = tokio::time::sleep(ceiling) => warn!(game_id = %game.id, "Session ceiling reached, finalizing"),
                _ = cancel.cancelled() => info!(game_id = %game.id, "Session cancelled, finalizing"),
            }
            watcher.stop();
        }
        Target::Unmonitorable => {}
    }
}

/// Close out a monitored session and return the terminal event
async fn finalize(
    orch: &SessionOrchestrator,
    game: &Game,
    session: &TrackingSession,
    session_id: &SessionId,
    started_at: DateTime<Utc>,
) -> TrackerEvent {
    session.transition(TrackingState::Finalizing);
    let ended_at = orch.clock.now();
    let active_seconds = orch.active_time.stop_tracking(&game.id).await;

    let duration_secs = if orch.config.counts_active_time_only(game.use_active_time_only) {
        i64::try_from(active_seconds).unwrap_or(i64::MAX)
    } else {
        (ended_at - started_at).num_seconds().max(0)
    };

    let min_secs = i64::try_from(orch.config.min_session_secs).unwrap_or(i64::MAX);
    if duration_secs < min_secs {
        info!(game_id = %game.id, duration_secs, "Session too short, discarding");
        return discard(orch, &game.id, session_id, DiscardReason::TooShort).await;
    }

    match orch.store.update(session_id, ended_at, duration_secs).await {
        Ok(()) => info!(
            game_id = %game.id,
            session_id = %session_id,
            duration_secs,
            "Session recorded"
        ),
        Err(e) => error!(
            game_id = %game.id,
            session_id = %session_id,
            error = %e,
            "Failed to record finished session"
        ),
    }

    if orch.config.auto_backup && game.save_path.is_some() {
        trigger_backup(orch, &game.id);
    }

    TrackerEvent::SessionFinalized {
        game_id: game.id.clone(),
        session_id: session_id.clone(),
        duration_secs,
    }
}

async fn discard(
    orch: &SessionOrchestrator,
    game_id: &GameId,
    session_id: &SessionId,
    reason: DiscardReason,
) -> TrackerEvent {
    if let Err(e) = orch.store.delete(session_id).await {
        warn!(game_id = %game_id, session_id = %session_id, error = %e, "Failed to delete session row");
    }
    debug!(game_id = %game_id, session_id = %session_id, reason = %reason, "Session discarded");

    TrackerEvent::SessionDiscarded {
        game_id: game_id.clone(),
        session_id: session_id.clone(),
        reason,
    }
}

fn trigger_backup(orch: &SessionOrchestrator, game_id: &GameId) {
    let backup = orch.backup.clone();
    let game_id = game_id.clone();
    tokio::spawn(async move {
        match backup.create_backup(&game_id).await {
            Ok(()) => info!(game_id = %game_id, "Save data backed up"),
            Err(e) => warn!(game_id = %game_id, error = %e, "Save data backup failed"),
        }
    });
}

fn publish_monitoring(orch: &SessionOrchestrator, game_id: &GameId, pid: ProcessId, path: MonitoringPath) {
    orch.events.publish(TrackerEvent::MonitoringStarted {
        game_id: game_id.clone(),
        pid,
        path,
    });
}

async fn launcher_alive(orch: &SessionOrchestrator, launcher: &mut dyn LaunchHandle) -> bool {
    match launcher.try_wait().await {
        Ok(None) => true,
        Ok(Some(status)) => {
            debug!(launcher = %launcher.get_name(), exit_status = %status, "Launcher already exited");
            false
        }
        Err(e) => {
            warn!(launcher = %launcher.get_name(), error = %e, "Could not poll launcher, probing process table");
            launcher
                .get_pid()
                .is_some_and(|pid| orch.backend.table.is_alive(pid))
        }
    }
}

/// Process-table scans can be slow, so they run off the async workers
async fn find_process(orch: &SessionOrchestrator, name: &str) -> Option<ProcessId> {
    let table = orch.backend.table.clone();
    let name = name.to_string();
    match tokio::task::spawn_blocking(move || table.find_pid_by_name(&name)).await {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "Process table lookup failed");
            None
        }
    }
}

async fn remember_process_name(orch: &SessionOrchestrator, game_id: &GameId, name: &str) {
    match orch.catalog.set_remembered_process_name(game_id, name).await {
        Ok(()) => debug!(game_id = %game_id, process_name = %name, "Remembered game process name"),
        Err(e) => warn!(game_id = %game_id, error = %e, "Failed to remember game process name"),
    }
}
