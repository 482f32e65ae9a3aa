//! Scripted process world and in-memory collaborators for orchestrator tests
#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use playtime::{
    BackupTrigger, Clock, ForegroundQuery, Game, GameCatalog, GameId, LaunchHandle, LaunchSpec,
    PlaySession, ProcessBackend, ProcessError, ProcessId, ProcessLauncher, ProcessTable,
    ProcessWaiter, SessionId, SessionOrchestrator, SessionStore, TrackerConfig, TrackerEvent,
    WaitHandle, WaitOutcome, process_names_match,
};
use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .try_init();
}

/// Real-time policy shrunk so scenarios finish in milliseconds. Durations that
/// matter for the recorded row come from [`ManualClock`] instead.
pub fn fast_config() -> TrackerConfig {
    TrackerConfig {
        settle_delay_ms: 20,
        focus_poll_interval_ms: 10,
        focus_revalidate_interval_ms: 100,
        active_tick_ms: 10,
        watcher_wait_slice_ms: 10,
        selection_timeout_secs: 5,
        session_ceiling_secs: 30,
        ..TrackerConfig::default()
    }
}

fn exit_success() -> ExitStatus {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(0)
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::ExitStatusExt;
        ExitStatus::from_raw(0)
    }
}

/// A process in the scripted world
pub struct FakeProcess {
    pub pid: ProcessId,
    pub name: String,
    alive: watch::Sender<bool>,
}

impl FakeProcess {
    pub fn exit(&self) {
        self.alive.send_replace(false);
    }

    pub fn is_alive(&self) -> bool {
        *self.alive.borrow()
    }
}

/// Process table, waiter and foreground owner of a pretend OS
pub struct FakeWorld {
    processes: Mutex<Vec<Arc<FakeProcess>>>,
    next_pid: AtomicU32,
    pub table_searches: AtomicUsize,
    pub open_handles: AtomicUsize,
    foreground: Mutex<Option<ProcessId>>,
    foreground_supported: AtomicBool,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(Vec::new()),
            next_pid: AtomicU32::new(1000),
            table_searches: AtomicUsize::new(0),
            open_handles: AtomicUsize::new(0),
            foreground: Mutex::new(None),
            foreground_supported: AtomicBool::new(true),
        })
    }

    pub fn start_process(&self, name: &str) -> Arc<FakeProcess> {
        let (alive, _) = watch::channel(true);
        let process = Arc::new(FakeProcess {
            pid: ProcessId(self.next_pid.fetch_add(1, Ordering::SeqCst)),
            name: name.to_string(),
            alive,
        });
        self.processes.lock().push(process.clone());
        process
    }

    pub fn process_named(&self, name: &str) -> Option<Arc<FakeProcess>> {
        self.processes
            .lock()
            .iter()
            .rev()
            .find(|p| process_names_match(&p.name, name))
            .cloned()
    }

    fn process(&self, pid: ProcessId) -> Option<Arc<FakeProcess>> {
        self.processes.lock().iter().find(|p| p.pid == pid).cloned()
    }

    pub fn focus(&self, pid: Option<ProcessId>) {
        *self.foreground.lock() = pid;
    }

    pub fn disable_foreground(&self) {
        self.foreground_supported.store(false, Ordering::SeqCst);
    }

    pub fn searches(&self) -> usize {
        self.table_searches.load(Ordering::SeqCst)
    }
}

impl ProcessTable for FakeWorld {
    fn find_pid_by_name(&self, name: &str) -> Option<ProcessId> {
        self.table_searches.fetch_add(1, Ordering::SeqCst);
        self.processes
            .lock()
            .iter()
            .filter(|p| p.is_alive() && process_names_match(&p.name, name))
            .map(|p| p.pid)
            .min()
    }

    fn is_alive(&self, pid: ProcessId) -> bool {
        self.process(pid).is_some_and(|p| p.is_alive())
    }
}

struct FakeWaitHandle {
    process: Arc<FakeProcess>,
    world: Arc<FakeWorld>,
}

impl WaitHandle for FakeWaitHandle {
    fn wait_timeout(&mut self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now() + timeout;
        while self.process.is_alive() {
            if Instant::now() >= deadline {
                return WaitOutcome::TimedOut;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        WaitOutcome::Exited
    }
}

impl Drop for FakeWaitHandle {
    fn drop(&mut self) {
        self.world.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Waiter bound to the world; opening a dead process fails
pub struct FakeWaiter(pub Arc<FakeWorld>);

impl ProcessWaiter for FakeWaiter {
    fn open(&self, pid: ProcessId) -> Result<Box<dyn WaitHandle>, ProcessError> {
        match self.0.process(pid) {
            Some(process) if process.is_alive() => {
                self.0.open_handles.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(FakeWaitHandle {
                    process,
                    world: self.0.clone(),
                }))
            }
            _ => Err(ProcessError::ProcessNotFound(pid)),
        }
    }
}

impl ForegroundQuery for FakeWorld {
    fn foreground_pid(&self) -> Result<Option<ProcessId>, ProcessError> {
        if !self.foreground_supported.load(Ordering::SeqCst) {
            return Err(ProcessError::Unsupported("fake foreground".to_string()));
        }
        Ok(*self.foreground.lock())
    }
}

struct FakeChild {
    process: Arc<FakeProcess>,
}

#[async_trait]
impl LaunchHandle for FakeChild {
    fn get_pid(&self) -> Option<ProcessId> {
        Some(self.process.pid)
    }

    fn get_name(&self) -> &str {
        &self.process.name
    }

    async fn try_wait(&mut self) -> Result<Option<ExitStatus>> {
        Ok((!self.process.is_alive()).then(exit_success))
    }

    async fn wait(&mut self) -> Result<ExitStatus> {
        let mut alive = self.process.alive.subscribe();
        alive.wait_for(|alive| !*alive).await?;
        Ok(exit_success())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchBehavior {
    /// The spawned process is the game and keeps running
    StaysAlive,
    /// The launcher hands off and exits before detection
    ExitsImmediately,
    /// The OS refuses to spawn
    Fails,
}

pub struct FakeLauncher {
    world: Arc<FakeWorld>,
    behavior: Mutex<LaunchBehavior>,
    pub spawned: AtomicUsize,
}

impl FakeLauncher {
    pub fn set_behavior(&self, behavior: LaunchBehavior) {
        *self.behavior.lock() = behavior;
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
    async fn spawn(&self, spec: &LaunchSpec) -> Result<Box<dyn LaunchHandle>, ProcessError> {
        let behavior = *self.behavior.lock();
        if behavior == LaunchBehavior::Fails {
            return Err(ProcessError::SpawnFailed(format!(
                "{}: No such file or directory",
                spec.executable.display()
            )));
        }

        self.spawned.fetch_add(1, Ordering::SeqCst);
        let process = self.world.start_process(&spec.executable_name());
        if behavior == LaunchBehavior::ExitsImmediately {
            process.exit();
        }
        Ok(Box::new(FakeChild { process }))
    }
}

#[derive(Default)]
pub struct MemorySessionStore {
    rows: Mutex<HashMap<SessionId, PlaySession>>,
    next_id: AtomicU32,
    pub fail_create: AtomicBool,
    pub panic_on_create: AtomicBool,
    pub create_delay: Mutex<Option<Duration>>,
    pub fail_update: AtomicBool,
}

impl MemorySessionStore {
    pub fn row(&self, id: &SessionId) -> Option<PlaySession> {
        self.rows.lock().get(id).cloned()
    }

    pub fn rows(&self) -> Vec<PlaySession> {
        self.rows.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn create_pending(&self, game_id: &GameId, start_time: DateTime<Utc>) -> Result<SessionId> {
        let delay = *self.create_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_create.load(Ordering::SeqCst) {
            panic!("session store exploded");
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(anyhow!("database is locked"));
        }
        let id = SessionId(format!("session-{}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.rows.lock().insert(
            id.clone(),
            PlaySession::pending(id.clone(), game_id.clone(), start_time),
        );
        Ok(id)
    }

    async fn update(
        &self,
        session_id: &SessionId,
        end_time: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<()> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(anyhow!("disk I/O error"));
        }
        let mut rows = self.rows.lock();
        let row = rows
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("no session {session_id}"))?;
        row.end_time = end_time;
        row.duration_secs = duration_secs;
        Ok(())
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        self.rows.lock().remove(session_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    games: Mutex<HashMap<GameId, Game>>,
    pub panic_on_remember: AtomicBool,
}

impl MemoryCatalog {
    pub fn insert(&self, game: Game) {
        self.games.lock().insert(game.id.clone(), game);
    }

    pub fn game(&self, id: &GameId) -> Option<Game> {
        self.games.lock().get(id).cloned()
    }

    pub fn remembered(&self, id: &GameId) -> Option<String> {
        self.game(id).and_then(|g| g.remembered_process_name)
    }
}

#[async_trait]
impl GameCatalog for MemoryCatalog {
    async fn get_game(&self, game_id: &GameId) -> Result<Option<Game>> {
        Ok(self.game(game_id))
    }

    async fn set_remembered_process_name(&self, game_id: &GameId, process_name: &str) -> Result<()> {
        if self.panic_on_remember.load(Ordering::SeqCst) {
            panic!("catalog exploded");
        }
        let mut games = self.games.lock();
        let game = games
            .get_mut(game_id)
            .ok_or_else(|| anyhow!("unknown game {game_id}"))?;
        game.remembered_process_name = Some(process_name.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingBackup {
    calls: Mutex<Vec<GameId>>,
    pub fail: AtomicBool,
}

impl RecordingBackup {
    pub fn calls(&self) -> Vec<GameId> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BackupTrigger for RecordingBackup {
    async fn create_backup(&self, game_id: &GameId) -> Result<()> {
        self.calls.lock().push(game_id.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("cloud storage unreachable"));
        }
        Ok(())
    }
}

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self {
            now: Mutex::new(Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap()),
        }
    }
}

impl ManualClock {
    pub fn advance_secs(&self, secs: i64) {
        *self.now.lock() += chrono::Duration::seconds(secs);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// An orchestrator wired to the scripted world
pub struct Harness {
    pub world: Arc<FakeWorld>,
    pub launcher: Arc<FakeLauncher>,
    pub store: Arc<MemorySessionStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub backup: Arc<RecordingBackup>,
    pub clock: Arc<ManualClock>,
    pub orchestrator: SessionOrchestrator,
}

impl Harness {
    pub fn new(config: TrackerConfig) -> Self {
        init_tracing();
        let world = FakeWorld::new();
        let launcher = Arc::new(FakeLauncher {
            world: world.clone(),
            behavior: Mutex::new(LaunchBehavior::StaysAlive),
            spawned: AtomicUsize::new(0),
        });
        let backend = ProcessBackend {
            launcher: launcher.clone(),
            table: world.clone(),
            waiter: Arc::new(FakeWaiter(world.clone())),
            foreground: world.clone(),
        };

        let store = Arc::new(MemorySessionStore::default());
        let catalog = Arc::new(MemoryCatalog::default());
        let backup = Arc::new(RecordingBackup::default());
        let clock = Arc::new(ManualClock::default());

        let orchestrator = SessionOrchestrator::new(
            config,
            backend,
            store.clone(),
            catalog.clone(),
            backup.clone(),
        )
        .unwrap()
        .with_clock(clock.clone());

        Self {
            world,
            launcher,
            store,
            catalog,
            backup,
            clock,
            orchestrator,
        }
    }

    /// Register a game whose executable is `/games/<id>/<exe>`
    pub fn add_game(&self, id: &str, exe: &str) -> GameId {
        let game_id = GameId::from(id);
        let game = Game::new(game_id.clone(), id, format!("/games/{id}/{exe}"));
        self.catalog.insert(game);
        game_id
    }

    pub fn update_game(&self, id: &GameId, edit: impl FnOnce(&mut Game)) {
        let mut game = self.catalog.game(id).unwrap();
        edit(&mut game);
        self.catalog.insert(game);
    }
}

/// Next event matching `pred`, failing the test after a few seconds
pub async fn next_event(
    rx: &mut broadcast::Receiver<TrackerEvent>,
    pred: impl Fn(&TrackerEvent) -> bool,
) -> TrackerEvent {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let event = rx.recv().await.expect("event bus closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for tracker event")
}

pub async fn terminal_event(rx: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    next_event(rx, TrackerEvent::is_terminal).await
}

pub async fn monitoring_started(rx: &mut broadcast::Receiver<TrackerEvent>) -> TrackerEvent {
    next_event(rx, |e| matches!(e, TrackerEvent::MonitoringStarted { .. })).await
}

/// Poll `cond` until it holds or a few seconds pass
pub async fn eventually(cond: impl Fn() -> bool) -> bool {
    for _ in 0..500 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
