use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Identifier of a game in the library catalog
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub String);

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for GameId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token identifying a persisted play session row
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for SessionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog entry as the tracker consumes it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    pub id: GameId,
    pub name: String,
    pub launch_path: PathBuf,
    #[serde(default)]
    pub launch_args: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Process name learned from an earlier detection or user selection
    #[serde(default)]
    pub remembered_process_name: Option<String>,
    /// Per-game override of [`crate::TrackerConfig::active_time_only`]
    #[serde(default)]
    pub use_active_time_only: Option<bool>,
    #[serde(default)]
    pub save_path: Option<PathBuf>,
}

impl Game {
    pub fn new(id: GameId, name: impl Into<String>, launch_path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            name: name.into(),
            launch_path: launch_path.into(),
            launch_args: Vec::new(),
            working_directory: None,
            remembered_process_name: None,
            use_active_time_only: None,
            save_path: None,
        }
    }
}

/// A persisted play-time interval.
///
/// `duration_secs` equals `end_time - start_time` for wall-clock sessions.
/// With active-only tracking it is the number of focused seconds, which may
/// be less than the wall-clock span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaySession {
    pub id: SessionId,
    pub game_id: GameId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_secs: i64,
}

impl PlaySession {
    /// Placeholder row written at launch: zero length marks "in progress"
    pub fn pending(id: SessionId, game_id: GameId, start_time: DateTime<Utc>) -> Self {
        Self {
            id,
            game_id,
            start_time,
            end_time: start_time,
            duration_secs: 0,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.end_time == self.start_time && self.duration_secs == 0
    }
}

/// Durable storage for play-session rows
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a placeholder row and return its id
    async fn create_pending(&self, game_id: &GameId, start_time: DateTime<Utc>)
        -> Result<SessionId>;

    /// Write the final end time and duration of a session
    async fn update(
        &self,
        session_id: &SessionId,
        end_time: DateTime<Utc>,
        duration_secs: i64,
    ) -> Result<()>;

    /// Remove a session row entirely
    async fn delete(&self, session_id: &SessionId) -> Result<()>;
}

/// Read access to game metadata plus the single write-back the tracker needs
#[async_trait]
pub trait GameCatalog: Send + Sync {
    async fn get_game(&self, game_id: &GameId) -> Result<Option<Game>>;

    async fn set_remembered_process_name(&self, game_id: &GameId, process_name: &str)
        -> Result<()>;
}

/// Save-data backup side effect invoked after a session is kept
#[async_trait]
pub trait BackupTrigger: Send + Sync {
    async fn create_backup(&self, game_id: &GameId) -> Result<()>;
}

/// Backup trigger used when no backup subsystem is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct NoBackup;

#[async_trait]
impl BackupTrigger for NoBackup {
    async fn create_backup(&self, _game_id: &GameId) -> Result<()> {
        Ok(())
    }
}

/// Wall-clock source for session start and end times
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
